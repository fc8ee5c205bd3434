/*! Elemental isotope tables used to synthesize theoretical isotope distributions */
use std::sync::Arc;

use num_traits::Float;

/// The mass of H+, a hydrogen atom minus an electron
pub const PROTON: f64 = 1.00727646688;

/// The rest mass of a single electron
pub const ELECTRON: f64 = 0.00054858;

/// The mass difference between isotopes `C[13]` and `C[12]`. Not precisely universal, but the
/// majority of expected applications are carbon-based
pub const NEUTRON_SHIFT: f64 = 1.0033548378;

const ISOTOPIC_SHIFT: [f64; 10] = [
    NEUTRON_SHIFT / 1.0,
    NEUTRON_SHIFT / 2.0,
    NEUTRON_SHIFT / 3.0,
    NEUTRON_SHIFT / 4.0,
    NEUTRON_SHIFT / 5.0,
    NEUTRON_SHIFT / 6.0,
    NEUTRON_SHIFT / 7.0,
    NEUTRON_SHIFT / 8.0,
    NEUTRON_SHIFT / 9.0,
    NEUTRON_SHIFT / 10.0,
];

/// Get the m/z difference between isotopic peaks at a given charge state
#[inline(always)]
pub fn isotopic_shift(charge: i32) -> f64 {
    if charge > 0 && charge < 11 {
        ISOTOPIC_SHIFT[(charge - 1) as usize]
    } else {
        NEUTRON_SHIFT / charge as f64
    }
}

/// Convert an m/z and charge into a neutral mass
#[inline(always)]
pub fn neutral_mass(mz: f64, charge: i32) -> f64 {
    (mz - PROTON) * charge as f64
}

/// Convert a neutral mass and charge into an m/z
#[inline(always)]
pub fn mass_charge_ratio(mass: f64, charge: i32) -> f64 {
    (mass + charge as f64 * PROTON) / charge as f64
}

pub(crate) fn isclose<T: Float>(a: T, b: T, delta: T) -> bool {
    (a - b).abs() < delta
}

/// One naturally occurring isotope of an element
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Isotope {
    /// The exact mass of the isotope
    pub mass: f64,
    /// The natural abundance of the isotope, as a fraction of all
    /// isotopes of the element
    pub abundance: f64,
    /// The mass rounded to the nearest integer, the nominal mass
    pub int_mass: i32,
}

/// An element and its isotopes, ordered lightest first
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub symbol: &'static str,
    pub isotopes: Vec<Isotope>,
}

impl Element {
    /// The average atomic mass, the abundance-weighted mean over all isotopes
    pub fn average_mass(&self) -> f64 {
        self.isotopes.iter().map(|i| i.mass * i.abundance).sum()
    }

    /// The mass of the lightest isotope
    pub fn monoisotopic_mass(&self) -> f64 {
        self.isotopes.first().map(|i| i.mass).unwrap_or_default()
    }

    /// The index of the most abundant isotope
    pub fn most_abundant_isotope(&self) -> usize {
        self.isotopes
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.abundance.total_cmp(&b.abundance))
            .map(|(i, _)| i)
            .unwrap_or_default()
    }

    /// The variance of the exact mass and of the nominal mass under the
    /// abundance distribution, per atom
    pub fn mass_variances(&self) -> (f64, f64) {
        let mut avg = 0.0;
        let mut int_avg = 0.0;
        for iso in self.isotopes.iter() {
            avg += iso.mass * iso.abundance;
            int_avg += iso.int_mass as f64 * iso.abundance;
        }
        let mut var = 0.0;
        let mut int_var = 0.0;
        for iso in self.isotopes.iter() {
            var += (iso.mass - avg).powi(2) * iso.abundance;
            int_var += (iso.int_mass as f64 - int_avg).powi(2) * iso.abundance;
        }
        (var, int_var)
    }
}

/// An artificial isotope enrichment to apply to one element, e.g. for
/// isotopically labeled samples
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Enrichment {
    /// The atomic number of the element to enrich
    pub element: usize,
    /// The index of the isotope to concentrate abundance in
    pub isotope: usize,
    /// The fraction of the element's abundance forced into the chosen isotope
    pub fraction: f64,
}

impl Enrichment {
    pub fn new(element: usize, isotope: usize, fraction: f64) -> Self {
        Self {
            element,
            isotope,
            fraction,
        }
    }
}

/// The periodic table of elements and their isotopes.
///
/// The baseline table is immutable once constructed. Enrichment produces a
/// derived copy rather than mutating in place, so "resetting" is simply
/// dropping the derived table.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementTable {
    elements: Vec<Element>,
}

impl Default for ElementTable {
    fn default() -> Self {
        let elements = ELEMENT_DATA
            .iter()
            .map(|(symbol, isotopes)| Element {
                symbol: *symbol,
                isotopes: isotopes
                    .iter()
                    .map(|(mass, abundance)| Isotope {
                        mass: *mass,
                        abundance: *abundance,
                        int_mass: (*mass + 0.5) as i32,
                    })
                    .collect(),
            })
            .collect();
        Self { elements }
    }
}

impl ElementTable {
    /// Create a shared handle to the default table
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, z: usize) -> Option<&Element> {
        self.elements.get(z)
    }

    /// Look up an element's index by symbol
    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.symbol == symbol)
    }

    /// Look up an element's average atomic mass by symbol
    pub fn average_mass_of(&self, symbol: &str) -> Option<f64> {
        self.index_of(symbol).map(|z| self.elements[z].average_mass())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.elements.iter()
    }

    /// Derive a working copy of the table with the given enrichments applied.
    ///
    /// For each override, existing abundances are first normalized against the
    /// element's most abundant isotope, then scaled by `1 - fraction` with
    /// `fraction` added to the chosen isotope, and finally re-normalized so
    /// the element's abundances sum to 1.
    pub fn enriched(&self, overrides: &[Enrichment]) -> Self {
        let mut table = self.clone();
        for enrich in overrides {
            let Some(element) = table.elements.get_mut(enrich.element) else {
                continue;
            };
            if enrich.isotope >= element.isotopes.len() {
                continue;
            }
            let reference = element.isotopes[element.most_abundant_isotope()].abundance;
            for iso in element.isotopes.iter_mut() {
                iso.abundance /= reference;
                iso.abundance *= 1.0 - enrich.fraction;
            }
            element.isotopes[enrich.isotope].abundance += enrich.fraction;
            let total: f64 = element.isotopes.iter().map(|i| i.abundance).sum();
            for iso in element.isotopes.iter_mut() {
                iso.abundance /= total;
            }
        }
        table
    }
}

impl std::ops::Index<usize> for ElementTable {
    type Output = Element;

    fn index(&self, index: usize) -> &Self::Output {
        &self.elements[index]
    }
}

include!("element_data.rs");

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lookup() {
        let table = ElementTable::default();
        let z = table.index_of("C").unwrap();
        assert_eq!(z, 6);
        assert_eq!(table[z].symbol, "C");
        assert_eq!(table[z].isotopes.len(), 2);
        assert_eq!(table[z].isotopes[0].int_mass, 12);
        assert!(table.index_of("Qq").is_none());
    }

    #[test]
    fn test_average_masses() {
        let table = ElementTable::default();
        assert!(isclose(table.average_mass_of("H").unwrap(), 1.00794, 1e-3));
        assert!(isclose(table.average_mass_of("C").unwrap(), 12.011, 1e-3));
        assert!(isclose(table.average_mass_of("O").unwrap(), 15.9994, 1e-3));
        assert!(isclose(table.average_mass_of("S").unwrap(), 32.06, 5e-2));
    }

    #[test]
    fn test_abundances_normalized() {
        let table = ElementTable::default();
        for element in table.iter().skip(1) {
            let total: f64 = element.isotopes.iter().map(|i| i.abundance).sum();
            assert!(
                isclose(total, 1.0, 1e-4),
                "{} abundances sum to {total}",
                element.symbol
            );
        }
    }

    #[test]
    fn test_enrichment() {
        let table = ElementTable::default();
        let z = table.index_of("C").unwrap();
        let enriched = table.enriched(&[Enrichment::new(z, 1, 0.99)]);

        let element = &enriched[z];
        let total: f64 = element.isotopes.iter().map(|i| i.abundance).sum();
        assert!(isclose(total, 1.0, 1e-9));
        assert!(element.isotopes[1].abundance > 0.98);

        // the baseline is untouched
        assert!(table[z].isotopes[1].abundance < 0.02);
    }

    #[test]
    fn test_isotopic_shift() {
        assert!(isclose(isotopic_shift(1), NEUTRON_SHIFT, 1e-9));
        assert!(isclose(isotopic_shift(2), NEUTRON_SHIFT / 2.0, 1e-9));
        assert!(isclose(isotopic_shift(12), NEUTRON_SHIFT / 12.0, 1e-9));
    }

    #[test]
    fn test_mass_conversions() {
        let mass = neutral_mass(1000.0, 2);
        assert!(isclose(mass, 1997.9854, 1e-3));
        assert!(isclose(mass_charge_ratio(mass, 2), 1000.0, 1e-9));
    }
}
