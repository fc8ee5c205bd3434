/*! A Fourier transform isotope distribution calculator.

Given an elemental composition and a charge state, computes the theoretical
isotope distribution of the molecule. Each element's isotope abundances form
a polynomial in a formal frequency variable; the molecule's distribution is
the product of those polynomials raised to the per-element atom counts. The
product is evaluated directly in the frequency domain, in polar form, and a
single inverse transform recovers the abundance spectrum on an integer mass
lattice. Real masses are recovered by a variance-ratio rescaling between the
integer lattice and the exact masses.

The method is Rockwood's Mercury algorithm [^1].

# References
[^1]: Rockwood, A. L., Van Orden, S. L., Smith, R. D. (1995). Rapid Calculation
      of Isotope Distributions. Analytical Chemistry, 67(15), 2699-2704.
      <https://doi.org/10.1021/ac00111a031>
*/
use std::sync::Arc;

use num_complex::Complex;
use rustfft::FftPlanner;
use thiserror::Error;

use crate::elements::{ElementTable, Enrichment, ELECTRON, PROTON};

/// An error that occurs while interpreting a molecular formula
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("The formula was empty")]
    Empty,
    #[error("Unknown element symbol {0:?}")]
    UnknownElement(String),
    #[error("The character {0:?} is not valid in a molecular formula")]
    InvalidCharacter(char),
    #[error("The atom count for element {0:?} could not be read")]
    InvalidCount(String),
    #[error("The element {0:?} appears more than once")]
    DuplicateElement(String),
}

/// An elemental composition as (atomic number, atom count) pairs
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Composition(Vec<(usize, i32)>);

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty() || self.0.iter().all(|(_, n)| *n <= 0)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (usize, i32)> {
        self.0.iter()
    }

    pub fn get(&self, element: usize) -> i32 {
        self.0
            .iter()
            .find(|(z, _)| *z == element)
            .map(|(_, n)| *n)
            .unwrap_or_default()
    }

    /// Add `count` atoms of `element`, merging with any existing entry
    pub fn add(&mut self, element: usize, count: i32) {
        match self.0.iter_mut().find(|(z, _)| *z == element) {
            Some((_, n)) => *n += count,
            None => self.0.push((element, count)),
        }
    }

    /// The sum of the lightest-isotope masses, the exact neutral monoisotopic mass
    pub fn monoisotopic_mass(&self, table: &ElementTable) -> f64 {
        self.0
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(z, n)| table[*z].monoisotopic_mass() * *n as f64)
            .sum()
    }

    /// Render the composition as a formula string in ascending atomic number
    /// order, skipping non-positive counts
    pub fn to_formula(&self, table: &ElementTable) -> String {
        let mut entries: Vec<_> = self.0.iter().filter(|(_, n)| *n > 0).collect();
        entries.sort_by_key(|(z, _)| *z);
        let mut out = String::new();
        for (z, n) in entries {
            out.push_str(table[*z].symbol);
            if *n != 1 {
                out.push_str(&n.to_string());
            }
        }
        out
    }
}

impl FromIterator<(usize, i32)> for Composition {
    fn from_iter<T: IntoIterator<Item = (usize, i32)>>(iter: T) -> Self {
        let mut this = Self::default();
        for (z, n) in iter {
            this.add(z, n);
        }
        this
    }
}

/// Parse a molecular formula of the form `C14H21N4O4`: a sequence of element
/// symbols (an uppercase letter with an optional lowercase letter) each
/// followed by an optional atom count. No grouping or charge annotations.
pub fn parse_formula(table: &ElementTable, formula: &str) -> Result<Composition, FormulaError> {
    if formula.is_empty() {
        return Err(FormulaError::Empty);
    }
    let bytes = formula.as_bytes();
    let mut comp = Composition::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if !bytes[pos].is_ascii_uppercase() {
            return Err(FormulaError::InvalidCharacter(bytes[pos] as char));
        }
        let mut end = pos + 1;
        if end < bytes.len() && bytes[end].is_ascii_lowercase() {
            end += 1;
        }
        let symbol = &formula[pos..end];
        let z = table
            .index_of(symbol)
            .ok_or_else(|| FormulaError::UnknownElement(symbol.to_string()))?;
        pos = end;
        let digits_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        let count: i32 = if digits_start == pos {
            1
        } else {
            formula[digits_start..pos]
                .parse()
                .map_err(|_| FormulaError::InvalidCount(symbol.to_string()))?
        };
        if comp.get(z) != 0 {
            return Err(FormulaError::DuplicateElement(symbol.to_string()));
        }
        comp.add(z, count);
    }
    Ok(comp)
}

/// One peak of a computed isotope distribution
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DistributionPeak {
    /// The m/z of the peak at the requested charge state
    pub mz: f64,
    /// Abundance relative to the most abundant peak, on a 0-100 scale
    pub relative: f64,
    /// Abundance as a fraction of the total distribution, summing to 1
    pub fraction: f64,
}

/// A computed isotope distribution
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IsotopeDistribution {
    /// The distribution peaks in ascending m/z order
    pub peaks: Vec<DistributionPeak>,
    /// The exact neutral monoisotopic mass of the composition
    pub zero_mass: f64,
    /// The monoisotopic m/z at the requested charge state
    pub mono_mz: f64,
    /// The electron-corrected average molecular weight
    pub average_mass: f64,
}

impl IsotopeDistribution {
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DistributionPeak> {
        self.peaks.iter()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct MolecularWeights {
    average: f64,
    int_average: f64,
    int_mw: i32,
    int_mono: i32,
    int_max: i32,
}

fn calc_weights(table: &ElementTable, composition: &Composition) -> MolecularWeights {
    let mut w = MolecularWeights::default();
    for (z, count) in composition.iter().filter(|(_, n)| *n > 0) {
        let element = &table[*z];
        let n = *count as f64;
        for (k, iso) in element.isotopes.iter().enumerate() {
            w.average += n * iso.mass * iso.abundance;
            w.int_average += n * iso.int_mass as f64 * iso.abundance;
            if k == 0 {
                w.int_mono += count * iso.int_mass;
            }
            if k == element.isotopes.len() - 1 {
                w.int_max += count * iso.int_mass;
            }
        }
    }
    w.average -= ELECTRON;
    w.int_average -= ELECTRON;
    w.int_mw = (w.int_average + 0.5) as i32;
    w
}

fn calc_variances(table: &ElementTable, composition: &Composition) -> (f64, f64) {
    let mut var = 0.0;
    let mut int_var = 0.0;
    for (z, count) in composition.iter().filter(|(_, n)| *n > 0) {
        let (v, iv) = table[*z].mass_variances();
        var += *count as f64 * v;
        int_var += *count as f64 * iv;
    }
    (var, int_var)
}

/// The number of lattice points needed to cover the distribution: four times
/// the largest power of two below `sqrt(1 + variance) * 10`, spanning well
/// past five standard deviations on either side
fn mass_range_points(variance: f64) -> usize {
    let points = (1.0 + variance).sqrt() * 10.0;
    let mut i = 1024usize;
    while i > 0 {
        if (i as f64) < points {
            return i * 4;
        }
        i /= 2;
    }
    4
}

/// Evaluate the frequency-domain product of the per-element isotope
/// polynomials over `n` lattice points, phase-shifted by `mass_shift`.
///
/// Per-element powers are applied analytically in polar coordinates, raising
/// the magnitude to the atom count and multiplying the angle by it.
fn frequency_domain(
    table: &ElementTable,
    composition: &Composition,
    n: usize,
    mass_shift: i32,
) -> Vec<Complex<f64>> {
    let mut data = Vec::with_capacity(n);
    for i in 0..n {
        let freq = if i < n / 2 {
            i as f64 / n as f64
        } else {
            (i as f64 - n as f64) / n as f64
        };
        let mut magnitude = 1.0f64;
        let mut angle = 0.0f64;
        for (z, count) in composition.iter().filter(|(_, c)| *c > 0) {
            let mut real = 0.0f64;
            let mut imag = 0.0f64;
            for iso in table[*z].isotopes.iter() {
                let x = std::f64::consts::TAU * iso.int_mass as f64 * freq;
                real += iso.abundance * x.cos();
                imag += iso.abundance * x.sin();
            }
            magnitude *= real.hypot(imag).powi(*count);
            angle += *count as f64 * imag.atan2(real);
        }
        let shift = std::f64::consts::TAU * mass_shift as f64 * freq;
        let value = Complex::from_polar(magnitude, angle) * Complex::from_polar(1.0, shift);
        data.push(value);
    }
    data
}

/// An isotope distribution calculator over a shared element table.
///
/// Enrichment state is per-calculator: [`Mercury::enrich`] derives a working
/// copy of the element table that subsequent computations use until
/// [`Mercury::reset`] discards it. Unrelated analyses should not share a
/// calculator without resetting in between.
#[derive(Debug, Clone)]
pub struct Mercury {
    baseline: Arc<ElementTable>,
    working: Option<ElementTable>,
    overrides: Vec<Enrichment>,
    zero_mass: f64,
    mono_mass: f64,
}

impl Mercury {
    pub fn new(table: Arc<ElementTable>) -> Self {
        Self {
            baseline: table,
            working: None,
            overrides: Vec::new(),
            zero_mass: 0.0,
            mono_mass: 0.0,
        }
    }

    /// Apply an artificial isotope enrichment to one element. The override
    /// persists across computations until [`Mercury::reset`] is called.
    pub fn enrich(&mut self, element: usize, isotope: usize, fraction: f64) {
        self.overrides.push(Enrichment::new(element, isotope, fraction));
        self.working = Some(self.baseline.enriched(&self.overrides));
    }

    /// Discard any enrichment overrides, restoring the baseline table
    pub fn reset(&mut self) {
        self.overrides.clear();
        self.working = None;
    }

    pub fn table(&self) -> &ElementTable {
        self.working.as_ref().unwrap_or(&self.baseline)
    }

    /// The exact neutral monoisotopic mass of the last computed distribution
    pub fn zero_mass(&self) -> f64 {
        self.zero_mass
    }

    /// The charge-adjusted monoisotopic m/z of the last computed distribution
    pub fn mono_mass(&self) -> f64 {
        self.mono_mass
    }

    /// Compute the isotope distribution of `formula` at `charge`.
    ///
    /// A charge of zero is treated as one. The formula must be non-empty and
    /// contain only known element symbols.
    pub fn distribution(
        &mut self,
        formula: &str,
        charge: i32,
    ) -> Result<IsotopeDistribution, FormulaError> {
        let composition = parse_formula(self.table(), formula)?;
        self.distribution_of(&composition, charge)
    }

    /// Compute the isotope distribution of an already-parsed composition
    pub fn distribution_of(
        &mut self,
        composition: &Composition,
        charge: i32,
    ) -> Result<IsotopeDistribution, FormulaError> {
        if composition.is_empty() {
            return Err(FormulaError::Empty);
        }
        let charge = if charge == 0 { 1 } else { charge };
        let table = self.working.as_ref().unwrap_or(&self.baseline);

        let weights = calc_weights(table, composition);
        let (var, int_var) = calc_variances(table, composition);
        let n = mass_range_points(var);

        self.zero_mass = composition.monoisotopic_mass(table);
        self.mono_mass = (self.zero_mass + charge as f64 * PROTON) / charge as f64;

        let mut buffer = frequency_domain(table, composition, n, -weights.int_mw);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);
        fft.process(&mut buffer);

        // Rescale the integer lattice onto exact masses. The lattice index j
        // wraps: the top half holds masses below the average integer weight.
        let ratio = if int_var == 0.0 {
            1.0
        } else {
            (var / int_var).sqrt()
        };
        let corrected = weights.int_average * ratio;
        let lattice_mass = |j: usize| -> f64 {
            let offset = if j >= n / 2 {
                j as f64 - n as f64
            } else {
                j as f64
            };
            (offset + weights.int_mw as f64) * ratio + weights.average - corrected
        };

        let z = charge as f64;
        let mut peaks: Vec<(f64, f64)> = Vec::new();
        for j in n / 2..n {
            let mass = lattice_mass(j);
            if ((mass + 0.5) as i32) < weights.int_mono {
                continue;
            }
            let mz = (mass + PROTON * z) / z;
            if (self.mono_mass - mz) * z > 0.5 {
                continue;
            }
            peaks.push((mz, buffer[j].re));
        }
        for j in 0..n / 2 {
            let mass = lattice_mass(j);
            if ((mass + 0.5) as i32) > weights.int_max {
                continue;
            }
            if buffer[j].re < 0.0 {
                break;
            }
            peaks.push(((mass + PROTON * z) / z, buffer[j].re));
        }

        let max = peaks.iter().map(|(_, a)| *a).fold(0.0f64, f64::max);
        let total: f64 = peaks.iter().map(|(_, a)| *a).sum();
        if max <= 0.0 || total <= 0.0 {
            return Ok(IsotopeDistribution {
                peaks: Vec::new(),
                zero_mass: self.zero_mass,
                mono_mz: self.mono_mass,
                average_mass: weights.average,
            });
        }

        let mut out = Vec::with_capacity(peaks.len());
        let mut last_mz = f64::NEG_INFINITY;
        for (mz, amplitude) in peaks {
            // the lattice is linear in index, so this only rejects pathological ties
            if mz <= last_mz {
                continue;
            }
            last_mz = mz;
            out.push(DistributionPeak {
                mz,
                relative: 100.0 * amplitude / max,
                fraction: amplitude / total,
            });
        }

        Ok(IsotopeDistribution {
            peaks: out,
            zero_mass: self.zero_mass,
            mono_mz: self.mono_mass,
            average_mass: weights.average,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::elements::isclose;

    fn mercury() -> Mercury {
        Mercury::new(ElementTable::shared())
    }

    #[test]
    fn test_parse_formula() {
        let table = ElementTable::default();
        let comp = parse_formula(&table, "C6H12O6").unwrap();
        assert_eq!(comp.get(6), 6);
        assert_eq!(comp.get(1), 12);
        assert_eq!(comp.get(8), 6);

        let comp = parse_formula(&table, "CH4").unwrap();
        assert_eq!(comp.get(6), 1);
        assert_eq!(comp.get(1), 4);

        let comp = parse_formula(&table, "NaCl").unwrap();
        assert_eq!(comp.get(11), 1);
        assert_eq!(comp.get(17), 1);

        assert_eq!(parse_formula(&table, ""), Err(FormulaError::Empty));
        assert_eq!(
            parse_formula(&table, "c6"),
            Err(FormulaError::InvalidCharacter('c'))
        );
        assert_eq!(
            parse_formula(&table, "12C"),
            Err(FormulaError::InvalidCharacter('1'))
        );
        assert_eq!(
            parse_formula(&table, "C6Jq2"),
            Err(FormulaError::UnknownElement("Jq".into()))
        );
        assert_eq!(
            parse_formula(&table, "C2H6C"),
            Err(FormulaError::DuplicateElement("C".into()))
        );
    }

    #[test]
    fn test_formula_rendering() {
        let table = ElementTable::default();
        let comp: Composition = [(6, 44), (1, 70), (7, 12), (8, 13)].into_iter().collect();
        assert_eq!(comp.to_formula(&table), "H70C44N12O13");
        assert!(isclose(comp.monoisotopic_mass(&table), 974.5185, 1e-3));
    }

    #[test]
    fn test_glucose_distribution() {
        let mut calc = mercury();
        let dist = calc.distribution("C6H12O6", 1).unwrap();

        assert!(isclose(dist.peaks[0].mz, 181.0707, 1e-3));
        assert!(isclose(dist.peaks[0].relative, 100.0, 1e-6));
        assert!(isclose(dist.peaks[1].relative, 6.9773, 5e-2));
        assert!(isclose(dist.peaks[2].relative, 1.4373, 5e-2));

        let total: f64 = dist.iter().map(|p| p.fraction).sum();
        assert!(isclose(total, 1.0, 1e-6));
        assert!(isclose(calc.zero_mass(), 180.0634, 1e-3));
    }

    #[test]
    fn test_peptide_distribution() {
        let mut calc = mercury();
        let dist = calc.distribution("H70C44N12O13", 1).unwrap();

        let expected = [100.0, 54.1359, 17.0460, 3.9404];
        for (peak, expect) in dist.iter().zip(expected) {
            assert!(
                isclose(peak.relative, expect, 5e-2),
                "expected {expect}, got {}",
                peak.relative
            );
        }
        assert!(isclose(dist.peaks[0].mz, 975.5258, 1e-3));
        let spacing = dist.peaks[1].mz - dist.peaks[0].mz;
        assert!(isclose(spacing, 1.0028, 1e-3), "spacing {spacing}");
    }

    #[test]
    fn test_mass_monotonicity() {
        let mut calc = mercury();
        for formula in ["C6H12O6", "H70C44N12O13", "H141C88N24O26S"] {
            let dist = calc.distribution(formula, 1).unwrap();
            for pair in dist.peaks.windows(2) {
                assert!(pair[0].mz < pair[1].mz);
            }
        }
    }

    #[test]
    fn test_charge_scaling() {
        let mut calc = mercury();
        let single = calc.distribution("H70C44N12O13", 1).unwrap();
        let double = calc.distribution("H70C44N12O13", 2).unwrap();

        for (one, two) in single.iter().zip(double.iter()) {
            assert!(isclose((one.mz + PROTON) / 2.0, two.mz, 1e-6));
            assert!(isclose(one.relative, two.relative, 1e-6));
        }
        assert!(isclose(
            calc.mono_mass(),
            (calc.zero_mass() + 2.0 * PROTON) / 2.0,
            1e-9
        ));
    }

    #[test]
    fn test_charge_zero_is_singly_charged() {
        let mut calc = mercury();
        let zero = calc.distribution("C6H12O6", 0).unwrap();
        let one = calc.distribution("C6H12O6", 1).unwrap();
        assert_eq!(zero, one);
    }

    #[test]
    fn test_enrichment_shifts_distribution() {
        let mut calc = mercury();
        let natural = calc.distribution("C6H12O6", 1).unwrap();

        // heavily enrich 13C: the base peak moves to the +6 isotopologue
        calc.enrich(6, 1, 0.99);
        let labeled = calc.distribution("C6H12O6", 1).unwrap();
        let base = labeled
            .iter()
            .max_by(|a, b| a.relative.total_cmp(&b.relative))
            .unwrap();
        assert!(
            isclose(base.mz, natural.peaks[0].mz + 6.0 * 1.0034, 5e-2),
            "base peak at {}",
            base.mz
        );

        calc.reset();
        let restored = calc.distribution("C6H12O6", 1).unwrap();
        assert_eq!(natural, restored);
    }

    #[test]
    fn test_mass_range_points() {
        assert_eq!(mass_range_points(0.0), 32);
        assert_eq!(mass_range_points(3.0), 64);
        assert_eq!(mass_range_points(30.0), 128);
        assert_eq!(mass_range_points(1e6), 4096);
    }

    #[test]
    fn test_empty_formula() {
        let mut calc = mercury();
        assert_eq!(calc.distribution("", 1), Err(FormulaError::Empty));
        let comp = Composition::new();
        assert_eq!(calc.distribution_of(&comp, 1), Err(FormulaError::Empty));
    }
}
