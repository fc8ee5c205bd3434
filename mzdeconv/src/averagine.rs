/*! Estimation of elemental compositions from neutral mass alone.

This is an implementation of Senko's averagine [^1]: a hypothetical "average
monomer" whose elemental ratios are scaled linearly to a target mass and
rounded to integer atom counts. The rounded formula's exact mass drifts from
the requested target, increasingly so where a low-ratio element rounds away
entirely; downstream alignment is driven by observed peaks, so the drift is
tolerated rather than corrected.

# References
[^1]: Senko M, Beu S, McLafferty F: Determination of Monoisotopic Masses and Ion
      Populations for Large Biomolecules from Resolved Isotopic Distributions.
      Journal of the American Society for Mass Spectrometry 1995, 6:229-233
      <https://doi.org/10.1016/1044-0305(95)00017-8>
*/
use std::sync::Arc;

use crate::elements::{ElementTable, Enrichment};
use crate::mercury::Composition;

/// The average mass of one averagine monomer
pub const AVERAGINE_MASS: f64 = 111.1254;

/// The elemental ratios of one averagine monomer
pub const AVERAGINE_RATIOS: [(&str, f64); 5] = [
    ("C", 4.9384),
    ("H", 7.7583),
    ("N", 1.3577),
    ("O", 1.4773),
    ("S", 0.0417),
];

/// A named perturbation of the base averagine composition: a set of atom
/// count adjustments and a set of isotope enrichments, used to model
/// chemically modified or isotopically labeled analytes.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Variant {
    /// Atom count deltas applied after scaling, as (atomic number, delta)
    pub atoms: Vec<(usize, i32)>,
    /// Isotope enrichments applied to the element table while this variant's
    /// models are generated
    pub enrichments: Vec<Enrichment>,
}

impl Variant {
    pub fn new(atoms: Vec<(usize, i32)>, enrichments: Vec<Enrichment>) -> Self {
        Self { atoms, enrichments }
    }

    /// A variant that only adjusts atom counts
    pub fn with_atoms(atoms: Vec<(usize, i32)>) -> Self {
        Self::new(atoms, Vec::new())
    }

    /// A variant that only applies isotope enrichment
    pub fn with_enrichments(enrichments: Vec<Enrichment>) -> Self {
        Self::new(Vec::new(), enrichments)
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty() && self.enrichments.is_empty()
    }

    /// A compact human-readable label, atom adjustments then enrichments,
    /// `_`-separated. The empty variant renders as `_`.
    pub fn describe(&self, table: &ElementTable) -> String {
        if self.is_empty() {
            return "_".to_string();
        }
        let mut out = String::new();
        for (z, delta) in self.atoms.iter() {
            out.push_str(table[*z].symbol);
            out.push_str(&delta.to_string());
        }
        out.push('_');
        for enrich in self.enrichments.iter() {
            out.push_str(&format!(
                "{:.2}{}{}_",
                enrich.fraction,
                table[enrich.element].symbol,
                table[enrich.element].isotopes[enrich.isotope].int_mass,
            ));
        }
        out
    }
}

/// An estimated composition for a target mass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AveragineModel {
    /// The rounded composition, including any variant adjustments
    pub composition: Composition,
    /// The composition rendered as a formula string
    pub formula: String,
    /// The exact monoisotopic mass of the *rounded* formula. This is the
    /// alignment reference, not the requested target mass.
    pub mono_mass: f64,
}

/// Scales averagine ratios to target masses over a shared element table
#[derive(Debug, Clone)]
pub struct Averagine {
    elements: Arc<ElementTable>,
    ratios: Vec<(usize, f64)>,
}

impl Averagine {
    pub fn new(elements: Arc<ElementTable>) -> Self {
        let ratios = AVERAGINE_RATIOS
            .iter()
            .map(|(symbol, ratio)| {
                let z = elements
                    .index_of(symbol)
                    .expect("averagine element missing from table");
                (z, *ratio)
            })
            .collect();
        Self { elements, ratios }
    }

    pub fn elements(&self) -> &Arc<ElementTable> {
        &self.elements
    }

    /// Estimate a composition whose average mass approximates `mass`.
    ///
    /// Pathological targets (zero or negative) are not rejected here; they
    /// produce empty compositions the downstream calculator refuses.
    pub fn estimate(&self, mass: f64, variant: &Variant) -> AveragineModel {
        let units = mass / AVERAGINE_MASS;
        let mut composition = Composition::new();
        for (z, ratio) in self.ratios.iter() {
            let count = (ratio * units + 0.5).floor() as i32;
            if count > 0 {
                composition.add(*z, count);
            }
        }
        for (z, delta) in variant.atoms.iter() {
            composition.add(*z, *delta);
        }
        let formula = composition.to_formula(&self.elements);
        let mono_mass = composition.monoisotopic_mass(&self.elements);
        AveragineModel {
            composition,
            formula,
            mono_mass,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::elements::isclose;

    fn averagine() -> Averagine {
        Averagine::new(ElementTable::shared())
    }

    #[test]
    fn test_estimate() {
        let avg = averagine();
        let model = avg.estimate(1000.0, &Variant::default());
        assert_eq!(model.formula, "H70C44N12O13");
        assert!(isclose(model.mono_mass, 974.5185, 1e-3));

        let model = avg.estimate(800.0, &Variant::default());
        assert_eq!(model.formula, "H56C36N10O11");
        assert!(isclose(model.mono_mass, 804.4130, 1e-3));

        let model = avg.estimate(1500.0, &Variant::default());
        assert_eq!(model.formula, "H105C67N18O20S");
    }

    #[test]
    fn test_rounding_drift_is_bounded() {
        let avg = averagine();
        let mut mass = 300.0;
        while mass < 3000.0 {
            let model = avg.estimate(mass, &Variant::default());
            let drift = (model.mono_mass - mass).abs();
            assert!(drift < 30.0, "drift {drift} at mass {mass}");
            mass += 87.3;
        }
    }

    #[test]
    fn test_atom_variant() {
        let avg = averagine();
        let cl = avg.elements().index_of("Cl").unwrap();
        let variant = Variant::with_atoms(vec![(cl, 2)]);
        let model = avg.estimate(1000.0, &variant);
        assert!(model.formula.contains("Cl2"));
        let base = avg.estimate(1000.0, &Variant::default());
        assert!(isclose(
            model.mono_mass - base.mono_mass,
            2.0 * 34.9689,
            1e-3
        ));
    }

    #[test]
    fn test_describe() {
        let avg = averagine();
        let table = avg.elements();
        assert_eq!(Variant::default().describe(table), "_");

        let cl = table.index_of("Cl").unwrap();
        let n = table.index_of("N").unwrap();
        let variant = Variant::new(vec![(cl, 2)], vec![Enrichment::new(n, 1, 0.99)]);
        assert_eq!(variant.describe(table), "Cl2_0.99N15_");
    }

    #[test]
    fn test_tiny_mass() {
        let avg = averagine();
        let model = avg.estimate(5.0, &Variant::default());
        assert!(model.composition.is_empty());
        assert!(model.formula.is_empty());
    }
}
