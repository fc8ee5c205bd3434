//! Detected feature records emitted by the deconvolution engine

use crate::elements::mass_charge_ratio;
use crate::scorer::ScoreType;

/// One detected isotopic feature: an accepted assignment of charge, mass,
/// and composition to a cluster of observed peaks. Immutable once the
/// scan's deconvolution completes.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectedFeature {
    /// The scan the feature was detected in
    pub scan_id: usize,
    /// The m/z of the anchor peak the assignment was seeded from
    pub base_mz: f64,
    /// The assigned charge state
    pub charge: i32,
    /// The monoisotopic neutral mass, aligned to the observed peaks
    pub monoisotopic_mass: f64,
    /// The exact mass of the model composition before alignment
    pub zero_mass: f64,
    /// The reported abundance: the base peak intensity, or the distribution
    /// area times the base intensity when so configured
    pub intensity: f32,
    /// The fraction of total isotopic signal covered by the model's peaks
    pub area: f32,
    /// The correlation between the model and the matched peaks
    pub correlation: ScoreType,
    /// How many spectrum peaks supported the assignment
    pub matched_peaks: usize,
    /// Index into the engine's variant list that produced the model
    pub variant_index: usize,
    /// The model's chemical formula
    pub formula: String,
    /// The low edge of the matched m/z window
    pub low_mz: f64,
    /// The high edge of the matched m/z window
    pub high_mz: f64,
}

impl DetectedFeature {
    /// The monoisotopic m/z implied by the assigned mass and charge
    pub fn mono_mz(&self) -> f64 {
        mass_charge_ratio(self.monoisotopic_mass, self.charge)
    }

    /// The mass offset between the aligned feature and its model formula
    pub fn mass_shift(&self) -> f64 {
        self.monoisotopic_mass - self.zero_mass
    }
}

impl PartialOrd for DetectedFeature {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(
            self.scan_id
                .cmp(&other.scan_id)
                .then(self.base_mz.total_cmp(&other.base_mz))
                .then(self.charge.cmp(&other.charge)),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::elements::{isclose, PROTON};

    #[test]
    fn test_mono_mz() {
        let feature = DetectedFeature {
            charge: 2,
            monoisotopic_mass: 999.0,
            ..Default::default()
        };
        assert!(isclose(feature.mono_mz(), (999.0 + 2.0 * PROTON) / 2.0, 1e-9));
    }

    #[test]
    fn test_ordering() {
        let a = DetectedFeature {
            scan_id: 1,
            base_mz: 500.0,
            ..Default::default()
        };
        let b = DetectedFeature {
            scan_id: 1,
            base_mz: 600.0,
            ..Default::default()
        };
        assert!(a < b);
    }
}
