//! Precomputed theoretical isotope pattern models.
//!
//! The deconvolution loop evaluates many (charge, variant, m/z) candidates
//! per peak, far too many to run the Fourier calculator inside the hot path.
//! The [`ModelLibrary`] computes every pattern up front on a one m/z bucket
//! lattice and serves shared read-only references afterwards.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::averagine::{Averagine, Variant};
use crate::charge::ChargeRange;
use crate::deconvoluter::DeconvolutionError;
use crate::elements::{neutral_mass, ElementTable};
use crate::mercury::Mercury;

/// Model peaks below this relative abundance are trimmed from the pattern
const MODEL_ABUNDANCE_FLOOR: f64 = 0.1;

/// The lowest m/z bucket the library models
const MIN_BUCKET: usize = 10;

/// One peak of a theoretical isotope pattern
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ModelPeak {
    pub mz: f64,
    /// Abundance relative to the base peak, 0-100
    pub relative: f64,
}

/// A theoretical isotope distribution prepared for matching against observed
/// peaks: relative abundances on a 0-100 scale, the summed fractional
/// abundance of the retained peaks, and the exact mass and formula that
/// generated it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TheoreticalPattern {
    /// The pattern peaks in ascending m/z order
    pub peaks: Vec<ModelPeak>,
    /// The fraction of total isotopic signal the retained peaks carry
    pub area: f32,
    /// The exact neutral monoisotopic mass of the generating composition
    pub zero_mass: f64,
    /// The generating formula
    pub formula: String,
    /// The charge state the pattern was computed at
    pub charge: i32,
}

impl TheoreticalPattern {
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModelPeak> {
        self.peaks.iter()
    }

    /// Indices of the three most abundant peaks, most abundant first.
    /// Patterns with fewer than three peaks return fewer entries.
    pub fn top_three(&self) -> [Option<usize>; 3] {
        let mut indices = [None; 3];
        let mut heights = [0.0f64; 3];
        for (i, peak) in self.peaks.iter().enumerate() {
            if peak.relative > heights[0] {
                heights = [peak.relative, heights[0], heights[1]];
                indices = [Some(i), indices[0], indices[1]];
            } else if peak.relative > heights[1] {
                heights[2] = heights[1];
                heights[1] = peak.relative;
                indices[2] = indices[1];
                indices[1] = Some(i);
            } else if peak.relative > heights[2] {
                heights[2] = peak.relative;
                indices[2] = Some(i);
            }
        }
        indices
    }
}

/// A cache of theoretical patterns indexed by (variant, charge, m/z bucket).
///
/// Built once, sequentially, before any scan is processed; shared read-only
/// afterwards. Requests beyond the configured m/z bound are a configuration
/// error the operator must fix, not a recoverable condition.
#[derive(Debug)]
pub struct ModelLibrary {
    /// models[variant][charge - min_charge][bucket - MIN_BUCKET]
    models: Vec<Vec<Vec<TheoreticalPattern>>>,
    charge_range: ChargeRange,
    max_mz: f64,
    max_bucket: usize,
}

impl ModelLibrary {
    /// Compute patterns for every (variant, charge, bucket) combination.
    ///
    /// `variants` is the full candidate list in evaluation order; include the
    /// empty variant for the unmodified averagine case unless it has been
    /// suppressed by configuration.
    pub fn build(
        elements: Arc<ElementTable>,
        variants: &[Variant],
        charge_range: ChargeRange,
        max_mz: f64,
    ) -> Result<Self, DeconvolutionError> {
        let (min_charge, max_charge) = charge_range;
        if min_charge < 1 || max_charge < min_charge {
            return Err(DeconvolutionError::InvalidChargeRange(min_charge, max_charge));
        }
        let max_bucket = max_mz.floor() as usize;
        if max_bucket < MIN_BUCKET {
            return Err(DeconvolutionError::ModelOutOfRange {
                mz: max_mz,
                limit: MIN_BUCKET as f64,
            });
        }

        let averagine = Averagine::new(elements.clone());
        let mut models = Vec::with_capacity(variants.len());
        let mut count = 0usize;
        for variant in variants {
            let mut mercury = Mercury::new(elements.clone());
            for enrich in variant.enrichments.iter() {
                mercury.enrich(enrich.element, enrich.isotope, enrich.fraction);
            }
            let mut per_charge = Vec::with_capacity((max_charge - min_charge + 1) as usize);
            for charge in min_charge..=max_charge {
                let mut per_bucket = Vec::with_capacity(max_bucket - MIN_BUCKET + 1);
                for bucket in MIN_BUCKET..=max_bucket {
                    let mass = neutral_mass(bucket as f64, charge);
                    let model = averagine.estimate(mass, variant);
                    let pattern = match mercury.distribution_of(&model.composition, charge) {
                        Ok(distribution) => {
                            let peaks: Vec<ModelPeak> = distribution
                                .iter()
                                .filter(|p| p.relative >= MODEL_ABUNDANCE_FLOOR)
                                .map(|p| ModelPeak {
                                    mz: p.mz,
                                    relative: p.relative,
                                })
                                .collect();
                            let area: f32 = distribution
                                .iter()
                                .filter(|p| p.relative >= MODEL_ABUNDANCE_FLOOR)
                                .map(|p| p.fraction as f32)
                                .sum();
                            TheoreticalPattern {
                                peaks,
                                area,
                                zero_mass: distribution.zero_mass,
                                formula: model.formula,
                                charge,
                            }
                        }
                        // the composition rounded away to nothing at a tiny
                        // mass; an empty pattern never matches anything
                        Err(_) => TheoreticalPattern::default(),
                    };
                    if !pattern.is_empty() {
                        count += 1;
                    }
                    per_bucket.push(pattern);
                }
                per_charge.push(per_bucket);
            }
            trace!(
                "modeled variant {:?} over charges {min_charge}..={max_charge}",
                variant
            );
            models.push(per_charge);
        }
        debug!(
            "model library ready: {count} patterns across {} variants, charges {min_charge}..={max_charge}, m/z {MIN_BUCKET}..={max_bucket}",
            variants.len()
        );

        Ok(Self {
            models,
            charge_range,
            max_mz,
            max_bucket,
        })
    }

    pub fn variant_count(&self) -> usize {
        self.models.len()
    }

    pub fn charge_range(&self) -> ChargeRange {
        self.charge_range
    }

    pub fn max_mz(&self) -> f64 {
        self.max_mz
    }

    /// Fetch the pattern for a charge state and variant at an m/z, snapped to
    /// the nearest bucket. An m/z beyond the configured bound is fatal.
    pub fn get(
        &self,
        charge: i32,
        variant: usize,
        mz: f64,
    ) -> Result<&TheoreticalPattern, DeconvolutionError> {
        if mz > self.max_mz {
            return Err(DeconvolutionError::ModelOutOfRange {
                mz,
                limit: self.max_mz,
            });
        }
        let (min_charge, max_charge) = self.charge_range;
        if charge < min_charge || charge > max_charge {
            return Err(DeconvolutionError::InvalidChargeRange(charge, charge));
        }
        let bucket = (mz.round() as usize).clamp(MIN_BUCKET, self.max_bucket);
        Ok(&self.models[variant][(charge - min_charge) as usize][bucket - MIN_BUCKET])
    }
}
