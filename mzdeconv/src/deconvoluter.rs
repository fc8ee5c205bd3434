//! The greedy isotope-envelope deconvolution engine.
//!
//! Per scan: select the most intense unexplained peak, propose charge states,
//! align theoretical patterns against the local spectrum, score each
//! alignment by cosine correlation, accept the best fit above threshold,
//! subtract its matched intensity, and repeat until only noise remains. A
//! final pass thins out implausibly dense stacks of co-located features.

use std::str::FromStr;
use std::sync::Arc;

use mzpeaks::{prelude::*, CentroidPeak};
use thiserror::Error;
use tracing::{debug, trace};

use crate::averagine::Variant;
use crate::charge::{periodicity_charges, quick_charge, ChargeDetection, ChargeRange};
use crate::elements::ElementTable;
use crate::models::{ModelLibrary, TheoreticalPattern};
use crate::peaks::{PeakList, WorkingSpectrum, SPENT_INTENSITY};
use crate::scorer::{CosineScorer, PatternScorer, ScoreType};
use crate::solution::DetectedFeature;

/// Correlation credit granted per additional matched peak when comparing
/// against the incumbent best fit. Empirically tuned; a parameter, not an
/// invariant.
pub const MATCH_COUNT_BONUS: f64 = 0.025;

/// Correlation below which trailing low-abundance matches are dropped one at
/// a time in search of a better truncated fit
const TRIM_TARGET: ScoreType = 0.90;

/// Model peaks at or above this relative abundance are load-bearing: a
/// missing match for one is counted against the fit
const SIGNIFICANT_ABUNDANCE: f64 = 50.0;

/// Padding added to a model's m/z span when bounding the search window
const WINDOW_PAD: f64 = 0.1;

/// Half-width of the window used when thinning co-located features
const REFINE_HALF_WINDOW: f64 = 0.5;

const GAUSS_CONST: f64 = 2.772588722239781;

/// An error raised during deconvolution or its configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeconvolutionError {
    #[error("No resolution model is known for mass analyzer {0:?}")]
    UnsupportedInstrument(String),
    #[error("m/z {mz:.3} exceeds the model library bound {limit:.3}; raise the configured maximum feature m/z")]
    ModelOutOfRange { mz: f64, limit: f64 },
    #[error("The scan contained no peaks")]
    EmptySpectrum,
    #[error("Invalid charge range {0}..={1}")]
    InvalidChargeRange(i32, i32),
}

/// The mass analyzer types with known resolution models
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MassAnalyzer {
    #[default]
    Orbitrap,
    Tof,
    QuadIonTrap,
    FtIcr,
}

impl MassAnalyzer {
    /// The expected FWHM of a peak at `mz`, given the instrument's resolving
    /// power at m/z 400
    pub fn fwhm(&self, mz: f64, resolution: f64) -> f64 {
        match self {
            Self::Orbitrap => mz * mz.sqrt() / (20.0 * resolution),
            Self::Tof => mz / resolution,
            Self::QuadIonTrap => resolution / 5000.0,
            Self::FtIcr => mz * mz / (400.0 * resolution),
        }
    }
}

impl FromStr for MassAnalyzer {
    type Err = DeconvolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "orbitrap" => Ok(Self::Orbitrap),
            "tof" => Ok(Self::Tof),
            "qit" => Ok(Self::QuadIonTrap),
            "fticr" => Ok(Self::FtIcr),
            _ => Err(DeconvolutionError::UnsupportedInstrument(s.to_string())),
        }
    }
}

/// Settings for the deconvolution engine
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeconvoluterConfig {
    pub analyzer: MassAnalyzer,
    /// Nominal resolving power at m/z 400
    pub resolution: f64,
    /// The inclusive range of charge states to consider
    pub charge_range: ChargeRange,
    /// The minimum correlation an accepted feature must reach (inclusive)
    pub correlation_threshold: ScoreType,
    /// The maximum number of co-located features kept per 1 Da window
    pub max_depth: usize,
    /// Chemical variants to model alongside (or instead of) plain averagine
    pub variants: Vec<Variant>,
    /// Skip the unmodified averagine base case
    pub suppress_base: bool,
    /// The upper m/z bound of the model library
    pub max_mz: f64,
    pub charge_detection: ChargeDetection,
    /// Report the distribution area times base intensity instead of the
    /// base peak intensity alone
    pub report_area: bool,
}

impl Default for DeconvoluterConfig {
    fn default() -> Self {
        Self {
            analyzer: MassAnalyzer::Orbitrap,
            resolution: 60_000.0,
            charge_range: (1, 8),
            correlation_threshold: 0.85,
            max_depth: 3,
            variants: Vec::new(),
            suppress_base: false,
            max_mz: 2000.0,
            charge_detection: ChargeDetection::QuickCharge,
            report_area: false,
        }
    }
}

impl DeconvoluterConfig {
    /// The variants to evaluate, in order: the unmodified base case first
    /// unless suppressed, then the configured variants
    pub fn variant_list(&self) -> Vec<Variant> {
        let mut variants = Vec::with_capacity(self.variants.len() + 1);
        if !self.suppress_base {
            variants.push(Variant::default());
        }
        variants.extend(self.variants.iter().cloned());
        variants
    }
}

/// Builder-style construction for [`Deconvoluter`]
#[derive(Debug, Default)]
pub struct DeconvoluterBuilder {
    config: DeconvoluterConfig,
}

impl DeconvoluterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyzer(mut self, value: MassAnalyzer) -> Self {
        self.config.analyzer = value;
        self
    }

    pub fn resolution(mut self, value: f64) -> Self {
        self.config.resolution = value;
        self
    }

    pub fn charge_range(mut self, value: ChargeRange) -> Self {
        self.config.charge_range = value;
        self
    }

    pub fn correlation_threshold(mut self, value: ScoreType) -> Self {
        self.config.correlation_threshold = value;
        self
    }

    pub fn max_depth(mut self, value: usize) -> Self {
        self.config.max_depth = value;
        self
    }

    pub fn variant(mut self, value: Variant) -> Self {
        self.config.variants.push(value);
        self
    }

    pub fn suppress_base(mut self, value: bool) -> Self {
        self.config.suppress_base = value;
        self
    }

    pub fn max_mz(mut self, value: f64) -> Self {
        self.config.max_mz = value;
        self
    }

    pub fn charge_detection(mut self, value: ChargeDetection) -> Self {
        self.config.charge_detection = value;
        self
    }

    pub fn report_area(mut self, value: bool) -> Self {
        self.config.report_area = value;
        self
    }

    pub fn build(self) -> Result<Deconvoluter, DeconvolutionError> {
        Deconvoluter::new(self.config)
    }
}

/// One accepted feature, in spectrum-index terms, still subject to revision
/// while the scan is being processed
#[derive(Debug, Clone)]
struct PeakHit {
    base_peak_index: usize,
    low_index: usize,
    high_index: usize,
    charge: i32,
    correlation: ScoreType,
    mono_mass: f64,
    zero_mass: f64,
    area: f32,
    intensity: f32,
    variant: usize,
    formula: String,
    match_count: usize,
}

/// The outcome of matching an aligned model against the spectrum
#[derive(Debug, Default, Clone)]
struct Alignment {
    correlation: ScoreType,
    match_count: usize,
    /// The first matched index already claimed by an earlier feature
    overlap: Option<usize>,
    /// Matched (spectrum index, model fraction of the base peak) pairs
    matched: Vec<(usize, f32)>,
}

/// The best (charge, variant, alignment) combination found for one anchor
#[derive(Debug, Clone)]
struct Candidate {
    alignment: Alignment,
    charge: i32,
    variant: usize,
    mono_mass: f64,
    zero_mass: f64,
    area: f32,
    formula: String,
    low_index: usize,
    high_index: usize,
    /// A previously accepted hit to revise if this candidate wins
    revision: Option<(usize, PeakHit)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchMode {
    /// Tolerate missing insignificant peaks and report mask overlap
    Lenient,
    /// Stop at the first unmatched model peak
    Strict,
}

/// Match an aligned model against the spectrum around `anchor`.
///
/// Walks left and then right from the running match position for each model
/// peak, taking the nearest peak within `tolerance` and inside `bounds`.
/// After scoring, trailing matches are dropped one at a time while the
/// correlation stays below [`TRIM_TARGET`], keeping whichever truncation
/// scored best; this recovers envelopes truncated at spectrum edges.
#[allow(clippy::too_many_arguments)]
fn match_aligned<S: PatternScorer>(
    model: &[(f64, f64)],
    peaks: &[CentroidPeak],
    intensities: Option<&[f32]>,
    mask: Option<&[f32]>,
    bounds: (f64, f64),
    tolerance: f64,
    anchor: usize,
    mode: MatchMode,
    scorer: &S,
) -> Alignment {
    let mut theoretical: Vec<f32> = Vec::with_capacity(model.len());
    let mut observed: Vec<f32> = Vec::with_capacity(model.len());
    let mut matched: Vec<(usize, f32)> = Vec::new();
    let mut overlap = None;
    let mut match_count = 0usize;
    let mut search_from = anchor;
    let mut saw_base = false;

    let intensity_at =
        |j: usize| -> f32 { intensities.map(|v| v[j]).unwrap_or_else(|| peaks[j].intensity()) };

    for (model_mz, relative) in model.iter().copied() {
        match mode {
            MatchMode::Lenient => saw_base |= relative > 99.9,
            MatchMode::Strict => saw_base = relative > 99.9,
        }

        let mut difference = tolerance;
        let mut found: Option<usize> = None;
        let mut j = search_from as isize;
        while j >= 0 {
            let peak = &peaks[j as usize];
            if peak.mz < bounds.0 {
                break;
            }
            let delta = peak.mz - model_mz;
            if delta < -tolerance {
                break;
            }
            if delta.abs() < difference {
                difference = delta.abs();
                found = Some(j as usize);
            }
            j -= 1;
        }
        let mut j = search_from + 1;
        while j < peaks.len() {
            let peak = &peaks[j];
            if peak.mz > bounds.1 {
                break;
            }
            let delta = peak.mz - model_mz;
            if delta > tolerance {
                break;
            }
            if delta.abs() < difference {
                difference = delta.abs();
                found = Some(j);
            }
            j += 1;
        }

        match found {
            None => {
                if mode == MatchMode::Strict {
                    break;
                }
                // a significant peak with no counterpart is matched to zero
                if relative > SIGNIFICANT_ABUNDANCE {
                    theoretical.push(relative as f32);
                    observed.push(0.0);
                    if saw_base {
                        break;
                    }
                }
            }
            Some(index) => {
                search_from = index;
                theoretical.push(relative as f32);
                if let Some(mask) = mask {
                    if overlap.is_none()
                        && mask[index] > SPENT_INTENSITY
                        && relative > SIGNIFICANT_ABUNDANCE
                    {
                        overlap = Some(index);
                    }
                }
                let height = intensity_at(index);
                if height < SPENT_INTENSITY {
                    observed.push(0.0);
                } else {
                    match_count += 1;
                    observed.push(height);
                }
                matched.push((index, (relative / 100.0) as f32));
            }
        }
    }

    let mut correlation = if match_count < 2 {
        0.0
    } else {
        scorer.score(&theoretical, &observed)
    };
    let mut best_count = match_count;
    while correlation < TRIM_TARGET
        && match_count > 2
        && (mode == MatchMode::Strict
            || theoretical
                .last()
                .is_some_and(|t| (*t as f64) < SIGNIFICANT_ABUNDANCE))
    {
        theoretical.pop();
        observed.pop();
        match_count -= 1;
        let trimmed = scorer.score(&theoretical, &observed);
        if trimmed > correlation {
            correlation = trimmed;
            best_count = match_count;
        }
    }

    Alignment {
        correlation,
        match_count: best_count,
        overlap,
        matched,
    }
}

/// Shift a pattern so that `anchor_peak` lands on `anchor_mz`, returning the
/// aligned (m/z, relative) pairs, the applied shift, the padded m/z bounds,
/// and the index of the base peak within the aligned list
fn align_pattern(
    pattern: &TheoreticalPattern,
    anchor_mz: f64,
    anchor_peak: usize,
) -> (Vec<(f64, f64)>, f64, (f64, f64), usize) {
    let shift = anchor_mz - pattern.peaks[anchor_peak].mz;
    let mut aligned = Vec::with_capacity(pattern.len());
    let mut base_index = 0;
    let mut low = f64::MAX;
    let mut high = f64::MIN;
    for peak in pattern.iter() {
        let mz = peak.mz + shift;
        if peak.relative > 99.999 {
            base_index = aligned.len();
        }
        low = low.min(mz);
        high = high.max(mz);
        aligned.push((mz, peak.relative));
    }
    (aligned, shift, (low - WINDOW_PAD, high + WINDOW_PAD), base_index)
}

/// The result of re-solving an earlier hit inside its own sub-spectrum
#[derive(Debug, Clone)]
struct SubSolution {
    correlation: ScoreType,
    charge: i32,
    variant: usize,
    mono_mass: f64,
    zero_mass: f64,
    area: f32,
    formula: String,
    intensity: f32,
    match_count: usize,
    /// (parent spectrum index, intensity contribution) of the re-solved model
    contributions: Vec<(usize, f32)>,
}

/// The deconvolution engine: a configuration plus a shared, read-only model
/// library. One engine may process any number of scans; all mutable state is
/// scan-local.
#[derive(Debug)]
pub struct Deconvoluter<S: PatternScorer = CosineScorer> {
    config: DeconvoluterConfig,
    library: Arc<ModelLibrary>,
    scorer: S,
}

impl Deconvoluter<CosineScorer> {
    /// Build an engine and its model library from a configuration, using the
    /// default element table
    pub fn new(config: DeconvoluterConfig) -> Result<Self, DeconvolutionError> {
        Self::with_elements(config, ElementTable::shared())
    }

    /// Build an engine and its model library over a caller-provided element
    /// table
    pub fn with_elements(
        config: DeconvoluterConfig,
        elements: Arc<ElementTable>,
    ) -> Result<Self, DeconvolutionError> {
        let variants = config.variant_list();
        let library = ModelLibrary::build(elements, &variants, config.charge_range, config.max_mz)?;
        Ok(Self {
            config,
            library: Arc::new(library),
            scorer: CosineScorer::default(),
        })
    }

    /// Wrap an existing model library, sharing it with other engines
    pub fn with_library(config: DeconvoluterConfig, library: Arc<ModelLibrary>) -> Self {
        Self {
            config,
            library,
            scorer: CosineScorer::default(),
        }
    }
}

impl<S: PatternScorer> Deconvoluter<S> {
    pub fn config(&self) -> &DeconvoluterConfig {
        &self.config
    }

    pub fn library(&self) -> &Arc<ModelLibrary> {
        &self.library
    }

    fn fwhm(&self, mz: f64) -> f64 {
        self.config.analyzer.fwhm(mz, self.config.resolution)
    }

    /// Whether a fit beats the incumbent: it must reach the acceptance
    /// threshold, and its correlation plus a per-matched-peak credit must
    /// exceed the incumbent's. The credit prefers fits explaining more peaks
    /// even at slightly lower raw correlation.
    fn accepts(
        &self,
        correlation: ScoreType,
        match_count: usize,
        incumbent: Option<(ScoreType, usize)>,
    ) -> bool {
        let (best_correlation, best_count) = incumbent.unwrap_or((0.0, 0));
        let credit = if best_count == 0 {
            0.0
        } else {
            MATCH_COUNT_BONUS * (match_count as f64 - best_count as f64) / best_count as f64
        };
        correlation >= self.config.correlation_threshold
            && correlation + credit > best_correlation
    }

    /// Propose charge states for the peak at `anchor`
    fn candidate_charges(&self, spectrum: &WorkingSpectrum, anchor: usize) -> Vec<i32> {
        match self.config.charge_detection {
            ChargeDetection::QuickCharge => {
                quick_charge(&spectrum.peaks, anchor, self.config.charge_range)
            }
            method => {
                let anchor_mz = spectrum.peaks[anchor].mz;
                let low = spectrum.search_ceil(anchor_mz - 1.6);
                let high = spectrum.search_floor(anchor_mz + 1.6);
                if high <= low {
                    return Vec::new();
                }
                let spacing = self.fwhm(anchor_mz) / 4.0;
                periodicity_charges(
                    &spectrum.peaks[low..=high],
                    spacing,
                    self.config.charge_range,
                    method,
                )
            }
        }
    }

    /// Whether the aligned base peak still points at live signal: there must
    /// be a peak within one FWHM of it that no accepted feature has claimed
    fn check_for_peak(&self, spectrum: &WorkingSpectrum, mz: f64) -> bool {
        let index = spectrum.nearest(mz);
        let width = self.fwhm(mz);
        if (spectrum.peaks[index].mz - mz).abs() < width {
            !spectrum.is_claimed(index)
        } else {
            false
        }
    }

    /// Re-solve a previously accepted hit inside its own sub-spectrum,
    /// searching charges, variants, and alignments from scratch. The prior
    /// hit's charge is always among the candidates; subtraction elsewhere may
    /// have stripped the neighbors the spacing heuristic needs to re-derive
    /// it. Returns the best solution at or above the acceptance threshold,
    /// if any.
    fn match_sub_spectrum(
        &self,
        sub: &[CentroidPeak],
        index_map: &[usize],
        sub_anchor: usize,
        prior_charge: i32,
    ) -> Result<Option<SubSolution>, DeconvolutionError> {
        let anchor_mz = sub[sub_anchor].mz;
        let anchor_height = sub[sub_anchor].intensity;
        let tolerance = self.fwhm(anchor_mz) / 2.0;

        let mut charges = quick_charge(sub, sub_anchor, self.config.charge_range);
        if !charges.contains(&prior_charge) {
            charges.push(prior_charge);
        }

        let mut best: Option<SubSolution> = None;
        let mut best_correlation = 0.0;
        let mut best_count = 0usize;

        for charge in charges {
            for variant in 0..self.library.variant_count() {
                let pattern = self.library.get(charge, variant, anchor_mz)?;
                if pattern.is_empty() {
                    continue;
                }
                let [base, _, _] = pattern.top_three();
                let base = base.unwrap_or_default();
                let anchors = [
                    Some(base),
                    base.checked_sub(1),
                    (base + 1 < pattern.len()).then_some(base + 1),
                ];
                for anchor_peak in anchors.into_iter().flatten() {
                    let (aligned, shift, bounds, _) =
                        align_pattern(pattern, anchor_mz, anchor_peak);
                    let alignment = match_aligned(
                        &aligned,
                        sub,
                        None,
                        None,
                        bounds,
                        tolerance,
                        sub_anchor,
                        MatchMode::Strict,
                        &self.scorer,
                    );
                    let credit =
                        MATCH_COUNT_BONUS * (alignment.match_count as f64 - best_count as f64);
                    let better = alignment.correlation > best_correlation
                        || (alignment.correlation >= self.config.correlation_threshold
                            && alignment.correlation + credit > best_correlation);
                    if better {
                        best_correlation = alignment.correlation;
                        best_count = alignment.match_count;
                        let contributions = alignment
                            .matched
                            .iter()
                            .map(|(i, fraction)| (index_map[*i], fraction * anchor_height))
                            .collect();
                        best = Some(SubSolution {
                            correlation: alignment.correlation,
                            charge,
                            variant,
                            mono_mass: pattern.zero_mass + shift * charge as f64,
                            zero_mass: pattern.zero_mass,
                            area: pattern.area,
                            formula: pattern.formula.clone(),
                            intensity: anchor_height,
                            match_count: alignment.matched.len(),
                            contributions,
                        });
                    }
                }
            }
        }

        if best_correlation >= self.config.correlation_threshold {
            Ok(best)
        } else {
            Ok(None)
        }
    }

    /// Attempt to jointly re-solve an earlier overlapping hit and re-match
    /// the current candidate against the intensities left over once the
    /// re-solved hit's contribution is removed. Returns the improved
    /// alignment and the revision to apply to the earlier hit, or `None`
    /// when the joint solution does not improve both fits.
    #[allow(clippy::too_many_arguments)]
    fn resolve_overlap(
        &self,
        spectrum: &WorkingSpectrum,
        hits: &[PeakHit],
        overlap_index: usize,
        alignment: &Alignment,
        aligned: &[(f64, f64)],
        bounds: (f64, f64),
        tolerance: f64,
        anchor: usize,
    ) -> Result<Option<(Alignment, (usize, PeakHit))>, DeconvolutionError> {
        let Some(position) = hits.iter().position(|h| h.base_peak_index == overlap_index) else {
            return Ok(None);
        };
        let old = &hits[position];
        let anchor_height = spectrum.peaks[anchor].intensity();

        // the earlier hit's neighborhood, at original intensities, with the
        // current candidate's projected contribution removed
        let mut sub = Vec::with_capacity(old.high_index - old.low_index + 1);
        let mut index_map = Vec::with_capacity(sub.capacity());
        let mut sub_anchor = None;
        for j in old.low_index..=old.high_index {
            let contribution = alignment
                .matched
                .iter()
                .find(|(i, _)| *i == j)
                .map(|(_, fraction)| fraction * anchor_height)
                .unwrap_or_default();
            if j == overlap_index {
                sub_anchor = Some(sub.len());
            }
            index_map.push(j);
            sub.push(CentroidPeak::new(
                spectrum.peaks[j].mz,
                spectrum.original[j] - contribution,
                (j - old.low_index) as u32,
            ));
        }
        let Some(sub_anchor) = sub_anchor else {
            return Ok(None);
        };

        let Some(solution) = self.match_sub_spectrum(&sub, &index_map, sub_anchor, old.charge)?
        else {
            return Ok(None);
        };
        if solution.correlation + MATCH_COUNT_BONUS <= old.correlation {
            return Ok(None);
        }

        // what this candidate sees once the re-solved hit is peeled off
        let mut refined: Vec<f32> = spectrum.peaks.iter().map(|p| p.intensity()).collect();
        for (j, contribution) in solution.contributions.iter() {
            refined[*j] = spectrum.original[*j] - contribution;
        }
        let rematch = match_aligned(
            aligned,
            &spectrum.peaks,
            Some(&refined),
            Some(&spectrum.mask),
            bounds,
            tolerance,
            anchor,
            MatchMode::Lenient,
            &self.scorer,
        );
        if rematch.correlation <= alignment.correlation {
            return Ok(None);
        }

        let mut revised = old.clone();
        revised.correlation = solution.correlation;
        revised.charge = solution.charge;
        revised.mono_mass = solution.mono_mass;
        revised.zero_mass = solution.zero_mass;
        revised.area = solution.area;
        revised.intensity = solution.intensity;
        revised.variant = solution.variant;
        revised.formula = solution.formula;
        revised.match_count = solution.match_count;
        Ok(Some((rematch, (position, revised))))
    }

    /// Thin out dense stacks of features: within every 1 Da window around a
    /// feature's base peak, keep at most `max_depth` features ranked by
    /// their base peak's original intensity. Jagged tails of very large
    /// peaks otherwise shed a trail of spurious low fits.
    fn refine_hits(&self, hits: &mut Vec<PeakHit>, spectrum: &WorkingSpectrum) {
        let mut removed = vec![false; hits.len()];
        for i in 0..hits.len() {
            if removed[i] {
                continue;
            }
            let center = spectrum.peaks[hits[i].base_peak_index].mz;
            let mut members = vec![i];
            let mut j = i;
            while j > 0 {
                j -= 1;
                if spectrum.peaks[hits[j].base_peak_index].mz < center - REFINE_HALF_WINDOW {
                    break;
                }
                if !removed[j] {
                    members.push(j);
                }
            }
            let mut j = i + 1;
            while j < hits.len() {
                if spectrum.peaks[hits[j].base_peak_index].mz > center + REFINE_HALF_WINDOW {
                    break;
                }
                if !removed[j] {
                    members.push(j);
                }
                j += 1;
            }
            if members.len() > self.config.max_depth {
                members.sort_by(|a, b| {
                    let ia = spectrum.original[hits[*a].base_peak_index];
                    let ib = spectrum.original[hits[*b].base_peak_index];
                    ib.total_cmp(&ia)
                });
                for m in members.iter().skip(self.config.max_depth) {
                    removed[*m] = true;
                }
            }
        }
        let mut keep = removed.iter().map(|r| !r);
        hits.retain(|_| keep.next().unwrap_or(true));
    }

    /// Centroid a profile-mode scan by first-derivative apex detection with
    /// Gaussian centroid refinement from the apex and its taller neighbor.
    /// Poor Gaussian fits (over 10% intensity disagreement) fall back to the
    /// raw apex intensity; centroids outside the scan's m/z bounds are
    /// dropped.
    pub fn centroid(&self, profile: &PeakList) -> PeakList {
        let peaks = profile.as_slice();
        let mut out: Vec<CentroidPeak> = Vec::new();
        if peaks.len() < 2 {
            return PeakList::new(out);
        }
        let min_mz = peaks[0].mz;
        let max_mz = peaks[peaks.len() - 1].mz;

        let mut rising = false;
        for i in 0..peaks.len() - 1 {
            if peaks[i].intensity < peaks[i + 1].intensity {
                rising = true;
                continue;
            }
            if !rising {
                continue;
            }
            rising = false;

            let apex = i;
            let next = if peaks[apex - 1].intensity > peaks[apex + 1].intensity {
                apex - 1
            } else {
                apex + 1
            };
            let width = self.fwhm(peaks[apex].mz);

            let mut mz =
                width * width * (peaks[apex].intensity / peaks[next].intensity).ln() as f64;
            mz /= GAUSS_CONST * (peaks[apex].mz - peaks[next].mz);
            mz += (peaks[apex].mz + peaks[next].mz) / 2.0;
            if !mz.is_finite() {
                continue;
            }

            let decay = (-((peaks[apex].mz - mz) / width).powi(2) * GAUSS_CONST).exp();
            let mut intensity = (peaks[apex].intensity as f64 / decay) as f32;
            if ((peaks[apex].intensity - intensity) / intensity * 100.0).abs() > 10.0
                || !intensity.is_finite()
                || intensity < 0.0
            {
                intensity = peaks[apex].intensity;
            }

            if mz < min_mz || mz > max_mz {
                continue;
            }
            out.push(CentroidPeak::new(mz, intensity, out.len() as u32));
        }
        PeakList::new(out)
    }

    /// Deconvolve one scan's centroided peak list into detected features.
    ///
    /// The engine works on its own copy; the caller's peak list is not
    /// modified. A scan with no peaks raises
    /// [`DeconvolutionError::EmptySpectrum`], which batch drivers treat as
    /// skippable. An anchor m/z beyond the model library bound is fatal.
    pub fn deconvolve_scan(
        &self,
        scan_id: usize,
        peaks: &PeakList,
    ) -> Result<Vec<DetectedFeature>, DeconvolutionError> {
        if peaks.is_empty() {
            return Err(DeconvolutionError::EmptySpectrum);
        }
        let mut spectrum = WorkingSpectrum::new(peaks);
        let mut hits: Vec<PeakHit> = Vec::new();
        let mut ceiling = f32::MAX;
        let mut iterations = 0usize;

        loop {
            let Some(anchor) = spectrum.most_intense_below(ceiling) else {
                break;
            };
            let anchor_height = spectrum.peaks[anchor].intensity();
            if anchor_height < spectrum.low_point() {
                break;
            }
            iterations += 1;
            let anchor_mz = spectrum.peaks[anchor].mz;
            let tolerance = self.fwhm(anchor_mz) / 2.0;

            let mut best: Option<Candidate> = None;
            for charge in self.candidate_charges(&spectrum, anchor) {
                for variant in 0..self.library.variant_count() {
                    let pattern = self.library.get(charge, variant, anchor_mz)?;
                    if pattern.is_empty() {
                        continue;
                    }
                    for anchor_peak in pattern.top_three().into_iter().flatten() {
                        let (aligned, shift, bounds, base_index) =
                            align_pattern(pattern, anchor_mz, anchor_peak);
                        // the aligned base peak may land on an already
                        // resolved peak, or on nothing at all
                        if !self.check_for_peak(&spectrum, aligned[base_index].0) {
                            continue;
                        }
                        let low_index = spectrum.search_floor(bounds.0);
                        let high_index = spectrum.search_ceil(bounds.1);

                        let mut alignment = match_aligned(
                            &aligned,
                            &spectrum.peaks,
                            None,
                            Some(&spectrum.mask),
                            bounds,
                            tolerance,
                            anchor,
                            MatchMode::Lenient,
                            &self.scorer,
                        );
                        let mut revision = None;
                        if let Some(overlap_index) = alignment.overlap {
                            if let Some((joint, revised)) = self.resolve_overlap(
                                &spectrum,
                                &hits,
                                overlap_index,
                                &alignment,
                                &aligned,
                                bounds,
                                tolerance,
                                anchor,
                            )? {
                                alignment = joint;
                                revision = Some(revised);
                            }
                        }

                        let incumbent = best
                            .as_ref()
                            .map(|b| (b.alignment.correlation, b.alignment.match_count));
                        if self.accepts(alignment.correlation, alignment.match_count, incumbent) {
                            best = Some(Candidate {
                                mono_mass: pattern.zero_mass + shift * charge as f64,
                                zero_mass: pattern.zero_mass,
                                area: pattern.area,
                                formula: pattern.formula.clone(),
                                alignment,
                                charge,
                                variant,
                                low_index,
                                high_index,
                                revision,
                            });
                        }
                    }
                }
            }

            if let Some(candidate) = best {
                trace!(
                    "scan {scan_id}: accepted charge {} at m/z {anchor_mz:.4}, correlation {:.4}",
                    candidate.charge,
                    candidate.alignment.correlation
                );
                if let Some((position, revised)) = candidate.revision {
                    hits[position] = revised;
                }
                hits.push(PeakHit {
                    base_peak_index: anchor,
                    low_index: candidate.low_index,
                    high_index: candidate.high_index,
                    charge: candidate.charge,
                    correlation: candidate.alignment.correlation,
                    mono_mass: candidate.mono_mass,
                    zero_mass: candidate.zero_mass,
                    area: candidate.area,
                    intensity: anchor_height,
                    variant: candidate.variant,
                    formula: candidate.formula,
                    match_count: candidate.alignment.match_count,
                });
                spectrum.claim(anchor);
                for (index, fraction) in candidate.alignment.matched.iter() {
                    spectrum.consume(*index, fraction * anchor_height);
                }
            }
            ceiling = anchor_height;
        }

        hits.sort_by_key(|hit| hit.base_peak_index);
        self.refine_hits(&mut hits, &spectrum);
        debug!(
            "scan {scan_id}: {} features in {iterations} iterations over {} peaks",
            hits.len(),
            spectrum.len()
        );

        let features = hits
            .into_iter()
            .map(|hit| DetectedFeature {
                scan_id,
                base_mz: spectrum.peaks[hit.base_peak_index].mz,
                charge: hit.charge,
                monoisotopic_mass: hit.mono_mass,
                zero_mass: hit.zero_mass,
                intensity: if self.config.report_area {
                    hit.area * hit.intensity
                } else {
                    hit.intensity
                },
                area: hit.area,
                correlation: hit.correlation,
                matched_peaks: hit.match_count,
                variant_index: hit.variant,
                formula: hit.formula,
                low_mz: spectrum.peaks[hit.low_index].mz,
                high_mz: spectrum.peaks[hit.high_index].mz,
            })
            .collect();
        Ok(features)
    }
}
