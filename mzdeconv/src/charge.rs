//! Charge state estimation from local peak spacing or spectrum periodicity

use mzpeaks::prelude::*;
use num_complex::Complex;
use rustfft::FftPlanner;

/// An inclusive (minimum, maximum) charge state range
pub type ChargeRange = (i32, i32);

/// How candidate charge states are proposed for a peak
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChargeDetection {
    /// Reciprocal-spacing heuristic over neighboring centroids
    #[default]
    QuickCharge,
    /// Fourier magnitude of the resampled local window
    Fft,
    /// Patterson autocorrelation of the resampled local window
    Patterson,
    /// The product of the Fourier and Patterson curves
    Senko,
}

/// The QuickCharge algorithm [^1]: propose charge states from the reciprocal
/// of the spacing between the anchor peak and its qualifying neighbors.
///
/// A neighbor qualifies when its intensity is at least a quarter of the
/// anchor's and it lies within 1.1 m/z. The reciprocal spacing is kept when
/// it is close to an integer (fractional remainder outside (0.2, 0.8)) and
/// falls within `charge_range`. A charge state is reported only when it is
/// confirmed independently on both sides of the anchor; one-sided evidence
/// is discarded.
///
/// # References
/// [^1]: Hoopmann M, Finney G, MacCoss M: High-speed data reduction, feature detection,
///       and MS/MS spectrum quality assessment of shotgun proteomics data sets using
///       high-resolution mass spectrometry. Analytical Chemistry 2007, 79(15), 5620-5632.
///       <https://doi.org/10.1021/ac0700833>
pub fn quick_charge<C: CentroidLike>(
    peaks: &[C],
    position: usize,
    charge_range: ChargeRange,
) -> Vec<i32> {
    let (min_charge, max_charge) = charge_range;
    let anchor = &peaks[position];
    let min_intensity = anchor.intensity() / 4.0;
    let mut forward = vec![false; (max_charge + 1).max(1) as usize];
    let mut backward = vec![false; (max_charge + 1).max(1) as usize];

    let scan = |other: &C, hits: &mut Vec<bool>| -> bool {
        if other.intensity() < min_intensity {
            return true;
        }
        let diff = (other.mz() - anchor.mz()).abs();
        if diff > 1.1 {
            return false;
        }
        let raw_charge = 1.0 / diff;
        let charge = (raw_charge + 0.5) as i32;
        let remainder = raw_charge - raw_charge.floor();
        if 0.2 < remainder && remainder < 0.8 {
            return true;
        }
        if charge < min_charge || charge > max_charge {
            return true;
        }
        hits[charge as usize] = true;
        true
    };

    for other in peaks.iter().skip(position + 1) {
        if !scan(other, &mut forward) {
            break;
        }
    }
    if !forward.iter().any(|hit| *hit) {
        return Vec::new();
    }
    for other in peaks.iter().take(position).rev() {
        if !scan(other, &mut backward) {
            break;
        }
    }

    (min_charge..=max_charge)
        .filter(|charge| forward[*charge as usize] && backward[*charge as usize])
        .collect()
}

/// Resample the peaks in `window` onto a uniform m/z grid by linear
/// interpolation, padded by a quarter m/z on either side.
fn resample<C: CentroidLike>(peaks: &[C], spacing: f64) -> Vec<f32> {
    let low = peaks.first().map(|p| p.mz()).unwrap_or_default() - 0.25;
    let high = peaks.last().map(|p| p.mz()).unwrap_or_default() + 0.25;
    let n = ((high - low) / spacing).ceil() as usize + 1;
    let mut grid = vec![0.0f32; n];
    let mut j = 0usize;
    for (i, cell) in grid.iter_mut().enumerate() {
        let mz = low + i as f64 * spacing;
        while j + 1 < peaks.len() && peaks[j + 1].mz() < mz {
            j += 1;
        }
        if j + 1 >= peaks.len() {
            break;
        }
        let (left, right) = (&peaks[j], &peaks[j + 1]);
        if mz < left.mz() || mz > right.mz() {
            continue;
        }
        let span = right.mz() - left.mz();
        if span <= 0.0 {
            continue;
        }
        let t = ((mz - left.mz()) / span) as f32;
        let value = left.intensity() * (1.0 - t) + right.intensity() * t;
        *cell = value.max(0.0);
    }
    grid
}

/// Patterson autocorrelation strength at a candidate charge: the self-overlap
/// of the grid shifted by half the isotopic spacing in either direction
fn patterson_strength(grid: &[f32], spacing: f64, charge: f64) -> f64 {
    let lag = (1.0 / charge / spacing).round() as usize;
    if lag == 0 || lag >= grid.len() {
        return 0.0;
    }
    grid[..grid.len() - lag]
        .iter()
        .zip(grid[lag..].iter())
        .map(|(a, b)| (*a as f64) * (*b as f64))
        .sum()
}

/// The Fourier magnitude spectrum of the grid, zero-padded to a power of two
fn fourier_magnitudes(grid: &[f32]) -> Vec<f64> {
    let n = grid.len().next_power_of_two();
    let mut buffer: Vec<Complex<f64>> = grid
        .iter()
        .map(|value| Complex::new(*value as f64, 0.0))
        .collect();
    buffer.resize(n, Complex::new(0.0, 0.0));
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buffer);
    buffer.iter().take(n / 2).map(|c| c.norm()).collect()
}

/// Fourier periodicity strength at a candidate charge: the magnitude at the
/// frequency of `charge` cycles per m/z
fn fourier_strength(magnitudes: &[f64], n: usize, spacing: f64, charge: f64) -> f64 {
    let bin = (charge * n as f64 * spacing).round() as usize;
    if bin == 0 || bin >= magnitudes.len() {
        return 0.0;
    }
    magnitudes[bin]
}

/// Detect candidate charge states from the periodicity of the local spectrum
/// around a peak.
///
/// The peaks in `window` are resampled onto a uniform grid (the caller
/// supplies the grid `spacing`, conventionally a quarter of the local peak
/// width). A periodicity-strength curve is swept along the charge axis in
/// one-third-charge steps by the chosen method; every local maximum above
/// half the curve's own peak value maps back to an integer charge state by
/// rounding.
pub fn periodicity_charges<C: CentroidLike>(
    window: &[C],
    spacing: f64,
    charge_range: ChargeRange,
    method: ChargeDetection,
) -> Vec<i32> {
    if window.len() < 3 || spacing <= 0.0 {
        return Vec::new();
    }
    let (min_charge, max_charge) = charge_range;
    let grid = resample(window, spacing);
    if grid.is_empty() {
        return Vec::new();
    }

    let magnitudes = match method {
        ChargeDetection::Fft | ChargeDetection::Senko => Some(fourier_magnitudes(&grid)),
        _ => None,
    };
    let padded = grid.len().next_power_of_two();

    // strength curve on the 1/3-charge lattice
    let steps: Vec<i32> = (3 * min_charge..=3 * max_charge).collect();
    let curve: Vec<f64> = steps
        .iter()
        .map(|k| {
            let charge = *k as f64 / 3.0;
            match method {
                ChargeDetection::QuickCharge => 0.0,
                ChargeDetection::Patterson => patterson_strength(&grid, spacing, charge),
                ChargeDetection::Fft => {
                    fourier_strength(magnitudes.as_ref().unwrap(), padded, spacing, charge)
                }
                ChargeDetection::Senko => {
                    patterson_strength(&grid, spacing, charge)
                        * fourier_strength(magnitudes.as_ref().unwrap(), padded, spacing, charge)
                }
            }
        })
        .collect();

    let peak_value = curve.iter().copied().fold(0.0f64, f64::max);
    if peak_value <= 0.0 {
        return Vec::new();
    }

    let mut charges: Vec<i32> = Vec::new();
    for (i, value) in curve.iter().enumerate() {
        if *value < 0.5 * peak_value {
            continue;
        }
        let left = if i == 0 { 0.0 } else { curve[i - 1] };
        let right = if i + 1 == curve.len() { 0.0 } else { curve[i + 1] };
        if *value < left || *value < right {
            continue;
        }
        let charge = (steps[i] as f64 / 3.0).round() as i32;
        if charge < min_charge || charge > max_charge {
            continue;
        }
        if !charges.contains(&charge) {
            charges.push(charge);
        }
    }
    charges
}
