//! High level APIs for batch feature extraction

use std::sync::Arc;

use tracing::{debug, warn};

use crate::deconvoluter::{Deconvoluter, DeconvoluterConfig, DeconvolutionError};
use crate::models::ModelLibrary;
use crate::peaks::PeakList;
use crate::solution::DetectedFeature;

/// The outcome of processing a batch of scans: every detected feature plus
/// counts of how many scans succeeded and how many were skipped as empty
#[derive(Debug, Default, Clone)]
pub struct BatchSummary {
    pub features: Vec<DetectedFeature>,
    pub scans_processed: usize,
    pub scans_skipped: usize,
}

/// A batch-processing facade over [`Deconvoluter`].
///
/// The model library is built once at construction and shared read-only
/// afterwards, so any number of scans can be processed against it. Scans
/// that turn out to be empty are skipped and counted rather than failing
/// the batch; configuration errors (an m/z beyond the model library bound)
/// abort it.
#[derive(Debug)]
pub struct FeatureExtractor {
    deconvoluter: Deconvoluter,
}

impl FeatureExtractor {
    pub fn new(config: DeconvoluterConfig) -> Result<Self, DeconvolutionError> {
        Ok(Self {
            deconvoluter: Deconvoluter::new(config)?,
        })
    }

    /// Share a model library built elsewhere instead of building a new one
    pub fn with_library(config: DeconvoluterConfig, library: Arc<ModelLibrary>) -> Self {
        Self {
            deconvoluter: Deconvoluter::with_library(config, library),
        }
    }

    pub fn deconvoluter(&self) -> &Deconvoluter {
        &self.deconvoluter
    }

    /// Deconvolve a single scan
    pub fn process_scan(
        &self,
        scan_id: usize,
        peaks: &PeakList,
    ) -> Result<Vec<DetectedFeature>, DeconvolutionError> {
        self.deconvoluter.deconvolve_scan(scan_id, peaks)
    }

    /// Deconvolve a sequence of scans, accumulating features across all of
    /// them. Empty scans are skipped and counted; fatal errors abort the
    /// batch.
    pub fn process_scans<I>(&self, scans: I) -> Result<BatchSummary, DeconvolutionError>
    where
        I: IntoIterator<Item = (usize, PeakList)>,
    {
        let mut summary = BatchSummary::default();
        for (scan_id, peaks) in scans {
            match self.deconvoluter.deconvolve_scan(scan_id, &peaks) {
                Ok(features) => {
                    summary.scans_processed += 1;
                    summary.features.extend(features);
                }
                Err(DeconvolutionError::EmptySpectrum) => {
                    warn!("scan {scan_id} contained no peaks, skipping");
                    summary.scans_skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        debug!(
            "batch complete: {} features from {} scans ({} skipped)",
            summary.features.len(),
            summary.scans_processed,
            summary.scans_skipped
        );
        Ok(summary)
    }
}
