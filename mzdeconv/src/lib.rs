//! `mzdeconv` detects isotopic envelopes in centroided mass spectra and
//! deconvolves their charge states.
//!
//! Theoretical isotope distributions are synthesized from averagine-scaled
//! compositions by a Fourier transform calculator, cached in a model
//! library, and greedily matched against the spectrum's most intense
//! unexplained peaks, subtracting matched signal until only noise remains.

pub mod api;
pub mod averagine;
pub mod charge;
pub mod deconvoluter;
pub mod elements;
pub mod mercury;
pub mod models;
pub mod peaks;
pub mod scorer;
pub mod solution;

pub use crate::api::{BatchSummary, FeatureExtractor};
pub use crate::averagine::{Averagine, Variant};
pub use crate::charge::{ChargeDetection, ChargeRange};
pub use crate::deconvoluter::{
    Deconvoluter, DeconvoluterBuilder, DeconvoluterConfig, DeconvolutionError, MassAnalyzer,
};
pub use crate::elements::{ElementTable, Enrichment, PROTON};
pub use crate::mercury::{FormulaError, IsotopeDistribution, Mercury};
pub use crate::models::{ModelLibrary, TheoreticalPattern};
pub use crate::peaks::PeakList;
pub use crate::solution::DetectedFeature;
