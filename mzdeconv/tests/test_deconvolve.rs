//! End-to-end deconvolution of synthetic spectra assembled from the engine's
//! own model library.

use mzpeaks::CentroidPeak;

use mzdeconv::{DeconvoluterBuilder, DetectedFeature, PeakList};

/// Scale a library pattern into spectrum peaks, shifted by `offset` m/z
fn envelope(
    engine: &mzdeconv::Deconvoluter,
    charge: i32,
    mz: f64,
    scale: f32,
    offset: f64,
) -> (Vec<(f64, f32)>, f64) {
    let pattern = engine.library().get(charge, 0, mz).unwrap();
    let peaks = pattern
        .iter()
        .map(|p| (p.mz + offset, (p.relative / 100.0) as f32 * scale))
        .collect();
    (peaks, pattern.zero_mass)
}

/// Merge envelope fragments into one sorted centroid list, summing
/// coincident positions
fn assemble(fragments: Vec<Vec<(f64, f32)>>) -> PeakList {
    let mut merged: Vec<(f64, f32)> = Vec::new();
    for (mz, intensity) in fragments.into_iter().flatten() {
        match merged.iter_mut().find(|(m, _)| (*m - mz).abs() < 1e-6) {
            Some((_, acc)) => *acc += intensity,
            None => merged.push((mz, intensity)),
        }
    }
    merged.sort_by(|a, b| a.0.total_cmp(&b.0));
    PeakList::new(
        merged
            .into_iter()
            .enumerate()
            .map(|(i, (mz, intensity))| CentroidPeak::new(mz, intensity, i as u32))
            .collect(),
    )
}

fn feature_with_charge(features: &[DetectedFeature], charge: i32) -> &DetectedFeature {
    features
        .iter()
        .find(|f| f.charge == charge)
        .unwrap_or_else(|| panic!("no feature with charge {charge} in {features:?}"))
}

#[test_log::test]
fn test_two_disjoint_envelopes() {
    let engine = DeconvoluterBuilder::new()
        .charge_range((1, 4))
        .max_mz(1000.0)
        .build()
        .unwrap();

    let (single, single_mass) = envelope(&engine, 1, 976.0, 1000.0, 0.0);
    let (double, double_mass) = envelope(&engine, 2, 650.0, 800.0, 0.0);
    let peaks = assemble(vec![single, double]);

    let features = engine.deconvolve_scan(7, &peaks).unwrap();
    assert_eq!(features.len(), 2, "{features:?}");

    let one = feature_with_charge(&features, 1);
    assert!(
        (one.monoisotopic_mass - single_mass).abs() < 0.01,
        "charge 1 mass {} vs {}",
        one.monoisotopic_mass,
        single_mass
    );
    assert!(one.correlation > 0.99, "{}", one.correlation);
    assert!(one.matched_peaks >= 4);
    assert_eq!(one.scan_id, 7);

    let two = feature_with_charge(&features, 2);
    assert!(
        (two.monoisotopic_mass - double_mass).abs() < 0.01,
        "charge 2 mass {} vs {}",
        two.monoisotopic_mass,
        double_mass
    );
    assert!(two.correlation > 0.99, "{}", two.correlation);

    // features come out ordered by base peak m/z
    assert!(features[0].base_mz < features[1].base_mz);
}

#[test_log::test]
fn test_overlapping_envelopes() {
    let engine = DeconvoluterBuilder::new()
        .charge_range((1, 4))
        .max_mz(700.0)
        .build()
        .unwrap();

    let pattern = engine.library().get(2, 0, 650.0).unwrap();
    let spacing = pattern.peaks[1].mz - pattern.peaks[0].mz;
    let zero_mass = pattern.zero_mass;

    // a second envelope of the same charge three isotope positions up, so
    // the tail of the first feeds the head of the second
    let (strong, _) = envelope(&engine, 2, 650.0, 1000.0, 0.0);
    let (weak, _) = envelope(&engine, 2, 650.0, 350.0, 3.0 * spacing);
    let peaks = assemble(vec![strong, weak]);

    let features = engine.deconvolve_scan(1, &peaks).unwrap();
    assert_eq!(features.len(), 2, "{features:?}");
    assert!(features.iter().all(|f| f.charge == 2));

    let expected_low = zero_mass;
    let expected_high = zero_mass + 3.0 * spacing * 2.0;
    let mut masses: Vec<f64> = features.iter().map(|f| f.monoisotopic_mass).collect();
    masses.sort_by(f64::total_cmp);
    assert!(
        (masses[0] - expected_low).abs() < 0.01,
        "low mass {} vs {expected_low}",
        masses[0]
    );
    assert!(
        (masses[1] - expected_high).abs() < 0.01,
        "high mass {} vs {expected_high}",
        masses[1]
    );
    assert!(features.iter().all(|f| f.correlation > 0.9));

    // matched intensity is not double counted: each feature's reported base
    // intensity is bounded by the input signal at its base peak
    let total_input: f32 = peaks.iter().map(|p| p.intensity).sum();
    let total_claimed: f32 = features.iter().map(|f| f.intensity).sum();
    assert!(total_claimed <= total_input);
}

#[test]
fn test_noise_floor_termination() {
    let engine = DeconvoluterBuilder::new()
        .charge_range((1, 4))
        .max_mz(700.0)
        .build()
        .unwrap();

    // an envelope plus scattered noise peaks at the floor
    let (env, zero_mass) = envelope(&engine, 2, 650.0, 1000.0, 0.0);
    let noise: Vec<(f64, f32)> = (0..10).map(|i| (620.0 + i as f64 * 2.37, 4.0)).collect();
    let peaks = assemble(vec![env, noise]);

    let features = engine.deconvolve_scan(1, &peaks).unwrap();
    assert_eq!(features.len(), 1, "{features:?}");
    assert!((features[0].monoisotopic_mass - zero_mass).abs() < 0.01);

    // noise peaks alone should yield nothing
    let noise_only = assemble(vec![(0..10)
        .map(|i| (620.0 + i as f64 * 2.37, 4.0))
        .collect()]);
    let features = engine.deconvolve_scan(2, &noise_only).unwrap();
    assert!(features.is_empty(), "{features:?}");
}

#[test]
fn test_report_area_scaling() {
    let engine = DeconvoluterBuilder::new()
        .charge_range((1, 4))
        .max_mz(700.0)
        .report_area(true)
        .build()
        .unwrap();

    let (env, _) = envelope(&engine, 2, 650.0, 1000.0, 0.0);
    let peaks = assemble(vec![env]);
    let features = engine.deconvolve_scan(1, &peaks).unwrap();
    assert_eq!(features.len(), 1);
    let feature = &features[0];
    // the reported abundance folds in the distribution area
    assert!((feature.intensity - feature.area * 714.0).abs() / feature.intensity < 0.05);
    assert!(feature.area > 0.9 && feature.area <= 1.0);
}
