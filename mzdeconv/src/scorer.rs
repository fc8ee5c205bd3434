//! Correlation scoring between theoretical and observed isotope intensities

/// The score type used for pattern correlation
pub type ScoreType = f64;

/// Scores how well a vector of observed peak intensities follows a
/// theoretical isotope pattern.
pub trait PatternScorer {
    /// Compute the match quality between paired theoretical and observed
    /// intensity vectors. Higher is better.
    fn score(&self, theoretical: &[f32], observed: &[f32]) -> ScoreType;
}

/// The cosine angle between the theoretical and observed intensity vectors.
///
/// Returns a value in `[0, 1]`, where 1 is a perfect proportional match.
/// Degenerate inputs, either vector all zero or an anti-correlated pair,
/// score 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct CosineScorer {}

impl CosineScorer {
    #[inline]
    pub fn score(&self, theoretical: &[f32], observed: &[f32]) -> ScoreType {
        let mut sxy = 0.0f64;
        let mut sxx = 0.0f64;
        let mut syy = 0.0f64;
        for (t, o) in theoretical.iter().zip(observed.iter()) {
            let t = *t as f64;
            let o = *o as f64;
            sxy += t * o;
            sxx += t * t;
            syy += o * o;
        }
        if sxx > 0.0 && syy > 0.0 && sxy > 0.0 {
            sxy / (sxx * syy).sqrt()
        } else {
            0.0
        }
    }
}

impl PatternScorer for CosineScorer {
    #[inline]
    fn score(&self, theoretical: &[f32], observed: &[f32]) -> ScoreType {
        CosineScorer::score(self, theoretical, observed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_perfect_match() {
        let scorer = CosineScorer::default();
        let t = [100.0, 54.0, 17.0, 4.0];
        let o = [2000.0, 1080.0, 340.0, 80.0];
        let score = scorer.score(&t, &o);
        assert!((score - 1.0).abs() < 1e-9, "{score}");
    }

    #[test]
    fn test_partial_match() {
        let scorer = CosineScorer::default();
        let t = [100.0, 54.0, 17.0, 4.0];
        let o = [2000.0, 1080.0, 340.0, 4000.0];
        let score = scorer.score(&t, &o);
        assert!(score < 0.9, "{score}");
        assert!(score > 0.0, "{score}");
    }

    #[test]
    fn test_degenerate() {
        let scorer = CosineScorer::default();
        assert_eq!(scorer.score(&[100.0, 50.0], &[0.0, 0.0]), 0.0);
        assert_eq!(scorer.score(&[0.0, 0.0], &[10.0, 5.0]), 0.0);
        assert_eq!(scorer.score(&[], &[]), 0.0);
    }
}
