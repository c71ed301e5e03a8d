//! Falsification Tests: Category A - Delay Bounds (F001-F006)

use std::sync::Arc;

use proptest::prelude::*;
use slowdisk_core::{
    DEFAULT_MAX_WAIT, DEFAULT_MIN_WAIT, DelayConfig, DelayGenerator, DelayRange, Normalization,
    SeededEntropy, spin,
};

proptest! {
    /// F001: For min <= max, every wait lies in [min, max]
    #[test]
    fn f001_wait_within_inclusive_bounds(
        seed in any::<u64>(),
        min in 0u64..2_000,
        width in 0u64..2_000,
    ) {
        let max = min + width;
        prop_assume!(max > 0);
        let (range, normalization) = DelayConfig::new(min, max).effective_range();
        prop_assert!(normalization.is_none());

        let generator = DelayGenerator::with_entropy(range, Arc::new(SeededEntropy::new(seed)));
        for _ in 0..8 {
            let v = generator.wait();
            prop_assert!(min <= v && v <= max, "{} outside [{}, {}]", v, min, max);
        }
    }

    /// F002: An inverted range always normalizes to exactly (500, 1000)
    #[test]
    fn f002_inverted_range_normalizes_to_defaults(min in 1u64..u64::MAX, gap in 1u64..1_000) {
        let max = min.saturating_sub(gap);
        prop_assume!(min > max);
        let (config, normalization) = DelayConfig::new(min, max).normalize();
        prop_assert_eq!((config.min_wait, config.max_wait), (DEFAULT_MIN_WAIT, DEFAULT_MAX_WAIT));
        prop_assert_eq!(
            normalization,
            Some(Normalization::InvertedRange { min_wait: min, max_wait: max })
        );
    }
}

/// F003: A zero maximum becomes 1 and only 0 iterations are ever drawn
#[test]
fn f003_zero_max_yields_only_zero() {
    let (config, normalization) = DelayConfig::new(0, 0).normalize();
    assert_eq!(config.max_wait, 1);
    assert_eq!(normalization, Some(Normalization::ZeroMax));

    let (range, _) = DelayConfig::new(0, 0).effective_range();
    let generator = DelayGenerator::with_entropy(range, Arc::new(SeededEntropy::new(3)));
    for _ in 0..100 {
        assert_eq!(generator.wait(), 0);
    }
}

/// F004: Both endpoints of the range are reachable
#[test]
fn f004_endpoints_reachable() {
    let range = DelayRange::new(10, 13).unwrap();
    let generator = DelayGenerator::with_entropy(range, Arc::new(SeededEntropy::new(11)));
    let drawn: Vec<u64> = (0..500).map(|_| generator.pick()).collect();
    assert!(drawn.contains(&10));
    assert!(drawn.contains(&13));
    assert!(drawn.iter().all(|v| (10..=13).contains(v)));
}

/// F005: The busy loop is not optimized away
#[test]
fn f005_spin_does_work() {
    assert_ne!(spin(1_000), 0);
    assert_eq!(spin(1_000), spin(1_000));
}

/// F006: Defaults apply when no parameters are supplied
#[test]
fn f006_defaults_without_parameters() {
    let config = DelayConfig::from_params(std::iter::empty::<&str>()).unwrap();
    let (range, normalization) = config.effective_range();
    assert_eq!((range.min(), range.max()), (500, 1000));
    assert!(normalization.is_none());
}
