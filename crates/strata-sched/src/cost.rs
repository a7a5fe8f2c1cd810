//! Online throughput estimate per extension class

use std::collections::HashMap;

use strata_core::config::SchedulerConfig;
use strata_core::MIB;

/// Smoothing factor applied to each new observation
pub const DEFAULT_ALPHA: f64 = 0.25;

/// Rate assumed for an extension before anything was observed (20 MiB/s)
pub const DEFAULT_RATE: f64 = 20.0 * MIB as f64;

/// Floor on elapsed time so instant jobs do not divide by zero
const MIN_ELAPSED_SECS: f64 = 1e-6;

/// Floor on the rate used for prediction
const MIN_RATE: f64 = 1.0;

/// Exponentially smoothed bytes/second, one estimate per extension.
///
/// `rate ← (1 − alpha)·rate + alpha·observed`, so an observation made `n`
/// updates ago weighs `(1 − alpha)^n`.
#[derive(Debug, Clone)]
pub struct CostModel {
    alpha: f64,
    default_rate: f64,
    rates: HashMap<String, f64>,
}

impl CostModel {
    pub fn new(alpha: f64, default_rate: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            default_rate,
            rates: HashMap::new(),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.alpha, config.default_rate)
    }

    /// Predicted seconds to process `size` bytes of `extension`.
    /// An unseen extension is seeded with the default rate.
    pub fn predict(&mut self, size: u64, extension: &str) -> f64 {
        let rate = *self.seed(extension);
        size as f64 / rate.max(MIN_RATE)
    }

    /// Fold one finished job into the estimate for `extension`.
    pub fn observe(&mut self, size: u64, extension: &str, elapsed_secs: f64) {
        let observed = size as f64 / elapsed_secs.max(MIN_ELAPSED_SECS);
        let alpha = self.alpha;
        let rate = self.seed(extension);
        *rate = (1.0 - alpha) * *rate + alpha * observed;
    }

    /// Current estimate without seeding.
    pub fn rate(&self, extension: &str) -> f64 {
        self.rates
            .get(extension)
            .copied()
            .unwrap_or(self.default_rate)
    }

    pub fn rates(&self) -> &HashMap<String, f64> {
        &self.rates
    }

    fn seed(&mut self, extension: &str) -> &mut f64 {
        self.rates
            .entry(extension.to_string())
            .or_insert(self.default_rate)
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA, DEFAULT_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIB_F: f64 = MIB as f64;

    #[test]
    fn test_predict_with_default_rate() {
        let mut model = CostModel::default();
        assert!((model.predict(20 * MIB, ".bin") - 1.0).abs() < 1e-12);
        assert!((model.predict(5 * MIB, ".txt") - 0.25).abs() < 1e-12);
        assert_eq!(model.rates().len(), 2, "predict seeds unseen extensions");
    }

    #[test]
    fn test_single_observation() {
        let mut model = CostModel::default();
        model.observe(100 * MIB, ".iso", 10.0);
        assert!((model.rate(".iso") - 17.5 * MIB_F).abs() < 1e-6);
        // other classes are untouched
        assert_eq!(model.rate(".txt"), DEFAULT_RATE);
    }

    #[test]
    fn test_zero_elapsed_is_clamped() {
        let mut model = CostModel::new(1.0, DEFAULT_RATE);
        model.observe(1, ".x", 0.0);
        assert!((model.rate(".x") - 1e6).abs() < 1e-3);
    }

    #[test]
    fn test_rate_floor_in_predict() {
        let mut model = CostModel::new(1.0, DEFAULT_RATE);
        // 1 byte in 10 s → 0.1 B/s, below the floor
        model.observe(1, ".slow", 10.0);
        assert_eq!(model.predict(100, ".slow"), 100.0);
    }

    #[test]
    fn test_from_config() {
        let config = SchedulerConfig {
            alpha: 0.5,
            default_rate: 1000.0,
            ..Default::default()
        };
        let mut model = CostModel::from_config(&config);
        assert_eq!(model.predict(500, ""), 0.5);
        model.observe(3000, "", 1.0);
        assert_eq!(model.rate(""), 2000.0);
    }

    proptest! {
        #[test]
        fn converges_geometrically(
            true_mib_s in 1.0f64..200.0,
            n in 1usize..40,
        ) {
            let mut model = CostModel::default();
            let target = true_mib_s * MIB_F;
            for _ in 0..n {
                // 10 s jobs at the true rate
                model.observe((target * 10.0) as u64, ".dat", 10.0);
            }
            let expected = (DEFAULT_RATE - target).abs() * 0.75f64.powi(n as i32);
            let actual = (model.rate(".dat") - target).abs();
            prop_assert!((actual - expected).abs() <= 1.0, "actual {actual} expected {expected}");
        }
    }
}
