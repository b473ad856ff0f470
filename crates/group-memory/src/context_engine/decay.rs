//! Age-dependent admission threshold for stored chunks

use serde::Serialize;

/// Step function from chunk age (days) to the minimum relevance a chunk must reach.
/// Brackets are inclusive upper bounds checked in order; anything older falls to `beyond`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecaySchedule {
    pub brackets: Vec<(f64, f64)>,
    pub beyond: f64,
}

impl Default for DecaySchedule {
    fn default() -> Self {
        Self {
            brackets: vec![(7.0, 0.3), (30.0, 0.5), (90.0, 0.7)],
            beyond: 0.9,
        }
    }
}

impl DecaySchedule {
    pub fn threshold(&self, age_days: f64) -> f64 {
        self.brackets
            .iter()
            .find(|(max_age, _)| age_days <= *max_age)
            .map(|(_, threshold)| *threshold)
            .unwrap_or(self.beyond)
    }

    /// Bracket ages must increase and thresholds must never decrease with age
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut previous_age = f64::NEG_INFINITY;
        let mut previous_threshold = f64::NEG_INFINITY;
        for &(max_age, threshold) in &self.brackets {
            if !(max_age > previous_age) {
                anyhow::bail!("decay bracket ages must be strictly increasing");
            }
            if !(0.0..=1.0).contains(&threshold) || threshold < previous_threshold {
                anyhow::bail!("decay thresholds must be within [0, 1] and non-decreasing");
            }
            previous_age = max_age;
            previous_threshold = threshold;
        }
        if !(0.0..=1.0).contains(&self.beyond) || self.beyond < previous_threshold {
            anyhow::bail!("final decay threshold must be within [0, 1] and not below the last bracket");
        }
        Ok(())
    }
}

/// Threshold under the default schedule: 7d → 0.3, 30d → 0.5, 90d → 0.7, older → 0.9
pub fn decay_threshold(age_days: f64) -> f64 {
    DecaySchedule::default().threshold(age_days)
}
