//! Binary breach policy.

use crate::oracle::config::PolicyConfig;
use crate::types::{Decision, Reading};

/// Pure threshold check: strictly above the threshold is a breach.
#[derive(Debug, Clone)]
pub struct BreachPolicy {
    threshold: f64,
    breach_score: u8,
}

impl BreachPolicy {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            threshold: config.threshold,
            breach_score: config.breach_score,
        }
    }

    /// Highest reading still considered safe.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The score written on breach is fixed, not derived from the magnitude.
    pub fn evaluate(&self, reading: &Reading) -> Decision {
        if reading.value > self.threshold {
            Decision::Breach {
                score: self.breach_score,
            }
        } else {
            Decision::Safe
        }
    }
}
