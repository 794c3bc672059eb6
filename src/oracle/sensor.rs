//! Measurement sources producing one reading per asset.
//!
//! The oracle only sees the `MeasurementSource` trait. The two stand-ins here
//! simulate a cold-chain temperature probe; a production deployment swaps in
//! an adapter for the real sensor feed.

use crate::oracle::error::SensorError;
use crate::types::{AssetId, Reading};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;
use tracing::debug;

/// Source of readings for monitored assets.
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    /// Produce the current reading for `asset`.
    async fn read(&self, asset: AssetId) -> Result<Reading, SensorError>;
}

/// Independent uniform temperature on every poll.
pub struct RandomTemperatureSensor {
    range: Range<f64>,
}

impl RandomTemperatureSensor {
    pub fn new(range: Range<f64>) -> Self {
        Self { range }
    }
}

impl Default for RandomTemperatureSensor {
    fn default() -> Self {
        Self::new(5.0..15.0)
    }
}

#[async_trait]
impl MeasurementSource for RandomTemperatureSensor {
    async fn read(&self, asset: AssetId) -> Result<Reading, SensorError> {
        let value = rand::thread_rng().gen_range(self.range.clone());
        Ok(Reading::celsius(asset, value))
    }
}

/// Per-asset random walk, clamped to a plausible cold-chain band.
pub struct DriftingTemperatureSensor {
    state: Mutex<HashMap<AssetId, f64>>,
    initial: Range<f64>,
    step: f64,
    min: f64,
    max: f64,
}

impl DriftingTemperatureSensor {
    /// Each asset starts uniformly in `initial`, then moves at most `step`
    /// per read while staying within `min..=max`.
    pub fn new(initial: Range<f64>, step: f64, min: f64, max: f64) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            initial,
            step,
            min,
            max,
        }
    }
}

impl Default for DriftingTemperatureSensor {
    fn default() -> Self {
        Self::new(5.0..15.0, 1.0, -5.0, 15.0)
    }
}

#[async_trait]
impl MeasurementSource for DriftingTemperatureSensor {
    async fn read(&self, asset: AssetId) -> Result<Reading, SensorError> {
        let mut state = self.state.lock().map_err(|_| SensorError::Unavailable {
            asset,
            reason: "sensor state poisoned".into(),
        })?;

        let mut rng = rand::thread_rng();
        let current = *state
            .entry(asset)
            .or_insert_with(|| rng.gen_range(self.initial.clone()));
        let next = (current + rng.gen_range(-self.step..=self.step)).clamp(self.min, self.max);
        state.insert(asset, next);

        debug!(asset = %asset, previous = current, value = next, "drifted reading");
        Ok(Reading::celsius(asset, next))
    }
}
