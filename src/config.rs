//! Runtime configuration.
//!
//! Every section has working defaults, so an empty JSON object is a valid
//! configuration file. Binaries load a file with [`LifelinkConfig::from_file`]
//! and then apply command line overrides.

use crate::profile::SubjectProfile;
use crate::protocol::CardioFitness;
use crate::vitals::DEFAULT_SMOOTHING_FACTOR;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_SUBJECTS: usize = 5;
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 5000;
pub const DEFAULT_RELAY_ADDRESS: &str = "127.0.0.1:8000";
pub const DEFAULT_PRODUCER_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_CONSUMER_BIND: &str = "127.0.0.1:8002";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifelinkConfig {
    pub simulation: SimulationConfig,
    pub producer: ProducerConfig,
    pub relay: RelayConfig,
    pub aggregator: AggregatorConfig,
    /// Seed records for the in-memory subject directory.
    pub subjects: Vec<SubjectProfile>,
}

impl LifelinkConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.simulation.validate()?;
        if self.producer.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("producer.tick_interval_ms must be positive"));
        }
        if self.producer.duration_seconds == 0 {
            return Err(ConfigError::Invalid("producer.duration_seconds must be at least 1"));
        }
        if self.producer.max_subjects == 0 {
            return Err(ConfigError::Invalid("producer.max_subjects must be positive"));
        }
        if self.relay.buffer_capacity == 0 {
            return Err(ConfigError::Invalid("relay.buffer_capacity must be positive"));
        }
        if self.aggregator.alerts.consumer_buffer == 0 {
            return Err(ConfigError::Invalid("aggregator.alerts.consumer_buffer must be positive"));
        }
        if self.aggregator.alerts.hook_queue == 0 {
            return Err(ConfigError::Invalid("aggregator.alerts.hook_queue must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub smoothing_factor: f64,
    pub health: HealthModel,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0) {
            return Err(ConfigError::Invalid("simulation.smoothing_factor must be in (0, 1]"));
        }
        if self.health.cardio_tiers.is_empty() {
            return Err(ConfigError::Invalid("simulation.health.cardio_tiers is empty"));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
            health: HealthModel::default(),
        }
    }
}

/// Coefficients of the derived health indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthModel {
    /// Checked in order; the first tier whose minima are all met wins.
    pub cardio_tiers: Vec<CardioTier>,
    pub energy: EnergyModel,
}

impl HealthModel {
    pub fn classify_cardio(&self, vo2_max: f64, hrv: f64, recovery_rate: f64) -> CardioFitness {
        self.cardio_tiers
            .iter()
            .find(|tier| vo2_max >= tier.min_vo2 && hrv >= tier.min_hrv && recovery_rate >= tier.min_recovery)
            .map_or(CardioFitness::BelowAverage, |tier| tier.level)
    }
}

impl Default for HealthModel {
    fn default() -> Self {
        Self {
            cardio_tiers: vec![
                CardioTier::new(CardioFitness::Excellent, 45.0, 50.0, 0.7),
                CardioTier::new(CardioFitness::Good, 38.0, 40.0, 0.6),
                CardioTier::new(CardioFitness::Average, 32.0, 30.0, 0.5),
            ],
            energy: EnergyModel::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CardioTier {
    pub level: CardioFitness,
    pub min_vo2: f64,
    pub min_hrv: f64,
    pub min_recovery: f64,
}

impl CardioTier {
    pub fn new(level: CardioFitness, min_vo2: f64, min_hrv: f64, min_recovery: f64) -> Self {
        Self {
            level,
            min_vo2,
            min_hrv,
            min_recovery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyModel {
    pub stress_weight: f64,
    pub exertion_weight: f64,
    /// Added for restorative activities.
    pub rest_bonus: f64,
    pub noise: f64,
}

impl Default for EnergyModel {
    fn default() -> Self {
        Self {
            stress_weight: 0.8,
            exertion_weight: 0.3,
            rest_bonus: 15.0,
            noise: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub tick_interval_ms: u64,
    pub max_subjects: usize,
    /// Simulated seconds covered by each tick.
    pub duration_seconds: u32,
    /// Base seed for per-subject random sources. Unset means entropy.
    pub seed: Option<u64>,
    pub mailbox_capacity: usize,
}

impl ProducerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            max_subjects: DEFAULT_MAX_SUBJECTS,
            duration_seconds: 1,
            seed: None,
            mailbox_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub address: String,
    pub backoff_ms: u64,
    /// Messages accepted by `publish` but not yet written.
    pub buffer_capacity: usize,
}

impl RelayConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_RELAY_ADDRESS.to_string(),
            backoff_ms: DEFAULT_RECONNECT_BACKOFF_MS,
            buffer_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub producer_bind: String,
    pub consumer_bind: String,
    pub alerts: AlertPolicy,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            producer_bind: DEFAULT_PRODUCER_BIND.to_string(),
            consumer_bind: DEFAULT_CONSUMER_BIND.to_string(),
            alerts: AlertPolicy::default(),
        }
    }
}

/// Alert predicate thresholds. A reading alerts when either is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPolicy {
    pub heart_rate_high: f64,
    pub stress_high: f64,
    /// Alerts buffered per consumer before new ones are dropped.
    pub consumer_buffer: usize,
    /// Archive and notification jobs queued for the hook worker before new
    /// ones are dropped.
    pub hook_queue: usize,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            heart_rate_high: 120.0,
            stress_high: 80.0,
            consumer_buffer: 32,
            hook_queue: 256,
        }
    }
}
