//! Aggregator configuration.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_ITEMS: usize = 100;

/// Flush thresholds of an [`Aggregator`](super::Aggregator).
///
/// A batch is dispatched as soon as it holds `max_items` calls, or
/// `max_wait` after the first call of the batch was enqueued, whichever
/// happens first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    #[serde(
        rename = "max_wait_ms",
        alias = "maxWait",
        alias = "maxWaitTime",
        alias = "max_wait_time",
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    pub max_wait: Duration,
    #[serde(alias = "maxItems", alias = "maxTasks", alias = "max_tasks")]
    pub max_items: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_wait: DEFAULT_MAX_WAIT,
            max_items: DEFAULT_MAX_ITEMS,
        }
    }
}

impl AggregatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_max_wait_ms(self, ms: u64) -> Self {
        self.with_max_wait(Duration::from_millis(ms))
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Both thresholds must be positive.
    pub fn validate(&self) -> Result<()> {
        if self.max_items == 0 {
            return Err(Error::configuration_with_context(
                "max_items must be at least 1",
                ErrorContext::new()
                    .with_field_path("max_items")
                    .with_details("got 0")
                    .with_source("aggregator_config"),
            ));
        }
        if self.max_wait.is_zero() {
            return Err(Error::configuration_with_context(
                "max_wait must be positive",
                ErrorContext::new()
                    .with_field_path("max_wait_ms")
                    .with_details("got 0")
                    .with_source("aggregator_config"),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON document; missing fields take defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a YAML document; missing fields take defaults.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
}

fn deserialize_millis<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}
