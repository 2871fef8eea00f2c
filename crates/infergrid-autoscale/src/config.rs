//! Scaler configuration.
//!
//! Parsed from the `[scaler]` table of a TOML document:
//!
//! ```toml
//! [scaler]
//! enabled = true
//! interval = "10s"
//! scale_up_cooldown = "5m"
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ScalerError, ScalerResult};

/// Time between two scaler triggers.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Time that has to pass after a scale-up before a scale-down is allowed.
pub const DEFAULT_SCALE_UP_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Configuration for [`AdaptiveAllocationsScalerService`](crate::AdaptiveAllocationsScalerService).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    /// When false, topology events are ignored and the loop never runs.
    pub enabled: bool,
    /// Fixed delay between triggers.
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
    /// Minimum time between a scale-up and the next scale-down.
    #[serde(deserialize_with = "deserialize_duration")]
    pub scale_up_cooldown: Duration,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_INTERVAL,
            scale_up_cooldown: DEFAULT_SCALE_UP_COOLDOWN,
        }
    }
}

#[derive(Deserialize)]
struct ScalerDocument {
    #[serde(default)]
    scaler: ScalerConfig,
}

impl ScalerConfig {
    /// Parse the `[scaler]` table of a TOML document.
    ///
    /// A missing table yields the defaults.
    pub fn from_toml_str(content: &str) -> ScalerResult<Self> {
        let doc: ScalerDocument =
            toml::from_str(content).map_err(|e| ScalerError::Config(e.to_string()))?;
        doc.scaler.validate()?;
        Ok(doc.scaler)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_scale_up_cooldown(mut self, cooldown: Duration) -> Self {
        self.scale_up_cooldown = cooldown;
        self
    }

    pub fn validate(&self) -> ScalerResult<()> {
        if self.interval.is_zero() {
            return Err(ScalerError::Config("interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Secs(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Secs(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse a duration string like "250ms", "30s", "5m", "1h".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> ScalerResult<Duration> {
    let s = s.trim();
    let invalid = || ScalerError::Config(format!("invalid duration: {s:?}"));

    let (digits, unit_secs): (&str, Option<u64>) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, None)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, Some(1))
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, Some(60))
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, Some(3600))
    } else {
        (s, Some(1))
    };

    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    match unit_secs {
        None => Ok(Duration::from_millis(value)),
        Some(unit) => value
            .checked_mul(unit)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
    }
}
