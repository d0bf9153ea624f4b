//! Runtime configuration for `Circuit`s and `Cortex`.
//!
//! Lane count and queue policy are exposed here rather than hardcoded,
//! using the layered `config` + `toml` loading convention common across
//! the wider workspace's service configuration.

use serde::{Deserialize, Serialize};

/// Per-circuit tuning: lane count and queue back-pressure policy.
///
/// `queue_bound: None` is the default — an unbounded queue, so
/// `emit` on an async pipe never blocks or fails for capacity reasons.
/// Setting a bound makes a full lane's queue reject new emissions with
/// [`crate::error::SubstratesError::Rejected`] rather than growing without
/// limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub lanes: usize,
    pub queue_bound: Option<usize>,
    pub default_reservoir_capacity: usize,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        CircuitConfig {
            lanes: 1,
            queue_bound: None,
            default_reservoir_capacity: 1024,
        }
    }
}

impl CircuitConfig {
    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes.max(1);
        self
    }

    pub fn with_queue_bound(mut self, bound: usize) -> Self {
        self.queue_bound = Some(bound);
        self
    }
}

/// Cortex-wide defaults, applied to any circuit opened without an explicit
/// `CircuitConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CortexConfig {
    pub default_circuit: CircuitConfig,
}

impl Default for CortexConfig {
    fn default() -> Self {
        CortexConfig {
            default_circuit: CircuitConfig::default(),
        }
    }
}

#[cfg(feature = "config")]
impl CortexConfig {
    /// Loads configuration layered from an optional `substrates.toml` in the
    /// working directory, overridden by `SUBSTRATES__*` environment
    /// variables (double underscore as the nesting separator, e.g.
    /// `SUBSTRATES__DEFAULT_CIRCUIT__LANES=4`).
    pub fn load() -> crate::error::SubstratesResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("substrates").required(false))
            .add_source(config::Environment::with_prefix("SUBSTRATES").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
