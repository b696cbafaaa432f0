//! Defines all configuration structures for Actionflow applications.
//!
//! These structs are deserialized with `serde` through the `config` crate,
//! from an optional TOML file layered under `ACTIONFLOW__*` environment
//! variables (e.g. `ACTIONFLOW__TIMER__TIME_SCALE=0.5`). This lets logging,
//! timer speed, initial counters and named plans be defined outside the
//! application code.

use crate::error::PlanError;
use crate::plan::PlanNode;
use crate::timing::{ScaledTimer, Timer, TokioTimer};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// The top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub timer: TimerConfig,

    /// Initial values for plan counters.
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,

    /// Named plans, runnable by name.
    #[serde(default)]
    pub plans: BTreeMap<String, PlanNode>,
}

/// Logging settings, applied when the subscriber is installed.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// An `EnvFilter` directive string, e.g. `info` or `actionflow=debug`.
    #[serde(default = "default_level")]
    pub level: String,

    /// Whether log lines include the event target.
    #[serde(default)]
    pub with_target: bool,
}

/// Settings for the timer used by plan `wait` and `delay` nodes.
#[derive(Debug, Clone, Deserialize)]
pub struct TimerConfig {
    /// Every plan duration is multiplied by this factor.
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
}

impl FlowConfig {
    /// Loads the configuration from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, PlanError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config: FlowConfig = builder
            .add_source(Environment::with_prefix("ACTIONFLOW").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration from TOML text, ignoring the environment.
    pub fn from_toml(source: &str) -> Result<Self, PlanError> {
        let config: FlowConfig = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PlanError> {
        let scale = self.timer.time_scale;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(PlanError::InvalidConfig(format!(
                "timer.time_scale must be a positive number, got {scale}"
            )));
        }
        Ok(())
    }

    /// The timer plans should schedule through.
    pub fn timer(&self) -> Arc<dyn Timer> {
        if self.timer.time_scale == 1.0 {
            Arc::new(TokioTimer)
        } else {
            Arc::new(ScaledTimer::new(self.timer.time_scale))
        }
    }

    pub fn plan(&self, name: &str) -> Result<&PlanNode, PlanError> {
        self.plans
            .get(name)
            .ok_or_else(|| PlanError::UnknownPlan(name.to_string()))
    }
}

// --- Default value functions for serde ---

fn default_level() -> String {
    "info".to_string()
}

fn default_time_scale() -> f64 {
    1.0
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            with_target: false,
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            time_scale: default_time_scale(),
        }
    }
}
