//! Pipeline configuration.
//!
//! [`PipelineConfig`] is plain serde data so a host can keep it in a JSON file
//! next to its other settings. Missing fields fall back to their defaults.
//!
//! ```
//! use loom_engine::config::{BatchSignalPrecedence, PipelineConfig, SimulationMode};
//!
//! let config = PipelineConfig::from_json_str(r#"{ "mode": "edit", "batch_signal": "external_first" }"#).unwrap();
//! assert_eq!(config.mode, SimulationMode::Edit);
//! assert_eq!(config.batch_signal, BatchSignalPrecedence::ExternalFirst);
//! assert!((config.fixed_dt - 1.0 / 60.0).abs() < f64::EPSILON);
//! ```

use loom_wasm_host::WasmConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SimulationMode
// ---------------------------------------------------------------------------

/// Whether the simulation is being authored or played.
///
/// Logic bindings only run outside [`SimulationMode::Edit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    Edit,
    #[default]
    Play,
}

// ---------------------------------------------------------------------------
// BatchSignalPrecedence
// ---------------------------------------------------------------------------

/// Which completion event wins when one tick spawns both internal and
/// ordinary requests. Exactly one event is emitted per tick either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSignalPrecedence {
    /// Any internal spawn in the batch makes it an initial batch.
    #[default]
    InternalFirst,
    /// Any ordinary spawn in the batch makes it an ordinary batch.
    ExternalFirst,
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seconds per tick. Must be positive and finite.
    pub fixed_dt: f64,
    /// Mode at startup; can be changed later with `Pipeline::set_mode`.
    pub mode: SimulationMode,
    pub batch_signal: BatchSignalPrecedence,
    /// Sandbox limits for WASM behaviors.
    pub wasm: WasmConfig,
}

impl Default for PipelineConfig {
    /// 60 Hz, play mode, internal-first batch signal.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            mode: SimulationMode::Play,
            batch_signal: BatchSignalPrecedence::InternalFirst,
            wasm: WasmConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed JSON, or any error from
    /// [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// - [`ConfigError::InvalidTimestep`] unless `fixed_dt` is positive and
    ///   finite.
    /// - [`ConfigError::InvalidFuelBudget`] if `wasm.fuel_per_update` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            return Err(ConfigError::InvalidTimestep(self.fixed_dt));
        }
        if self.wasm.fuel_per_update == 0 {
            return Err(ConfigError::InvalidFuelBudget);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse pipeline config: {0}")]
    Parse(String),

    #[error("fixed_dt must be positive and finite, got {0}")]
    InvalidTimestep(f64),

    #[error("wasm.fuel_per_update must be greater than zero")]
    InvalidFuelBudget,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
