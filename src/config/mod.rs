//! Pipeline Configuration Module
//!
//! Operator-tunable values for every pipeline stage, loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `CROPWATCH_CONFIG` environment variable (path to TOML file)
//! 2. `cropwatch.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Load once at startup and hand each stage its own section:
//!
//! ```ignore
//! let config = PipelineConfig::load();
//! let evaluator = RiskEvaluator::new(config.risk.clone());
//! ```

mod pipeline_config;
pub mod defaults;
pub mod validation;

pub use pipeline_config::*;
