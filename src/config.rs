use serde::Deserialize;

use crate::core::LogLevel;

/// How rows with invalid (null / NaN) values in continuous fields are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Invalid {
    Filter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkConfig {
    /// `None` (JSON `null`) keeps invalid values.
    pub invalid: Option<Invalid>,
}

impl Default for MarkConfig {
    fn default() -> Self {
        Self {
            invalid: Some(Invalid::Filter),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewConfig {
    /// Step size of discrete x/y scales.
    pub discrete_step: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self { discrete_step: 20.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaleConfig {
    pub min_opacity: f64,
    pub max_opacity: f64,
    pub max_size: f64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            min_opacity: 0.3,
            max_opacity: 0.8,
            max_size: 361.0,
        }
    }
}

/// Compiler configuration, read from the top-level `config` block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub mark: MarkConfig,
    pub view: ViewConfig,
    pub scale: ScaleConfig,
}

/// Options of a single compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub log_level: LogLevel,
    /// Used when the input carries no `config` block.
    pub config: Config,
}
