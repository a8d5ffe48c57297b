//! Engine configuration with environment overrides.

use serde::Deserialize;

use crate::query::guards::{
    clamp_cache_size, clamp_depth, clamp_line_size, DEFAULT_LINE_SIZE, DEFAULT_MAX_DEPTH,
    DEFAULT_SCHEMA_CACHE_SIZE,
};

/// Tunables shared by the settlement, projection and big map engines.
///
/// Collaborators usually embed this in their own configuration file; the
/// engine itself only reads the environment through [`EngineConfig::from_env`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum nesting depth for decode, build, settle and projection walks.
    pub max_depth: usize,
    /// Number of schema skeletons kept by [`crate::michelson::cache::SchemaCache`].
    pub schema_cache_size: usize,
    /// Preferred line width of pretty-printed Michelson.
    pub line_size: usize,
    /// Reconstruct big map pointers on the rayon pool.
    pub parallel_reconstruction: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            schema_cache_size: DEFAULT_SCHEMA_CACHE_SIZE,
            line_size: DEFAULT_LINE_SIZE,
            parallel_reconstruction: true,
        }
    }
}

impl EngineConfig {
    /// Build a config from `TZINDEX_*` environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_depth: env_usize("TZINDEX_MAX_DEPTH").unwrap_or(defaults.max_depth),
            schema_cache_size: env_usize("TZINDEX_SCHEMA_CACHE_SIZE")
                .unwrap_or(defaults.schema_cache_size),
            line_size: env_usize("TZINDEX_LINE_SIZE").unwrap_or(defaults.line_size),
            parallel_reconstruction: env_flag("TZINDEX_PARALLEL_RECONSTRUCTION")
                .unwrap_or(defaults.parallel_reconstruction),
        }
        .clamped()
    }

    /// Pull every value into the range allowed by the guards.
    pub fn clamped(self) -> Self {
        Self {
            max_depth: clamp_depth(self.max_depth),
            schema_cache_size: clamp_cache_size(self.schema_cache_size),
            line_size: clamp_line_size(self.line_size),
            parallel_reconstruction: self.parallel_reconstruction,
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
