//! Configuration for the index engine
//!
//! Two layers of configuration exist:
//!
//! - [`EngineConfig`]: process-level knobs shared by every index instance
//!   (buffer budget, window defaults). Loaded from a TOML file with
//!   environment variable overrides.
//! - Per-index properties: a string key/value map attached to each index
//!   registration (`index_window_range`, `feature_dim`, ...). The typed
//!   accessors here turn those strings into validated values.

use crate::error::{IndexError, IndexResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// Per-index property keys
pub const INDEX_RANGE_STRATEGY: &str = "index_range_strategy";
pub const INDEX_WINDOW_RANGE: &str = "index_window_range";
pub const INDEX_SLIDE_STEP: &str = "index_slide_step";
pub const FEATURE_DIM: &str = "feature_dim";
pub const MAX_ENTRIES: &str = "max_entries";
pub const MIN_ENTRIES: &str = "min_entries";
pub const SEED_PICKER: &str = "seed_picker";
pub const DISTANCE: &str = "distance";
pub const ELB_TYPE: &str = "elb_type";
pub const ELB_CALC_PARAM: &str = "elb_calc_param";
pub const ELB_CALC_PARAM_SINGLE: &str = "single";
pub const ELB_THRESHOLD_BASE: &str = "elb_threshold_base";
pub const ELB_THRESHOLD_RATIO: &str = "elb_threshold_ratio";

// Query-only property keys
pub const THRESHOLD: &str = "threshold";
pub const PATTERN: &str = "pattern";

/// Fallback ELB deviation budget as a fraction of the window's value range,
/// used when neither threshold base nor ratio is configured
pub const ELB_DEFAULT_THRESHOLD_RATIO: f64 = 0.1;

/// Per-index property map as handed over by the host's index registration
pub type IndexProps = HashMap<String, String>;

/// Process-level configuration shared by all index instances
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Memory budget per index instance in bytes; drives the amortized
    /// cost estimation reported to the flush scheduler
    #[serde(default = "default_index_buffer_size")]
    pub index_buffer_size: usize,

    /// Window length used when an index omits `index_window_range`
    #[serde(default = "default_window_range")]
    pub default_window_range: usize,
}

fn default_index_buffer_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_window_range() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_buffer_size: default_index_buffer_size(),
            default_window_range: default_window_range(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> IndexResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| IndexError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Load from default locations, falling back to built-in defaults
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("simile").join("config.toml")),
            Some(PathBuf::from("./simile.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load(path) {
                    Ok(mut config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        config.apply_env_overrides();
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("SIMILE_INDEX_BUFFER_SIZE") {
            if let Ok(s) = size.parse() {
                self.index_buffer_size = s;
            }
        }
        if let Ok(range) = std::env::var("SIMILE_WINDOW_RANGE") {
            if let Ok(r) = range.parse() {
                self.default_window_range = r;
            }
        }
    }
}

/// Read an integer property, erroring on malformed values
pub fn prop_usize(props: &IndexProps, key: &str) -> IndexResult<Option<usize>> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| IndexError::Config(format!("{}: not an integer: {:?}", key, raw))),
    }
}

/// Read a float property, erroring on malformed values
pub fn prop_f64(props: &IndexProps, key: &str) -> IndexResult<Option<f64>> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| IndexError::Config(format!("{}: not a number: {:?}", key, raw))),
    }
}

/// Parse a comma-separated pattern string into doubles
///
/// This is the wire form of the query-side `pattern` parameter.
pub fn parse_numeric_pattern(pattern: &str) -> IndexResult<Vec<f64>> {
    pattern
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| IndexError::Config(format!("pattern: not a number: {:?}", part)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.index_buffer_size, 16 * 1024 * 1024);
        assert_eq!(config.default_window_range, 64);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simile.toml");
        std::fs::write(&path, "index_buffer_size = 1024\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.index_buffer_size, 1024);
        // omitted keys keep their defaults
        assert_eq!(config.default_window_range, 64);
    }

    #[test]
    fn test_prop_accessors() {
        let mut props = IndexProps::new();
        props.insert(INDEX_WINDOW_RANGE.to_string(), "32".to_string());
        props.insert(THRESHOLD.to_string(), "0.75".to_string());
        props.insert(MAX_ENTRIES.to_string(), "abc".to_string());

        assert_eq!(prop_usize(&props, INDEX_WINDOW_RANGE).unwrap(), Some(32));
        assert_eq!(prop_usize(&props, INDEX_SLIDE_STEP).unwrap(), None);
        assert_eq!(prop_f64(&props, THRESHOLD).unwrap(), Some(0.75));
        assert!(prop_usize(&props, MAX_ENTRIES).is_err());
    }

    #[test]
    fn test_parse_numeric_pattern() {
        let pattern = parse_numeric_pattern("1.0, 2.5,-3").unwrap();
        assert_eq!(pattern, vec![1.0, 2.5, -3.0]);

        assert!(parse_numeric_pattern("1.0,x").is_err());
    }
}
