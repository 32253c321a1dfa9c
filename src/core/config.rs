//! Engine configuration.
//!
//! Configuration is read from TOML and may be overridden from the
//! environment. [`init`] installs it process-wide: the leak-check flag goes
//! to the area registry, the vector flag is consulted when morphology
//! chooses a strategy, and sinks take their tile shapes from it.

use crate::core::area;
use crate::core::error::{ConfigError, ConfigResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Default memory limit for sink output (2 GiB).
pub const DEFAULT_MEMORY_LIMIT: usize = 2 * 1024 * 1024 * 1024;

/// Tunables for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker lanes (0 = available parallelism).
    pub concurrency: usize,
    /// Width of a small tile.
    pub tile_width: i32,
    /// Height of a small tile.
    pub tile_height: i32,
    /// Height of a fat strip.
    pub fatstrip_height: i32,
    /// Height of a thin strip.
    pub thinstrip_height: i32,
    /// Allow compiled vector paths.
    pub vector: bool,
    /// Track live areas for leak reports.
    pub leak_check: bool,
    /// Largest sink output buffer in bytes.
    pub memory_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            tile_width: 128,
            tile_height: 128,
            fatstrip_height: 16,
            thinstrip_height: 4,
            vector: true,
            leak_check: false,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker lanes.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the small-tile shape.
    pub fn with_tile_size(mut self, width: i32, height: i32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    /// Enable or disable compiled vector paths.
    pub fn with_vector(mut self, vector: bool) -> Self {
        self.vector = vector;
        self
    }

    /// Enable or disable leak tracking.
    pub fn with_leak_check(mut self, leak_check: bool) -> Self {
        self.leak_check = leak_check;
        self
    }

    /// Set the memory limit in bytes.
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.display().to_string(),
            error,
        })?;
        Self::from_toml(&text)
    }

    /// Serialize to a TOML document.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `TESSELLA_CONCURRENCY`, `TESSELLA_NOVECTOR` and `TESSELLA_LEAK`.
    pub fn with_env_overrides(self) -> ConfigResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("TESSELLA_CONCURRENCY") {
            self.concurrency = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "TESSELLA_CONCURRENCY".to_string(),
                reason: format!("'{}' is not a thread count", value),
            })?;
        }
        if lookup("TESSELLA_NOVECTOR").is_some() {
            self.vector = false;
        }
        if lookup("TESSELLA_LEAK").is_some() {
            self.leak_check = true;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check that every tile shape is positive.
    pub fn validate(&self) -> ConfigResult<()> {
        let shapes = [
            ("tile_width", self.tile_width),
            ("tile_height", self.tile_height),
            ("fatstrip_height", self.fatstrip_height),
            ("thinstrip_height", self.thinstrip_height),
        ];
        for (key, value) in shapes {
            if value <= 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("must be positive, got {}", value),
                });
            }
        }
        Ok(())
    }

    /// Worker lanes to use, resolving 0 to the machine's parallelism.
    pub fn lanes(&self) -> usize {
        if self.concurrency > 0 {
            self.concurrency
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

// ============================================================================
// Process-wide state
// ============================================================================

static VECTOR: AtomicBool = AtomicBool::new(true);

fn active() -> &'static RwLock<EngineConfig> {
    static ACTIVE: OnceLock<RwLock<EngineConfig>> = OnceLock::new();
    ACTIVE.get_or_init(|| RwLock::new(EngineConfig::default()))
}

/// Install `config` as the process-wide configuration.
pub fn init(config: &EngineConfig) {
    VECTOR.store(config.vector, Ordering::Relaxed);
    area::set_leak_check(config.leak_check);
    *active().write() = config.clone();
    log::debug!(
        "config: {} lanes, vector {}, leak check {}",
        config.lanes(),
        config.vector,
        config.leak_check
    );
}

/// The active configuration.
pub fn current() -> EngineConfig {
    active().read().clone()
}

/// Whether compiled vector paths may be used.
pub fn vector_enabled() -> bool {
    VECTOR.load(Ordering::Relaxed)
}

/// Enable or disable compiled vector paths for operations built from now on.
pub fn set_vector_enabled(enabled: bool) {
    VECTOR.store(enabled, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tile_width, 128);
        assert_eq!(config.fatstrip_height, 16);
        assert_eq!(config.thinstrip_height, 4);
        assert!(config.vector);
        assert!(!config.leak_check);
        assert!(config.lanes() >= 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml("concurrency = 3\nvector = false\n").unwrap();
        assert_eq!(config.concurrency, 3);
        assert!(!config.vector);
        assert_eq!(config.tile_height, 128);
        assert_eq!(config.lanes(), 3);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig::new().with_tile_size(64, 32).with_leak_check(true);
        let text = config.to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            EngineConfig::from_toml("tile_width = 0"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            EngineConfig::from_toml("tile_width = \"wide\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "thinstrip_height = 8").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.thinstrip_height, 8);

        let missing = EngineConfig::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("TESSELLA_CONCURRENCY", "5"),
            ("TESSELLA_NOVECTOR", "1"),
            ("TESSELLA_LEAK", ""),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.concurrency, 5);
        assert!(!config.vector);
        assert!(config.leak_check);

        let bad = EngineConfig::default()
            .with_overrides(|key| (key == "TESSELLA_CONCURRENCY").then(|| "many".to_string()));
        assert!(bad.is_err());
    }
}
