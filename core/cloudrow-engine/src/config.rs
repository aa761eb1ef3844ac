//! Engine configuration, read from `cloudrow.toml`.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Tunables for reconciliation and module installation.
///
/// ```toml
/// plateau_limit = 4
/// sync_before_install = true
/// import_on_install = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Consecutive inner-loop iterations with the same pending count before a
    /// run is declared stuck.
    pub plateau_limit: usize,
    /// Sync installed modules before installing new ones.
    pub sync_before_install: bool,
    /// Pull existing cloud state into newly installed modules.
    pub import_on_install: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plateau_limit: 4,
            sync_before_install: true,
            import_on_install: true,
        }
    }
}

impl EngineConfig {
    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> EngineResult<Self> {
        let config: EngineConfig =
            toml::from_str(contents).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration file, falling back to defaults when it is
    /// missing or unreadable.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    info!("Loaded engine config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}: {}. Falling back to defaults.",
                        path, e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    fn validate(&self) -> EngineResult<()> {
        if self.plateau_limit == 0 {
            return Err(EngineError::Config(
                "plateau_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
