use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Service configuration, loadable from a TOML file. CLI flags override the
/// file; every field has a default so the service runs with no config at all.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    /// Auto-schedule engine tick interval.
    pub scheduler_interval_secs: u64,
    /// Fleet dispatcher interval.
    pub dispatch_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8860,
            db_path: PathBuf::from("./var/armada.db"),
            scheduler_interval_secs: 60,
            dispatch_interval_secs: 10,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: Config = toml::from_str("port = 9000").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.scheduler_interval_secs, 60);
        assert_eq!(config.dispatch_interval_secs, 10);
    }
}
