//! Mapper configuration
//!
//! Stored as JSON at `<dir>/svnmap.json`. A missing file means defaults.

use crate::error::{MapError, Result};
use crate::revid::MAPPING_VERSION;
use crate::scheme::BranchingScheme;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the configuration file
pub const CONFIG_FILE: &str = "svnmap.json";

/// Configuration of a file id mapper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Branching scheme name (`none`, `trunk`, `trunk-N` or `list`)
    pub scheme: String,
    /// Branch paths for the `list` scheme
    pub branches: Vec<String>,
    /// Maximum number of cached mappings (`None` or 0 means unbounded)
    pub cache_capacity: Option<usize>,
    /// Mapping version embedded in revision keys
    pub mapping_version: u32,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            scheme: "trunk".to_string(),
            branches: Vec::new(),
            cache_capacity: None,
            mapping_version: MAPPING_VERSION,
        }
    }
}

impl MapperConfig {
    fn config_path(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE)
    }

    /// Load the configuration from a directory
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let config_path = Self::config_path(dir);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read mapper config from {:?}", config_path))?;
        let config: MapperConfig =
            serde_json::from_str(&data).with_context(|| "Failed to parse mapper config JSON")?;
        Ok(config)
    }

    /// Save the configuration to a directory
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        let config_path = Self::config_path(dir);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)
            .with_context(|| format!("Failed to write mapper config to {:?}", tmp_path))?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }

    /// Build the configured branching scheme
    pub fn branching_scheme(&self) -> Result<BranchingScheme> {
        match self.scheme.as_str() {
            "list" => BranchingScheme::list(&self.branches),
            name => {
                if !self.branches.is_empty() {
                    return Err(MapError::Config(format!(
                        "branch list given for scheme {:?}",
                        name
                    )));
                }
                name.parse()
            }
        }
    }

    /// Record a branching scheme in this configuration
    pub fn set_scheme(&mut self, scheme: &BranchingScheme) {
        self.scheme = scheme.to_string();
        self.branches = match scheme {
            BranchingScheme::List { branches } => branches.clone(),
            _ => Vec::new(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = MapperConfig::load(dir.path()).unwrap();
        assert_eq!(config, MapperConfig::default());
        assert_eq!(config.branching_scheme().unwrap(), BranchingScheme::trunk(0));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut config = MapperConfig::default();
        config.set_scheme(&BranchingScheme::list(["foo", "bar/bloe"]).unwrap());
        config.cache_capacity = Some(64);
        config.save(dir.path()).unwrap();

        assert!(!dir.path().join("svnmap.tmp").exists());
        let loaded = MapperConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.branching_scheme().unwrap(),
            BranchingScheme::list(["foo", "bar/bloe"]).unwrap()
        );
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"scheme": "trunk-2"}"#).unwrap();
        let config = MapperConfig::load(dir.path()).unwrap();
        assert_eq!(config.mapping_version, MAPPING_VERSION);
        assert_eq!(config.branching_scheme().unwrap(), BranchingScheme::trunk(2));
    }

    #[test]
    fn test_invalid_scheme_fails_fast() {
        let config = MapperConfig {
            scheme: "trunk-invalid".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.branching_scheme(),
            Err(MapError::InvalidSchemeSpec("trunk-invalid".to_string()))
        );

        let config = MapperConfig {
            scheme: "none".to_string(),
            branches: vec!["foo".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.branching_scheme(), Err(MapError::Config(_))));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{not json").unwrap();
        assert!(MapperConfig::load(dir.path()).is_err());
    }
}
