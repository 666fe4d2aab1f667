//! Engine Configuration
//!
//! JSON file, every field optional. A missing file means defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::DEFAULT_UNSET_SENTINELS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Longest parent chain walked before reporting a cycle
    pub max_tree_depth: usize,
    /// Date strings treated as "no date"
    pub unset_date_sentinels: Vec<String>,
    /// Leading name tokens dropped when deriving a project code
    pub vessel_prefixes: Vec<String>,
    /// Project code used when a name yields nothing
    pub fallback_project_code: String,
    /// Attempts to create an item before giving up on id conflicts
    pub max_allocation_retries: u32,
    /// SQLite file; `None` keeps everything in memory
    pub database_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: 64,
            unset_date_sentinels: DEFAULT_UNSET_SENTINELS.iter().map(|s| s.to_string()).collect(),
            vessel_prefixes: ["MV", "MS", "MT", "MY", "SS", "RV", "FV", "HMS"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fallback_project_code: "GEN".to_string(),
            max_allocation_retries: 3,
            database_path: None,
            log_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_tree_depth == 0 {
            return Err("maxTreeDepth must be at least 1".to_string());
        }
        let code = &self.fallback_project_code;
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(format!(
                "fallbackProjectCode must be 3 uppercase letters, got {:?}",
                code
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("wbs.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wbs.json");
        std::fs::write(&path, r#"{"maxTreeDepth": 8, "fallbackProjectCode": "XXX"}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.max_tree_depth, 8);
        assert_eq!(config.fallback_project_code, "XXX");
        assert_eq!(config.max_allocation_retries, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wbs.json");
        std::fs::write(&path, r#"{"fallbackProjectCode": "x1"}"#).unwrap();
        assert!(EngineConfig::load(&path).is_err());

        std::fs::write(&path, "not json").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}
