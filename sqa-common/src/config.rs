//! Configuration loading and data folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TOML configuration file contents (`~/.config/sqa/config.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Data folder holding the SQLite database
    pub data_folder: Option<PathBuf>,
    /// Path to an engine criteria file (overrides built-in defaults)
    pub criteria_file: Option<PathBuf>,
}

/// Resolve the data folder in priority order:
/// 1. Command-line argument (highest priority)
/// 2. `SQA_DATA_DIR` environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_folder(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("SQA_DATA_DIR") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config) = load_toml_config() {
        if let Some(folder) = config.data_folder {
            return folder;
        }
    }

    // Priority 4: OS-dependent compiled default
    default_data_folder()
}

/// Load the TOML config from the platform config directory
pub fn load_toml_config() -> Result<TomlConfig> {
    let path = config_file_path()?;
    read_toml_config(&path)
}

/// Read and parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Default config file location (`<config dir>/sqa/config.toml`)
fn config_file_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("sqa").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// OS-dependent default data folder
fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("sqa"))
        .unwrap_or_else(|| PathBuf::from("./sqa_data"))
}

/// Database path inside a data folder
pub fn database_path(data_folder: &Path) -> PathBuf {
    data_folder.join("sqa.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_arg_wins() {
        let folder = resolve_data_folder(Some("/tmp/sqa-test"));
        assert_eq!(folder, PathBuf::from("/tmp/sqa-test"));
    }

    #[test]
    fn test_database_path() {
        let path = database_path(Path::new("/var/lib/sqa"));
        assert_eq!(path, PathBuf::from("/var/lib/sqa/sqa.db"));
    }

    #[test]
    fn test_missing_config_file_is_config_error() {
        let err = read_toml_config(Path::new("/nonexistent/sqa/config.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
