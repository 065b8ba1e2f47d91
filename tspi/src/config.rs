// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Registry configuration

use std::path::Path;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TspiError};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "TSPI_CONFIG";

/// Configuration file consulted when the environment variable is unset
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tspi.json";

/// Structure used for new keys that ask for the default layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VersionMode {
    /// TPM_KEY
    V1_1,
    /// TPM_KEY12
    #[default]
    V1_2,
}

/// Whether a popup passphrase is hashed together with its terminating NUL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HashMode {
    #[default]
    NotNull,
    Null,
}

impl HashMode {
    pub fn includes_nul(self) -> bool {
        self == HashMode::Null
    }

    pub fn to_u32(self) -> u32 {
        match self {
            HashMode::NotNull => crate::constants::attrib::context::HASH_MODE_NOT_NULL,
            HashMode::Null => crate::constants::attrib::context::HASH_MODE_NULL,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            crate::constants::attrib::context::HASH_MODE_NOT_NULL => Some(HashMode::NotNull),
            crate::constants::attrib::context::HASH_MODE_NULL => Some(HashMode::Null),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub version_mode: VersionMode,
    /// New contexts refuse popups
    pub silent_by_default: bool,
    pub popup_hash_mode: HashMode,
    /// Prompt shown when a policy carries no popup string
    pub default_popup_message: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            version_mode: VersionMode::default(),
            silent_by_default: false,
            popup_hash_mode: HashMode::default(),
            default_popup_message: "Enter the TPM object passphrase".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).map_err(|e| TspiError::Config(e.to_string()))?;
        serde_json::from_str(&data).map_err(|e| {
            TspiError::Config(format!("{}: {e}", path.as_ref().display()))
        })
    }

    /// Load from `$TSPI_CONFIG`, then the default path, then built-in defaults
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(path);
        }
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            return Self::load(DEFAULT_CONFIG_PATH);
        }
        tracing::debug!("no configuration file, using defaults");
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"version_mode": "v1_1", "popup_hash_mode": "null"}}"#).unwrap();
        let cfg = RegistryConfig::load(f.path()).unwrap();
        assert_eq!(cfg.version_mode, VersionMode::V1_1);
        assert_eq!(cfg.popup_hash_mode, HashMode::Null);
        assert!(!cfg.silent_by_default);
        assert_eq!(
            cfg.default_popup_message,
            RegistryConfig::default().default_popup_message
        );
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "not json").unwrap();
        assert!(matches!(
            RegistryConfig::load(f.path()),
            Err(TspiError::Config(_))
        ));
        assert!(matches!(
            RegistryConfig::load("/nonexistent/tspi.json"),
            Err(TspiError::Config(_))
        ));
    }

    #[test]
    fn test_hash_mode_codes() {
        assert_eq!(HashMode::from_u32(HashMode::Null.to_u32()), Some(HashMode::Null));
        assert_eq!(HashMode::from_u32(7), None);
    }
}
