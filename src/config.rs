//! Engine configuration loaded from TOML.
//!
//! Every section is optional; missing values fall back to the defaults below.
//!
//! ```toml
//! [storage]
//! path = "data/orders.db"
//!
//! [display_id]
//! prefix = "TX"
//!
//! [review]
//! approved_enters_payment = true
//!
//! [rework]
//! default_start = "awaiting_rework"
//! ```
use crate::error::ConfigError;
use crate::hierarchy::ReworkStart;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub display_id: DisplayIdConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub rework: ReworkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory of the sled database.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Keep the database in memory and drop it on close.
    #[serde(default)]
    pub temporary: bool,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("orders.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            temporary: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DisplayIdConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "TX".to_string()
}

impl Default for DisplayIdConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReviewConfig {
    /// An approved final review parks the order in `PAYMENT_PROCESS` instead
    /// of finalizing it directly.
    #[serde(default = "default_true")]
    pub approved_enters_payment: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            approved_enters_payment: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReworkConfig {
    /// Start status of rework orders when the caller does not choose one.
    #[serde(default)]
    pub default_start: ReworkStart,
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        contents.parse()
    }

    /// In-memory storage with default settings.
    pub fn temporary() -> Self {
        Self {
            storage: StorageConfig {
                temporary: true,
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.display_id.prefix;
        if prefix.is_empty() || prefix.len() > 8 {
            return Err(ConfigError::Validation(format!(
                "display id prefix `{prefix}` must be 1 to 8 characters"
            )));
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(ConfigError::Validation(format!(
                "display id prefix `{prefix}` must be uppercase ASCII letters or digits"
            )));
        }
        if !self.storage.temporary && self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "storage path is required unless storage is temporary".into(),
            ));
        }
        Ok(())
    }
}

impl FromStr for EngineConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
