//! Configuration management for the heritage access core
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (HERITAGE_* prefix, highest precedence)
//! 2. heritage-access.local.toml (gitignored, local overrides)
//! 3. heritage-access.toml (git-tracked, deployment config)
//! 4. ~/.config/heritage-access/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use heritage_types::Action;
use serde::{Deserialize, Serialize};
use std::path::Path;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;

/// Main access-core configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub decision: DecisionConfig,
    pub requests: RequestConfig,
    pub embargo: EmbargoConfig,
    pub listing: ListingConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Minimum trust level that may view objects carrying unresolved
    /// high or critical sensitivity flags.
    pub sensitive_min_trust_level: u8,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            sensitive_min_trust_level: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Validity window applied when an approval carries no explicit end date.
    pub default_validity_days: u32,
    pub default_granted_actions: Vec<Action>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            default_validity_days: 90,
            default_granted_actions: vec![Action::View, Action::Download],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbargoConfig {
    pub expiring_window_days: u32,
    pub tie_break: EmbargoTieBreak,
}

impl Default for EmbargoConfig {
    fn default() -> Self {
        Self {
            expiring_window_days: 30,
            tie_break: EmbargoTieBreak::MostRestrictive,
        }
    }
}

/// Resolution rule when more than one embargo is active on an object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbargoTieBreak {
    /// Most restrictive type wins, then the most recently created.
    MostRestrictive,
    /// Most recently created wins regardless of type.
    MostRecent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub page_size: usize,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self { page_size: 25 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub record_ip_address: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            record_ip_address: true,
        }
    }
}

impl AccessConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific deployment directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Create a production configuration
    ///
    /// Identical to the defaults except that auditing is pinned on and IP
    /// addresses are recorded.
    pub fn production() -> Self {
        Self {
            audit: AuditConfig {
                enabled: true,
                record_ip_address: true,
            },
            ..Default::default()
        }
    }

    /// Create a configuration for local development
    ///
    /// Auditing stays on but client addresses are not retained.
    pub fn development() -> Self {
        Self {
            audit: AuditConfig {
                enabled: true,
                record_ip_address: false,
            },
            ..Default::default()
        }
    }

    /// Reject settings the access core cannot operate with.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.requests.default_validity_days == 0 {
            return Err(ConfigError::ValidationError(
                "requests.default_validity_days must be at least 1".to_string(),
            ));
        }

        if self.requests.default_granted_actions.is_empty() {
            return Err(ConfigError::ValidationError(
                "requests.default_granted_actions must not be empty".to_string(),
            ));
        }

        if self.listing.page_size == 0 {
            return Err(ConfigError::ValidationError(
                "listing.page_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
