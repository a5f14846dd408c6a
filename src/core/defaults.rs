use serde::{Deserialize, Serialize};
use std::fs;

use crate::paths;

/// Root configuration structure for ~/.config/shipwright/shipwright.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShipwrightConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via shipwright.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Defaults {
    #[serde(default)]
    pub ssh: SshDefaults,

    #[serde(default)]
    pub deploy: DeployDefaults,
}

/// Transport settings for the ssh binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshDefaults {
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u32,

    /// Extra connection attempts after a transport failure. Never applies to
    /// commands that ran and exited nonzero.
    #[serde(default)]
    pub reconnect_attempts: u32,
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_attempts: 0,
        }
    }
}

/// Deploy settings used when the project file does not set them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployDefaults {
    #[serde(default = "default_keep_releases")]
    pub keep_releases: usize,

    #[serde(default = "default_checkout_command")]
    pub checkout_command: String,

    #[serde(default = "default_build_task")]
    pub build_task: String,
}

impl Default for DeployDefaults {
    fn default() -> Self {
        Self {
            keep_releases: default_keep_releases(),
            checkout_command: default_checkout_command(),
            build_task: default_build_task(),
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u32 {
    10
}

fn default_keep_releases() -> usize {
    5
}

fn default_checkout_command() -> String {
    "git clone --quiet --depth 1 --branch {{ref}} {{repository}} {{release_path}}".to_string()
}

fn default_build_task() -> String {
    "build".to_string()
}

// =============================================================================
// Loading
// =============================================================================

/// Load defaults from shipwright.json, falling back to built-in values.
/// A missing or unparseable file is not an error.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

pub fn load_config() -> ShipwrightConfig {
    let Ok(path) = paths::shipwright_json() else {
        return ShipwrightConfig::default();
    };

    match fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                log_status!("config", "Ignoring {}: {}", path.display(), e);
                ShipwrightConfig::default()
            }
        },
        Err(_) => ShipwrightConfig::default(),
    }
}
