// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "pslock";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for the device registry.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// QR credential settings.
    #[serde(default)]
    pub credential: CredentialConfig,

    /// Bluetooth settings.
    #[serde(default)]
    pub bluetooth: BluetoothConfig,

    /// Device registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Host that credential URLs must point at.
    pub issuer_host: String,

    /// Hex-encoded 32-byte key overriding the built-in issuer key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_key: Option<String>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            issuer_host: crate::crypto::ISSUER_HOST.to_string(),
            issuer_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Upper bound on a single scan, in milliseconds.
    pub discovery_timeout_ms: u64,

    /// Upper bound on opening the serial channel, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Response deadline while pairing, in milliseconds.
    pub pair_deadline_ms: u64,

    /// Response deadline while unlocking, in milliseconds.
    pub unlock_deadline_ms: u64,

    /// Delay between response polls, in milliseconds.
    pub poll_interval_ms: u64,

    /// Power the adapter on when it is off.
    pub auto_enable: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: 12_000,
            connect_timeout_ms: 10_000,
            pair_deadline_ms: 300,
            unlock_deadline_ms: 200,
            poll_interval_ms: 5,
            auto_enable: true,
        }
    }
}

impl BluetoothConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Name given to newly paired locks.
    pub default_device_name: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_device_name: "Unnamed lock".to_string(),
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = config_dir();
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {:?}", config_path))?;
            Self::from_toml(&content)?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(&config_path, content)?;
            config
        };

        config.data_dir = data_dir();
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Parse configuration text; missing sections and keys take defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }
}
