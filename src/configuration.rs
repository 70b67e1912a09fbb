// Copyright 2025 Felipe Torres González
//
//    Licensed under the Apache License, Version 2.0 (the "License");
//    you may not use this file except in compliance with the License.
//    You may obtain a copy of the License at
//
//        http://www.apache.org/licenses/LICENSE-2.0
//
//    Unless required by applicable law or agreed to in writing, software
//    distributed under the License is distributed on an "AS IS" BASIS,
//    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//    See the License for the specific language governing permissions and
//    limitations under the License.

//! ChatCount configuration module
//!
//! # Description
//!
//! This module includes all the definitions for the app's settings and the
//! objects that automate reading the configuration from files or environment
//! variables and parsing them to Rust's native types.
//!
//! Some settings must be overrided by environment variables, for example, the
//! API token for the Telegram Bot client. All the environment variables that
//! are meant to be used within this module shall use the prefix _CHATCOUNT_.

use crate::participants::ParticipantsConfig;
use config::{Config, ConfigError, Environment, File};
use secrecy::{ExposeSecret, SecretString};
use serde_derive::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::{fmt::Display, time::Duration};
use tracing::{info, warn};

/// Name of the directory in which configuration files will be stored.
const CONF_DIR: &str = "config";

/// Main settings `struct`.
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Level for the tracing crate.
    pub tracing_level: String,
    /// Application specific settings.
    pub application: ApplicationSettings,
    /// Connection to the Valkey server that keeps the participants cache.
    pub valkey: ValkeySettings,
    /// Connection to the DB that lists the known chats.
    pub database: DatabaseSettings,
    /// Knobs of the background refresh.
    #[serde(default)]
    pub participants: ParticipantsSettings,
}

/// Settings of the ChatCount application.
///
/// # Description
///
/// - [ApplicationSettings::api_token]: Telegram BOT API token. Override the value
///   of the YML file using an environment variable: `export CHATCOUNT__APPLICATION__API_TOKEN="key"`.
#[derive(Debug, Deserialize)]
pub struct ApplicationSettings {
    pub api_token: SecretString,
}

/// Settings of the Valkey server.
///
/// # Description
///
/// Timeouts are expressed in seconds. Leaving a timeout unset disables it.
#[derive(Debug, Clone, Deserialize)]
pub struct ValkeySettings {
    pub valkey_host: String,
    pub valkey_port: u16,
    pub valkey_conn_timeout: Option<u64>,
    pub valkey_resp_timeout: Option<u64>,
}

impl ValkeySettings {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.valkey_host, self.valkey_port)
    }

    pub fn connection_config(&self) -> redis::AsyncConnectionConfig {
        let mut config = redis::AsyncConnectionConfig::new();

        if let Some(secs) = self.valkey_conn_timeout {
            config = config.set_connection_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.valkey_resp_timeout {
            config = config.set_response_timeout(Duration::from_secs(secs));
        }

        config
    }
}

/// Settings of the PostgreSQL server that keeps the chat directory.
#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    pub pg_host: String,
    pub pg_port: u16,
    pub pg_user: String,
    pub pg_password: SecretString,
    pub pg_dbname: String,
    pub pg_ssl_mode: Option<bool>,
}

impl DatabaseSettings {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.pg_host)
            .port(self.pg_port)
            .username(&self.pg_user)
            .password(self.pg_password.expose_secret())
            .database(&self.pg_dbname)
            .ssl_mode(if self.pg_ssl_mode.unwrap_or_default() {
                PgSslMode::Require
            } else {
                PgSslMode::Prefer
            })
    }
}

/// Raw settings of the participants refresh, as found in the configuration files.
///
/// # Description
///
/// Durations are expressed in seconds. Negative values are accepted here and replaced by their
/// default in [ParticipantsSettings::validated].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParticipantsSettings {
    /// Kill switch for the whole integration.
    pub disabled: bool,
    pub enable_background_sync: bool,
    pub cache_ttl_secs: i64,
    pub update_interval_secs: i64,
    pub full_update_hour: i64,
    pub batch_size: i64,
    pub platform_timeout_secs: i64,
    pub stale_threshold_secs: i64,
    pub max_retries: i64,
}

impl Default for ParticipantsSettings {
    fn default() -> Self {
        ParticipantsSettings {
            disabled: false,
            enable_background_sync: true,
            cache_ttl_secs: 3600,
            update_interval_secs: 900,
            full_update_hour: 3,
            batch_size: 50,
            platform_timeout_secs: 30,
            stale_threshold_secs: 3600,
            max_retries: 3,
        }
    }
}

/// Keep `value` if it lays within `[min, max]`, fall back to `default` otherwise.
fn within<T: PartialOrd + Display + Copy>(field: &str, value: T, min: T, max: T, default: T) -> T {
    if value < min || value > max {
        warn!(
            "Invalid configuration for participants.{field}={value}: out of range [{min}, {max}], using default {default}"
        );
        default
    } else {
        value
    }
}

impl ParticipantsSettings {
    /// Build the immutable configuration consumed by the refresh subsystem.
    ///
    /// # Description
    ///
    /// Every value out of its valid range is replaced by its default and reported with a warning.
    /// Inconsistent (yet valid) combinations are only reported.
    pub fn validated(&self) -> ParticipantsConfig {
        let d = ParticipantsSettings::default();

        let config = ParticipantsConfig {
            enable_background_sync: self.enable_background_sync && !self.disabled,
            cache_ttl: secs(within("cache_ttl_secs", self.cache_ttl_secs, 60, 86400, d.cache_ttl_secs)),
            update_interval: secs(within(
                "update_interval_secs",
                self.update_interval_secs,
                60,
                86400,
                d.update_interval_secs,
            )),
            full_update_hour: within("full_update_hour", self.full_update_hour, 0, 23, d.full_update_hour)
                as u32,
            batch_size: within("batch_size", self.batch_size, 1, 1000, d.batch_size) as usize,
            platform_timeout: secs(within(
                "platform_timeout_secs",
                self.platform_timeout_secs,
                1,
                300,
                d.platform_timeout_secs,
            )),
            stale_threshold: secs(within(
                "stale_threshold_secs",
                self.stale_threshold_secs,
                60,
                86400,
                d.stale_threshold_secs,
            )),
            max_retries: within("max_retries", self.max_retries, 0, 10, d.max_retries) as u32,
        };

        if self.disabled {
            info!("Participants integration is disabled, background sync won't run");
        }
        if config.stale_threshold < config.cache_ttl {
            warn!(
                "The stale threshold ({:?}) is smaller than the cache TTL ({:?}), this may cause frequent updates",
                config.stale_threshold, config.cache_ttl
            );
        }
        if config.update_interval > config.stale_threshold {
            warn!(
                "The update interval ({:?}) is larger than the stale threshold ({:?}), data may become stale between updates",
                config.update_interval, config.stale_threshold
            );
        }

        config
    }
}

fn secs(value: i64) -> Duration {
    Duration::from_secs(value.max(0) as u64)
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Build the full path of the configuration directory.
        let base_path = std::env::current_dir().map_err(|e| {
            ConfigError::Message(format!("Failed to determine the current directory: {e}"))
        })?;
        let cfg_dir = base_path.join(CONF_DIR);

        let settings = Config::builder()
            // Start of by merging in the "default" configuration file.
            .add_source(File::from(cfg_dir.join("base")).required(true))
            .add_source(Environment::with_prefix("chatcount").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
