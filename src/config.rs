//! Environment configuration
//!
//! All settings are read once at process start; there is no hot reload.
//! The token and target channel are required, everything else has a
//! default.

use std::path::PathBuf;

use crate::constants::{DEFAULT_AUDIO_PATH, DEFAULT_HTTP_PORT};
use crate::error::ConfigError;

/// Runtime configuration assembled from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway authentication token (`BEACON_TOKEN`)
    pub token: String,

    /// Target voice channel identifier (`BEACON_CHANNEL_ID`)
    pub channel_id: u64,

    /// Path of the looping audio source (`BEACON_AUDIO_PATH`)
    pub audio_path: PathBuf,

    /// Port for the uptime endpoint (`BEACON_HTTP_PORT`)
    pub http_port: u16,

    /// Forward decoder diagnostics to the debug log (`BEACON_DEBUG`)
    pub debug: bool,

    /// Join self-muted; applied to the initial join and every rejoin
    /// (`BEACON_SELF_MUTE`)
    pub self_mute: bool,

    /// Join self-deafened; applied to the initial join and every rejoin
    /// (`BEACON_SELF_DEAF`)
    pub self_deaf: bool,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup("BEACON_TOKEN")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingVar("BEACON_TOKEN"))?;

        let channel_raw = lookup("BEACON_CHANNEL_ID")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingVar("BEACON_CHANNEL_ID"))?;
        let channel_id = channel_raw
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .ok_or_else(|| ConfigError::InvalidVar {
                var: "BEACON_CHANNEL_ID",
                value: channel_raw.clone(),
            })?;

        let audio_path = lookup("BEACON_AUDIO_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIO_PATH));

        let http_port = match lookup("BEACON_HTTP_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidVar {
                var: "BEACON_HTTP_PORT",
                value: raw.clone(),
            })?,
            None => DEFAULT_HTTP_PORT,
        };

        let debug = bool_var(&lookup, "BEACON_DEBUG", false)?;
        let self_mute = bool_var(&lookup, "BEACON_SELF_MUTE", false)?;
        let self_deaf = bool_var(&lookup, "BEACON_SELF_DEAF", false)?;

        Ok(Self {
            token,
            channel_id,
            audio_path,
            http_port,
            debug,
            self_mute,
            self_deaf,
        })
    }

    /// Default tracing filter when `RUST_LOG` is not set.
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

fn bool_var(
    lookup: impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidVar { var, value: raw }),
        },
    }
}
