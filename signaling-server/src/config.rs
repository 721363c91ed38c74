use std::net::SocketAddr;

use thiserror::Error;

use crate::protocol::{IceConfig, IceServer};
use crate::state::presence::DEFAULT_PRESENCE_PREFIX;

pub const DEFAULT_ADDR: &str = "0.0.0.0:9001";
pub const DEFAULT_PORT: u16 = 9001;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var} address {value:?}: {source}")]
    InvalidAddr {
        var: &'static str,
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid {var} flag {value:?}: expected true/false")]
    InvalidBool { var: &'static str, value: String },
    #[error("invalid SIGNALING_ICE_SERVERS: {0}")]
    InvalidIceServers(#[source] serde_json::Error),
}

/// Server settings, read from `SIGNALING_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Unset means presence is kept in process memory.
    pub redis_url: Option<String>,
    pub presence_prefix: String,
    /// Clear both presence sets when the server starts. Off by default: with
    /// several instances on one store a reset drops everyone else's peers.
    pub reset_presence: bool,
    pub ice: IceConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr_raw = lookup("SIGNALING_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr_raw
            .trim()
            .parse()
            .map_err(|source| ConfigError::InvalidAddr {
                var: "SIGNALING_ADDR",
                value: addr_raw.clone(),
                source,
            })?;

        let redis_url = lookup("SIGNALING_REDIS_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        // Normalisation (whitespace, trailing ':') happens in PresenceKeys.
        let presence_prefix =
            lookup("SIGNALING_PRESENCE_PREFIX").unwrap_or_else(|| DEFAULT_PRESENCE_PREFIX.to_string());

        let reset_presence = match lookup("SIGNALING_RESET_PRESENCE") {
            None => false,
            Some(v) => parse_bool("SIGNALING_RESET_PRESENCE", &v)?,
        };

        // JSON array in the browser's RTCIceServer shape.
        let servers = match lookup("SIGNALING_ICE_SERVERS").filter(|s| !s.trim().is_empty()) {
            None => Vec::new(),
            Some(raw) => serde_json::from_str::<Vec<IceServer>>(&raw).map_err(ConfigError::InvalidIceServers)?,
        };
        let mode = lookup("SIGNALING_ICE_MODE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            addr,
            redis_url,
            presence_prefix,
            reset_presence,
            ice: IceConfig { servers, mode },
        })
    }

    /// Port probed by `--healthcheck`. Never fails, so a broken setting
    /// elsewhere does not turn into a failed health probe.
    pub fn healthcheck_port<F>(lookup: F) -> u16
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup("SIGNALING_ADDR")
            .and_then(|raw| raw.trim().parse::<SocketAddr>().ok())
            .map(|addr| addr.port())
            .unwrap_or(DEFAULT_PORT)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            redis_url: None,
            presence_prefix: DEFAULT_PRESENCE_PREFIX.to_string(),
            reset_presence: false,
            ice: IceConfig::default(),
        }
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}
