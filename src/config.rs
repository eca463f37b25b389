// Call configuration.
// Logging is on in debug builds and off in release builds unless PIPERCHAT_LOG is set.

use crate::error::{Result, SignalingError};
use crate::peer::types::ServerConfig;
use once_cell::sync::Lazy;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// Filter used when PIPERCHAT_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "piperchat_lib=debug,piperchat=info,webrtc=warn";

/// Collection holding one record per call
pub const DEFAULT_CALLS_COLLECTION: &str = "calls";

/// Label of the data channel the caller opens
pub const DEFAULT_DATA_CHANNEL: &str = "piperchat-data";

/// Public STUN servers plus the open TURN relay
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    let mut servers: Vec<ServerConfig> = [
        "stun:stun.l.google.com:19302",
        "stun:stun1.l.google.com:19302",
        "stun:stun2.l.google.com:19302",
        "stun:stun3.l.google.com:19302",
        "stun:stun4.l.google.com:19302",
    ]
    .iter()
    .enumerate()
    .map(|(i, url)| ServerConfig {
        id: format!("default-stun-{i}"),
        r#type: "stun".into(),
        url: (*url).into(),
        username: None,
        credential: None,
    })
    .collect();
    servers.push(ServerConfig {
        id: "default-turn".into(),
        r#type: "turn".into(),
        url: "turn:openrelay.metered.ca:80".into(),
        username: Some("openrelayproject".into()),
        credential: Some("openrelayproject".into()),
    });
    servers
});

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub calls_collection: String,
    /// Capacity of the coordinator's action queue
    pub action_queue_capacity: usize,
    /// Data channel opened by the caller; `None` for media-only calls
    pub data_channel: Option<String>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            calls_collection: DEFAULT_CALLS_COLLECTION.into(),
            action_queue_capacity: 64,
            data_channel: Some(DEFAULT_DATA_CHANNEL.into()),
        }
    }
}

impl SignalingConfig {
    /// Defaults overridden by PIPERCHAT_CALLS_COLLECTION and PIPERCHAT_ICE_SERVERS.
    ///
    /// PIPERCHAT_TURN_USERNAME and PIPERCHAT_TURN_CREDENTIAL apply to every
    /// `turn:`/`turns:` URL in PIPERCHAT_ICE_SERVERS.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(collection) = lookup("PIPERCHAT_CALLS_COLLECTION") {
            config.calls_collection = collection.trim().to_string();
        }
        if let Some(urls) = lookup("PIPERCHAT_ICE_SERVERS") {
            let username = lookup("PIPERCHAT_TURN_USERNAME");
            let credential = lookup("PIPERCHAT_TURN_CREDENTIAL");
            config.ice_servers = urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .enumerate()
                .map(|(i, url)| {
                    let turn = url.starts_with("turn");
                    ServerConfig {
                        id: format!("env-{i}"),
                        r#type: if turn { "turn" } else { "stun" }.into(),
                        url: url.into(),
                        username: username.clone().filter(|_| turn),
                        credential: credential.clone().filter(|_| turn),
                    }
                })
                .collect();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.calls_collection.is_empty() || self.calls_collection.contains('/') {
            return Err(SignalingError::Config(format!(
                "invalid calls collection '{}'",
                self.calls_collection
            )));
        }
        if self.action_queue_capacity == 0 {
            return Err(SignalingError::Config(
                "action queue capacity must be positive".into(),
            ));
        }
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(SignalingError::Config(format!(
                    "ICE server '{}' has an empty URL",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(SignalingError::Config(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}
