use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::relay_client::RetryPolicy;

// ---------------------------------------------------------------------------
// Relay configuration, loaded from environment variables
// ---------------------------------------------------------------------------

/// Signaling relay configuration.
///
/// Every field can be set via an environment variable prefixed with
/// `MESHROOM_`.  Defaults are suitable for local development.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    // ── Network ─────────────────────────────────────────────────────────
    /// Address to bind the HTTP(S)/WebSocket listener to.
    pub bind_addr: String,

    // ── TLS ─────────────────────────────────────────────────────────────
    pub tls_enabled: bool,
    /// Path to PEM-encoded certificate chain.
    pub tls_cert_path: Option<String>,
    /// Path to PEM-encoded private key.
    pub tls_key_path: Option<String>,

    // ── Limits ───────────────────────────────────────────────────────────
    /// Maximum number of rooms that can exist simultaneously.
    pub max_rooms: usize,
    /// Maximum number of members per room.
    pub max_participants_per_room: usize,

    // ── CORS ─────────────────────────────────────────────────────────────
    pub allowed_origins: String,

    // ── Logging ──────────────────────────────────────────────────────────
    pub log_level: String,
}

impl RelayConfig {
    /// Load configuration from environment variables.
    ///
    /// Automatically loads a `.env` file if present (via `dotenvy`).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let config = RelayConfig {
            bind_addr: env_or("MESHROOM_BIND_ADDR", "0.0.0.0:8080"),
            tls_enabled: env_bool("MESHROOM_TLS_ENABLED", false),
            tls_cert_path: std::env::var("MESHROOM_TLS_CERT_PATH").ok(),
            tls_key_path: std::env::var("MESHROOM_TLS_KEY_PATH").ok(),
            max_rooms: env_parse("MESHROOM_MAX_ROOMS", 100),
            max_participants_per_room: env_parse("MESHROOM_MAX_PARTICIPANTS_PER_ROOM", 16),
            allowed_origins: env_or("MESHROOM_ALLOWED_ORIGINS", "*"),
            log_level: env_or("MESHROOM_LOG_LEVEL", "info"),
        };

        config.log_summary();
        config
    }

    fn log_summary(&self) {
        info!("──── meshroom relay configuration ────");
        info!("  bind_addr          : {}", self.bind_addr);
        info!("  tls_enabled        : {}", self.tls_enabled);
        if self.tls_enabled {
            info!(
                "  tls_cert_path      : {}",
                self.tls_cert_path.as_deref().unwrap_or("(not set)")
            );
            info!(
                "  tls_key_path       : {}",
                self.tls_key_path.as_deref().unwrap_or("(not set)")
            );
        }
        info!("  max_rooms          : {}", self.max_rooms);
        info!("  max_per_room       : {}", self.max_participants_per_room);
        info!(
            "  cors_origins       : {}",
            if self.allowed_origins == "*" {
                "* (permissive)"
            } else {
                &self.allowed_origins
            }
        );
        info!("  log_level          : {}", self.log_level);
        info!("──────────────────────────────────────");
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            tls_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
            max_rooms: 100,
            max_participants_per_room: 16,
            allowed_origins: "*".into(),
            log_level: "info".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Participant configuration
// ---------------------------------------------------------------------------

/// Settings for a participant process (relay endpoint, ICE, timeouts).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling relay.
    pub relay_url: String,

    // ── ICE ──────────────────────────────────────────────────────────────
    pub stun_urls: Vec<String>,
    pub turn_urls: Vec<String>,
    pub turn_username: Option<String>,
    pub turn_password: Option<String>,
    /// UDP port range for ICE candidates (0 = OS picks).
    pub udp_port_min: u16,
    pub udp_port_max: u16,
    /// Bounded wait for ICE gathering before a description is sent.
    pub ice_gather_timeout: Duration,

    // ── Relay session ────────────────────────────────────────────────────
    pub join_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,

    pub log_level: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = ClientConfig {
            relay_url: env_or("MESHROOM_RELAY_URL", &defaults.relay_url),
            stun_urls: env_csv(
                "MESHROOM_STUN_URLS",
                &["stun:stun.l.google.com:19302", "stun:global.stun.twilio.com:3478"],
            ),
            turn_urls: env_csv("MESHROOM_TURN_URLS", &[]),
            turn_username: std::env::var("MESHROOM_TURN_USERNAME").ok(),
            turn_password: std::env::var("MESHROOM_TURN_PASSWORD").ok(),
            udp_port_min: env_parse("MESHROOM_UDP_PORT_MIN", 0),
            udp_port_max: env_parse("MESHROOM_UDP_PORT_MAX", 0),
            ice_gather_timeout: Duration::from_millis(env_parse("MESHROOM_ICE_GATHER_TIMEOUT_MS", 1000)),
            join_timeout: Duration::from_secs(env_parse("MESHROOM_JOIN_TIMEOUT_SECS", 10)),
            reconnect_attempts: env_parse("MESHROOM_RECONNECT_ATTEMPTS", 10),
            reconnect_base: Duration::from_millis(env_parse("MESHROOM_RECONNECT_BASE_MS", 1000)),
            reconnect_max: Duration::from_millis(env_parse("MESHROOM_RECONNECT_MAX_MS", 5000)),
            log_level: env_or("MESHROOM_LOG_LEVEL", "info"),
        };

        config.log_summary();
        config
    }

    /// STUN entries followed by TURN entries carrying credentials.
    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        let mut servers: Vec<IceServerConfig> = self
            .stun_urls
            .iter()
            .map(|url| IceServerConfig {
                urls: vec![url.clone()],
                username: None,
                credential: None,
            })
            .collect();

        for url in &self.turn_urls {
            servers.push(IceServerConfig {
                urls: vec![url.clone()],
                username: self.turn_username.clone(),
                credential: self.turn_password.clone(),
            });
        }

        servers
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.reconnect_attempts,
            base_delay: self.reconnect_base,
            max_delay: self.reconnect_max,
        }
    }

    fn log_summary(&self) {
        info!("──── meshroom client configuration ────");
        info!("  relay_url          : {}", self.relay_url);
        info!("  stun_urls          : {:?}", self.stun_urls);
        info!("  turn_urls          : {:?}", self.turn_urls);
        if self.udp_port_min > 0 && self.udp_port_max > 0 {
            info!("  udp_ports          : {}-{}", self.udp_port_min, self.udp_port_max);
        }
        info!("  ice_gather_timeout : {:?}", self.ice_gather_timeout);
        info!("  join_timeout       : {:?}", self.join_timeout);
        info!(
            "  reconnect          : {} attempts, {:?}..{:?}",
            self.reconnect_attempts, self.reconnect_base, self.reconnect_max
        );
        info!("  log_level          : {}", self.log_level);
        info!("───────────────────────────────────────");
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8080/ws".into(),
            stun_urls: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:global.stun.twilio.com:3478".into(),
            ],
            turn_urls: Vec::new(),
            turn_username: None,
            turn_password: None,
            udp_port_min: 0,
            udp_port_max: 0,
            ice_gather_timeout: Duration::from_millis(1000),
            join_timeout: Duration::from_secs(10),
            reconnect_attempts: 10,
            reconnect_base: Duration::from_millis(1000),
            reconnect_max: Duration::from_millis(5000),
            log_level: "info".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ICE server configuration types
// ---------------------------------------------------------------------------

/// ICE server entry in the W3C `RTCIceServer` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

// ---------------------------------------------------------------------------
// Environment helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_csv(key: &str, defaults: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
