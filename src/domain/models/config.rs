//! Configuration model.

use serde::{Deserialize, Serialize};

/// Main configuration structure for taskroom.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// HTTP/WebSocket server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Per-room timer and cap configuration
    #[serde(default)]
    pub room: RoomConfig,

    /// Store retry policy configuration
    #[serde(default)]
    pub store_retry: RetryConfig,

    /// AI docs collaborator configuration
    #[serde(default)]
    pub docs: DocsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            room: RoomConfig::default(),
            store_retry: RetryConfig::default(),
            docs: DocsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether to enable CORS
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,

    /// Shared secret for signing `/broadcast` bodies. Unset = unsigned.
    #[serde(default)]
    pub broadcast_secret: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8790
}

const fn default_enable_cors() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: default_enable_cors(),
            broadcast_secret: None,
        }
    }
}

impl ServerConfig {
    /// Base URL the task service posts `/broadcast` frames to. A wildcard
    /// bind address is not routable, so it maps to loopback.
    pub fn broadcast_base(&self) -> String {
        let host = if self.host == "0.0.0.0" || self.host == "::" {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        format!("http://{}:{}", host, self.port)
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    "taskroom.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Room timer intervals and history caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RoomConfig {
    /// Interval between `system.heartbeat` broadcasts (milliseconds)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Interval between periodic `tasks.blockedSummary` broadcasts (milliseconds)
    #[serde(default = "default_blocked_summary_interval_ms")]
    pub blocked_summary_interval_ms: u64,

    /// Interval between `agents.unblockedReminder` pings (milliseconds)
    #[serde(default = "default_unblock_ping_interval_ms")]
    pub unblock_ping_interval_ms: u64,

    /// Maximum retained docs queries per room
    #[serde(default = "default_max_query_history")]
    pub max_query_history: usize,

    /// Maximum retained coordination-pattern events per room
    #[serde(default = "default_max_coordination_patterns")]
    pub max_coordination_patterns: usize,
}

const fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

const fn default_blocked_summary_interval_ms() -> u64 {
    20_000
}

const fn default_unblock_ping_interval_ms() -> u64 {
    10_000
}

const fn default_max_query_history() -> usize {
    100
}

const fn default_max_coordination_patterns() -> usize {
    50
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            blocked_summary_interval_ms: default_blocked_summary_interval_ms(),
            unblock_ping_interval_ms: default_unblock_ping_interval_ms(),
            max_query_history: default_max_query_history(),
            max_coordination_patterns: default_max_coordination_patterns(),
        }
    }
}

/// Retry policy for transient store failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,

    /// Initial backoff (milliseconds)
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,

    /// Backoff multiplier between attempts
    #[serde(default = "default_retry_factor")]
    pub factor: u32,
}

const fn default_retry_attempts() -> u32 {
    3
}

const fn default_retry_base_ms() -> u64 {
    150
}

const fn default_retry_factor() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            base_ms: default_retry_base_ms(),
            factor: default_retry_factor(),
        }
    }
}

/// AI docs collaborator endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DocsConfig {
    /// HTTP endpoint of the docs tool. Unset disables docs queries.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Request timeout (milliseconds)
    #[serde(default = "default_docs_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_docs_timeout_ms() -> u64 {
    10_000
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self { endpoint: None, timeout_ms: default_docs_timeout_ms() }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_intervals() {
        let config = Config::default();
        assert_eq!(config.room.heartbeat_interval_ms, 30_000);
        assert_eq!(config.room.blocked_summary_interval_ms, 20_000);
        assert_eq!(config.room.unblock_ping_interval_ms, 10_000);
        assert_eq!(config.room.max_query_history, 100);
        assert_eq!(config.room.max_coordination_patterns, 50);
        assert_eq!(config.store_retry.attempts, 3);
        assert_eq!(config.store_retry.base_ms, 150);
    }

    #[test]
    fn wildcard_bind_maps_to_loopback_for_broadcast() {
        let server = ServerConfig { host: "0.0.0.0".into(), ..Default::default() };
        assert_eq!(server.broadcast_base(), "http://127.0.0.1:8790");
    }
}
