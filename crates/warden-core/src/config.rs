use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Key namespace used by RedBeat-compatible live schedulers.
pub const DEFAULT_LIVE_KEY_PREFIX: &str = "redbeat";
pub const DEFAULT_QUEUE_PREFIX: &str = "warden:queue";
pub const DEFAULT_REVOKED_KEY: &str = "warden:revoked";
pub const DEFAULT_DISPLAY_TIMEZONE: &str = "Asia/Dhaka";
pub const DEFAULT_REQUEST_RETENTION_DAYS: u32 = 14;

/// Top-level config (warden.toml + WARDEN_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WardenConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Token,
            token: Some("change-me".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Static bearer token in the Authorization header.
    Token,
    /// No authentication — use only for internal/trusted networks.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Which implementation backs a pluggable external collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Redis,
    /// Process-local state; lost on restart. Intended for development.
    #[default]
    Memory,
}

/// Live scheduler (the external firing engine's schedule store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    #[serde(default)]
    pub backend: BackendKind,
    pub redis_url: Option<String>,
    #[serde(default = "default_live_key_prefix")]
    pub key_prefix: String,
    /// Live entries whose dispatch target starts with one of these prefixes
    /// belong to the queue itself and are hidden from status listings.
    #[serde(default = "default_internal_task_prefixes")]
    pub internal_task_prefixes: Vec<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            redis_url: None,
            key_prefix: default_live_key_prefix(),
            internal_task_prefixes: default_internal_task_prefixes(),
        }
    }
}

/// Execution backend used for immediate (ad-hoc) dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub backend: BackendKind,
    pub redis_url: Option<String>,
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
    #[serde(default = "default_revoked_key")]
    pub revoked_key: String,
    /// How far back `GET /requests` looks.
    #[serde(default = "default_request_retention_days")]
    pub request_retention_days: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            redis_url: None,
            queue_prefix: default_queue_prefix(),
            revoked_key: default_revoked_key(),
            request_retention_days: DEFAULT_REQUEST_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// IANA zone used for the human-readable half of every rendered timestamp.
    #[serde(default = "default_display_timezone")]
    pub timezone: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timezone: default_display_timezone(),
        }
    }
}

impl DisplayConfig {
    /// Resolve the configured zone, falling back to UTC for unknown names.
    pub fn tz(&self) -> chrono_tz::Tz {
        match self.timezone.parse::<chrono_tz::Tz>() {
            Ok(tz) => tz,
            Err(e) => {
                tracing::warn!(timezone = %self.timezone, "unknown display timezone ({e}), using UTC");
                chrono_tz::UTC
            }
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_live_key_prefix() -> String {
    DEFAULT_LIVE_KEY_PREFIX.to_string()
}
fn default_internal_task_prefixes() -> Vec<String> {
    vec!["celery.".to_string()]
}
fn default_queue_prefix() -> String {
    DEFAULT_QUEUE_PREFIX.to_string()
}
fn default_revoked_key() -> String {
    DEFAULT_REVOKED_KEY.to_string()
}
fn default_display_timezone() -> String {
    DEFAULT_DISPLAY_TIMEZONE.to_string()
}
fn default_request_retention_days() -> u32 {
    DEFAULT_REQUEST_RETENTION_DAYS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.warden/warden.db", home)
}

impl WardenConfig {
    /// Load config from a TOML file with WARDEN_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.warden/warden.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: WardenConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("WARDEN_").split("__"))
            .extract()
            .map_err(|e| crate::error::WardenError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.warden/warden.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_memory_backends() {
        let cfg = WardenConfig::default();
        assert_eq!(cfg.live.backend, BackendKind::Memory);
        assert_eq!(cfg.execution.backend, BackendKind::Memory);
        assert_eq!(cfg.live.key_prefix, "redbeat");
        assert_eq!(cfg.live.internal_task_prefixes, vec!["celery.".to_string()]);
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
    }

    #[test]
    fn toml_sections_override_defaults() {
        let toml = r#"
            [gateway]
            port = 9000
            [gateway.auth]
            mode = "none"

            [live]
            backend = "redis"
            redis_url = "redis://localhost:6379/0"

            [display]
            timezone = "Europe/Berlin"
        "#;
        let cfg: WardenConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .expect("parse");
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.gateway.auth.mode, AuthMode::None);
        assert_eq!(cfg.live.backend, BackendKind::Redis);
        assert_eq!(cfg.live.key_prefix, "redbeat");
        assert_eq!(cfg.display.tz(), chrono_tz::Europe::Berlin);
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let display = DisplayConfig {
            timezone: "Mars/Olympus".to_string(),
        };
        assert_eq!(display.tz(), chrono_tz::UTC);
    }
}
