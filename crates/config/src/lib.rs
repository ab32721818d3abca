//! Gateway configuration.
//!
//! All inputs are environment-shaped (`WAGATE_*`); unset values fall back
//! to defaults that match the documented connection and delivery policies.

use std::{path::PathBuf, str::FromStr, time::Duration};

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
};

/// Which control surface(s) the process serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Legacy single-session service: one anonymous instance.
    Single,
    /// Multi-instance control plane.
    #[default]
    Multi,
    /// Both surfaces on the same process.
    Both,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "multi" => Ok(Self::Multi),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown mode: {other} (expected single|multi|both)")),
        }
    }
}

/// Reconnection policy for a dropped session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Attempts before the session is considered logged out.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 5_000,
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Outbound webhook delivery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Total per-attempt timeout, connect included.
    pub timeout_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub mode: Mode,
    /// SQLite connection string, e.g. `sqlite://wagate.db?mode=rwc`.
    pub database_url: String,
    /// Root directory for per-phone credential blobs.
    pub auth_root: PathBuf,
    pub bind: String,
    pub port: u16,
    /// Phone materialised as the anonymous instance in single/both mode.
    pub default_phone: Option<String>,
    pub reconnect: ReconnectConfig,
    pub webhook: WebhookConfig,
    /// Deadline for group metadata queries against the transport.
    pub group_query_timeout_ms: u64,
    /// Upstream close codes treated as transient even during a manual
    /// restart (the "stream reset during QR scan" family).
    pub transient_close_codes: Vec<u32>,
    /// Quiescence window between closing a session and re-opening it on
    /// manual restart.
    pub restart_quiesce_ms: u64,
    /// WebSocket endpoint of the upstream protocol bridge.
    pub bridge_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Multi,
            database_url: "sqlite://wagate.db?mode=rwc".into(),
            auth_root: PathBuf::from("auth"),
            bind: "127.0.0.1".into(),
            port: 8039,
            default_phone: None,
            reconnect: ReconnectConfig::default(),
            webhook: WebhookConfig::default(),
            group_query_timeout_ms: 10_000,
            transient_close_codes: vec![515],
            restart_quiesce_ms: 1_000,
            bridge_url: "ws://127.0.0.1:3031".into(),
        }
    }
}

impl GatewayConfig {
    /// Build a config from `WAGATE_*` environment variables, falling back
    /// to defaults. Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(mode) = read_env("WAGATE_MODE") {
            match mode.parse() {
                Ok(mode) => config.mode = mode,
                Err(e) => warn!(error = %e, "ignoring WAGATE_MODE"),
            }
        }
        if let Some(url) = read_env("WAGATE_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(root) = read_env("WAGATE_AUTH_ROOT") {
            config.auth_root = PathBuf::from(root);
        }
        if let Some(bind) = read_env("WAGATE_BIND") {
            config.bind = bind;
        }
        if let Some(port) = parse_env("WAGATE_PORT") {
            config.port = port;
        }
        config.default_phone = read_env("WAGATE_DEFAULT_PHONE");
        if let Some(n) = parse_env("WAGATE_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = n;
        }
        if let Some(ms) = parse_env("WAGATE_RECONNECT_DELAY_MS") {
            config.reconnect.delay_ms = ms;
        }
        if let Some(ms) = parse_env("WAGATE_WEBHOOK_TIMEOUT_MS") {
            config.webhook.timeout_ms = ms;
        }
        if let Some(ms) = parse_env("WAGATE_GROUP_QUERY_TIMEOUT_MS") {
            config.group_query_timeout_ms = ms;
        }
        if let Some(codes) = read_env("WAGATE_TRANSIENT_CLOSE_CODES") {
            config.transient_close_codes = parse_code_list(&codes);
        }
        if let Some(ms) = parse_env("WAGATE_RESTART_QUIESCE_MS") {
            config.restart_quiesce_ms = ms;
        }
        if let Some(url) = read_env("WAGATE_BRIDGE_URL") {
            config.bridge_url = url;
        }

        config
    }

    /// Credential directory for one phone: `<auth_root>/<phone>/`.
    pub fn auth_dir_for(&self, phone: &str) -> PathBuf {
        self.auth_root.join(phone)
    }

    pub fn group_query_timeout(&self) -> Duration {
        Duration::from_millis(self.group_query_timeout_ms)
    }

    pub fn restart_quiesce(&self) -> Duration {
        Duration::from_millis(self.restart_quiesce_ms)
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    let raw = read_env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        },
    }
}

fn parse_code_list(raw: &str) -> Vec<u32> {
    raw.split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            match part.parse() {
                Ok(code) => Some(code),
                Err(_) => {
                    warn!(value = part, "ignoring unparseable close code");
                    None
                },
            }
        })
        .collect()
}
