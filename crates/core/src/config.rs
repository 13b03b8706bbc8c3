use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Courses that never belong on the lessons calendar.
pub const DEFAULT_EXCLUDED_SUBJECTS: &[&str] = &[
    "Zaawansowane aplikacje webowe",
    "Programowanie aplikacji desktopowych",
    "Programowanie aplikacji mobilnych",
    "Programowanie obiektowe i algorytmika",
];

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub refresh: RefreshConfig,
    pub calendar: CalendarConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            upstream: UpstreamConfig::from_env(),
            refresh: RefreshConfig::from_env(),
            calendar: CalendarConfig::from_env(),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  server:    {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  upstream:  login={}, auth_url={}, api_url={}",
            self.upstream.login.as_deref().unwrap_or("(none)"),
            self.upstream.auth_url,
            self.upstream.api_url
        );
        tracing::info!(
            "  refresh:   near every {}s, far every {}s, {}ms between requests",
            self.refresh.near_interval_secs,
            self.refresh.far_interval_secs,
            self.refresh.request_delay_ms
        );
        tracing::info!(
            "  calendar:  name={}, {} excluded subjects",
            self.calendar.name,
            self.refresh.excluded_subjects.len()
        );
        if !self.upstream.is_configured() {
            tracing::warn!("LOGIN/PASSWORD not set: every upstream authentication will fail");
        }
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "server": { "host": self.server.host, "port": self.server.port },
            "upstream": {
                "login": self.upstream.login,
                "auth_url": self.upstream.auth_url,
                "api_url": self.upstream.api_url,
                "configured": self.upstream.is_configured(),
            },
            "refresh": {
                "request_delay_ms": self.refresh.request_delay_ms,
                "token_lifetime_secs": self.refresh.token_lifetime_secs,
                "auth_retry_backoff_ms": self.refresh.auth_retry_backoff_ms,
                "near_interval_secs": self.refresh.near_interval_secs,
                "far_interval_secs": self.refresh.far_interval_secs,
                "near_weeks_ahead": self.refresh.near_weeks_ahead,
                "events_ttl_secs": self.refresh.events_ttl_secs,
                "excluded_subjects": self.refresh.excluded_subjects,
            },
            "calendar": { "name": self.calendar.name },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_u16("PORT", 3000),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

// ── Upstream (Librus Synergia) ────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub login: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// OAuth portal base URL.
    pub auth_url: String,
    /// Gateway API base URL.
    pub api_url: String,
    pub client_id: String,
}

impl UpstreamConfig {
    fn from_env() -> Self {
        Self {
            login: env_opt("LOGIN"),
            password: env_opt("PASSWORD"),
            auth_url: env_or("LIBRUS_AUTH_URL", "https://api.librus.pl"),
            api_url: env_or("LIBRUS_API_URL", "https://synergia.librus.pl/gateway/api/2.0"),
            client_id: env_or("LIBRUS_CLIENT_ID", "46"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.login.is_some() && self.password.is_some()
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            login: None,
            password: None,
            auth_url: "https://api.librus.pl".to_string(),
            api_url: "https://synergia.librus.pl/gateway/api/2.0".to_string(),
            client_id: "46".to_string(),
        }
    }
}

// ── Refresh pipeline ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Minimum pause between two upstream calls.
    pub request_delay_ms: u64,
    /// Assumed session lifetime; shorter than the real one.
    pub token_lifetime_secs: u64,
    /// Pause before the single retry after an auth rejection.
    pub auth_retry_backoff_ms: u64,
    pub near_interval_secs: u64,
    pub far_interval_secs: u64,
    pub near_weeks_ahead: u32,
    pub events_ttl_secs: u64,
    pub excluded_subjects: Vec<String>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 500,
            token_lifetime_secs: 55 * 60,
            auth_retry_backoff_ms: 1000,
            near_interval_secs: 30 * 60,
            far_interval_secs: 12 * 60 * 60,
            near_weeks_ahead: 2,
            events_ttl_secs: 30 * 60,
            excluded_subjects: DEFAULT_EXCLUDED_SUBJECTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RefreshConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            request_delay_ms: env_u64("REQUEST_DELAY_MS", defaults.request_delay_ms),
            token_lifetime_secs: env_u64("TOKEN_LIFETIME_SECS", defaults.token_lifetime_secs),
            auth_retry_backoff_ms: env_u64("AUTH_RETRY_BACKOFF_MS", defaults.auth_retry_backoff_ms),
            near_interval_secs: env_u64("NEAR_REFRESH_SECS", defaults.near_interval_secs),
            far_interval_secs: env_u64("FAR_REFRESH_SECS", defaults.far_interval_secs),
            near_weeks_ahead: env_u32("NEAR_WEEKS_AHEAD", defaults.near_weeks_ahead),
            events_ttl_secs: env_u64("EVENTS_TTL_SECS", defaults.events_ttl_secs),
            excluded_subjects: env_opt("EXCLUDED_SUBJECTS")
                .map(|raw| parse_list(&raw))
                .unwrap_or(defaults.excluded_subjects),
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    pub fn auth_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.auth_retry_backoff_ms)
    }

    pub fn near_interval(&self) -> Duration {
        Duration::from_secs(self.near_interval_secs)
    }

    pub fn far_interval(&self) -> Duration {
        Duration::from_secs(self.far_interval_secs)
    }

    pub fn events_ttl(&self) -> Duration {
        Duration::from_secs(self.events_ttl_secs)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ── Calendar output ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Shown by clients as the subscription name.
    pub name: String,
    pub prodid: String,
}

impl CalendarConfig {
    fn from_env() -> Self {
        Self {
            name: env_or("CALENDAR_NAME", "Librus"),
            prodid: env_or("CALENDAR_PRODID", "-//synergia-ics//Librus Calendar//PL"),
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            name: "Librus".to_string(),
            prodid: "-//synergia-ics//Librus Calendar//PL".to_string(),
        }
    }
}
