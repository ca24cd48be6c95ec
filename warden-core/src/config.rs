use crate::error::{Result, WardenError};
use crate::verdict::Severity;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a warden deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Submission endpoint settings
    pub server: ServerConfig,
    /// Prometheus exporter
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Correlation cookie attributes
    pub cookie: CookieConfig,
    /// Visit store backend
    pub storage: StorageConfig,
    /// Age-based purging of stored visits
    pub retention: RetentionConfig,
    /// Identity and network-reputation policy
    pub access: AccessConfig,
    /// Visit-rate limiter
    pub rate_limit: RateLimitConfig,
    /// Behavior heuristics thresholds and toggles
    pub behavior: BehaviorConfig,
    /// External IP reputation lookup
    pub reputation: ReputationConfig,
    /// Blocked-access notifications
    pub notifications: NotificationConfig,
    /// Declarative custom rules, evaluated in order
    pub rules: Vec<CustomRuleConfig>,
}

/// Submission endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API binds to
    pub listen_addr: String,
    /// Take the client address from the first `X-Forwarded-For` hop
    pub trust_forwarded_for: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

/// Correlation cookie attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    pub name: String,
    pub lifetime_seconds: u64,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: String,
    /// Per-cookie session memory is dropped after this long without a submission
    pub session_idle_seconds: u64,
    /// Upper bound on remembered sessions; visitors beyond it are evaluated without one
    pub max_sessions: usize,
}

/// Visit store backend, chosen once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend")]
pub enum StorageConfig {
    /// Append-only JSON-lines log guarded by an advisory file lock
    #[serde(rename = "file")]
    FileBacked {
        path: PathBuf,
        /// Blocked-access log; defaults to `blocked_access.jsonl` next to `path`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        blocked_path: Option<PathBuf>,
    },
    /// SQLite table; blocked accesses go to `<table>_blocked`
    #[serde(rename = "relational")]
    RelationalBacked {
        path: PathBuf,
        #[serde(default = "default_table")]
        table: String,
    },
    /// In-process store scoped by a session key; blocked accesses use `<key>_blocked`
    #[serde(rename = "session")]
    SessionBacked {
        #[serde(default = "default_session_key")]
        key: String,
    },
}

fn default_table() -> String {
    "fingerprints".to_string()
}

fn default_session_key() -> String {
    "sfp_session_storage".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::FileBacked {
            path: PathBuf::from("logs/visitors_log.jsonl"),
            blocked_path: None,
        }
    }
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Purge visits older than this; `None` keeps history forever
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<u64>,
    /// How often the purge task runs
    pub purge_interval_seconds: u64,
}

/// Identity and network-reputation policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// When non-empty, every other address is flagged. Entries may be CIDR ranges.
    pub whitelist_ips: Vec<String>,
    pub blacklist_ips: Vec<String>,
    pub whitelist_fingerprints: Vec<String>,
    pub blacklist_fingerprints: Vec<String>,
    /// Country names as reported by the reputation service
    pub block_countries: Vec<String>,
    pub block_tor: bool,
    pub block_proxies: bool,
    pub block_datacenters: bool,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Trailing window in seconds
    pub window_seconds: u64,
    /// Visits tolerated inside the window
    pub max_visits: usize,
}

/// Behavior heuristics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub enabled: bool,
    /// Clicks per minute
    pub suspicious_click_rate: f64,
    /// Pointer moves per minute
    pub suspicious_move_rate: f64,
    /// Seconds
    pub min_human_idle_time: f64,
    /// Ceiling for recorded pointer velocities
    pub max_human_speed: f64,
    pub mouse_pattern_detection: bool,
    pub keyboard_pattern_detection: bool,
    pub interaction_quality: bool,
}

/// IP reputation lookup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub enabled: bool,
    /// URL template, `{ip}` is replaced with the client address
    pub endpoint: String,
    pub timeout_seconds: u64,
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Verdicts below this severity are not announced
    pub min_severity: Severity,
    pub timeout_seconds: u64,
}

/// Record field a declarative rule inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    UserAgent,
    Fingerprint,
    Ip,
    Country,
    Organization,
}

/// Declarative custom rule: flag when `field` matches `pattern`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRuleConfig {
    pub name: String,
    pub field: RuleField,
    pub pattern: String,
    /// Reason tag to report; `custom_rule` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
            cookie: CookieConfig::default(),
            storage: StorageConfig::default(),
            retention: RetentionConfig::default(),
            access: AccessConfig::default(),
            rate_limit: RateLimitConfig::default(),
            behavior: BehaviorConfig::default(),
            reputation: ReputationConfig::default(),
            notifications: NotificationConfig::default(),
            rules: Vec::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            trust_forwarded_for: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9091".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warden_node=info,warden_core=info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "trace_id".to_string(),
            lifetime_seconds: 86400 * 365,
            path: "/".to_string(),
            secure: false,
            http_only: true,
            same_site: "Strict".to_string(),
            session_idle_seconds: 3600,
            max_sessions: 100_000,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: None,
            purge_interval_seconds: 300,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 3600,
            max_visits: 100,
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            suspicious_click_rate: 500.0,
            suspicious_move_rate: 2000.0,
            min_human_idle_time: 0.2,
            max_human_speed: 1000.0,
            mouse_pattern_detection: true,
            keyboard_pattern_detection: true,
            interaction_quality: true,
        }
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://ipapi.co/{ip}/json/".to_string(),
            timeout_seconds: 5,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            email: None,
            min_severity: Severity::High,
            timeout_seconds: 5,
        }
    }
}

impl WardenConfig {
    /// Load configuration from file, with `WARDEN__SECTION__KEY` environment overrides
    pub fn from_file(path: &str) -> std::result::Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let toml_string =
            toml::to_string_pretty(self).map_err(|e| WardenError::Serialization(e.to_string()))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn listen_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        self.server.listen_addr.parse()
    }

    pub fn metrics_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        self.metrics.listen_addr.parse()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()
            .map_err(|e| WardenError::Config(format!("Invalid server listen address: {}", e)))?;

        if self.metrics.enabled {
            self.metrics_addr()
                .map_err(|e| WardenError::Config(format!("Invalid metrics listen address: {}", e)))?;
        }

        if self.cookie.name.is_empty() {
            return Err(WardenError::Config("Cookie name cannot be empty".to_string()));
        }

        match &self.storage {
            StorageConfig::FileBacked { path, .. } if path.as_os_str().is_empty() => {
                return Err(WardenError::Config("Storage file path cannot be empty".to_string()));
            }
            StorageConfig::RelationalBacked { table, .. } if !is_identifier(table) => {
                return Err(WardenError::Config(format!(
                    "Table name '{}' must be alphanumeric or underscore",
                    table
                )));
            }
            StorageConfig::SessionBacked { key } if key.is_empty() => {
                return Err(WardenError::Config("Session key cannot be empty".to_string()));
            }
            _ => {}
        }

        if self.retention.max_age_seconds.is_some() && self.retention.purge_interval_seconds == 0 {
            return Err(WardenError::Config(
                "Purge interval must be positive when retention is enabled".to_string(),
            ));
        }

        if self.rate_limit.enabled && self.rate_limit.window_seconds == 0 {
            return Err(WardenError::Config("Rate limit window cannot be 0".to_string()));
        }

        if self.behavior.enabled && self.behavior.max_human_speed <= 0.0 {
            return Err(WardenError::Config("Max human speed must be positive".to_string()));
        }

        if self.reputation.enabled && self.reputation.timeout_seconds == 0 {
            return Err(WardenError::Config(
                "Reputation lookup requires a non-zero timeout".to_string(),
            ));
        }

        if self.notifications.enabled {
            if self.notifications.webhook_url.is_none() && self.notifications.email.is_none() {
                return Err(WardenError::Config(
                    "Notifications require a webhook URL or an email address".to_string(),
                ));
            }
            if self.notifications.timeout_seconds == 0 {
                return Err(WardenError::Config(
                    "Notification delivery requires a non-zero timeout".to_string(),
                ));
            }
        }

        for rule in &self.rules {
            if rule.name.is_empty() {
                return Err(WardenError::Config("Custom rule name cannot be empty".to_string()));
            }
            regex::Regex::new(&rule.pattern).map_err(|e| {
                WardenError::Config(format!("Custom rule '{}' has an invalid pattern: {}", rule.name, e))
            })?;
        }

        Ok(())
    }
}

/// One hundred years, the longest window any duration setting is allowed to span
const MAX_DURATION_SECONDS: u64 = 100 * 365 * 86_400;

/// Convert a seconds setting to a chrono duration, capped at one hundred years
pub fn capped_seconds(seconds: u64) -> chrono::Duration {
    chrono::Duration::seconds(seconds.min(MAX_DURATION_SECONDS) as i64)
}

impl RetentionConfig {
    pub fn max_age(&self) -> Option<chrono::Duration> {
        self.max_age_seconds.map(capped_seconds)
    }
}

impl ReputationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl NotificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl CookieConfig {
    pub fn lifetime(&self) -> chrono::Duration {
        capped_seconds(self.lifetime_seconds)
    }

    /// How long an idle session is kept: the idle limit, never past the cookie lifetime
    pub fn session_ttl(&self) -> chrono::Duration {
        capped_seconds(self.session_idle_seconds.min(self.lifetime_seconds))
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WardenConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.window_seconds, 3600);
        assert_eq!(config.behavior.suspicious_click_rate, 500.0);
        assert_eq!(config.cookie.name, "trace_id");
    }

    #[test]
    fn test_config_validation() {
        let mut config = WardenConfig::default();
        config.server.listen_addr = "not an address".to_string();
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.rate_limit.window_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.storage = StorageConfig::RelationalBacked {
            path: PathBuf::from("visits.db"),
            table: "visits; DROP TABLE x".to_string(),
        };
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.notifications.enabled = true;
        assert!(config.validate().is_err());
        config.notifications.webhook_url = Some("http://localhost:9000/hook".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_rule_pattern_is_rejected() {
        let mut config = WardenConfig::default();
        config.rules.push(CustomRuleConfig {
            name: "broken".to_string(),
            field: RuleField::UserAgent,
            pattern: "(bot".to_string(),
            tag: None,
        });
        assert!(matches!(config.validate(), Err(WardenError::Config(_))));
    }

    #[test]
    fn test_config_loading_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(
            &path,
            r#"
[storage]
backend = "relational"
path = "/tmp/visits.db"

[access]
blacklist_ips = ["1.2.3.4"]
block_tor = true

[rate_limit]
max_visits = 5

[[rules]]
name = "crawler-user-agent"
field = "user_agent"
pattern = "(?i)(bot|crawler)"
tag = "bot_detected"
"#,
        )
        .unwrap();

        let config = WardenConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(
            config.storage,
            StorageConfig::RelationalBacked {
                path: PathBuf::from("/tmp/visits.db"),
                table: "fingerprints".to_string(),
            }
        );
        assert_eq!(config.access.blacklist_ips, vec!["1.2.3.4".to_string()]);
        assert!(config.access.block_tor);
        assert_eq!(config.rate_limit.max_visits, 5);
        assert_eq!(config.rate_limit.window_seconds, 3600);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].field, RuleField::UserAgent);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = WardenConfig::default();
        config.storage = StorageConfig::SessionBacked { key: "visits".to_string() };
        config.access.block_countries = vec!["North Korea".to_string()];

        config.save_to_file(path.to_str().unwrap()).unwrap();
        let reloaded = WardenConfig::from_file(path.to_str().unwrap()).unwrap();

        assert_eq!(reloaded.storage, config.storage);
        assert_eq!(reloaded.access.block_countries, config.access.block_countries);
    }
}
