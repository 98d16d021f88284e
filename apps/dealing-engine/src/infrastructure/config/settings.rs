//! Runtime configuration.
//!
//! Everything here is read once at startup from the process environment.
//! Ports, capacities and intervals stay fixed for the life of the
//! process. Routing thresholds are not here: they live in the store and
//! may change while the engine runs.

use std::str::FromStr;
use std::time::Duration;

/// Deployment target (demo or live accounts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Virtual balance accounts.
    #[default]
    Demo,
    /// Real money accounts.
    Live,
}

impl Environment {
    /// Parse an environment name. Unrecognised values map to demo.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("live") {
            Self::Live
        } else {
            Self::Demo
        }
    }

    /// Lowercase name for logs and health payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::Live => "live",
        }
    }

    /// Whether orders settle against real funds.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// PostgreSQL connection string.
    pub url: String,
    /// Connection pool size.
    pub max_connections: u32,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_required("DATABASE_URL")?,
            max_connections: env_or("DEALING_DB_MAX_CONNECTIONS", 5),
        })
    }
}

/// Market-data feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// WebSocket base URL of the tick source.
    pub base_url: String,
    /// Symbols to subscribe, exchange notation.
    pub symbols: Vec<String>,
    /// Whether to also subscribe depth snapshots.
    pub with_depth: bool,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay_initial: Duration,
    /// Ceiling the backoff schedule grows toward.
    pub reconnect_delay_max: Duration,
    /// Growth factor applied per failed attempt.
    pub reconnect_delay_multiplier: f64,
    /// Attempt budget before the client gives up (0 = no limit).
    pub max_reconnect_attempts: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            base_url: "wss://stream.binance.com:9443".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
            with_depth: true,
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(60),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

impl FeedSettings {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("DEALING_FEED_URL").unwrap_or(defaults.base_url),
            symbols: std::env::var("DEALING_FEED_SYMBOLS")
                .map_or(defaults.symbols, |raw| parse_symbols(&raw)),
            with_depth: env_flag_or("DEALING_FEED_DEPTH", defaults.with_depth),
            reconnect_delay_initial: env_duration_or(
                "DEALING_FEED_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
                Duration::from_millis,
            ),
            reconnect_delay_max: env_duration_or(
                "DEALING_FEED_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
                Duration::from_secs,
            ),
            reconnect_delay_multiplier: env_or(
                "DEALING_FEED_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env_or(
                "DEALING_FEED_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        }
    }
}

/// Fan-out queue settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Per-consumer queue capacity.
    pub default_capacity: usize,
    /// Trigger-engine queue capacity (deeper: it must not miss ticks).
    pub trigger_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            default_capacity: 256,
            trigger_capacity: 4_096,
        }
    }
}

impl BroadcastSettings {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_capacity: env_or("DEALING_BROADCAST_CAPACITY", defaults.default_capacity),
            trigger_capacity: env_or(
                "DEALING_TRIGGER_BROADCAST_CAPACITY",
                defaults.trigger_capacity,
            ),
        }
    }
}

/// Trigger engine settings.
#[derive(Debug, Clone)]
pub struct TriggerSettings {
    /// Parse -> match queue capacity.
    pub queue_capacity: usize,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1_024,
        }
    }
}

impl TriggerSettings {
    fn from_env() -> Self {
        Self {
            queue_capacity: env_or(
                "DEALING_TRIGGER_QUEUE_CAPACITY",
                Self::default().queue_capacity,
            ),
        }
    }
}

/// Routing engine settings (the thresholds themselves live in the store).
#[derive(Debug, Clone)]
pub struct RoutingSettings {
    /// Deadline for each provider call.
    pub provider_deadline: Duration,
    /// How often the store-held routing config is re-read.
    pub config_refresh_interval: Duration,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            provider_deadline: Duration::from_secs(5),
            config_refresh_interval: Duration::from_secs(30),
        }
    }
}

impl RoutingSettings {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            provider_deadline: env_duration_or(
                "DEALING_PROVIDER_DEADLINE_SECS",
                defaults.provider_deadline,
                Duration::from_secs,
            ),
            config_refresh_interval: env_duration_or(
                "DEALING_ROUTING_REFRESH_SECS",
                defaults.config_refresh_interval,
                Duration::from_secs,
            ),
        }
    }
}

/// Reconciliation sweep settings.
#[derive(Debug, Clone)]
pub struct ReconciliationSettings {
    /// Sweep interval.
    pub sweep_interval: Duration,
    /// Backoff for the first retry.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Attempts before an entry turns failed.
    pub max_attempts: u32,
    /// Entries examined per sweep.
    pub batch_limit: u32,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(900),
            max_attempts: 10,
            batch_limit: 50,
        }
    }
}

impl ReconciliationSettings {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sweep_interval: env_duration_or(
                "DEALING_RECON_SWEEP_SECS",
                defaults.sweep_interval,
                Duration::from_secs,
            ),
            base_delay: env_duration_or(
                "DEALING_RECON_BASE_DELAY_SECS",
                defaults.base_delay,
                Duration::from_secs,
            ),
            max_delay: env_duration_or(
                "DEALING_RECON_MAX_DELAY_SECS",
                defaults.max_delay,
                Duration::from_secs,
            ),
            max_attempts: env_or("DEALING_RECON_MAX_ATTEMPTS", defaults.max_attempts),
            batch_limit: env_or("DEALING_RECON_BATCH_LIMIT", defaults.batch_limit),
        }
    }
}

/// Listener ports.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port for the liveness/readiness HTTP listener.
    pub health_port: u16,
    /// Port for the Prometheus exposition listener (0 turns it off).
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: 8083,
            metrics_port: 9090,
        }
    }
}

impl ServerSettings {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            health_port: env_or("DEALING_HEALTH_PORT", defaults.health_port),
            metrics_port: env_or("DEALING_METRICS_PORT", defaults.metrics_port),
        }
    }
}

/// API key for the REST venue, redacted from `Debug` output.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Take ownership of a key read from the environment.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// Borrow the underlying secret for request signing.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApiKey").field(&"[REDACTED]").finish()
    }
}

/// Optional REST liquidity venue, registered alongside the simulator when
/// configured.
#[derive(Debug, Clone)]
pub struct RestVenueSettings {
    /// Provider name used in routing config.
    pub name: String,
    /// Venue base URL.
    pub base_url: String,
    /// Venue API key.
    pub api_key: ApiKey,
}

impl RestVenueSettings {
    // A venue URL with no key is a misconfiguration, not a disabled venue.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let base_url = match std::env::var("DEALING_REST_VENUE_URL") {
            Ok(url) if !url.is_empty() => url,
            _ => return Ok(None),
        };
        Ok(Some(Self {
            name: std::env::var("DEALING_REST_VENUE_NAME").unwrap_or_else(|_| "rest".to_string()),
            base_url,
            api_key: ApiKey::new(env_required("DEALING_REST_VENUE_API_KEY")?),
        }))
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Platform environment.
    pub environment: Environment,
    /// Database connection settings.
    pub database: DatabaseSettings,
    /// Market-data feed settings.
    pub feed: FeedSettings,
    /// Fan-out queue settings.
    pub broadcast: BroadcastSettings,
    /// Trigger engine settings.
    pub trigger: TriggerSettings,
    /// Routing engine settings.
    pub routing: RoutingSettings,
    /// Reconciliation sweep settings.
    pub reconciliation: ReconciliationSettings,
    /// Listener ports.
    pub server: ServerSettings,
    /// Optional REST venue.
    pub rest_venue: Option<RestVenueSettings>,
}

impl AppConfig {
    /// Assemble the full configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when `DATABASE_URL` is missing or empty, or when a REST
    /// venue URL is configured without an API key.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            environment: std::env::var("DEALING_ENV")
                .map(|s| Environment::parse(&s))
                .unwrap_or_default(),
            database: DatabaseSettings::from_env()?,
            feed: FeedSettings::from_env(),
            broadcast: BroadcastSettings::from_env(),
            trigger: TriggerSettings::from_env(),
            routing: RoutingSettings::from_env(),
            reconciliation: ReconciliationSettings::from_env(),
            server: ServerSettings::from_env(),
            rest_venue: RestVenueSettings::from_env()?,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable the engine cannot start without is absent.
    #[error("required environment variable {key} is not set")]
    Missing {
        /// Variable name.
        key: &'static str,
    },
    /// A variable is present but holds an empty string.
    #[error("environment variable {key} is empty")]
    Empty {
        /// Variable name.
        key: &'static str,
    },
}

/// Split a comma-separated symbol list, dropping empty segments.
fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect()
}

fn env_required(key: &'static str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        Ok(_) => Err(ConfigError::Empty { key }),
        Err(_) => Err(ConfigError::Missing { key }),
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration_or(key: &str, default: Duration, unit: fn(u64) -> Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(default, unit)
}

fn env_flag_or(key: &str, default: bool) -> bool {
    std::env::var(key).map_or(default, |v| {
        matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parse_accepts_any_case() {
        for raw in ["live", "LIVE", "Live"] {
            assert_eq!(Environment::parse(raw), Environment::Live);
        }
        for raw in ["demo", "DEMO", "prod", ""] {
            assert_eq!(Environment::parse(raw), Environment::Demo);
        }
    }

    #[test]
    fn only_live_settles_real_funds() {
        assert!(Environment::Live.is_live());
        assert!(!Environment::Demo.is_live());
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-alpha-123".to_string());
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("sk-alpha-123"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn symbol_list_parsing() {
        assert_eq!(
            parse_symbols("btcusdt, ethusdt ,,SOLUSDT"),
            vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]
        );
        assert!(parse_symbols(" , ").is_empty());
    }

    #[test]
    fn feed_settings_defaults() {
        let settings = FeedSettings::default();
        assert_eq!(settings.symbols, vec!["BTCUSDT"]);
        assert_eq!(settings.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(60));
        assert!((settings.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.max_reconnect_attempts, 0);
    }

    #[test]
    fn broadcast_settings_defaults() {
        let settings = BroadcastSettings::default();
        assert_eq!(settings.default_capacity, 256);
        assert_eq!(settings.trigger_capacity, 4_096);
    }

    #[test]
    fn reconciliation_settings_defaults() {
        let settings = ReconciliationSettings::default();
        assert_eq!(settings.sweep_interval, Duration::from_secs(30));
        assert_eq!(settings.base_delay, Duration::from_secs(60));
        assert_eq!(settings.max_delay, Duration::from_secs(900));
        assert_eq!(settings.max_attempts, 10);
    }

    #[test]
    fn flag_parsing_defaults_when_unset() {
        assert!(env_flag_or("DEALING_TEST_UNSET_FLAG", true));
        assert!(!env_flag_or("DEALING_TEST_UNSET_FLAG", false));
    }

    #[test]
    fn required_var_missing_is_an_error() {
        let err = env_required("DEALING_TEST_UNSET_REQUIRED").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                key: "DEALING_TEST_UNSET_REQUIRED"
            }
        ));
    }
}
