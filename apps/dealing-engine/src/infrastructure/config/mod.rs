//! Configuration loading.
//!
//! Single entry point is [`AppConfig::from_env`]; the settings structs
//! mirror the engine components they wire.

mod settings;

pub use settings::{
    ApiKey, AppConfig, BroadcastSettings, ConfigError, DatabaseSettings, Environment,
    FeedSettings, ReconciliationSettings, RestVenueSettings, RoutingSettings, ServerSettings,
    TriggerSettings,
};
