//! Liquidity Routing Decision Engine
//!
//! Decides, per executed order, whether the platform absorbs the exposure on
//! its own book or hedges it with an external liquidity provider.
//!
//! # Decision cascade
//!
//! 1. routing disabled → absorb internally;
//! 2. order notional above the size threshold → route externally;
//! 3. absorbing would push the instrument's net exposure outside its band →
//!    route externally;
//! 4. total book notional beyond the aggregate cap → route externally;
//! 5. otherwise absorb internally.
//!
//! All thresholds live in the runtime-mutable routing-configuration table;
//! the engine holds a snapshot that [`RoutingEngine::refresh`] and
//! [`RoutingEngine::update_key`] replace atomically. Exposure is computed
//! from committed positions on every decision, never cached.
//!
//! External routing goes to the configured primary provider. A definitive
//! rejection tries the fallback provider, then absorbs internally — an order
//! is never left unresolved. An indeterminate outcome (timeout, connection
//! failure) enqueues a reconciliation entry without trying another provider,
//! because the first call may have executed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::application::ports::{
    ExecuteOrderRequest, ExecutionReport, LiquidityProvider, PositionRepository, ProviderError,
    ProviderOrderStatus, ReconciliationRepository, RepositoryError, RoutingConfigRepository,
};
use crate::domain::{PendingOrder, ReconciliationEntry};
use crate::infrastructure::metrics;

// =============================================================================
// Routing Configuration
// =============================================================================

/// Snapshot of the routing-configuration table.
///
/// Absent or unparseable keys fall back to the compiled-in defaults below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Master switch; a fresh book absorbs everything.
    pub enabled: bool,
    /// Order notional above which the order is always routed externally.
    pub size_threshold: Decimal,
    /// Default per-instrument net-quantity band.
    pub exposure_band: Decimal,
    /// Per-symbol overrides of the exposure band.
    pub exposure_band_overrides: HashMap<String, Decimal>,
    /// Book-wide net notional cap.
    pub total_notional_cap: Decimal,
    /// Provider name tried first for external routing.
    pub primary_provider: String,
    /// Provider tried after a definitive rejection by the primary.
    pub fallback_provider: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            size_threshold: Decimal::from(100_000),
            exposure_band: Decimal::from(500),
            exposure_band_overrides: HashMap::new(),
            total_notional_cap: Decimal::from(5_000_000),
            primary_provider: "sim".to_string(),
            fallback_provider: None,
        }
    }
}

impl RoutingConfig {
    /// Build a snapshot from raw configuration rows.
    #[must_use]
    pub fn from_values(values: &HashMap<String, Value>) -> Self {
        let defaults = Self::default();

        Self {
            enabled: parse_key(values, "enabled", defaults.enabled),
            size_threshold: parse_key(values, "size_threshold", defaults.size_threshold),
            exposure_band: parse_key(values, "exposure_band", defaults.exposure_band),
            exposure_band_overrides: parse_key(
                values,
                "exposure_band_overrides",
                defaults.exposure_band_overrides,
            ),
            total_notional_cap: parse_key(
                values,
                "total_notional_cap",
                defaults.total_notional_cap,
            ),
            primary_provider: parse_key(values, "primary_provider", defaults.primary_provider),
            fallback_provider: values
                .get("fallback_provider")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
        }
    }

    /// Exposure band for one instrument, honoring per-symbol overrides.
    #[must_use]
    pub fn band_for(&self, symbol: &str) -> Decimal {
        self.exposure_band_overrides
            .get(symbol)
            .copied()
            .unwrap_or(self.exposure_band)
    }
}

fn parse_key<T: serde::de::DeserializeOwned>(
    values: &HashMap<String, Value>,
    key: &str,
    default: T,
) -> T {
    match values.get(key) {
        None => default,
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "unparseable routing config value, using default");
            default
        }),
    }
}

// =============================================================================
// Provider Registry
// =============================================================================

/// Named liquidity providers available for routing.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LiquidityProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name.
    pub fn register(&mut self, provider: Arc<dyn LiquidityProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Look up a provider by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn LiquidityProvider>> {
        self.providers.get(name).cloned()
    }

    /// Registered provider names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

// =============================================================================
// Route Outcome
// =============================================================================

/// Resolution of one routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Exposure absorbed on the platform's own book.
    Internal,
    /// Hedged with an external provider.
    External {
        /// Order id assigned by the provider.
        provider_order_id: String,
    },
    /// Provider outcome indeterminate; a reconciliation entry now owns it.
    ReconciliationPending,
    /// Routing could not resolve (configuration or persistence fault).
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

impl RouteOutcome {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External { .. } => "external",
            Self::ReconciliationPending => "reconciliation_pending",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Routing seam consumed by the trigger engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRouter: Send + Sync {
    /// Decide and carry out the routing of one executed order.
    async fn route(&self, order: &PendingOrder, execution_price: Decimal) -> RouteOutcome;
}

// =============================================================================
// Routing Engine
// =============================================================================

/// The routing decision engine.
pub struct RoutingEngine<P, C, Q>
where
    P: PositionRepository,
    C: RoutingConfigRepository,
    Q: ReconciliationRepository,
{
    positions: Arc<P>,
    config_repo: Arc<C>,
    reconciliation: Arc<Q>,
    providers: Arc<ProviderRegistry>,
    config: parking_lot::RwLock<RoutingConfig>,
    provider_deadline: Duration,
}

impl<P, C, Q> RoutingEngine<P, C, Q>
where
    P: PositionRepository,
    C: RoutingConfigRepository,
    Q: ReconciliationRepository,
{
    /// Create an engine with compiled-in default configuration; call
    /// [`Self::refresh`] to load the persisted rows.
    #[must_use]
    pub fn new(
        positions: Arc<P>,
        config_repo: Arc<C>,
        reconciliation: Arc<Q>,
        providers: Arc<ProviderRegistry>,
        provider_deadline: Duration,
    ) -> Self {
        Self {
            positions,
            config_repo,
            reconciliation,
            providers,
            config: parking_lot::RwLock::new(RoutingConfig::default()),
            provider_deadline,
        }
    }

    /// Reload the configuration snapshot from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows cannot be read; the previous snapshot
    /// stays in effect.
    pub async fn refresh(&self) -> Result<(), RepositoryError> {
        let values = self.config_repo.load_all().await?;
        let config = RoutingConfig::from_values(&values);
        tracing::info!(?config, "routing configuration loaded");
        *self.config.write() = config;
        Ok(())
    }

    /// Persist one configuration value and apply it to the live snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or the reload fails.
    pub async fn update_key(&self, key: &str, value: &Value) -> Result<(), RepositoryError> {
        self.config_repo.set(key, value).await?;
        self.refresh().await
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn current_config(&self) -> RoutingConfig {
        self.config.read().clone()
    }

    /// Apply the decision cascade for one executed order.
    async fn decide(&self, order: &PendingOrder, execution_price: Decimal) -> RouteDecision {
        let config = self.current_config();

        if !config.enabled {
            return RouteDecision::Internal {
                reason: "routing disabled",
            };
        }

        let notional = order.notional(execution_price);
        if notional > config.size_threshold {
            return RouteDecision::External { config };
        }

        let projected = match self.positions.net_exposure(&order.symbol).await {
            Ok(net) => net + Decimal::from(order.side.sign()) * order.quantity,
            Err(e) => {
                // Exposure unknown: absorbing is the safe default.
                tracing::warn!(
                    symbol = %order.symbol,
                    error = %e,
                    "exposure read failed, absorbing internally"
                );
                return RouteDecision::Internal {
                    reason: "exposure unavailable",
                };
            }
        };

        if projected.abs() > config.band_for(order.symbol.as_str()) {
            return RouteDecision::External { config };
        }

        match self.positions.total_net_notional().await {
            Ok(total) if total.abs() > config.total_notional_cap => {
                RouteDecision::External { config }
            }
            Ok(_) => RouteDecision::Internal {
                reason: "within exposure band",
            },
            Err(e) => {
                tracing::warn!(error = %e, "book notional read failed, absorbing internally");
                RouteDecision::Internal {
                    reason: "book notional unavailable",
                }
            }
        }
    }

    /// Hedge an order externally: primary provider, fallback on definitive
    /// rejection, reconciliation entry on an indeterminate outcome.
    async fn route_external(
        &self,
        order: &PendingOrder,
        config: &RoutingConfig,
    ) -> RouteOutcome {
        let Some(provider) = self.providers.get(&config.primary_provider) else {
            return RouteOutcome::Failed {
                reason: format!("unknown primary provider: {}", config.primary_provider),
            };
        };

        // The hedge mirrors the executed order at market; the client order id
        // is the order's own id so a later status lookup can find it.
        let request =
            ExecuteOrderRequest::market(order.id, order.symbol.clone(), order.side, order.quantity);

        match self.call_provider(&*provider, &request).await {
            CallResult::Filled(report) => {
                self.mark_position_hedged(order).await;
                RouteOutcome::External {
                    provider_order_id: report.provider_order_id,
                }
            }
            CallResult::Indeterminate(error) => {
                self.enqueue_reconciliation(order, provider.name(), &error)
                    .await
            }
            CallResult::Rejected(reason) => {
                tracing::warn!(
                    order_id = %order.id,
                    provider = provider.name(),
                    reason,
                    "primary provider rejected hedge"
                );
                self.route_fallback(order, config, &request).await
            }
        }
    }

    /// Try the fallback provider after a rejection; absorb internally when
    /// there is none or it also rejects.
    async fn route_fallback(
        &self,
        order: &PendingOrder,
        config: &RoutingConfig,
        request: &ExecuteOrderRequest,
    ) -> RouteOutcome {
        let fallback = config
            .fallback_provider
            .as_deref()
            .and_then(|name| self.providers.get(name));

        let Some(provider) = fallback else {
            tracing::info!(order_id = %order.id, "no fallback provider, absorbing internally");
            return RouteOutcome::Internal;
        };

        match self.call_provider(&*provider, request).await {
            CallResult::Filled(report) => {
                self.mark_position_hedged(order).await;
                RouteOutcome::External {
                    provider_order_id: report.provider_order_id,
                }
            }
            CallResult::Indeterminate(error) => {
                self.enqueue_reconciliation(order, provider.name(), &error)
                    .await
            }
            CallResult::Rejected(reason) => {
                tracing::warn!(
                    order_id = %order.id,
                    provider = provider.name(),
                    reason,
                    "fallback provider rejected hedge, absorbing internally"
                );
                RouteOutcome::Internal
            }
        }
    }

    /// Flag the executed order's position as externally offset. The hedge
    /// itself succeeded, so a failure here only loses the marker.
    async fn mark_position_hedged(&self, order: &PendingOrder) {
        match self.positions.mark_hedged(order.id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(order_id = %order.id, "no open position to mark hedged");
            }
            Err(e) => {
                tracing::warn!(
                    order_id = %order.id,
                    error = %e,
                    "hedge filled but the position could not be marked"
                );
            }
        }
    }

    /// One provider call, folded into filled / rejected / indeterminate.
    async fn call_provider(
        &self,
        provider: &dyn LiquidityProvider,
        request: &ExecuteOrderRequest,
    ) -> CallResult {
        match provider.execute_order(request, self.provider_deadline).await {
            Ok(report) if report.status == ProviderOrderStatus::Rejected => {
                CallResult::Rejected(report.error.unwrap_or_else(|| "rejected".to_string()))
            }
            Ok(report) => CallResult::Filled(report),
            Err(error) if error.is_indeterminate() => CallResult::Indeterminate(error),
            Err(error) => CallResult::Rejected(error.to_string()),
        }
    }

    /// Record an indeterminate provider call for the background sweep.
    async fn enqueue_reconciliation(
        &self,
        order: &PendingOrder,
        provider: &str,
        error: &ProviderError,
    ) -> RouteOutcome {
        let entry =
            ReconciliationEntry::new(order.id, provider.to_string(), error.to_string(), Utc::now());

        match self.reconciliation.enqueue(&entry).await {
            Ok(()) => {
                metrics::record_reconciliation_enqueued();
                tracing::warn!(
                    order_id = %order.id,
                    provider,
                    error = %error,
                    "indeterminate provider outcome, reconciliation entry created"
                );
                RouteOutcome::ReconciliationPending
            }
            Err(e) => {
                // The provider call is now untracked; this must be loud.
                tracing::error!(
                    order_id = %order.id,
                    provider,
                    error = %e,
                    "failed to persist reconciliation entry for indeterminate call"
                );
                RouteOutcome::Failed {
                    reason: format!("reconciliation enqueue failed: {e}"),
                }
            }
        }
    }
}

#[async_trait]
impl<P, C, Q> OrderRouter for RoutingEngine<P, C, Q>
where
    P: PositionRepository,
    C: RoutingConfigRepository,
    Q: ReconciliationRepository,
{
    async fn route(&self, order: &PendingOrder, execution_price: Decimal) -> RouteOutcome {
        match self.decide(order, execution_price).await {
            RouteDecision::Internal { reason } => {
                tracing::debug!(order_id = %order.id, reason, "absorbing internally");
                RouteOutcome::Internal
            }
            RouteDecision::External { config } => self.route_external(order, &config).await,
        }
    }
}

/// Intermediate result of the decision cascade.
enum RouteDecision {
    Internal { reason: &'static str },
    External { config: RoutingConfig },
}

/// Intermediate result of one provider call.
enum CallResult {
    Filled(ExecutionReport),
    Rejected(String),
    Indeterminate(ProviderError),
}
