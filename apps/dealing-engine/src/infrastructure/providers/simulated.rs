//! Simulated liquidity provider.
//!
//! Fills every order instantly at a reference price plus configured slippage,
//! without any network I/O. Failure injection is driven by a seeded RNG so
//! runs are reproducible; setters let tests pin the failure probability to 0
//! or 1 and choose which failure kind fires.
//!
//! Indeterminate failure kinds (timeout, connection drop) record the fill
//! *before* returning the error: the order executed but the caller never saw
//! the answer, which is exactly the situation the reconciliation sweep
//! settles by status lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::application::ports::{
    ExecuteOrderRequest, ExecutionReport, LiquidityProvider, ProviderError, ProviderOrderStatus,
    with_deadline,
};
use crate::domain::{OrderSide, Symbol};

/// Which error an injected failure produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    /// Definitive rejection.
    Rejection,
    /// Definitive rejection for size.
    InsufficientLiquidity,
    /// Indeterminate: the fill is recorded, the answer is lost.
    Timeout,
    /// Indeterminate: the fill is recorded, the connection "dropped".
    ConnectionFailed,
}

/// Tunable behavior of the simulated provider.
#[derive(Debug, Clone)]
pub struct SimulatedProviderConfig {
    /// Artificial latency applied to execute and status calls.
    pub latency: Duration,
    /// Probability in `[0, 1]` that a call fails with `failure_kind`.
    pub failure_probability: f64,
    /// Which failure an injected failure produces.
    pub failure_kind: SimulatedFailure,
    /// Fill slippage in basis points, applied against the taker.
    pub slippage_bps: Decimal,
    /// Flat fee attached to each fill.
    pub fee: Decimal,
}

impl Default for SimulatedProviderConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(50),
            failure_probability: 0.02,
            failure_kind: SimulatedFailure::ConnectionFailed,
            slippage_bps: dec!(5),
            fee: Decimal::ZERO,
        }
    }
}

/// In-process liquidity provider with deterministic, injectable behavior.
pub struct SimulatedProvider {
    name: String,
    config: RwLock<SimulatedProviderConfig>,
    reference_prices: RwLock<HashMap<Symbol, Decimal>>,
    balances: RwLock<HashMap<String, Decimal>>,
    orders: RwLock<HashMap<Uuid, ExecutionReport>>,
    rng: parking_lot::Mutex<StdRng>,
    sequence: AtomicU64,
}

impl SimulatedProvider {
    /// Create a provider named `sim`.
    #[must_use]
    pub fn new(config: SimulatedProviderConfig, rng_seed: u64) -> Self {
        Self::named("sim", config, rng_seed)
    }

    /// Create a provider with an explicit name (for fallback wiring).
    #[must_use]
    pub fn named(
        name: impl Into<String>,
        config: SimulatedProviderConfig,
        rng_seed: u64,
    ) -> Self {
        Self {
            name: name.into(),
            config: RwLock::new(config),
            reference_prices: RwLock::new(HashMap::new()),
            balances: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            rng: parking_lot::Mutex::new(StdRng::seed_from_u64(rng_seed)),
            sequence: AtomicU64::new(1),
        }
    }

    /// Shared handle, ready for the provider registry.
    #[must_use]
    pub fn shared(config: SimulatedProviderConfig, rng_seed: u64) -> Arc<Self> {
        Arc::new(Self::new(config, rng_seed))
    }

    /// Set the probability that a call fails.
    pub fn set_failure_probability(&self, probability: f64) {
        self.config.write().failure_probability = probability.clamp(0.0, 1.0);
    }

    /// Set which failure an injected failure produces.
    pub fn set_failure_kind(&self, kind: SimulatedFailure) {
        self.config.write().failure_kind = kind;
    }

    /// Set the artificial call latency.
    pub fn set_latency(&self, latency: Duration) {
        self.config.write().latency = latency;
    }

    /// Set the fill slippage in basis points.
    pub fn set_slippage_bps(&self, bps: Decimal) {
        self.config.write().slippage_bps = bps;
    }

    /// Set the reference price fills are computed from.
    pub fn set_reference_price(&self, symbol: Symbol, price: Decimal) {
        self.reference_prices.write().insert(symbol, price);
    }

    /// Set the balance reported for a currency.
    pub fn set_balance(&self, currency: impl Into<String>, amount: Decimal) {
        self.balances.write().insert(currency.into(), amount);
    }

    fn next_provider_order_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("SIM-{seq}")
    }

    /// Reference price for a fill: the per-symbol table, else the request's
    /// limit price.
    fn price_for(&self, request: &ExecuteOrderRequest) -> Option<Decimal> {
        self.reference_prices
            .read()
            .get(&request.symbol)
            .copied()
            .or(request.limit_price)
    }

    fn roll_failure(&self) -> Option<SimulatedFailure> {
        let config = self.config.read();
        let roll: f64 = self.rng.lock().random();
        (roll < config.failure_probability).then_some(config.failure_kind)
    }

    fn slipped_price(&self, reference: Decimal, side: OrderSide) -> Decimal {
        let slip = reference * self.config.read().slippage_bps / dec!(10_000);
        match side {
            OrderSide::Buy => reference + slip,
            OrderSide::Sell => reference - slip,
        }
    }

    async fn fill(
        &self,
        request: &ExecuteOrderRequest,
        deadline: Duration,
    ) -> Result<ExecutionReport, ProviderError> {
        let latency = self.config.read().latency;
        tokio::time::sleep(latency).await;

        let Some(reference) = self.price_for(request) else {
            return Err(ProviderError::Rejected {
                reason: format!("no reference price for {}", request.symbol),
            });
        };

        let price = self.slipped_price(reference, request.side);
        let report = ExecutionReport {
            provider_order_id: self.next_provider_order_id(),
            client_order_id: request.client_order_id,
            status: ProviderOrderStatus::Filled,
            filled_quantity: request.quantity,
            remaining_quantity: Decimal::ZERO,
            average_price: Some(price),
            fee: self.config.read().fee,
            error: None,
        };

        if let Some(kind) = self.roll_failure() {
            return Err(self.record_failure(request, report, kind, deadline));
        }

        self.orders
            .write()
            .insert(request.client_order_id, report.clone());
        Ok(report)
    }

    /// Record the injected failure's side effects and build its error.
    fn record_failure(
        &self,
        request: &ExecuteOrderRequest,
        filled: ExecutionReport,
        kind: SimulatedFailure,
        deadline: Duration,
    ) -> ProviderError {
        match kind {
            SimulatedFailure::Rejection => {
                self.orders.write().insert(
                    request.client_order_id,
                    ExecutionReport {
                        status: ProviderOrderStatus::Rejected,
                        filled_quantity: Decimal::ZERO,
                        remaining_quantity: request.quantity,
                        average_price: None,
                        error: Some("simulated rejection".to_string()),
                        ..filled
                    },
                );
                ProviderError::Rejected {
                    reason: "simulated rejection".to_string(),
                }
            }
            SimulatedFailure::InsufficientLiquidity => {
                self.orders.write().insert(
                    request.client_order_id,
                    ExecutionReport {
                        status: ProviderOrderStatus::Rejected,
                        filled_quantity: Decimal::ZERO,
                        remaining_quantity: request.quantity,
                        average_price: None,
                        error: Some("simulated thin book".to_string()),
                        ..filled
                    },
                );
                ProviderError::InsufficientLiquidity {
                    detail: "simulated thin book".to_string(),
                }
            }
            // The fill happened; only the answer was lost.
            SimulatedFailure::Timeout => {
                self.orders.write().insert(request.client_order_id, filled);
                ProviderError::Timeout {
                    timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                }
            }
            SimulatedFailure::ConnectionFailed => {
                self.orders.write().insert(request.client_order_id, filled);
                ProviderError::ConnectionFailed {
                    detail: "simulated connection drop".to_string(),
                }
            }
        }
    }

    async fn lookup(&self, client_order_id: Uuid) -> Result<ExecutionReport, ProviderError> {
        let latency = self.config.read().latency;
        tokio::time::sleep(latency).await;

        if let Some(kind) = self.roll_failure() {
            return Err(match kind {
                SimulatedFailure::Timeout => ProviderError::Timeout { timeout_ms: 0 },
                _ => ProviderError::ConnectionFailed {
                    detail: "simulated connection drop".to_string(),
                },
            });
        }

        Ok(self
            .orders
            .read()
            .get(&client_order_id)
            .cloned()
            .unwrap_or_else(|| ExecutionReport {
                provider_order_id: String::new(),
                client_order_id,
                status: ProviderOrderStatus::NotFound,
                filled_quantity: Decimal::ZERO,
                remaining_quantity: Decimal::ZERO,
                average_price: None,
                fee: Decimal::ZERO,
                error: Some("unknown client order id".to_string()),
            }))
    }
}

impl std::fmt::Debug for SimulatedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedProvider")
            .field("name", &self.name)
            .field("config", &*self.config.read())
            .field("orders", &self.orders.read().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LiquidityProvider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_order(
        &self,
        request: &ExecuteOrderRequest,
        deadline: Duration,
    ) -> Result<ExecutionReport, ProviderError> {
        with_deadline(deadline, self.fill(request, deadline)).await
    }

    async fn order_status(
        &self,
        client_order_id: Uuid,
        deadline: Duration,
    ) -> Result<ExecutionReport, ProviderError> {
        with_deadline(deadline, self.lookup(client_order_id)).await
    }

    async fn balance(
        &self,
        currency: &str,
        _deadline: Duration,
    ) -> Result<Decimal, ProviderError> {
        Ok(self
            .balances
            .read()
            .get(currency)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn cancel_order(
        &self,
        client_order_id: Uuid,
        _deadline: Duration,
    ) -> Result<(), ProviderError> {
        let orders = self.orders.read();
        match orders.get(&client_order_id).map(|r| r.status) {
            Some(ProviderOrderStatus::Filled) => Err(ProviderError::Rejected {
                reason: "order already filled".to_string(),
            }),
            Some(_) => Ok(()),
            None => Err(ProviderError::Rejected {
                reason: "unknown client order id".to_string(),
            }),
        }
    }

    async fn health_check(&self, _deadline: Duration) -> Result<(), ProviderError> {
        Ok(())
    }
}
