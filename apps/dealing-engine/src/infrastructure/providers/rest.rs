//! REST liquidity provider.
//!
//! Adapter for venues exposing a JSON HTTP API: `POST /orders`,
//! `GET /orders/{client_order_id}`, `GET /balances/{currency}`,
//! `DELETE /orders/{client_order_id}` and `GET /health`, authenticated with
//! an `X-API-KEY` header.
//!
//! Calls are single-shot and bounded by the caller's deadline; a lost answer
//! surfaces as an indeterminate error and is settled by the reconciliation
//! sweep, never retried here. Decimal fields travel as strings on the wire.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::ports::{
    ExecuteOrderRequest, ExecutionReport, LiquidityProvider, ProviderError, ProviderOrderKind,
    ProviderOrderStatus,
};
use crate::domain::OrderSide;

/// Connection settings for a REST venue.
#[derive(Debug, Clone)]
pub struct RestProviderConfig {
    /// Provider name used in routing config and reconciliation entries.
    pub name: String,
    /// Base URL, without a trailing slash.
    pub base_url: String,
    /// Venue API key.
    pub api_key: String,
}

/// Liquidity provider backed by a JSON HTTP API.
#[derive(Debug, Clone)]
pub struct RestProvider {
    config: RestProviderConfig,
    client: Client,
}

impl RestProvider {
    /// Build the adapter and its connection pool.
    pub fn new(config: RestProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::ConnectionFailed {
                detail: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        deadline: Duration,
    ) -> Result<Response, ProviderError> {
        request
            .header("X-API-KEY", &self.config.api_key)
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| transport_error(&e, deadline))
    }

    /// Parse an order response body, mapping venue errors onto the provider
    /// error taxonomy.
    async fn read_order(&self, response: Response) -> Result<ExecutionReport, ProviderError> {
        if response.status().is_success() {
            let wire: WireOrder = response
                .json()
                .await
                .map_err(|e| ProviderError::ConnectionFailed {
                    detail: format!("malformed order response: {e}"),
                })?;
            return Ok(wire.into_report());
        }
        Err(venue_error(response).await)
    }
}

#[async_trait]
impl LiquidityProvider for RestProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute_order(
        &self,
        request: &ExecuteOrderRequest,
        deadline: Duration,
    ) -> Result<ExecutionReport, ProviderError> {
        let body = WireOrderRequest::from(request);

        tracing::info!(
            provider = %self.config.name,
            client_order_id = %request.client_order_id,
            symbol = %request.symbol,
            side = body.side,
            quantity = %request.quantity,
            "submitting order to provider"
        );

        let response = self
            .send(self.client.post(self.url("/orders")).json(&body), deadline)
            .await?;
        self.read_order(response).await
    }

    async fn order_status(
        &self,
        client_order_id: Uuid,
        deadline: Duration,
    ) -> Result<ExecutionReport, ProviderError> {
        let response = self
            .send(
                self.client
                    .get(self.url(&format!("/orders/{client_order_id}"))),
                deadline,
            )
            .await?;

        // A venue with no record of the id is a definitive answer, not an
        // error.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ExecutionReport {
                provider_order_id: String::new(),
                client_order_id,
                status: ProviderOrderStatus::NotFound,
                filled_quantity: Decimal::ZERO,
                remaining_quantity: Decimal::ZERO,
                average_price: None,
                fee: Decimal::ZERO,
                error: None,
            });
        }
        self.read_order(response).await
    }

    async fn balance(&self, currency: &str, deadline: Duration) -> Result<Decimal, ProviderError> {
        let response = self
            .send(
                self.client
                    .get(self.url(&format!("/balances/{currency}"))),
                deadline,
            )
            .await?;

        if response.status().is_success() {
            let wire: WireBalance =
                response
                    .json()
                    .await
                    .map_err(|e| ProviderError::ConnectionFailed {
                        detail: format!("malformed balance response: {e}"),
                    })?;
            return Ok(wire.available);
        }
        Err(venue_error(response).await)
    }

    async fn cancel_order(
        &self,
        client_order_id: Uuid,
        deadline: Duration,
    ) -> Result<(), ProviderError> {
        let response = self
            .send(
                self.client
                    .delete(self.url(&format!("/orders/{client_order_id}"))),
                deadline,
            )
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(venue_error(response).await)
    }

    async fn health_check(&self, deadline: Duration) -> Result<(), ProviderError> {
        let response = self
            .send(self.client.get(self.url("/health")), deadline)
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(venue_error(response).await)
    }
}

/// Map a transport failure: elapsed deadline is indeterminate-by-timeout,
/// everything else indeterminate-by-connection.
fn transport_error(error: &reqwest::Error, deadline: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout {
            timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        ProviderError::ConnectionFailed {
            detail: error.to_string(),
        }
    }
}

/// Map a non-success venue response onto the provider error taxonomy.
///
/// 4xx answers are definitive (the venue saw the request and said no); 5xx
/// answers are indeterminate because the venue may have acted before
/// failing.
async fn venue_error(response: Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let (code, message) = match serde_json::from_str::<WireError>(&body) {
        Ok(err) => (err.code, err.message),
        Err(_) => (None, body),
    };
    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };

    if code.as_deref() == Some("insufficient_liquidity") {
        return ProviderError::InsufficientLiquidity { detail: message };
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Rejected {
            reason: format!("authentication failed: {message}"),
        },
        s if s.is_client_error() => ProviderError::Rejected { reason: message },
        _ => ProviderError::ConnectionFailed {
            detail: format!("{status}: {message}"),
        },
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct WireOrderRequest {
    client_order_id: Uuid,
    symbol: String,
    side: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<Decimal>,
}

impl From<&ExecuteOrderRequest> for WireOrderRequest {
    fn from(request: &ExecuteOrderRequest) -> Self {
        Self {
            client_order_id: request.client_order_id,
            symbol: request.symbol.to_string(),
            side: match request.side {
                OrderSide::Buy => "buy",
                OrderSide::Sell => "sell",
            },
            kind: match request.kind {
                ProviderOrderKind::Market => "market",
                ProviderOrderKind::Limit => "limit",
            },
            quantity: request.quantity,
            price: request.limit_price,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    order_id: String,
    client_order_id: Uuid,
    status: ProviderOrderStatus,
    filled_quantity: Decimal,
    remaining_quantity: Decimal,
    average_price: Option<Decimal>,
    #[serde(default)]
    fee: Decimal,
    #[serde(default)]
    error: Option<String>,
}

impl WireOrder {
    fn into_report(self) -> ExecutionReport {
        ExecutionReport {
            provider_order_id: self.order_id,
            client_order_id: self.client_order_id,
            status: self.status,
            filled_quantity: self.filled_quantity,
            remaining_quantity: self.remaining_quantity,
            average_price: self.average_price,
            fee: self.fee,
            error: self.error,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireBalance {
    #[allow(dead_code)]
    currency: String,
    available: Decimal,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::domain::Symbol;

    const DEADLINE: Duration = Duration::from_secs(2);

    fn provider(server: &MockServer) -> RestProvider {
        RestProvider::new(RestProviderConfig {
            name: "venue".to_string(),
            base_url: server.uri(),
            api_key: "test-key".to_string(),
        })
        .unwrap()
    }

    fn order_body(client_order_id: Uuid, status: &str) -> serde_json::Value {
        json!({
            "order_id": "X-77",
            "client_order_id": client_order_id,
            "status": status,
            "filled_quantity": "10",
            "remaining_quantity": "0",
            "average_price": "100.05",
            "fee": "0.2",
        })
    }

    #[tokio::test]
    async fn execute_posts_order_and_parses_fill() {
        let server = MockServer::start().await;
        let request = ExecuteOrderRequest::market(
            Uuid::new_v4(),
            Symbol::new("EURUSD"),
            OrderSide::Buy,
            dec!(10),
        );

        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(header("X-API-KEY", "test-key"))
            .and(body_partial_json(json!({
                "symbol": "EURUSD",
                "side": "buy",
                "type": "market",
                "quantity": "10",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(order_body(request.client_order_id, "filled")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let report = provider(&server)
            .execute_order(&request, DEADLINE)
            .await
            .unwrap();

        assert_eq!(report.provider_order_id, "X-77");
        assert_eq!(report.status, ProviderOrderStatus::Filled);
        assert_eq!(report.filled_quantity, dec!(10));
        assert_eq!(report.average_price, Some(dec!(100.05)));
        assert_eq!(report.fee, dec!(0.2));
    }

    #[tokio::test]
    async fn limit_order_carries_price_on_the_wire() {
        let server = MockServer::start().await;
        let request = ExecuteOrderRequest::limit(
            Uuid::new_v4(),
            Symbol::new("EURUSD"),
            OrderSide::Sell,
            dec!(5),
            dec!(1.105),
        );

        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(body_partial_json(json!({
                "side": "sell",
                "type": "limit",
                "price": "1.105",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(order_body(request.client_order_id, "pending")),
            )
            .mount(&server)
            .await;

        let report = provider(&server)
            .execute_order(&request, DEADLINE)
            .await
            .unwrap();
        assert_eq!(report.status, ProviderOrderStatus::Pending);
    }

    #[tokio::test]
    async fn venue_rejection_maps_to_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "code": "risk_check",
                "message": "size exceeds venue limit",
            })))
            .mount(&server)
            .await;

        let request = ExecuteOrderRequest::market(
            Uuid::new_v4(),
            Symbol::new("EURUSD"),
            OrderSide::Buy,
            dec!(10),
        );
        let err = provider(&server)
            .execute_order(&request, DEADLINE)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProviderError::Rejected { ref reason } if reason == "size exceeds venue limit"
        ));
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn insufficient_liquidity_code_maps_to_its_own_variant() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "code": "insufficient_liquidity",
                "message": "book too thin for 10",
            })))
            .mount(&server)
            .await;

        let request = ExecuteOrderRequest::market(
            Uuid::new_v4(),
            Symbol::new("EURUSD"),
            OrderSide::Buy,
            dec!(10),
        );
        let err = provider(&server)
            .execute_order(&request, DEADLINE)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::InsufficientLiquidity { .. }));
    }

    #[tokio::test]
    async fn server_error_is_indeterminate() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let request = ExecuteOrderRequest::market(
            Uuid::new_v4(),
            Symbol::new("EURUSD"),
            OrderSide::Buy,
            dec!(10),
        );
        let err = provider(&server)
            .execute_order(&request, DEADLINE)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::ConnectionFailed { .. }));
        assert!(err.is_indeterminate());
    }

    #[tokio::test]
    async fn slow_venue_times_out_at_the_deadline() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(order_body(Uuid::new_v4(), "filled"))
                    .set_delay(Duration::from_millis(250)),
            )
            .mount(&server)
            .await;

        let request = ExecuteOrderRequest::market(
            Uuid::new_v4(),
            Symbol::new("EURUSD"),
            OrderSide::Buy,
            dec!(10),
        );
        let err = provider(&server)
            .execute_order(&request, Duration::from_millis(25))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Timeout { .. }));
    }

    #[tokio::test]
    async fn unreachable_venue_is_a_connection_failure() {
        let rest = RestProvider::new(RestProviderConfig {
            name: "venue".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: "test-key".to_string(),
        })
        .unwrap();

        let request = ExecuteOrderRequest::market(
            Uuid::new_v4(),
            Symbol::new("EURUSD"),
            OrderSide::Buy,
            dec!(10),
        );
        let err = rest.execute_order(&request, DEADLINE).await.unwrap_err();

        assert!(err.is_indeterminate());
    }

    #[tokio::test]
    async fn status_lookup_parses_report() {
        let server = MockServer::start().await;
        let client_order_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/orders/{client_order_id}")))
            .and(header("X-API-KEY", "test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(order_body(client_order_id, "filled")),
            )
            .mount(&server)
            .await;

        let report = provider(&server)
            .order_status(client_order_id, DEADLINE)
            .await
            .unwrap();

        assert_eq!(report.status, ProviderOrderStatus::Filled);
        assert_eq!(report.client_order_id, client_order_id);
    }

    #[tokio::test]
    async fn status_404_reports_not_found() {
        let server = MockServer::start().await;
        let client_order_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/orders/{client_order_id}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let report = provider(&server)
            .order_status(client_order_id, DEADLINE)
            .await
            .unwrap();

        assert_eq!(report.status, ProviderOrderStatus::NotFound);
        assert_eq!(report.filled_quantity, Decimal::ZERO);
    }

    #[tokio::test]
    async fn balance_parses_available_amount() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/balances/USD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "currency": "USD",
                "available": "250000.50",
            })))
            .mount(&server)
            .await;

        let balance = provider(&server).balance("USD", DEADLINE).await.unwrap();
        assert_eq!(balance, dec!(250000.50));
    }

    #[tokio::test]
    async fn cancel_succeeds_on_2xx() {
        let server = MockServer::start().await;
        let client_order_id = Uuid::new_v4();

        Mock::given(method("DELETE"))
            .and(path(format!("/orders/{client_order_id}")))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server)
            .cancel_order(client_order_id, DEADLINE)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn health_check_maps_500_to_connection_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = provider(&server)
            .health_check(DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn healthy_venue_passes_health_check() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        provider(&server).health_check(DEADLINE).await.unwrap();
    }
}
