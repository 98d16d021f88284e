//! Feed wire codec.
//!
//! Decodes combined-stream frames from the market data WebSocket into
//! [`FeedMessage`] values. Frames arrive as a wrapper object naming the
//! stream plus the raw payload:
//!
//! ```json
//! {"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT","p":"97000.10",...}}
//! {"stream":"btcusdt@depth20@100ms","data":{"lastUpdateId":1027024,"bids":[["97000.00","1.2"]],...}}
//! ```
//!
//! Trade payloads carry their own symbol and exchange timestamp; depth
//! payloads do not, so the symbol comes from the stream name and the
//! timestamp from the receive time. Recognized streams decode to `Trade`
//! or `Depth`; well-formed frames on any other stream decode to `Unknown`
//! so callers can count and drop them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::{DepthSnapshot, FeedMessage, PriceLevel, Quote, Symbol};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame parsed but violated the expected shape.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// Combined-stream wrapper: stream name plus raw payload.
#[derive(Debug, Deserialize)]
struct CombinedFrame {
    stream: String,
    data: serde_json::Value,
}

/// Trade event payload. Extra wire fields (trade id, maker flag, order ids)
/// are ignored.
#[derive(Debug, Deserialize)]
struct TradeFrame {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "T")]
    trade_time_ms: i64,
}

/// Partial book depth payload. Levels arrive as `[price, quantity]` string
/// pairs; the symbol is only present in the stream name.
#[derive(Debug, Deserialize)]
struct DepthFrame {
    #[serde(rename = "lastUpdateId")]
    #[allow(dead_code)]
    last_update_id: u64,
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

/// JSON codec for the combined market data stream.
#[derive(Debug, Default, Clone)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame into a [`FeedMessage`].
    ///
    /// `received_at` stamps payloads that carry no timestamp of their own
    /// (depth snapshots, trades with an unrepresentable exchange time).
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON or does not match
    /// the combined-stream shape. Callers skip such frames.
    pub fn decode(
        &self,
        text: &str,
        received_at: DateTime<Utc>,
    ) -> Result<FeedMessage, CodecError> {
        let frame: CombinedFrame = serde_json::from_str(text)?;

        match stream_kind(&frame.stream) {
            StreamKind::Trade => self.decode_trade(frame.data, received_at),
            StreamKind::Depth => self.decode_depth(&frame.stream, frame.data, received_at),
            StreamKind::Other => Ok(FeedMessage::Unknown),
        }
    }

    fn decode_trade(
        &self,
        data: serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Result<FeedMessage, CodecError> {
        let trade: TradeFrame = serde_json::from_value(data)?;

        if trade.event_type != "trade" {
            return Ok(FeedMessage::Unknown);
        }

        let timestamp =
            DateTime::from_timestamp_millis(trade.trade_time_ms).unwrap_or(received_at);

        Ok(FeedMessage::Trade(Quote::new(
            trade.symbol,
            trade.price,
            timestamp,
        )))
    }

    fn decode_depth(
        &self,
        stream: &str,
        data: serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Result<FeedMessage, CodecError> {
        let symbol = symbol_from_stream(stream).ok_or_else(|| {
            CodecError::InvalidFormat(format!("depth stream without symbol prefix: {stream}"))
        })?;

        let depth: DepthFrame = serde_json::from_value(data)?;

        Ok(FeedMessage::Depth(DepthSnapshot {
            symbol,
            bids: depth.bids.into_iter().map(level).collect(),
            asks: depth.asks.into_iter().map(level).collect(),
            timestamp: received_at,
        }))
    }

    /// Encode a value to a JSON string (subscription requests, fixtures).
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

enum StreamKind {
    Trade,
    Depth,
    Other,
}

fn stream_kind(stream: &str) -> StreamKind {
    match stream.split('@').nth(1) {
        Some("trade") => StreamKind::Trade,
        Some(suffix) if suffix.starts_with("depth") => StreamKind::Depth,
        _ => StreamKind::Other,
    }
}

/// Extract the symbol from a stream name, e.g. `btcusdt@depth20@100ms`
/// becomes `BTCUSDT`.
fn symbol_from_stream(stream: &str) -> Option<Symbol> {
    let prefix = stream.split('@').next()?;
    if prefix.is_empty() {
        return None;
    }
    Some(Symbol::new(prefix))
}

fn level((price, quantity): (Decimal, Decimal)) -> PriceLevel {
    PriceLevel { price, quantity }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn received_at() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    #[test]
    fn decodes_trade_frame() {
        let codec = FeedCodec::new();
        let frame = r#"{"stream":"btcusdt@trade","data":{"e":"trade","E":1718000000100,"s":"BTCUSDT","t":12345,"p":"97000.10","q":"0.00420","b":88,"a":50,"T":1718000000099,"m":true,"M":true}}"#;

        let message = codec.decode(frame, received_at()).unwrap();

        match message {
            FeedMessage::Trade(quote) => {
                assert_eq!(quote.symbol.as_str(), "BTCUSDT");
                assert_eq!(quote.price, dec!(97000.10));
                assert_eq!(quote.timestamp.timestamp_millis(), 1_718_000_000_099);
            }
            other => panic!("expected trade, got {other:?}"),
        }
    }

    #[test]
    fn decodes_depth_frame_with_symbol_from_stream_name() {
        let codec = FeedCodec::new();
        let frame = r#"{"stream":"ethusdt@depth20@100ms","data":{"lastUpdateId":1027024,"bids":[["3500.00","1.5"],["3499.90","2.0"]],"asks":[["3500.10","0.7"]]}}"#;

        let message = codec.decode(frame, received_at()).unwrap();

        match message {
            FeedMessage::Depth(depth) => {
                assert_eq!(depth.symbol.as_str(), "ETHUSDT");
                assert_eq!(depth.bids.len(), 2);
                assert_eq!(depth.bids[0].price, dec!(3500.00));
                assert_eq!(depth.bids[0].quantity, dec!(1.5));
                assert_eq!(depth.asks[0].price, dec!(3500.10));
                assert_eq!(depth.timestamp, received_at());
            }
            other => panic!("expected depth, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_stream_decodes_to_unknown() {
        let codec = FeedCodec::new();
        let frame = r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","s":"BTCUSDT"}}"#;

        let message = codec.decode(frame, received_at()).unwrap();
        assert!(matches!(message, FeedMessage::Unknown));
    }

    #[test]
    fn trade_stream_with_wrong_event_type_is_unknown() {
        let codec = FeedCodec::new();
        let frame = r#"{"stream":"btcusdt@trade","data":{"e":"aggTrade","s":"BTCUSDT","p":"1.0","T":1}}"#;

        let message = codec.decode(frame, received_at()).unwrap();
        assert!(matches!(message, FeedMessage::Unknown));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let codec = FeedCodec::new();

        let err = codec.decode("{not json", received_at()).unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let codec = FeedCodec::new();

        // Valid JSON, but not a combined-stream frame.
        let err = codec
            .decode(r#"{"data":{"e":"trade"}}"#, received_at())
            .unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn trade_with_bad_price_is_an_error() {
        let codec = FeedCodec::new();
        let frame = r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT","p":"not-a-price","T":1718000000099}}"#;

        let err = codec.decode(frame, received_at()).unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }
}
