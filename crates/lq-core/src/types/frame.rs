//! Wire frames exchanged with the price-feed server.
//!
//! Every frame is a JSON text message discriminated by its `type` field.
//!
//! Inbound (server → client):
//!
//! - `connection` → [`InboundFrame::Connection`]
//! - `price_update` → [`InboundFrame::PriceUpdate`]
//! - `subscription_success` → [`InboundFrame::SubscriptionSuccess`]
//! - `pong` → [`InboundFrame::Pong`]
//! - `error` → [`InboundFrame::Error`]
//!
//! Outbound (client → server): `subscribe`, `unsubscribe`, `ping`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::ticker::Ticker;
use crate::error::FeedError;

/// Traded volume: the backend sends either a raw number or a pre-formatted
/// string such as `"78.01 Cr"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Volume {
    Units(f64),
    Formatted(String),
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Units(n) => write!(f, "{n}"),
            Self::Formatted(s) => f.write_str(s),
        }
    }
}

/// Payload of a `price_update` frame. Field names are part of the backend
/// contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub ticker: Ticker,
    #[serde(deserialize_with = "f64_or_str")]
    pub current_price: f64,
    #[serde(deserialize_with = "f64_or_str")]
    pub day_change: f64,
    #[serde(deserialize_with = "f64_or_str")]
    pub day_change_percent: f64,
    pub volume: Volume,
    /// Server-side instant, ISO-8601, kept verbatim.
    pub timestamp: String,
}

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Connection { message: Option<String> },
    PriceUpdate(PriceUpdate),
    SubscriptionSuccess { tickers: Vec<Ticker> },
    Pong,
    Error { message: String },
    /// A `type` this client does not know; ignored by the dispatcher.
    Unknown { kind: String },
}

impl InboundFrame {
    /// Decode one text frame.
    ///
    /// The payload may sit on the frame itself or be nested under `data`;
    /// both layouts are accepted.
    pub fn parse(text: &str) -> Result<Self, FeedError> {
        let v: Value = serde_json::from_str(text)?;
        let kind = v
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| FeedError::Parse("frame has no `type`".into()))?;
        let payload = v.get("data").filter(|d| d.is_object()).unwrap_or(&v);

        let frame = match kind {
            "connection" => Self::Connection { message: str_field(&v, payload, "message") },
            "price_update" => Self::PriceUpdate(PriceUpdate::deserialize(payload)?),
            "subscription_success" => {
                let tickers = payload
                    .get("subscribedTickers")
                    .or_else(|| v.get("subscribedTickers"))
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter().filter_map(Value::as_str).filter_map(|s| Ticker::new(s).ok()).collect()
                    })
                    .unwrap_or_default();
                Self::SubscriptionSuccess { tickers }
            }
            "pong" => Self::Pong,
            "error" => Self::Error {
                message: str_field(&v, payload, "message")
                    .or_else(|| str_field(&v, payload, "error"))
                    .unwrap_or_else(|| "unspecified server error".into()),
            },
            other => Self::Unknown { kind: other.to_string() },
        };
        Ok(frame)
    }

    /// The frame's `type` tag, for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::Connection { .. } => "connection",
            Self::PriceUpdate(_) => "price_update",
            Self::SubscriptionSuccess { .. } => "subscription_success",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
            Self::Unknown { kind } => kind,
        }
    }
}

/// A frame sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Subscribe { tickers: Vec<Ticker> },
    Unsubscribe { tickers: Vec<Ticker> },
    Ping,
}

impl OutboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping => "ping",
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_text(&self) -> Result<String, FeedError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn str_field(frame: &Value, payload: &Value, key: &str) -> Option<String> {
    payload.get(key).or_else(|| frame.get(key)).and_then(Value::as_str).map(str::to_string)
}

/// Accept a JSON number or a numeric string.
fn f64_or_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().ok_or_else(|| serde::de::Error::custom("number out of range")),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!("expected number, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flat_price_update() {
        let json = r#"{"type":"price_update","ticker":"IDEA","currentPrice":7.20,"dayChange":-0.15,
            "dayChangePercent":-2.04,"volume":"78.01 Cr","timestamp":"2024-06-01T10:00:00Z"}"#;
        match InboundFrame::parse(json).unwrap() {
            InboundFrame::PriceUpdate(p) => {
                assert_eq!(p.ticker.as_str(), "IDEA");
                assert!((p.current_price - 7.20).abs() < 1e-9);
                assert!((p.day_change + 0.15).abs() < 1e-9);
                assert!((p.day_change_percent + 2.04).abs() < 1e-9);
                assert_eq!(p.volume, Volume::Formatted("78.01 Cr".into()));
                assert_eq!(p.timestamp, "2024-06-01T10:00:00Z");
            }
            other => panic!("expected PriceUpdate, got {other:?}"),
        }
    }

    #[test]
    fn parse_nested_price_update() {
        let json = r#"{"type":"price_update","data":{"ticker":"sail","currentPrice":"131.5",
            "dayChange":1.2,"dayChangePercent":0.92,"volume":1250000,"timestamp":"2024-06-01T10:00:01Z"}}"#;
        match InboundFrame::parse(json).unwrap() {
            InboundFrame::PriceUpdate(p) => {
                assert_eq!(p.ticker.as_str(), "SAIL");
                assert!((p.current_price - 131.5).abs() < 1e-9);
                assert_eq!(p.volume, Volume::Units(1_250_000.0));
            }
            other => panic!("expected PriceUpdate, got {other:?}"),
        }
    }

    #[test]
    fn price_update_missing_field_is_error() {
        let json = r#"{"type":"price_update","ticker":"IDEA","currentPrice":7.2}"#;
        assert!(matches!(InboundFrame::parse(json), Err(FeedError::Parse(_))));
    }

    #[test]
    fn non_json_is_parse_error() {
        assert!(matches!(InboundFrame::parse("hello"), Err(FeedError::Parse(_))));
        assert!(matches!(InboundFrame::parse(r#"{"no":"type"}"#), Err(FeedError::Parse(_))));
    }

    #[test]
    fn control_frames() {
        assert_eq!(InboundFrame::parse(r#"{"type":"pong"}"#).unwrap(), InboundFrame::Pong);
        assert_eq!(
            InboundFrame::parse(r#"{"type":"connection","message":"welcome"}"#).unwrap(),
            InboundFrame::Connection { message: Some("welcome".into()) }
        );
        assert_eq!(
            InboundFrame::parse(r#"{"type":"error","message":"bad ticker"}"#).unwrap(),
            InboundFrame::Error { message: "bad ticker".into() }
        );
        assert_eq!(
            InboundFrame::parse(r#"{"type":"market_closed"}"#).unwrap(),
            InboundFrame::Unknown { kind: "market_closed".into() }
        );
    }

    #[test]
    fn subscription_success_lists_tickers() {
        let frame = InboundFrame::parse(r#"{"type":"subscription_success","subscribedTickers":["idea","TCS"]}"#)
            .unwrap();
        let InboundFrame::SubscriptionSuccess { tickers } = frame else {
            panic!("expected SubscriptionSuccess");
        };
        let names: Vec<&str> = tickers.iter().map(Ticker::as_str).collect();
        assert_eq!(names, vec!["IDEA", "TCS"]);
    }

    #[test]
    fn outbound_wire_format() {
        let t = |s: &str| Ticker::new(s).unwrap();
        assert_eq!(OutboundFrame::Ping.to_text().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(
            OutboundFrame::Subscribe { tickers: vec![t("IDEA"), t("YESBANK")] }.to_text().unwrap(),
            r#"{"type":"subscribe","tickers":["IDEA","YESBANK"]}"#
        );
        assert_eq!(
            OutboundFrame::Unsubscribe { tickers: vec![t("IDEA")] }.to_text().unwrap(),
            r#"{"type":"unsubscribe","tickers":["IDEA"]}"#
        );
    }
}
