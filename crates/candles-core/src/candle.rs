use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single minute candle as returned by the Upbit quotation API.
///
/// Only the exchange-local timestamp is required. Every other field
/// (`market`, prices, volumes, `unit`, ...) stays in `fields` as the raw JSON
/// value, so serializing a record reproduces the payload. Typed accessors
/// read from it on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    /// Exchange-local (KST) candle start time. Ordering key for pagination.
    pub candle_date_time_kst: NaiveDateTime,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl CandleRecord {
    pub fn new(candle_date_time_kst: NaiveDateTime) -> Self {
        Self {
            candle_date_time_kst,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn local_timestamp(&self) -> NaiveDateTime {
        self.candle_date_time_kst
    }

    pub fn utc_timestamp(&self) -> Option<NaiveDateTime> {
        self.fields
            .get("candle_date_time_utc")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn market(&self) -> Option<&str> {
        self.fields.get("market").and_then(Value::as_str)
    }

    /// Epoch milliseconds of the last trade in the candle
    pub fn timestamp(&self) -> Option<i64> {
        self.fields.get("timestamp").and_then(Value::as_i64)
    }

    pub fn opening_price(&self) -> Option<Decimal> {
        self.decimal("opening_price")
    }

    pub fn high_price(&self) -> Option<Decimal> {
        self.decimal("high_price")
    }

    pub fn low_price(&self) -> Option<Decimal> {
        self.decimal("low_price")
    }

    pub fn trade_price(&self) -> Option<Decimal> {
        self.decimal("trade_price")
    }

    pub fn candle_acc_trade_price(&self) -> Option<Decimal> {
        self.decimal("candle_acc_trade_price")
    }

    pub fn candle_acc_trade_volume(&self) -> Option<Decimal> {
        self.decimal("candle_acc_trade_volume")
    }

    /// Numeric field as a `Decimal`. Returns `None` when absent or not a number.
    pub fn decimal(&self, name: &str) -> Option<Decimal> {
        let text = match self.fields.get(name)? {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => return None,
        };
        text.parse::<Decimal>()
            .ok()
            .or_else(|| Decimal::from_scientific(&text).ok())
    }
}
