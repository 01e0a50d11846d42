//! Typed broker entities and the translators that build them from raw JSON.

use serde_json::Value as JsonValue;

use crate::error::GatewayError;

/// Canonical instant representation: milliseconds since epoch.
pub type Millis = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    fn parse(s: &str) -> Result<Self, GatewayError<String>> {
        match s {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(validation(format!("unknown order side '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    fn parse(s: &str) -> Result<Self, GatewayError<String>> {
        match s {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            "stop" => Ok(OrderType::Stop),
            "stop_limit" => Ok(OrderType::StopLimit),
            other => Err(validation(format!("unknown order type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Day,
}

impl TimeInForce {
    fn parse(s: &str) -> Result<Self, GatewayError<String>> {
        match s {
            "gtc" => Ok(TimeInForce::Gtc),
            "ioc" => Ok(TimeInForce::Ioc),
            "fok" => Ok(TimeInForce::Fok),
            "day" => Ok(TimeInForce::Day),
            other => Err(validation(format!("unknown time in force '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    fn parse(s: &str) -> Result<Self, GatewayError<String>> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "accepted" => Ok(OrderStatus::Accepted),
            "partially_filled" => Ok(OrderStatus::PartiallyFilled),
            "filled" => Ok(OrderStatus::Filled),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "rejected" => Ok(OrderStatus::Rejected),
            other => Err(validation(format!("unknown order status '{other}'"))),
        }
    }
}

/// Candle timeframe; the broker names these as strings (`"M1"`, `"H4"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    fn parse(s: &str) -> Result<Self, GatewayError<String>> {
        match s {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            other => Err(validation(format!("unknown timeframe '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub timestamp_millis: Millis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp_millis: Millis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub price: f64,
    pub timestamp_millis: Millis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub open_price: f64,
    pub current_price: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub volume: f64,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub login: String,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub currency: String,
}

fn validation(details: String) -> GatewayError<String> {
    GatewayError::Validation { details }
}

fn require_str<'a>(data: &'a JsonValue, field: &str) -> Result<&'a str, GatewayError<String>> {
    data.get(field).and_then(JsonValue::as_str).ok_or_else(|| validation(format!("missing or non-string field '{field}'")))
}

fn require_f64(data: &JsonValue, field: &str) -> Result<f64, GatewayError<String>> {
    data.get(field).and_then(JsonValue::as_f64).ok_or_else(|| validation(format!("missing or non-numeric field '{field}'")))
}

fn require_i64(data: &JsonValue, field: &str) -> Result<i64, GatewayError<String>> {
    data.get(field).and_then(JsonValue::as_i64).ok_or_else(|| validation(format!("missing or non-integer field '{field}'")))
}

impl Tick {
    pub fn from_payload(data: &JsonValue) -> Result<Self, GatewayError<String>> {
        Ok(Self {
            symbol: require_str(data, "symbol")?.to_string(),
            bid: require_f64(data, "bid")?,
            ask: require_f64(data, "ask")?,
            timestamp_millis: require_i64(data, "timestamp")?,
        })
    }
}

impl Candle {
    pub fn from_payload(data: &JsonValue) -> Result<Self, GatewayError<String>> {
        Ok(Self {
            symbol: require_str(data, "symbol")?.to_string(),
            timeframe: Timeframe::parse(require_str(data, "timeframe")?)?,
            open: require_f64(data, "open")?,
            high: require_f64(data, "high")?,
            low: require_f64(data, "low")?,
            close: require_f64(data, "close")?,
            volume: require_f64(data, "volume")?,
            timestamp_millis: require_i64(data, "timestamp")?,
        })
    }
}

impl Trade {
    pub fn from_payload(data: &JsonValue) -> Result<Self, GatewayError<String>> {
        Ok(Self {
            order_id: require_str(data, "order_id")?.to_string(),
            symbol: require_str(data, "symbol")?.to_string(),
            side: OrderSide::parse(require_str(data, "side")?)?,
            volume: require_f64(data, "volume")?,
            price: require_f64(data, "price")?,
            timestamp_millis: require_i64(data, "timestamp")?,
        })
    }
}

impl Position {
    pub fn from_payload(data: &JsonValue) -> Result<Self, GatewayError<String>> {
        Ok(Self {
            symbol: require_str(data, "symbol")?.to_string(),
            side: OrderSide::parse(require_str(data, "side")?)?,
            volume: require_f64(data, "volume")?,
            open_price: require_f64(data, "open_price")?,
            current_price: require_f64(data, "current_price")?,
            profit: require_f64(data, "profit")?,
        })
    }
}

impl Order {
    pub fn from_payload(data: &JsonValue) -> Result<Self, GatewayError<String>> {
        Ok(Self {
            id: require_str(data, "id")?.to_string(),
            symbol: require_str(data, "symbol")?.to_string(),
            side: OrderSide::parse(require_str(data, "side")?)?,
            order_type: OrderType::parse(require_str(data, "order_type")?)?,
            time_in_force: TimeInForce::parse(require_str(data, "time_in_force")?)?,
            status: OrderStatus::parse(require_str(data, "status")?)?,
            volume: require_f64(data, "volume")?,
            price: data.get("price").and_then(JsonValue::as_f64),
        })
    }
}

impl Account {
    pub fn from_payload(data: &JsonValue) -> Result<Self, GatewayError<String>> {
        Ok(Self {
            login: require_str(data, "login")?.to_string(),
            balance: require_f64(data, "balance")?,
            equity: require_f64(data, "equity")?,
            margin: require_f64(data, "margin")?,
            free_margin: require_f64(data, "free_margin")?,
            currency: require_str(data, "currency")?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_parses_from_well_formed_payload() {
        let payload = serde_json::json!({"symbol": "EURUSD", "bid": 1.0950, "ask": 1.0952, "timestamp": 1_700_000_000_000i64});
        let tick = Tick::from_payload(&payload).unwrap();
        assert_eq!(tick.symbol, "EURUSD");
        assert_eq!(tick.bid, 1.0950);
    }

    #[test]
    fn tick_rejects_missing_field() {
        let payload = serde_json::json!({"symbol": "EURUSD", "bid": 1.0950});
        let result = Tick::from_payload(&payload);
        assert!(matches!(result, Err(GatewayError::Validation { .. })));
    }

    #[test]
    fn order_rejects_unknown_enum_value() {
        let payload = serde_json::json!({
            "id": "1", "symbol": "EURUSD", "side": "buy", "order_type": "teleport",
            "time_in_force": "gtc", "status": "pending", "volume": 1.0
        });
        let result = Order::from_payload(&payload);
        assert!(matches!(result, Err(GatewayError::Validation { .. })));
    }

    #[test]
    fn order_parses_optional_price_as_none_when_absent() {
        let payload = serde_json::json!({
            "id": "1", "symbol": "EURUSD", "side": "sell", "order_type": "market",
            "time_in_force": "ioc", "status": "filled", "volume": 2.0
        });
        let order = Order::from_payload(&payload).unwrap();
        assert_eq!(order.price, None);
        assert_eq!(order.side, OrderSide::Sell);
    }
}
