//! Domain Translators: pure transforms between broker wire payloads and
//! typed entities. No I/O, no retries — field presence and enum validation
//! only, surfaced as `GatewayError::Validation` on failure.

pub mod cache;
pub mod types;

pub use cache::{OhlcRing, SymbolCache, SymbolInfo};
pub use types::{
    Account, Candle, Millis, Order, OrderSide, OrderStatus, OrderType, Position, TimeInForce, Tick, Timeframe, Trade,
};
