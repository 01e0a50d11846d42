//! Per-symbol caches fed by translated market data: the latest tick, the
//! last known symbol info, and a bounded ring of recent OHLC candles and
//! ticks. Invalidated explicitly on subscribe/unsubscribe for a symbol.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::types::{Candle, Tick};

/// A fixed-capacity FIFO ring of recent values for one symbol.
pub struct OhlcRing {
    capacity: usize,
    candles: VecDeque<Candle>,
}

impl OhlcRing {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), candles: VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, candle: Candle) {
        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

#[derive(Clone)]
pub struct SymbolInfo {
    pub symbol: String,
    pub digits: u32,
    pub point: f64,
}

struct SymbolState {
    latest_tick: Option<Tick>,
    info: Option<SymbolInfo>,
    ring: OhlcRing,
}

impl SymbolState {
    fn new(ring_capacity: usize) -> Self {
        Self { latest_tick: None, info: None, ring: OhlcRing::new(ring_capacity) }
    }
}

/// Tracks the latest tick, symbol info, and a bounded candle ring per
/// symbol. A symbol is dropped entirely when the caller unsubscribes, so a
/// later resubscribe starts from an empty cache rather than stale data.
pub struct SymbolCache {
    ring_capacity: usize,
    symbols: Mutex<HashMap<String, SymbolState>>,
}

impl SymbolCache {
    pub fn new(ring_capacity: usize) -> Self {
        Self { ring_capacity, symbols: Mutex::new(HashMap::new()) }
    }

    /// Called when a symbol is subscribed; ensures a fresh, empty entry
    /// exists for it.
    pub fn on_subscribed(&self, symbol: &str) {
        let mut symbols = self.symbols.lock().expect("symbol cache poisoned");
        symbols.insert(symbol.to_string(), SymbolState::new(self.ring_capacity));
    }

    /// Called when a symbol is unsubscribed; drops all cached state for it.
    pub fn on_unsubscribed(&self, symbol: &str) {
        let mut symbols = self.symbols.lock().expect("symbol cache poisoned");
        symbols.remove(symbol);
    }

    pub fn record_tick(&self, tick: Tick) {
        let mut symbols = self.symbols.lock().expect("symbol cache poisoned");
        let entry = symbols.entry(tick.symbol.clone()).or_insert_with(|| SymbolState::new(self.ring_capacity));
        entry.latest_tick = Some(tick);
    }

    pub fn record_candle(&self, candle: Candle) {
        let mut symbols = self.symbols.lock().expect("symbol cache poisoned");
        let entry = symbols.entry(candle.symbol.clone()).or_insert_with(|| SymbolState::new(self.ring_capacity));
        entry.ring.push(candle);
    }

    pub fn set_symbol_info(&self, info: SymbolInfo) {
        let mut symbols = self.symbols.lock().expect("symbol cache poisoned");
        let entry = symbols.entry(info.symbol.clone()).or_insert_with(|| SymbolState::new(self.ring_capacity));
        entry.info = Some(info);
    }

    pub fn latest_tick(&self, symbol: &str) -> Option<Tick> {
        let symbols = self.symbols.lock().expect("symbol cache poisoned");
        symbols.get(symbol).and_then(|s| s.latest_tick.clone())
    }

    pub fn symbol_info(&self, symbol: &str) -> Option<SymbolInfo> {
        let symbols = self.symbols.lock().expect("symbol cache poisoned");
        symbols.get(symbol).and_then(|s| s.info.clone())
    }

    pub fn recent_candles(&self, symbol: &str) -> Vec<Candle> {
        let symbols = self.symbols.lock().expect("symbol cache poisoned");
        symbols.get(symbol).map(|s| s.ring.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn tracked_symbol_count(&self) -> usize {
        self.symbols.lock().expect("symbol cache poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str, bid: f64) -> Tick {
        Tick { symbol: symbol.to_string(), bid, ask: bid + 0.0002, timestamp_millis: 0 }
    }

    fn candle(symbol: &str, close: f64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe: super::super::types::Timeframe::M1,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            timestamp_millis: 0,
        }
    }

    #[test]
    fn records_and_retrieves_the_latest_tick() {
        let cache = SymbolCache::new(4);
        cache.record_tick(tick("EURUSD", 1.10));
        cache.record_tick(tick("EURUSD", 1.11));
        assert_eq!(cache.latest_tick("EURUSD").unwrap().bid, 1.11);
    }

    #[test]
    fn ohlc_ring_evicts_oldest_past_capacity() {
        let cache = SymbolCache::new(2);
        cache.record_candle(candle("EURUSD", 1.0));
        cache.record_candle(candle("EURUSD", 2.0));
        cache.record_candle(candle("EURUSD", 3.0));
        let recent = cache.recent_candles("EURUSD");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].close, 2.0);
        assert_eq!(recent[1].close, 3.0);
    }

    #[test]
    fn unsubscribe_drops_all_cached_state_for_the_symbol() {
        let cache = SymbolCache::new(4);
        cache.record_tick(tick("EURUSD", 1.10));
        cache.on_unsubscribed("EURUSD");
        assert!(cache.latest_tick("EURUSD").is_none());
        assert_eq!(cache.tracked_symbol_count(), 0);
    }

    #[test]
    fn resubscribe_starts_from_an_empty_entry() {
        let cache = SymbolCache::new(4);
        cache.record_tick(tick("EURUSD", 1.10));
        cache.on_unsubscribed("EURUSD");
        cache.on_subscribed("EURUSD");
        assert!(cache.latest_tick("EURUSD").is_none());
    }
}
