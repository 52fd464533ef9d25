use std::collections::VecDeque;

use crate::model::DataValidityStatus;

/// Bounded-window store of the last N ticks for one symbol: ring buffers
/// for price/qty/timestamp plus running VWAP sums. Appending beyond
/// capacity evicts the oldest point and subtracts its contribution from
/// the running sums rather than recomputing from scratch — an
/// approximation, since exact VWAP would require a full rescan on every
/// tick at wire rate.
///
/// Confined to a single task (the engine's tick-processing loop): no
/// internal locking, per the single-writer single-reader concurrency
/// model.
pub struct SymbolWindow {
    capacity: usize,
    prices: VecDeque<f64>,
    qtys: VecDeque<f64>,
    timestamps: VecDeque<i64>,
    vwap_sum_pq: f64,
    vwap_sum_q: f64,
    last_tick_time_ms: i64,
}

impl SymbolWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            prices: VecDeque::with_capacity(capacity),
            qtys: VecDeque::with_capacity(capacity),
            timestamps: VecDeque::with_capacity(capacity),
            vwap_sum_pq: 0.0,
            vwap_sum_q: 0.0,
            last_tick_time_ms: 0,
        }
    }

    pub fn push(&mut self, price: f64, qty: f64, timestamp_ms: i64) {
        self.prices.push_back(price);
        self.qtys.push_back(qty);
        self.timestamps.push_back(timestamp_ms);
        self.vwap_sum_pq += price * qty;
        self.vwap_sum_q += qty;
        self.last_tick_time_ms = self.last_tick_time_ms.max(timestamp_ms);

        if self.prices.len() > self.capacity {
            let evicted_price = self.prices.pop_front().unwrap();
            let evicted_qty = self.qtys.pop_front().unwrap();
            self.timestamps.pop_front();
            self.vwap_sum_pq -= evicted_price * evicted_qty;
            self.vwap_sum_q -= evicted_qty;
        }
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_tick_time_ms(&self) -> i64 {
        self.last_tick_time_ms
    }

    pub fn last_price(&self) -> Option<f64> {
        self.prices.back().copied()
    }

    pub fn first_price(&self) -> Option<f64> {
        self.prices.front().copied()
    }

    /// `(last - first) / first * 100`; `0.0` if `first == 0`.
    pub fn price_change_pct(&self) -> f64 {
        match (self.first_price(), self.last_price()) {
            (Some(first), Some(last)) if first != 0.0 => (last - first) / first * 100.0,
            _ => 0.0,
        }
    }

    /// `Σ(p·q) / Σq` if `Σq > 0`, else `None`.
    pub fn vwap(&self) -> Option<f64> {
        if self.vwap_sum_q > 0.0 {
            Some(self.vwap_sum_pq / self.vwap_sum_q)
        } else {
            None
        }
    }

    pub fn validity_status(&self) -> DataValidityStatus {
        DataValidityStatus::classify(self.len(), self.capacity)
    }

    /// Contiguous snapshot of prices, most recent last — the form the
    /// pairwise statistics (hedge ratio, spread, z-score, correlation)
    /// operate on.
    pub fn prices_slice(&self) -> Vec<f64> {
        self.prices.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vwap_matches_full_recomputation_after_eviction() {
        let mut window = SymbolWindow::new(3);
        window.push(100.0, 1.0, 1);
        window.push(102.0, 2.0, 2);
        window.push(104.0, 1.0, 3);
        window.push(106.0, 3.0, 4); // evicts (100.0, 1.0)

        let expected_pq: f64 = 102.0 * 2.0 + 104.0 * 1.0 + 106.0 * 3.0;
        let expected_q: f64 = 2.0 + 1.0 + 3.0;
        let expected_vwap = expected_pq / expected_q;

        assert!((window.vwap().unwrap() - expected_vwap).abs() < 1e-9);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn price_change_pct_is_zero_when_first_price_is_zero() {
        let mut window = SymbolWindow::new(10);
        window.push(0.0, 1.0, 1);
        window.push(50.0, 1.0, 2);
        assert_eq!(window.price_change_pct(), 0.0);
    }

    #[test]
    fn vwap_is_none_without_positive_quantity() {
        let window = SymbolWindow::new(10);
        assert_eq!(window.vwap(), None);
    }
}
