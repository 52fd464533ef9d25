use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};

/// Per-symbol state machine driving reconnection and heartbeat reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Stopped => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Stopped,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Debug)]
pub struct SymbolGatewayStats {
    pub tick_count: AtomicU64,
    pub last_tick_time_ms: AtomicI64,
    state: AtomicU8,
}

impl Default for SymbolGatewayStats {
    fn default() -> Self {
        Self {
            tick_count: AtomicU64::new(0),
            last_tick_time_ms: AtomicI64::new(0),
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
        }
    }
}

impl SymbolGatewayStats {
    pub fn record_tick(&self, timestamp_ms: i64) {
        self.tick_count.fetch_add(1, Ordering::Relaxed);
        self.last_tick_time_ms.store(timestamp_ms, Ordering::Relaxed);
    }

    /// `-1` when no tick has ever been observed, per §4.C.
    pub fn freshness_ms(&self, now_ms: i64) -> i64 {
        let last = self.last_tick_time_ms.load(Ordering::Relaxed);
        if last == 0 {
            -1
        } else {
            now_ms - last
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }
}

/// Exponential backoff starting at 1.0s, doubling per failure, capped at
/// 30s; resets to 1.0s after a clean connect.
pub struct Backoff {
    current_secs: f64,
}

impl Backoff {
    const INITIAL_SECS: f64 = 1.0;
    const MAX_SECS: f64 = 30.0;

    pub fn new() -> Self {
        Self {
            current_secs: Self::INITIAL_SECS,
        }
    }

    pub fn reset(&mut self) {
        self.current_secs = Self::INITIAL_SECS;
    }

    pub fn next_delay(&mut self) -> std::time::Duration {
        let delay = self.current_secs;
        self.current_secs = (self.current_secs * 2.0).min(Self::MAX_SECS);
        std::time::Duration::from_secs_f64(delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new();
        assert_eq!(b.next_delay().as_secs_f64(), 1.0);
        assert_eq!(b.next_delay().as_secs_f64(), 2.0);
        assert_eq!(b.next_delay().as_secs_f64(), 4.0);
        for _ in 0..10 {
            b.next_delay();
        }
        assert_eq!(b.next_delay().as_secs_f64(), 30.0);
        b.reset();
        assert_eq!(b.next_delay().as_secs_f64(), 1.0);
    }

    #[test]
    fn freshness_reports_sentinel_before_first_tick() {
        let stats = SymbolGatewayStats::default();
        assert_eq!(stats.freshness_ms(1000), -1);
        stats.record_tick(900);
        assert_eq!(stats.freshness_ms(1000), 100);
    }

    #[test]
    fn connection_state_defaults_disconnected_and_round_trips() {
        let stats = SymbolGatewayStats::default();
        assert_eq!(stats.state(), ConnectionState::Disconnected);
        stats.set_state(ConnectionState::Connecting);
        assert_eq!(stats.state(), ConnectionState::Connecting);
        stats.set_state(ConnectionState::Connected);
        assert_eq!(stats.state(), ConnectionState::Connected);
        stats.set_state(ConnectionState::Stopped);
        assert_eq!(stats.state(), ConnectionState::Stopped);
    }
}
