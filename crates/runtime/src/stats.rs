//! Process-wide engine counters
//!
//! Lock-free atomics bumped on the hot path and read by the report and the
//! SIGQUIT dump. All counters are monotonic except `MAPPED_BYTES`.
//!
//! Useful diagnostics:
//! - Abandoned bodies: `coroutines_abandoned` > 0 (suspended coroutines dropped)
//! - Mapped stacks: arenas acquired - arenas released
//! - Nesting pressure: switches per root chain

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

static COROUTINES_CREATED: AtomicU64 = AtomicU64::new(0);
static COROUTINES_FINISHED: AtomicU64 = AtomicU64::new(0);
static COROUTINES_ABANDONED: AtomicU64 = AtomicU64::new(0);
static ARENAS_ACQUIRED: AtomicU64 = AtomicU64::new(0);
static ARENAS_RELEASED: AtomicU64 = AtomicU64::new(0);
static MAPPED_BYTES: AtomicUsize = AtomicUsize::new(0);
static PEAK_MAPPED_BYTES: AtomicUsize = AtomicUsize::new(0);
static CONTEXT_SWITCHES: AtomicU64 = AtomicU64::new(0);
static ROOT_CHAINS: AtomicU64 = AtomicU64::new(0);
static ROOT_CALLBACKS: AtomicU64 = AtomicU64::new(0);

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub coroutines_created: u64,
    pub coroutines_finished: u64,
    pub coroutines_abandoned: u64,
    pub arenas_acquired: u64,
    pub arenas_released: u64,
    pub mapped_bytes: usize,
    pub peak_mapped_bytes: usize,
    pub context_switches: u64,
    pub root_chains: u64,
    pub root_callbacks: u64,
}

impl StatsSnapshot {
    /// Arenas still mapped
    pub fn live_arenas(&self) -> u64 {
        self.arenas_acquired.saturating_sub(self.arenas_released)
    }
}

pub fn snapshot() -> StatsSnapshot {
    StatsSnapshot {
        coroutines_created: COROUTINES_CREATED.load(Ordering::Relaxed),
        coroutines_finished: COROUTINES_FINISHED.load(Ordering::Relaxed),
        coroutines_abandoned: COROUTINES_ABANDONED.load(Ordering::Relaxed),
        arenas_acquired: ARENAS_ACQUIRED.load(Ordering::Relaxed),
        arenas_released: ARENAS_RELEASED.load(Ordering::Relaxed),
        mapped_bytes: MAPPED_BYTES.load(Ordering::Relaxed),
        peak_mapped_bytes: PEAK_MAPPED_BYTES.load(Ordering::Acquire),
        context_switches: CONTEXT_SWITCHES.load(Ordering::Relaxed),
        root_chains: ROOT_CHAINS.load(Ordering::Relaxed),
        root_callbacks: ROOT_CALLBACKS.load(Ordering::Relaxed),
    }
}

pub(crate) fn record_created() {
    COROUTINES_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_finished() {
    COROUTINES_FINISHED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_abandoned() {
    COROUTINES_ABANDONED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_arena_acquired(bytes: usize) {
    ARENAS_ACQUIRED.fetch_add(1, Ordering::Relaxed);
    let now = MAPPED_BYTES.fetch_add(bytes, Ordering::Relaxed) + bytes;
    raise_peak(&PEAK_MAPPED_BYTES, now);
}

pub(crate) fn record_arena_released(bytes: usize) {
    ARENAS_RELEASED.fetch_add(1, Ordering::Relaxed);
    MAPPED_BYTES.fetch_sub(bytes, Ordering::Relaxed);
}

pub(crate) fn record_switch() {
    CONTEXT_SWITCHES.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_root_chain() {
    ROOT_CHAINS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_root_callback() {
    ROOT_CALLBACKS.fetch_add(1, Ordering::Relaxed);
}

/// Update a high-water mark without locks
fn raise_peak(peak: &AtomicUsize, value: usize) {
    let mut current = peak.load(Ordering::Acquire);
    while value > current {
        match peak.compare_exchange_weak(current, value, Ordering::Release, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_peak_only_grows() {
        let peak = AtomicUsize::new(0);
        raise_peak(&peak, 10);
        assert_eq!(peak.load(Ordering::Relaxed), 10);
        raise_peak(&peak, 4);
        assert_eq!(peak.load(Ordering::Relaxed), 10);
        raise_peak(&peak, 11);
        assert_eq!(peak.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn test_raise_peak_concurrent() {
        let peak = std::sync::Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (1..=8)
            .map(|n| {
                let peak = peak.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        raise_peak(&peak, n * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::Relaxed), 8999);
    }

    #[test]
    fn test_live_arenas() {
        let snap = StatsSnapshot {
            arenas_acquired: 5,
            arenas_released: 3,
            ..Default::default()
        };
        assert_eq!(snap.live_arenas(), 2);
    }
}
