//! Wall clock and connectivity, injected so the engine never reaches for
//! ambient globals and can be driven deterministically in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tokio::sync::watch;

pub trait ClockAndConnectivity: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    fn is_online(&self) -> bool;

    /// Receiver that observes every online/offline transition.
    fn watch_connectivity(&self) -> watch::Receiver<bool>;
}

/// Real clock. Connectivity is whatever the host last reported through
/// [`set_online`](Self::set_online).
pub struct SystemClock {
    online: watch::Sender<bool>,
}

impl SystemClock {
    pub fn new() -> Self {
        let (online, _) = watch::channel(true);
        Self { online }
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.online.send_replace(online);
        if previous != online {
            log::info!("Connectivity changed: online={online}");
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockAndConnectivity for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn watch_connectivity(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

/// Hand-driven clock for tests.
pub struct ManualClock {
    now: AtomicU64,
    online: watch::Sender<bool>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        let (online, _) = watch::channel(true);
        Self {
            now: AtomicU64::new(start_ms),
            online,
        }
    }

    pub fn advance(&self, ms: u64) -> u64 {
        self.now.fetch_add(ms, Ordering::SeqCst) + ms
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }
}

impl ClockAndConnectivity for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn watch_connectivity(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}
