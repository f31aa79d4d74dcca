//! Busy signalling for remote calls.
//!
//! The gateway brackets every remote call with `start`/`end` on an injected
//! sink so a UI can show an activity indicator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::warn;

pub trait ActivitySink: Send + Sync {
    fn start(&self);
    fn end(&self);
}

/// Calls `end` on drop, so early returns and errors still close the bracket
pub struct ActivityGuard {
    sink: Option<Arc<dyn ActivitySink>>,
}

impl ActivityGuard {
    pub fn begin(sink: Option<&Arc<dyn ActivitySink>>) -> Self {
        if let Some(sink) = sink {
            sink.start();
        }
        Self { sink: sink.cloned() }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.end();
        }
    }
}

/// Counting sink with a stall watchdog
#[derive(Debug)]
pub struct ActivityCounter {
    busy: AtomicUsize,
    last_change: Mutex<Instant>,
}

impl Default for ActivityCounter {
    fn default() -> Self {
        Self {
            busy: AtomicUsize::new(0),
            last_change: Mutex::new(Instant::now()),
        }
    }
}

impl ActivityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.busy() > 0
    }

    /// Force the counter back to zero when nothing has started or ended for
    /// `window`. Returns true if a reset happened. This does not cancel the
    /// calls that were still counted.
    pub fn reset_if_stalled(&self, window: Duration) -> bool {
        let last = *self.last_change.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_busy() && last.elapsed() >= window {
            let stuck = self.busy.swap(0, Ordering::SeqCst);
            warn!("Activity counter stalled with {} pending calls, resetting", stuck);
            self.touch();
            return true;
        }
        false
    }

    fn touch(&self) {
        *self.last_change.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }
}

impl ActivitySink for ActivityCounter {
    fn start(&self) {
        self.busy.fetch_add(1, Ordering::SeqCst);
        self.touch();
    }

    fn end(&self) {
        // never wrap below zero after a watchdog reset
        let _ = self
            .busy
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_brackets_calls() {
        let counter = Arc::new(ActivityCounter::new());
        let sink: Arc<dyn ActivitySink> = counter.clone();

        {
            let _outer = ActivityGuard::begin(Some(&sink));
            let _inner = ActivityGuard::begin(Some(&sink));
            assert_eq!(counter.busy(), 2);
        }
        assert_eq!(counter.busy(), 0);
    }

    #[test]
    fn test_guard_without_sink() {
        let _guard = ActivityGuard::begin(None);
    }

    #[test]
    fn test_watchdog_resets_stuck_counter() {
        let counter = ActivityCounter::new();
        counter.start();

        assert!(!counter.reset_if_stalled(Duration::from_secs(3600)));
        assert!(counter.is_busy());

        assert!(counter.reset_if_stalled(Duration::ZERO));
        assert!(!counter.is_busy());

        // late end after the reset stays at zero
        counter.end();
        assert_eq!(counter.busy(), 0);
    }
}
