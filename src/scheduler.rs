//! Explicit task scheduling for model writes and search-as-you-type.
//!
//! [`WriteCoalescer`] collects dirty dimension ids so that every change made
//! within one scheduling tick is written to the host document once.
//! [`Debouncer`] keeps only the newest query per key after a quiet period.

use indexmap::IndexSet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Default)]
struct CoalescerState {
    dirty: IndexSet<String>,
    scheduled: bool,
}

/// Coalescing queue keyed by dimension id.
#[derive(Default)]
pub struct WriteCoalescer {
    state: Mutex<CoalescerState>,
}

impl WriteCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key dirty. Returns true when this opened a new cycle and the
    /// caller must schedule a flush.
    pub fn mark(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        state.dirty.insert(key.to_string());
        if state.scheduled {
            false
        } else {
            state.scheduled = true;
            true
        }
    }

    /// Take every dirty key in first-marked order and close the cycle.
    pub fn drain(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state.scheduled = false;
        state.dirty.drain(..).collect()
    }

    pub fn is_pending(&self) -> bool {
        !self.state.lock().dirty.is_empty()
    }

    pub fn is_dirty(&self, key: &str) -> bool {
        self.state.lock().dirty.contains(key)
    }
}

/// Run `flush` on the next scheduling tick of the current tokio runtime, or
/// inline when called outside a runtime.
pub fn on_next_tick<F>(flush: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::task::yield_now().await;
                flush();
            });
        }
        Err(_) => flush(),
    }
}

/// Identifies one debounced request for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceTicket {
    key: String,
    sequence: u64,
}

/// Per-key debouncer: a newer request for the same key supersedes older ones.
pub struct Debouncer {
    delay: Duration,
    sequence: AtomicU64,
    latest: Mutex<HashMap<String, u64>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            sequence: AtomicU64::new(0),
            latest: Mutex::new(HashMap::new()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait out the quiet period. Returns `None` when a newer request for the
    /// same key arrived meanwhile.
    pub async fn settle(&self, key: &str) -> Option<DebounceTicket> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.latest.lock().insert(key.to_string(), sequence);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let ticket = DebounceTicket {
            key: key.to_string(),
            sequence,
        };
        self.is_latest(&ticket).then_some(ticket)
    }

    pub fn is_latest(&self, ticket: &DebounceTicket) -> bool {
        self.latest.lock().get(&ticket.key) == Some(&ticket.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_mark_opens_one_cycle() {
        let coalescer = WriteCoalescer::new();
        assert!(coalescer.mark("dimension.Region"));
        assert!(!coalescer.mark("dimension.Tag"));
        assert!(!coalescer.mark("dimension.Region"));
        assert!(coalescer.is_dirty("dimension.Tag"));
        assert!(!coalescer.is_dirty("dimension.Category"));

        assert_eq!(coalescer.drain(), vec!["dimension.Region", "dimension.Tag"]);
        assert!(!coalescer.is_pending());
        assert!(!coalescer.is_dirty("dimension.Tag"));
        assert!(coalescer.mark("dimension.Tag"));
    }

    #[test]
    fn test_on_next_tick_without_runtime_runs_inline() {
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        on_next_tick(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_next_tick_defers_inside_runtime() {
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        on_next_tick(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_supersedes_older_request() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_millis(200)));

        let first = {
            let debouncer = debouncer.clone();
            tokio::spawn(async move { debouncer.settle("dimension.Tag").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = {
            let debouncer = debouncer.clone();
            tokio::spawn(async move { debouncer.settle("dimension.Tag").await })
        };
        let other_key = {
            let debouncer = debouncer.clone();
            tokio::spawn(async move { debouncer.settle("dimension.Region").await })
        };

        assert!(first.await.unwrap().is_none());
        let ticket = second.await.unwrap().unwrap();
        assert!(debouncer.is_latest(&ticket));
        assert!(other_key.await.unwrap().is_some());
    }
}
