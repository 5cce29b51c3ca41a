use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::debug;

/// Cancelable one-shot timers keyed by appointment id.
#[derive(Debug, Default)]
pub struct HoldTimers {
    pending: Mutex<HashMap<String, AbortHandle>>,
}

impl HoldTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_expiry` after `delay`, replacing any timer already set for `id`.
    pub fn schedule<F>(&self, id: &str, delay: Duration, on_expiry: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_expiry.await;
        })
        .abort_handle();

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!("Hold timer set for {} ({}s)", id, delay.as_secs());
    }

    /// Returns true if a pending timer was canceled.
    pub fn cancel(&self, id: &str) -> bool {
        let handle = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        match handle {
            Some(handle) => {
                handle.abort();
                debug!("Hold timer canceled for {}", id);
                true
            }
            None => false,
        }
    }

    /// Forget a timer that has fired, without aborting the running task.
    pub fn finish(&self, id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for HoldTimers {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let timers = HoldTimers::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();

        timers.schedule("a1", Duration::from_secs(60), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn canceled_timer_never_fires() {
        let timers = HoldTimers::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();

        timers.schedule("a1", Duration::from_secs(60), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.cancel("a1"));
        assert!(!timers.cancel("a1"));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_previous_timer() {
        let timers = HoldTimers::new();
        let fired = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let counter = fired.clone();
            timers.schedule("a1", Duration::from_secs(60), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
