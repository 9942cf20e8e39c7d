//! Trailing-edge debouncer for free-text search input.

#![forbid(unsafe_code)]

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::debug;

/// One logical debounce channel.
///
/// Each `schedule` supersedes the previous pending value; only the last value
/// of a burst reaches its callback, `delay` after the burst goes quiet. The
/// value travels with the schedule call, so the callback never reads state
/// that may have moved on in the meantime.
///
/// Dropping the debouncer cancels whatever is pending.
pub struct Debouncer<T> {
    pending: Option<JoinHandle<()>>,
    generation: Arc<AtomicU64>,
    _value: PhantomData<fn(T)>,
}

impl<T> Default for Debouncer<T> {
    fn default() -> Self {
        Self { pending: None, generation: Arc::new(AtomicU64::new(0)), _value: PhantomData }
    }
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new() -> Self { Self::default() }

    /// Must be called within a Tokio runtime.
    pub fn schedule<F>(&mut self, value: T, delay: Duration, callback: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        if self.cancel() {
            counter!("debounce_coalesced_total", 1u64);
        }
        let generation = Arc::clone(&self.generation);
        let mine = generation.load(Ordering::SeqCst);
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A cancel that raced the timer wins.
            if generation.load(Ordering::SeqCst) == mine {
                callback(value);
            }
        }));
    }
}

impl<T> Debouncer<T> {
    /// Drop any pending value. Returns whether something was pending.
    pub fn cancel(&mut self) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        match self.pending.take() {
            Some(h) => {
                let was_pending = !h.is_finished();
                h.abort();
                if was_pending {
                    debug!("debounce: pending value cancelled");
                }
                was_pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn() -> Box<dyn FnOnce(String) + Send>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f2 = Arc::clone(&fired);
        let make = move || {
            let f3 = Arc::clone(&f2);
            Box::new(move |v: String| f3.lock().unwrap().push(v)) as Box<dyn FnOnce(String) + Send>
        };
        (fired, make)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_to_last_value() {
        let (fired, cb) = recorder();
        let mut d = Debouncer::new();
        let delay = Duration::from_millis(300);
        d.schedule("a".to_string(), delay, cb());
        tokio::time::sleep(Duration::from_millis(100)).await;
        d.schedule("ab".to_string(), delay, cb());
        tokio::time::sleep(Duration::from_millis(100)).await;
        d.schedule("abc".to_string(), delay, cb());
        assert!(d.is_pending());
        tokio::time::sleep(Duration::from_millis(299)).await;
        assert!(fired.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(*fired.lock().unwrap(), vec!["abc".to_string()]);
        assert!(!d.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_fire_separately() {
        let (fired, cb) = recorder();
        let mut d = Debouncer::new();
        let delay = Duration::from_millis(300);
        d.schedule("alien".to_string(), delay, cb());
        tokio::time::sleep(Duration::from_millis(400)).await;
        d.schedule("aliens".to_string(), delay, cb());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*fired.lock().unwrap(), vec!["alien".to_string(), "aliens".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_release_pending() {
        let (fired, cb) = recorder();
        let mut d = Debouncer::new();
        d.schedule("x".to_string(), Duration::from_millis(300), cb());
        assert!(d.cancel());
        assert!(!d.cancel());
        d.schedule("y".to_string(), Duration::from_millis(300), cb());
        drop(d);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(fired.lock().unwrap().is_empty());
    }
}
