//! Cancellation Registry
//!
//! Maps keys to cancellation callbacks for work that may need to be stopped
//! from elsewhere, such as a loader running behind a timeout.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::Mutex;
use tracing::trace;

type CancelFn = Box<dyn FnOnce() + Send>;

/// Registry of pending cancellation callbacks, one per key.
pub struct CancelRegistry<K> {
    callbacks: Mutex<HashMap<K, CancelFn>>,
}

impl<K: Eq + Hash> CancelRegistry<K> {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `cancel` for `key`, replacing any callback already there.
    ///
    /// A replaced callback is dropped without being called.
    pub fn store<F>(&self, key: K, cancel: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.callbacks.lock().insert(key, Box::new(cancel));
    }

    /// Removes the callback for `key` and runs it. Does nothing if none is
    /// registered.
    ///
    /// The callback runs after the registry lock is released, so it may
    /// touch the registry itself.
    pub fn cancel(&self, key: &K) {
        let cancel = self.callbacks.lock().remove(key);
        if let Some(cancel) = cancel {
            trace!("running cancellation callback");
            cancel();
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.callbacks.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.lock().is_empty()
    }
}

impl<K: Eq + Hash> Default for CancelRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for CancelRegistry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelRegistry")
            .field("pending", &self.callbacks.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn counting(calls: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_runs_callback_once() {
        let registry = CancelRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.store("task", counting(&calls));
        assert!(registry.contains(&"task"));

        registry.cancel(&"task");
        registry.cancel(&"task");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_absent_is_noop() {
        let registry: CancelRegistry<&str> = CancelRegistry::new();
        registry.cancel(&"missing");
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_store_overwrites() {
        let registry = CancelRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        registry.store("task", counting(&first));
        registry.store("task", counting(&second));
        registry.cancel(&"task");

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_running_task() {
        let registry = CancelRegistry::new();
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = stopped => "cancelled",
                () = tokio::time::sleep(Duration::from_secs(60)) => "finished",
            }
        });
        registry.store(1u64, move || {
            let _ = stop.send(());
        });

        registry.cancel(&1);
        assert_eq!(task.await.unwrap(), "cancelled");
    }
}
