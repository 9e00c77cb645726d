//! Single-Flight Module
//!
//! Collapses concurrent computations for the same key into one execution
//! whose result is shared by every caller.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

/// `None` until the leader publishes its result.
type Outcome<V, E> = Option<Result<V, E>>;

enum Role<V, E> {
    Leader(watch::Sender<Outcome<V, E>>),
    Follower(watch::Receiver<Outcome<V, E>>),
}

// == Single Flight ==
/// Keyed registry of in-flight computations.
///
/// The first caller for a key becomes the leader and runs the computation.
/// Callers arriving while it runs wait for the leader's result instead of
/// starting their own. Once the leader finishes, the key is released and the
/// next caller starts a fresh computation.
///
/// If the leader is dropped before finishing, its waiters wake up and one of
/// them takes over.
pub struct SingleFlight<K, V, E> {
    calls: Mutex<HashMap<K, watch::Receiver<Outcome<V, E>>>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    // == Constructor ==
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    // == Run ==
    /// Runs `compute` for `key` unless a computation for it is already in
    /// flight, in which case that computation's result is returned.
    pub async fn run<F, Fut>(&self, key: &K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let leader = loop {
            let mut receiver = match self.join(key) {
                Role::Leader(sender) => break sender,
                Role::Follower(receiver) => receiver,
            };

            let outcome = match receiver.wait_for(Option::is_some).await {
                Ok(outcome) => (*outcome).clone(),
                Err(_) => None,
            };
            match outcome {
                Some(result) => return result,
                None => trace!("flight leader went away, rejoining"),
            }
        };

        let _landing = Landing {
            calls: &self.calls,
            key,
        };
        let result = compute().await;
        leader.send_replace(Some(result.clone()));
        result
    }

    /// Number of keys with a computation currently running.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    fn join(&self, key: &K) -> Role<V, E> {
        let mut calls = self.calls.lock();
        match calls.get(key) {
            Some(receiver) => Role::Follower(receiver.clone()),
            None => {
                let (sender, receiver) = watch::channel(None);
                calls.insert(key.clone(), receiver);
                Role::Leader(sender)
            }
        }
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> fmt::Debug for SingleFlight<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}

/// Releases the leader's key when the computation completes or is dropped.
struct Landing<'a, K: Eq + Hash, V, E> {
    calls: &'a Mutex<HashMap<K, watch::Receiver<Outcome<V, E>>>>,
    key: &'a K,
}

impl<K: Eq + Hash, V, E> Drop for Landing<'_, K, V, E> {
    fn drop(&mut self) {
        self.calls.lock().remove(self.key);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_caller_runs_computation() {
        let flights: SingleFlight<&str, u32, String> = SingleFlight::new();

        let result = flights.run(&"key", || async { Ok(7) }).await;

        assert_eq!(result, Ok(7));
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_run() {
        let flights: Arc<SingleFlight<String, u32, String>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flights = Arc::clone(&flights);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                flights
                    .run(&"shared".to_string(), || async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_error_is_shared_by_waiters() {
        let flights: Arc<SingleFlight<u8, u32, String>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = Arc::clone(&flights);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                flights
                    .run(&1, || async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Err("backend down".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err("backend down".to_string()));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_key_released_after_completion() {
        let flights: SingleFlight<&str, u32, String> = SingleFlight::new();
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = flights
                .run(&"key", || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err("nope".to_string())
                })
                .await;
            assert!(result.is_err());
        }

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share() {
        let flights: SingleFlight<u32, u32, String> = SingleFlight::new();

        let (a, b) = tokio::join!(
            flights.run(&1, || async { Ok(10) }),
            flights.run(&2, || async { Ok(20) }),
        );

        assert_eq!(a, Ok(10));
        assert_eq!(b, Ok(20));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_leader_hands_over() {
        let flights: Arc<SingleFlight<&'static str, u32, String>> = Arc::new(SingleFlight::new());

        let leader = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .run(&"key", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let follower = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move { flights.run(&"key", || async { Ok(2) }).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        leader.abort();

        let result = tokio::time::timeout(Duration::from_secs(5), follower)
            .await
            .expect("follower should take over")
            .unwrap();
        assert_eq!(result, Ok(2));
        assert_eq!(flights.in_flight(), 0);
    }
}
