//! Expiry Timers
//!
//! One background task per key that fires a callback once the key's deadline
//! passes. Deadlines can be moved while the task waits.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Stand-in deadline for a TTL too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// What [`ExpiryScheduler::arm`] did for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arm {
    /// A new timer was started for the full TTL
    Armed,
    /// The key already had a timer; its deadline moved to half the TTL from now
    Refreshed,
}

struct ExpiryTimer {
    id: u64,
    deadline: watch::Sender<Instant>,
    handle: JoinHandle<()>,
}

// == Expiry Scheduler ==
/// Registry of per-key expiry timers guarded by a single mutex.
///
/// The mutex is only held to look up, insert or remove timers. It is never
/// held while a fired timer runs its callback.
pub struct ExpiryScheduler<K> {
    ttl: Duration,
    timers: Mutex<HashMap<K, ExpiryTimer>>,
    next_id: AtomicU64,
}

impl<K> ExpiryScheduler<K>
where
    K: Eq + Hash + Clone,
{
    // == Constructor ==
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            timers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    // == Arm ==
    /// Starts a timer for `key`, or shortens the one it already has.
    ///
    /// A new timer runs for the full TTL and then calls `on_fire` with the
    /// timer's id. An existing timer is not restarted: its deadline becomes
    /// `now + ttl / 2`, so a key written repeatedly can expire sooner than a
    /// full TTL after its last write. A timer that has already fired but not
    /// yet retired is replaced by a new one. Must be called within a tokio
    /// runtime.
    pub fn arm<F, Fut>(&self, key: &K, on_fire: F) -> Arm
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut timers = self.timers.lock();

        if let Some(timer) = timers.get(key) {
            // A fired timer has dropped its receiver
            if !timer.deadline.is_closed() {
                timer.deadline.send_replace(deadline_after(self.ttl / 2));
                return Arm::Refreshed;
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (deadline, watcher) = watch::channel(deadline_after(self.ttl));
        let handle = tokio::spawn(async move {
            if wait_for_deadline(watcher).await {
                on_fire(id).await;
            }
        });
        timers.insert(key.clone(), ExpiryTimer { id, deadline, handle });
        Arm::Armed
    }

    // == Retire ==
    /// Forgets the timer with `id` once it has fired.
    ///
    /// Called from the timer's own task, so the task is detached rather than
    /// aborted. A newer timer registered for the same key is left alone and
    /// `false` is returned.
    pub fn retire(&self, key: &K, id: u64) -> bool {
        let mut timers = self.timers.lock();
        match timers.get(key) {
            Some(timer) if timer.id == id => {
                timers.remove(key);
                true
            }
            _ => false,
        }
    }

    // == Disarm ==
    /// Cancels the timer for `key`, if any.
    pub fn disarm(&self, key: &K) {
        if let Some(timer) = self.timers.lock().remove(key) {
            timer.handle.abort();
        }
    }

    /// Cancels every timer.
    pub fn disarm_all(&self) {
        let timers: Vec<ExpiryTimer> = {
            let mut timers = self.timers.lock();
            timers.drain().map(|(_, timer)| timer).collect()
        };
        for timer in timers {
            timer.handle.abort();
        }
    }

    /// Number of keys with a pending timer.
    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.timers.lock().contains_key(key)
    }
}

impl<K> Drop for ExpiryScheduler<K> {
    fn drop(&mut self) {
        for (_, timer) in self.timers.get_mut().drain() {
            timer.handle.abort();
        }
    }
}

fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after).unwrap_or(now + FAR_FUTURE)
}

/// Sleeps until the latest deadline published on `deadline`.
///
/// Returns false if the sender went away before the deadline was reached.
async fn wait_for_deadline(mut deadline: watch::Receiver<Instant>) -> bool {
    loop {
        let at = *deadline.borrow_and_update();
        tokio::select! {
            () = time::sleep_until(at) => return true,
            changed = deadline.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}
