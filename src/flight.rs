//! Per-key deduplication of in-flight work.
//!
//! The first caller for a key becomes the leader and computes the result;
//! callers arriving while the leader is in flight wait and receive a clone
//! of the leader's outcome. The key is released as soon as the leader
//! publishes, and also if the leader's future is dropped before publishing,
//! in which case waiters start over (one of them becomes the new leader).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::watch;

/// Keyed single-flight group.
#[derive(Debug)]
pub struct Group<T> {
    calls: Arc<Mutex<HashMap<String, watch::Receiver<Option<T>>>>>,
}

impl<T: Clone> Default for Group<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Outcome of joining a key.
pub enum Flight<T> {
    /// This caller leads: compute the result and pass it to
    /// [`Leader::publish`].
    Lead(Leader<T>),
    /// Another caller leads; await the shared outcome.
    Wait(watch::Receiver<Option<T>>),
}

impl<T: Clone> Group<T> {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, becoming leader if none is active.
    pub fn join(&self, key: &str) -> Flight<T> {
        let mut calls = self.calls.lock().expect("lock poisoned");
        if let Some(rx) = calls.get(key) {
            return Flight::Wait(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        calls.insert(key.to_string(), rx);
        Flight::Lead(Leader {
            calls: Arc::clone(&self.calls),
            key: key.to_string(),
            tx,
        })
    }

    /// Wait for a leader's outcome. `None` means the leader vanished
    /// without publishing; the caller should retry from the top.
    pub async fn wait(mut rx: watch::Receiver<Option<T>>) -> Option<T> {
        match rx.wait_for(|v| v.is_some()).await {
            Ok(value) => value.clone(),
            // Sender dropped without a value: leader cancelled or panicked.
            Err(_) => None,
        }
    }
}

/// Leadership of one in-flight key.
///
/// Dropping a leader without publishing releases the key and wakes waiters
/// empty-handed, so a panicking or cancelled leader never wedges the group.
pub struct Leader<T> {
    calls: Arc<Mutex<HashMap<String, watch::Receiver<Option<T>>>>>,
    key: String,
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Leader<T> {
    /// Publish the outcome to all waiters and release the key.
    pub fn publish(self, value: T) {
        // Send before the key is removed (by Drop) so late joiners either
        // see the published value or miss the key entirely.
        let _ = self.tx.send(Some(value));
    }
}

impl<T> Drop for Leader<T> {
    fn drop(&mut self) {
        self.calls.lock().expect("lock poisoned").remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn test_leader_publishes_to_waiters() {
        let group: Arc<Group<u64>> = Arc::new(Group::new());

        let leader = match group.join("k") {
            Flight::Lead(l) => l,
            Flight::Wait(_) => panic!("first join must lead"),
        };
        let rx = match group.join("k") {
            Flight::Wait(rx) => rx,
            Flight::Lead(_) => panic!("second join must wait"),
        };

        let waiter = tokio::spawn(Group::wait(rx));
        leader.publish(7);
        assert_eq!(waiter.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_key_released_after_publish() {
        let group: Group<u64> = Group::new();
        match group.join("k") {
            Flight::Lead(l) => l.publish(1),
            Flight::Wait(_) => panic!("must lead"),
        }
        assert!(matches!(group.join("k"), Flight::Lead(_)));
    }

    #[tokio::test]
    async fn test_dropped_leader_wakes_waiters_empty() {
        let group: Group<u64> = Group::new();
        let leader = match group.join("k") {
            Flight::Lead(l) => l,
            Flight::Wait(_) => panic!("must lead"),
        };
        let rx = match group.join("k") {
            Flight::Wait(rx) => rx,
            Flight::Lead(_) => panic!("must wait"),
        };
        drop(leader);
        assert_eq!(Group::wait(rx).await, None);
        // Key is free again.
        assert!(matches!(group.join("k"), Flight::Lead(_)));
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share() {
        let group: Group<u64> = Group::new();
        let a = match group.join("a") {
            Flight::Lead(l) => l,
            Flight::Wait(_) => panic!("must lead"),
        };
        assert!(matches!(group.join("b"), Flight::Lead(_)));
        a.publish(0);
    }

    #[tokio::test]
    async fn test_many_concurrent_joins_single_leader() {
        let group: Arc<Group<u64>> = Arc::new(Group::new());
        let leaders = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(32));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let group = Arc::clone(&group);
            let leaders = Arc::clone(&leaders);
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                match group.join("k") {
                    Flight::Lead(l) => {
                        leaders.fetch_add(1, Ordering::SeqCst);
                        // Hold the flight open long enough for every task
                        // to join before the key is released.
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        l.publish(42);
                        42
                    }
                    Flight::Wait(rx) => Group::wait(rx).await.expect("leader published"),
                }
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), 42);
        }
        assert_eq!(leaders.load(Ordering::SeqCst), 1);
    }
}
