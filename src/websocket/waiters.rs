//! Pending waits for subscription acknowledgements
//!
//! Each `subscribe_and_wait` call registers a oneshot sender keyed by the
//! subscription. The session loop resolves all waits for a key at once; the
//! [`WaitGuard`] returned on registration removes the entry when the caller
//! returns for any other reason, so no entry outlives its caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

use super::subscription::SubscriptionKey;
use crate::error::{Error, Result};

type WaitMap = HashMap<SubscriptionKey, Vec<(u64, oneshot::Sender<Result<()>>)>>;

/// Table of callers blocked on a subscription outcome
#[derive(Debug, Default)]
pub(crate) struct PendingWaits {
    waits: Mutex<WaitMap>,
    next_id: AtomicU64,
}

impl PendingWaits {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WaitMap> {
        match self.waits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a wait for `key`
    pub(crate) fn register(
        self: &Arc<Self>,
        key: SubscriptionKey,
    ) -> (WaitGuard, oneshot::Receiver<Result<()>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock().entry(key.clone()).or_default().push((id, tx));

        let guard = WaitGuard {
            waits: Arc::clone(self),
            key,
            id,
        };
        (guard, rx)
    }

    /// Resolve every wait on `key`. Returns how many were resolved.
    pub(crate) fn resolve<F>(&self, key: &SubscriptionKey, outcome: F) -> usize
    where
        F: Fn() -> Result<()>,
    {
        let Some(waiters) = self.lock().remove(key) else {
            return 0;
        };
        let count = waiters.len();
        for (_, tx) in waiters {
            // Receiver gone means the caller already returned
            let _ = tx.send(outcome());
        }
        count
    }

    /// Fail every outstanding wait (session teardown)
    pub(crate) fn fail_all<F>(&self, error: F) -> usize
    where
        F: Fn() -> Error,
    {
        let drained: Vec<_> = self.lock().drain().collect();
        let mut count = 0;
        for (_, waiters) in drained {
            for (_, tx) in waiters {
                let _ = tx.send(Err(error()));
                count += 1;
            }
        }
        count
    }

    /// Number of outstanding waits
    pub(crate) fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    fn remove(&self, key: &SubscriptionKey, id: u64) {
        let mut waits = self.lock();
        if let Some(waiters) = waits.get_mut(key) {
            waiters.retain(|(wait_id, _)| *wait_id != id);
            if waiters.is_empty() {
                waits.remove(key);
            }
        }
    }
}

/// Removes its wait from the table when dropped
#[derive(Debug)]
pub(crate) struct WaitGuard {
    waits: Arc<PendingWaits>,
    key: SubscriptionKey,
    id: u64,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.waits.remove(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> SubscriptionKey {
        SubscriptionKey::trades("BTC-USDT")
    }

    #[tokio::test]
    async fn test_resolve_wakes_all_waiters_for_key() {
        let waits = Arc::new(PendingWaits::new());
        let (_g1, rx1) = waits.register(btc());
        let (_g2, rx2) = waits.register(btc());
        let (_g3, _rx3) = waits.register(SubscriptionKey::status());
        assert_eq!(waits.len(), 3);

        assert_eq!(waits.resolve(&btc(), || Ok(())), 2);
        assert!(rx1.await.unwrap().is_ok());
        assert!(rx2.await.unwrap().is_ok());
        assert_eq!(waits.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_with_error() {
        let waits = Arc::new(PendingWaits::new());
        let (_guard, rx) = waits.register(btc());

        waits.resolve(&btc(), || {
            Err(Error::Subscribe {
                key: btc(),
                code: "60018".to_string(),
                msg: "not found".to_string(),
            })
        });

        assert!(matches!(rx.await.unwrap(), Err(Error::Subscribe { .. })));
    }

    #[test]
    fn test_guard_drop_removes_wait() {
        let waits = Arc::new(PendingWaits::new());
        let (guard, _rx) = waits.register(btc());
        let (other, _rx2) = waits.register(btc());
        assert_eq!(waits.len(), 2);

        drop(guard);
        assert_eq!(waits.len(), 1);
        drop(other);
        assert_eq!(waits.len(), 0);
    }

    #[test]
    fn test_guard_drop_after_resolve_is_noop() {
        let waits = Arc::new(PendingWaits::new());
        let (guard, _rx) = waits.register(btc());
        waits.resolve(&btc(), || Ok(()));
        drop(guard);
        assert_eq!(waits.len(), 0);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let waits = Arc::new(PendingWaits::new());
        let (_g1, rx1) = waits.register(btc());
        let (_g2, rx2) = waits.register(SubscriptionKey::status());

        assert_eq!(waits.fail_all(|| Error::Cancelled), 2);
        assert!(matches!(rx1.await.unwrap(), Err(Error::Cancelled)));
        assert!(matches!(rx2.await.unwrap(), Err(Error::Cancelled)));
        assert_eq!(waits.len(), 0);
    }

    #[test]
    fn test_resolve_unknown_key() {
        let waits = PendingWaits::new();
        assert_eq!(waits.resolve(&btc(), || Ok(())), 0);
    }
}
