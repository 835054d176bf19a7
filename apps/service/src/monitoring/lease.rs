use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Exclusive right to run the check pipeline for one monitor
///
/// Released on drop.
#[derive(Debug)]
pub struct MonitorLease {
    monitor_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl MonitorLease {
    pub fn monitor_id(&self) -> Uuid {
        self.monitor_id
    }
}

/// Per-monitor mutual exclusion for the record → evaluate → react sequence
///
/// Only leases that are held (or awaited) keep an entry in the registry.
#[derive(Debug, Default)]
pub struct MonitorLeases {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl MonitorLeases {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, monitor_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|id, lock| *id == monitor_id || Arc::strong_count(lock) > 1);
        locks.entry(monitor_id).or_default().clone()
    }

    /// Wait until the monitor is free
    pub async fn acquire(&self, monitor_id: Uuid) -> MonitorLease {
        let guard = self.lock_for(monitor_id).lock_owned().await;
        MonitorLease { monitor_id, _guard: guard }
    }

    /// Take the lease only if nobody holds it
    pub fn try_acquire(&self, monitor_id: Uuid) -> Option<MonitorLease> {
        let guard = self.lock_for(monitor_id).try_lock_owned().ok()?;
        Some(MonitorLease { monitor_id, _guard: guard })
    }

    /// Number of monitors with a live lease entry
    pub fn tracked(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.values().filter(|lock| Arc::strong_count(lock) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_try_acquire_fails_while_held() {
        let leases = MonitorLeases::new();
        let id = Uuid::new_v4();

        let lease = leases.try_acquire(id).expect("free lease");
        assert_eq!(lease.monitor_id(), id);
        assert!(leases.try_acquire(id).is_none());
        // Other monitors are unaffected.
        assert!(leases.try_acquire(Uuid::new_v4()).is_some());

        drop(lease);
        assert!(leases.try_acquire(id).is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let leases = Arc::new(MonitorLeases::new());
        let id = Uuid::new_v4();
        let held = leases.acquire(id).await;

        let waiter = {
            let leases = leases.clone();
            tokio::spawn(async move { leases.acquire(id).await.monitor_id() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let acquired = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(acquired, id);
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let leases = MonitorLeases::new();
        for _ in 0..5 {
            let _lease = leases.acquire(Uuid::new_v4()).await;
        }
        assert_eq!(leases.tracked(), 0);
        let _held = leases.acquire(Uuid::new_v4()).await;
        assert_eq!(leases.tracked(), 1);
        assert!(leases.locks.lock().unwrap().len() <= 2);
    }
}
