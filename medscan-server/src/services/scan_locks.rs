//! Per-scan exclusive regions
//!
//! Hands out one async mutex per scan identity. Entries no caller holds are
//! pruned on the next acquisition so the map stays proportional to in-flight
//! work rather than to the number of scans ever touched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use medscan_common::ScanIdentity;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Default)]
pub struct ScanLocks {
    locks: Mutex<HashMap<ScanIdentity, Arc<tokio::sync::Mutex<()>>>>,
}

impl ScanLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `identity`; released when the guard drops
    pub async fn acquire(&self, identity: &ScanIdentity) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(
                locks
                    .entry(identity.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Identities with a live lock entry
    pub fn active(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_identity_is_exclusive() {
        let locks = Arc::new(ScanLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let id = ScanIdentity::new("u1", "xray", "chest");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (locks, inside, max_inside, id) =
                (locks.clone(), inside.clone(), max_inside.clone(), id.clone());
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&id).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_identities_do_not_block() {
        let locks = ScanLocks::new();
        let _a = locks.acquire(&ScanIdentity::new("u1", "xray", "a")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(&ScanIdentity::new("u1", "xray", "b")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = ScanLocks::new();
        {
            let _guard = locks.acquire(&ScanIdentity::new("u1", "xray", "a")).await;
        }
        let _guard = locks.acquire(&ScanIdentity::new("u1", "xray", "b")).await;
        assert_eq!(locks.active(), 1);
    }
}
