// src/locks.rs
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per service name, created on first use. Contention on
/// one service never touches another's lock.
#[derive(Default)]
pub struct ServiceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ServiceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, service: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Returns `None` immediately when the lock is already held.
    pub fn try_acquire(&self, service: &str) -> Option<OwnedMutexGuard<()>> {
        self.get_or_create(service).try_lock_owned().ok()
    }

    pub async fn acquire(&self, service: &str) -> OwnedMutexGuard<()> {
        self.get_or_create(service).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locks_are_per_service() {
        let locks = ServiceLocks::new();
        let portal = locks.try_acquire("portal").expect("first acquire");

        assert!(locks.try_acquire("portal").is_none());
        assert!(locks.try_acquire("review").is_some());

        drop(portal);
        assert!(locks.try_acquire("portal").is_some());
    }
}
