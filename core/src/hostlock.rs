use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed exclusion table: at most one holder per host IP at a time.
///
/// Entries are weak so a host's mutex disappears once no task holds or waits
/// on it.
pub struct HostLocks {
    table: Arc<Mutex<HashMap<IpAddr, Weak<AsyncMutex<()>>>>>,
}

impl Clone for HostLocks {
    fn clone(&self) -> Self { HostLocks { table: self.table.clone() } }
}

impl Default for HostLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLocks {
    pub fn new() -> Self {
        HostLocks { table: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub async fn lock(&self, ip: IpAddr) -> OwnedMutexGuard<()> {
        let entry = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.retain(|_, w| w.strong_count() > 0);
            match table.get(&ip).and_then(Weak::upgrade) {
                Some(m) => m,
                None => {
                    let m = Arc::new(AsyncMutex::new(()));
                    table.insert(ip, Arc::downgrade(&m));
                    m
                }
            }
        };
        entry.lock_owned().await
    }

    /// Number of hosts currently locked or waited on.
    pub fn active(&self) -> usize {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.values().filter(|w| w.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_host_is_serialized() {
        let locks = HostLocks::new();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let guard = locks.lock(ip).await;

        let l2 = locks.clone();
        let waiter = tokio::spawn(async move { l2.lock(ip).await; });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn different_hosts_do_not_block() {
        let locks = HostLocks::new();
        let _a = locks.lock("10.0.0.1".parse().unwrap()).await;
        let b = tokio::time::timeout(Duration::from_millis(200), locks.lock("10.0.0.2".parse().unwrap())).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = HostLocks::new();
        drop(locks.lock("10.0.0.1".parse().unwrap()).await);
        assert_eq!(locks.active(), 0);
    }
}
