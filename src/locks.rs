//! Per-path exclusive locks.
//!
//! One `tokio::sync::Mutex` per distinct resource path string, created on
//! first use and kept for the life of the process. The map's entry API
//! makes get-or-create atomic, so concurrent first-time requesters always
//! end up contending on the same mutex. The map shard is only held for the
//! insertion; waiting happens on the cloned `Arc`, outside the map.
//!
//! Two-path jobs take their locks through [`PathLockManager::acquire_pair`],
//! which always locks in ascending string order. Any two jobs that share a
//! path therefore request it in the same relative order and cannot form a
//! wait cycle.

use crate::error::ServiceError;
use crate::path::ResourcePath;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Guard for a single path. Dropping it releases the lock.
#[derive(Debug)]
pub struct PathGuard {
    path: String,
    _guard: OwnedMutexGuard<()>,
}

impl PathGuard {
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Guards for a job's input/output pair, held in acquisition order.
#[derive(Debug)]
pub struct PairGuard {
    guards: Vec<PathGuard>,
}

impl PairGuard {
    /// Locked paths in the order they were acquired.
    pub fn paths(&self) -> Vec<&str> {
        self.guards.iter().map(|g| g.path()).collect()
    }
}

#[derive(Debug, Default)]
pub struct PathLockManager {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PathLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `path`, created if absent.
    fn lock_for(&self, path: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `path`.
    pub async fn acquire(&self, path: &ResourcePath) -> PathGuard {
        let lock = self.lock_for(path.as_str());
        PathGuard {
            path: path.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Wait for exclusive access to `path`, giving up if `cancel` fires.
    pub async fn acquire_cancellable(
        &self,
        path: &ResourcePath,
        cancel: &CancellationToken,
    ) -> Result<PathGuard, ServiceError> {
        let lock = self.lock_for(path.as_str());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ServiceError::Cancelled),
            guard = lock.lock_owned() => Ok(PathGuard {
                path: path.to_string(),
                _guard: guard,
            }),
        }
    }

    /// Lock both paths in ascending string order.
    ///
    /// Equal paths are locked once. If `cancel` fires while waiting, any
    /// lock already taken is released before returning `Cancelled`.
    pub async fn acquire_pair(
        &self,
        a: &ResourcePath,
        b: &ResourcePath,
        cancel: &CancellationToken,
    ) -> Result<PairGuard, ServiceError> {
        let mut ordered = vec![a, b];
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for path in ordered {
            debug!("Waiting for lock on {}", path);
            guards.push(self.acquire_cancellable(path, cancel).await?);
            debug!("Locked {}", path);
        }
        Ok(PairGuard { guards })
    }

    /// Number of distinct paths ever locked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    #[cfg(test)]
    fn same_instance(&self, a: &str, b: &str) -> bool {
        Arc::ptr_eq(&self.lock_for(a), &self.lock_for(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn concurrent_first_use_shares_one_lock() {
        let mgr = Arc::new(PathLockManager::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let mgr = Arc::clone(&mgr);
            tasks.push(tokio::spawn(async move { mgr.lock_for("s3://b/k.pdf") }));
        }
        let mut locks = Vec::new();
        for t in tasks {
            locks.push(t.await.unwrap());
        }
        assert!(locks.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(mgr.len(), 1);
        assert!(mgr.same_instance("s3://b/k.pdf", "s3://b/k.pdf"));
    }

    #[tokio::test]
    async fn pair_is_ordered_and_equal_paths_lock_once() {
        let mgr = PathLockManager::new();
        let token = CancellationToken::new();

        let pair = mgr
            .acquire_pair(&p("s3://z/out.pdf"), &p("oss://a/in.pdf"), &token)
            .await
            .unwrap();
        assert_eq!(pair.paths(), vec!["oss://a/in.pdf", "s3://z/out.pdf"]);
        drop(pair);

        let same = p("s3://b/doc.pdf");
        let pair = tokio::time::timeout(
            Duration::from_secs(1),
            mgr.acquire_pair(&same, &same, &token),
        )
        .await
        .expect("equal paths must not self-deadlock")
        .unwrap();
        assert_eq!(pair.paths(), vec!["s3://b/doc.pdf"]);
    }

    #[tokio::test]
    async fn reversed_pairs_do_not_deadlock() {
        let mgr = Arc::new(PathLockManager::new());
        let a = p("s3://b/a.pdf");
        let b = p("s3://b/b.pdf");

        let mut tasks = Vec::new();
        for i in 0..20 {
            let mgr = Arc::clone(&mgr);
            let (x, y) = if i % 2 == 0 {
                (a.clone(), b.clone())
            } else {
                (b.clone(), a.clone())
            };
            tasks.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                let _g = mgr.acquire_pair(&x, &y, &token).await.unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }));
        }

        let all = futures::future::join_all(tasks);
        tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("reversed pairs deadlocked");
    }

    #[tokio::test]
    async fn cancel_while_waiting_returns_cancelled() {
        let mgr = PathLockManager::new();
        let path = p("s3://b/held.pdf");
        let _held = mgr.acquire(&path).await;

        let other = p("s3://b/other.pdf");
        let token = CancellationToken::new();
        let waiter = mgr.acquire_pair(&path, &other, &token);
        token.cancel();
        let err = waiter.await.unwrap_err();
        assert!(matches!(err, ServiceError::Cancelled));
    }

    #[tokio::test]
    async fn guard_drop_releases() {
        let mgr = PathLockManager::new();
        let path = p("s3://b/k.pdf");
        let g = mgr.acquire(&path).await;
        drop(g);
        tokio::time::timeout(Duration::from_millis(200), mgr.acquire(&path))
            .await
            .expect("lock should be free after guard drop");
    }
}
