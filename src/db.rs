//! Database connection and write serialization.
//!
//! The relational store lives on storage that may be a network share, where
//! SQLite's own locking cannot be trusted. Every mutation therefore goes
//! through a single process-wide write gate ([`Database::lock`]): the gate is
//! acquired before a connection is opened and released after the transaction
//! commits or rolls back.
//!
//! Opening a connection ([`Database::connect`]) retries transient failures
//! with a fixed backoff. A corrupt database file is moved aside to
//! `<name>.corrupted.<unix_ts>` and a fresh, empty database is created in its
//! place; the quarantined copy is never deleted or overwritten.
//!
//! Recovery is serialized by a second lock that is always taken after the
//! write gate. Connection attempts hold it shared; quarantine holds it
//! exclusively and re-checks the file first, so concurrent readers that all
//! see the damage quarantine it exactly once.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{error, info, warn};

use crate::config::DbConfig;
use crate::error::{Result, StoreError};
use crate::migrate;

const SIDECAR_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

pub struct Database {
    path: PathBuf,
    options: SqliteConnectOptions,
    retries: u32,
    backoff: Duration,
    gate: Mutex<()>,
    /// Ordered after `gate`. Shared while connecting, exclusive while
    /// quarantining.
    recovery: RwLock<()>,
}

/// Holds the write gate. Dropping it releases the gate.
pub struct WriteGuard<'a> {
    db: &'a Database,
    _permit: MutexGuard<'a, ()>,
}

impl WriteGuard<'_> {
    /// Open a connection while holding the gate.
    pub async fn connect(&self) -> Result<SqliteConnection> {
        self.db.connect().await
    }
}

impl Database {
    /// Open (creating if needed) the database and apply the schema.
    pub async fn open(config: &DbConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        cleanup_stale_files(&config.path);

        let mut options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(60))
            .journal_mode(SqliteJournalMode::Memory)
            .synchronous(SqliteSynchronous::Off)
            .pragma("mmap_size", "0")
            .pragma("temp_store", "MEMORY")
            .pragma("cache_size", "-5000")
            .foreign_keys(true)
            .disable_statement_logging();

        if config.nolock {
            options = options.vfs("unix-none");
        }

        let db = Self {
            path: config.path.clone(),
            options,
            retries: config.connect_retries.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            gate: Mutex::new(()),
            recovery: RwLock::new(()),
        };

        let mut conn = db.connect().await?;
        migrate::apply_schema(&mut conn).await?;
        conn.close().await?;

        info!(path = %db.path.display(), "database ready");
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the process-wide write gate.
    pub async fn lock(&self) -> WriteGuard<'_> {
        WriteGuard {
            db: self,
            _permit: self.gate.lock().await,
        }
    }

    /// Open a connection, retrying transient failures.
    ///
    /// Reads may call this directly; writers must go through [`Database::lock`].
    pub async fn connect(&self) -> Result<SqliteConnection> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = {
                let _shared = self.recovery.read().await;
                self.try_connect().await
            };
            match outcome {
                Ok(conn) => return Ok(conn),
                Err(e) if is_corruption(&e) => {
                    error!(path = %self.path.display(), error = %e, "database corruption detected");
                    return self.recover().await;
                }
                Err(e) if attempt >= self.retries => {
                    error!(
                        path = %self.path.display(),
                        attempts = attempt,
                        error = %e,
                        "permanent failure connecting to database"
                    );
                    return Err(StoreError::Unavailable {
                        path: self.path.clone(),
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(attempt, error = %e, "database connection attempt failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }

    async fn try_connect(&self) -> std::result::Result<SqliteConnection, sqlx::Error> {
        let mut conn = self.options.connect().await?;
        // Opening is lazy in SQLite; touch the schema so a damaged file fails here.
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sqlite_master")
            .fetch_one(&mut conn)
            .await?;
        Ok(conn)
    }

    /// Quarantine the file unless another caller already replaced it.
    async fn recover(&self) -> Result<SqliteConnection> {
        let _exclusive = self.recovery.write().await;
        match self.try_connect().await {
            Ok(conn) => {
                info!(path = %self.path.display(), "database already recovered");
                Ok(conn)
            }
            Err(e) if is_corruption(&e) => self.quarantine_and_recreate().await,
            Err(e) => Err(e.into()),
        }
    }

    /// Caller holds `recovery` exclusively.
    async fn quarantine_and_recreate(&self) -> Result<SqliteConnection> {
        let quarantined_to = unused_quarantine_path(&self.path, chrono::Utc::now().timestamp());
        std::fs::rename(&self.path, &quarantined_to)?;
        error!(
            path = %self.path.display(),
            quarantined_to = %quarantined_to.display(),
            "moved corrupt database aside"
        );
        remove_sidecars(&self.path);

        let recreated = async {
            let mut conn = self.options.connect().await?;
            migrate::apply_schema(&mut conn).await?;
            Ok::<_, sqlx::Error>(conn)
        }
        .await;

        match recreated {
            Ok(conn) => {
                info!(path = %self.path.display(), "fresh database created");
                Ok(conn)
            }
            Err(source) => Err(StoreError::Unrecoverable {
                path: self.path.clone(),
                quarantined_to,
                source,
            }),
        }
    }
}

fn is_corruption(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let msg = db.message().to_lowercase();
            msg.contains("malformed")
                || msg.contains("not a database")
                || matches!(db.code().as_deref(), Some("11") | Some("26"))
        }
        _ => false,
    }
}

fn quarantine_path(path: &Path, ts: i64) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database".to_string());
    path.with_file_name(format!("{}.corrupted.{}", name, ts))
}

/// A quarantine path that does not exist yet: `<name>.corrupted.<ts>`, then
/// `<name>.corrupted.<ts>.1`, `.2`, ...
fn unused_quarantine_path(path: &Path, ts: i64) -> PathBuf {
    let base = quarantine_path(path, ts);
    if !base.exists() {
        return base;
    }
    (1u32..)
        .map(|n| sidecar_path(&base, &format!(".{}", n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(base)
}

fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn remove_sidecars(path: &Path) {
    for suffix in SIDECAR_SUFFIXES {
        let sidecar = sidecar_path(path, suffix);
        if sidecar.exists() {
            match std::fs::remove_file(&sidecar) {
                Ok(()) => info!(file = %sidecar.display(), "removed stale lock file"),
                Err(e) => warn!(file = %sidecar.display(), error = %e, "failed to remove stale lock file"),
            }
        }
    }
}

/// Remove a 0-byte database left by a failed init, and stale sidecar files.
fn cleanup_stale_files(path: &Path) {
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.is_file() && meta.len() == 0 {
            warn!(path = %path.display(), "removing 0-byte database file");
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove 0-byte database");
            }
        }
    }
    remove_sidecars(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn db_config(path: PathBuf) -> DbConfig {
        DbConfig {
            path,
            connect_retries: 2,
            retry_backoff_ms: 5,
            nolock: false,
        }
    }

    #[tokio::test]
    async fn test_open_creates_schema() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(&db_config(tmp.path().join("data/chatmem.sqlite")))
            .await
            .unwrap();
        let mut conn = db.connect().await.unwrap();
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('messages','conversations','chunks','sync_log')",
        )
        .fetch_one(&mut conn)
        .await
        .unwrap();
        assert_eq!(tables, 4);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_quarantined_and_recreated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chatmem.sqlite");
        let garbage = vec![0x42u8; 8192];
        std::fs::write(&path, &garbage).unwrap();

        let db = Database::open(&db_config(path.clone())).await.unwrap();

        let quarantined: Vec<PathBuf> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".corrupted."))
            .collect();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(std::fs::read(&quarantined[0]).unwrap(), garbage);

        let mut conn = db.connect().await.unwrap();
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(chunks, 0);
    }

    #[tokio::test]
    async fn test_zero_byte_file_is_replaced() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chatmem.sqlite");
        std::fs::write(&path, b"").unwrap();
        std::fs::write(sidecar_path(&path, "-journal"), b"stale").unwrap();

        Database::open(&db_config(path.clone())).await.unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        assert!(!sidecar_path(&path, "-journal").exists());
    }

    #[tokio::test]
    async fn test_unopenable_path_gives_up_after_retries() {
        let tmp = TempDir::new().unwrap();
        // A directory cannot be opened as a database file.
        let result = Database::open(&db_config(tmp.path().to_path_buf())).await;
        match result {
            Err(StoreError::Unavailable { attempts, .. }) => assert_eq!(attempts, 2),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opening a directory should fail"),
        }
    }

    #[tokio::test]
    async fn test_write_gate_serializes() {
        let tmp = TempDir::new().unwrap();
        let db = Arc::new(
            Database::open(&db_config(tmp.path().join("chatmem.sqlite")))
                .await
                .unwrap(),
        );
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let db = db.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = db.lock().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    fn quarantined_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".corrupted."))
            .collect();
        files.sort();
        files
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_quarantine_once() {
        for _ in 0..8 {
            let tmp = TempDir::new().unwrap();
            let path = tmp.path().join("chatmem.sqlite");
            let db = Arc::new(Database::open(&db_config(path.clone())).await.unwrap());

            let garbage = vec![0x42u8; 8192];
            std::fs::write(&path, &garbage).unwrap();

            // Readers recover while a writer holds the gate.
            let _gate = db.lock().await;
            let (a, b, c) = tokio::join!(
                tokio::spawn({
                    let db = db.clone();
                    async move { db.connect().await.map(|_| ()) }
                }),
                tokio::spawn({
                    let db = db.clone();
                    async move { db.connect().await.map(|_| ()) }
                }),
                tokio::spawn({
                    let db = db.clone();
                    async move { db.connect().await.map(|_| ()) }
                }),
            );
            a.unwrap().unwrap();
            b.unwrap().unwrap();
            c.unwrap().unwrap();

            let quarantined = quarantined_files(tmp.path());
            assert_eq!(quarantined.len(), 1, "{:?}", quarantined);
            assert_eq!(std::fs::read(&quarantined[0]).unwrap(), garbage);

            let mut conn = db.connect().await.unwrap();
            let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
                .fetch_one(&mut conn)
                .await
                .unwrap();
            assert_eq!(chunks, 0);
        }
    }

    #[test]
    fn test_quarantine_never_reuses_a_name() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chatmem.sqlite");
        let first = unused_quarantine_path(&path, 1700000000);
        assert_eq!(first, tmp.path().join("chatmem.sqlite.corrupted.1700000000"));
        std::fs::write(&first, b"old").unwrap();

        let second = unused_quarantine_path(&path, 1700000000);
        assert_eq!(second, tmp.path().join("chatmem.sqlite.corrupted.1700000000.1"));
    }

    #[test]
    fn test_quarantine_path_keeps_name() {
        let p = quarantine_path(Path::new("/data/chatmem.sqlite"), 1700000000);
        assert_eq!(p, PathBuf::from("/data/chatmem.sqlite.corrupted.1700000000"));
    }
}
