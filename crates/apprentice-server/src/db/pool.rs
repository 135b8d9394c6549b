// crates/apprentice-server/src/db/pool.rs
// Async connection pool using deadpool-sqlite
//
// All database access goes through `interact` (anyhow) or
// `interact_with_retry`. Closures run on a blocking thread pool, so the
// async runtime is never blocked on SQLite. Multi-statement logical
// operations open an explicit transaction inside one closure.

use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Registers sqlite-vec extension globally (once per process).
/// Must be called before any SQLite connections are opened.
static SQLITE_VEC_INIT: Once = Once::new();

#[allow(clippy::missing_transmute_annotations)]
pub(crate) fn ensure_sqlite_vec_registered() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init has the signature expected by
        // sqlite3_auto_extension; the pointer targets a statically-linked
        // symbol and stays valid for the life of the process.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
        tracing::debug!("sqlite-vec extension registered globally");
    });
}

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
fn is_rusqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Check if an anyhow::Error chain contains a SQLite contention error.
fn is_sqlite_contention(err: &anyhow::Error) -> bool {
    err.downcast_ref::<rusqlite::Error>()
        .is_some_and(is_rusqlite_contention)
}

/// Retry delays for SQLite contention backoff (100ms, 500ms, 2s).
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

/// WAL checkpoint modes the store exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    /// Checkpoint what can be checkpointed without blocking writers.
    Passive,
    /// Checkpoint everything and truncate the WAL file (clean shutdown).
    Truncate,
}

impl CheckpointMode {
    fn as_sql(self) -> &'static str {
        match self {
            CheckpointMode::Passive => "PRAGMA wal_checkpoint(PASSIVE)",
            CheckpointMode::Truncate => "PRAGMA wal_checkpoint(TRUNCATE)",
        }
    }
}

/// Database pool wrapper with sqlite-vec support and per-connection setup.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (used to share state in tests)
    memory_uri: Option<String>,
}

impl DatabasePool {
    /// Open a pooled database at the given path, running schema setup.
    pub async fn open(path: &Path) -> Result<Self> {
        ensure_sqlite_vec_registered();
        ensure_parent_directory(path)?;

        let conn_str = crate::utils::path_to_string(path);
        let hook = make_file_post_create_hook(path.to_path_buf());

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path: Some(path.to_path_buf()),
            memory_uri: None,
        };
        db_pool.run_migrations().await?;
        Ok(db_pool)
    }

    /// Open a pooled in-memory database.
    ///
    /// Uses a shared cache URI so all pool connections see the same
    /// in-memory state; without it each connection would get its own
    /// private database.
    pub async fn open_in_memory() -> Result<Self> {
        ensure_sqlite_vec_registered();

        let uri = format!("file:memdb_{:?}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let cfg = Config::new(&uri);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(make_memory_post_create_hook())
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path: None,
            memory_uri: Some(uri),
        };
        db_pool.run_migrations().await?;
        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests)
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a connection from the pool.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure on a pooled connection, logging errors at warn level
    /// without propagating. For best-effort writes.
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(move |conn| f(conn)).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("{}: {}", label, e);
                None
            }
        }
    }

    /// Run a closure with retry on SQLite contention errors.
    ///
    /// Uses backoff (100ms, 500ms, 2000ms) for up to 3 retries. Use for
    /// writes that must not be lost; the closure must be `Clone`.
    pub async fn interact_with_retry<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        for delay in RETRY_DELAYS.iter() {
            let f_clone = f.clone();
            match self.interact(f_clone).await {
                Ok(result) => return Ok(result),
                Err(e) if is_sqlite_contention(&e) => {
                    tracing::warn!("SQLite contention, retrying in {:?}", delay);
                    tokio::time::sleep(*delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        self.interact(f).await
    }

    /// Run a WAL checkpoint, returning the number of pages checkpointed.
    /// Returns 0 for in-memory databases (no WAL).
    pub async fn checkpoint(&self, mode: CheckpointMode) -> Result<i64> {
        if self.path.is_none() {
            return Ok(0);
        }
        self.interact(move |conn| {
            // wal_checkpoint returns (busy, log_pages, checkpointed_pages)
            let pages: i64 = conn.query_row(mode.as_sql(), [], |row| row.get(1))?;
            Ok(pages.max(0))
        })
        .await
    }

    /// Run schema setup and migrations. Called during pool creation.
    async fn run_migrations(&self) -> Result<()> {
        self.interact(|conn| {
            super::schema::run_all_migrations(conn)?;
            if let Err(e) = conn.execute_batch("PRAGMA optimize") {
                tracing::debug!("PRAGMA optimize skipped: {}", e);
            }
            Ok(())
        })
        .await
    }
}

/// Ensure parent directory exists with secure permissions (0o700 on Unix).
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700); // rwx------
            std::fs::set_permissions(parent, perms)?;
        }
    }
    Ok(())
}

/// Create a post_create hook for file-based databases.
fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600); // rw-------
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("Failed to set database file permissions to 0600: {}", e);
                    }
                }

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Create a post_create hook for in-memory databases.
/// WAL mode is not applicable to in-memory databases.
fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys=ON; \
                     PRAGMA busy_timeout=5000;",
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Configure a connection after it's created.
///
/// WAL for concurrent readers, 30 s busy timeout to absorb write
/// contention between scheduler ticks, NORMAL synchronous (safe with WAL).
fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=30000; \
         PRAGMA synchronous=NORMAL; \
         PRAGMA journal_size_limit=32768;",
    )?;
    Ok(())
}
