//! Store Adapter (spec C2)
//!
//! Pooled SQLite connections, a `transaction` helper with rollback-on-error,
//! and schema bootstrap. SQLite stands in for the "vector-capable relational
//! store" of the spec: embeddings are stored as BLOB columns and the
//! declared dimension lives in `schema_meta`, since SQLite has no native
//! typed vector column the way the source database does.

use std::path::PathBuf;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use super::migrations::apply_migrations;

/// Store adapter error kinds (spec section 4.2 / 7)
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The connection pool could not hand out a connection in time.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// A unique/foreign-key constraint was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// A query exceeded its allotted time.
    #[error("query timeout: {0}")]
    QueryTimeout(String),
    /// A vector operation found mismatched lengths.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// Any other rusqlite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Filesystem/IO failure while opening the database.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Store could not be initialized.
    #[error("initialization error: {0}")]
    Init(String),
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::ConnectionLost(e.to_string())
    }
}

/// Store adapter result alias
pub type Result<T> = std::result::Result<T, StoreError>;

const EMBEDDING_DIMENSION_KEY: &str = "embedding_dimension";

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA temp_store = MEMORY;",
    )
}

/// Pooled connection handle to the memory store.
pub struct Storage {
    pool: Pool<SqliteConnectionManager>,
}

impl Storage {
    /// Open (creating if necessary) a store backed by a file on disk.
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(&db_path)
            .with_init(|conn: &mut Connection| configure_connection(&*conn));
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| StoreError::Init(e.to_string()))?;

        {
            let conn = pool.get()?;
            apply_migrations(&conn)?;
        }

        Ok(Self { pool })
    }

    /// Open a store at the platform-default data directory.
    pub fn open_default() -> Result<Self> {
        let proj_dirs = directories::ProjectDirs::from("dev", "specmem", "core")
            .ok_or_else(|| StoreError::Init("could not determine project directories".into()))?;
        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Self::open(data_dir.join("specmem.db"))
    }

    /// Open a private, in-memory store. All checkouts share one connection
    /// (pool size 1), since SQLite `:memory:` databases are per-connection.
    /// Intended for tests.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn: &mut Connection| configure_connection(&*conn));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StoreError::Init(e.to_string()))?;
        {
            let conn = pool.get()?;
            apply_migrations(&conn)?;
        }
        Ok(Self { pool })
    }

    /// Check out a pooled connection. Callers must release it (drop the
    /// guard) promptly rather than holding it across unrelated I/O, per the
    /// shared-resource policy in spec section 5.
    pub fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(StoreError::from)
    }

    /// Execute `f` inside a `BEGIN`/`COMMIT` transaction; any `Err` returned
    /// by `f` triggers a `ROLLBACK`. Batch ingests must use this so that
    /// "either all rows committed or none" holds.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let result = f(&tx);
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // rusqlite rolls back automatically on `Transaction` drop if
                // not committed; this is explicit for clarity.
                drop(tx);
                Err(e)
            }
        }
    }

    /// The store's declared embedding dimension, if one has been set.
    /// This stands in for "query the store's column metadata for the
    /// vector column" (spec section 4.1) since SQLite has no typed vector
    /// column to introspect.
    pub fn declared_embedding_dimension(&self) -> Result<Option<usize>> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM schema_meta WHERE key = ?1",
                [EMBEDDING_DIMENSION_KEY],
                |row| row.get(0),
            )
            .ok();
        Ok(value.and_then(|v| v.parse().ok()))
    }

    /// Declare the embedding dimension for this store. Subsequent
    /// `declared_embedding_dimension` calls return this value until
    /// changed again.
    pub fn set_declared_embedding_dimension(&self, dim: usize) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO schema_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![EMBEDDING_DIMENSION_KEY, dim.to_string()],
        )?;
        Ok(())
    }

    /// Helper used by the dimension service: same as
    /// `declared_embedding_dimension`, named to mirror the spec's
    /// `getTableDimension(table)` contract for the embedding column of
    /// `table`. Only `"memories"` carries the declared dimension today.
    pub fn get_table_dimension(&self, table: &str) -> Result<Option<usize>> {
        if table == "memories" {
            self.declared_embedding_dimension()
        } else {
            Ok(None)
        }
    }
}
