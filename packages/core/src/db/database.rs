//! Database Connection Management
//!
//! Core database connection and schema initialization using libsql.
//! The service is an explicitly constructed object with an explicit
//! `open`/`close` lifecycle, injected into the entity store and vector
//! index constructors - no hidden global connection state, and trivially
//! substitutable in tests (point it at a temp directory).
//!
//! # Architecture
//!
//! - **Path-agnostic**: accepts any valid PathBuf
//! - **Idempotent schema**: CREATE TABLE IF NOT EXISTS, safe to reopen
//! - **WAL mode**: Write-Ahead Logging for better concurrency
//! - **Soft references**: person links and tasks reference entities by id
//!   without enforced foreign keys; orphans are tolerated and filtered at
//!   query time
//!
//! # Connection pattern
//!
//! Always use `connect_with_timeout()` in async functions. The busy
//! timeout lets concurrent operations wait and retry instead of failing
//! immediately with `SQLITE_BUSY` when the Tokio runtime interleaves
//! writers.

use crate::db::error::DatabaseError;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Database service managing the libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use mercato_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db = DatabaseService::open(PathBuf::from("./data/mercato.db")).await?;
///     db.close().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    db: Arc<Database>,

    /// Path to the database file
    db_path: PathBuf,
}

impl DatabaseService {
    /// Open (or create) the database at the given path and initialize
    /// the schema.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the parent directory cannot be created,
    /// the connection fails, or schema initialization fails.
    pub async fn open(db_path: PathBuf) -> Result<Self, DatabaseError> {
        let is_new_database = !db_path.exists();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize_schema(is_new_database).await?;

        Ok(service)
    }

    /// Path this service was opened with.
    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Close the database.
    ///
    /// libsql closes the underlying file when the last handle drops; this
    /// flushes the WAL first so the main database file is complete on its
    /// own.
    pub async fn close(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
            .await?;
        tracing::debug!(path = %self.db_path.display(), "Database closed");
        Ok(())
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of
    /// execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Creates tables and indexes with CREATE TABLE IF NOT EXISTS, so
    /// initialization is idempotent and safe to run on every open.
    ///
    /// # Schema
    ///
    /// - `entities`: commerce entities with typed columns + JSON payload
    /// - `person_links`: role-tagged person-entity edges, composite PK
    /// - `tasks`: derived work items
    /// - `chunk_vectors`: append-only chunk embeddings with a JSON
    ///   metadata bag (row id is the insertion-order tie-break)
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        // WAL mode for better concurrency
        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        // Wait up to 5s on lock contention instead of failing immediately
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                value REAL NOT NULL DEFAULT 0,
                quantity INTEGER NOT NULL DEFAULT 1,
                location TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                payload JSON NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create entities table: {}", e))
        })?;

        // Composite PK gives the (entity, person, role) uniqueness
        // invariant; INSERT OR REPLACE overwrites instead of duplicating.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS person_links (
                entity_id TEXT NOT NULL,
                person_id TEXT NOT NULL,
                role TEXT NOT NULL,
                PRIMARY KEY (entity_id, person_id, role)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create person_links table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                person_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 0,
                due DATETIME,
                payload JSON NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create tasks table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunk_vectors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id TEXT NOT NULL,
                vector BLOB NOT NULL,
                document TEXT NOT NULL,
                metadata JSON NOT NULL DEFAULT '{}'
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create chunk_vectors table: {}", e))
        })?;

        self.create_core_indexes(&conn).await?;

        // Flush the WAL for newly created databases so rapid open/close
        // cycles in tests never observe a half-initialized schema.
        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        Ok(())
    }

    /// Create secondary indexes
    ///
    /// These never change (no ALTER TABLE required on user machines).
    async fn create_core_indexes(&self, conn: &libsql::Connection) -> Result<(), DatabaseError> {
        let statements = [
            "CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities(kind)",
            "CREATE INDEX IF NOT EXISTS idx_entities_status ON entities(status)",
            "CREATE INDEX IF NOT EXISTS idx_links_person ON person_links(person_id)",
            "CREATE INDEX IF NOT EXISTS idx_links_entity ON person_links(entity_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_entity ON tasks(entity_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_person ON tasks(person_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(due)",
            "CREATE INDEX IF NOT EXISTS idx_vectors_entity ON chunk_vectors(entity_id)",
        ];

        for statement in statements {
            conn.execute(statement, ()).await.map_err(|e| {
                DatabaseError::sql_execution(format!("Failed '{}': {}", statement, e))
            })?;
        }

        Ok(())
    }

    /// Get a connection handle.
    ///
    /// Only for single-threaded synchronous contexts; async code should
    /// use `connect_with_timeout()`.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get a connection with the busy timeout configured.
    ///
    /// The default for all async code: SQLite operations serialize by
    /// waiting up to 5 seconds on a locked database instead of surfacing
    /// `SQLITE_BUSY` when Tokio interleaves writers at await points.
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        Ok(conn)
    }
}

/// Format a timestamp for a DATETIME column.
///
/// Fixed-width UTC RFC3339 with microseconds, so lexicographic ordering
/// of the stored strings equals chronological ordering.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp column - handles both SQLite CURRENT_TIMESTAMP
/// ("YYYY-MM-DD HH:MM:SS") and RFC3339 formats.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    Err(DatabaseError::sql_execution(format!(
        "Unable to parse timestamp '{}' as SQLite or RFC3339 format",
        s
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_schema() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let db = DatabaseService::open(temp_dir.path().join("test.db")).await?;

        let conn = db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                (),
            )
            .await?;

        let mut tables = Vec::new();
        while let Some(row) = rows.next().await? {
            let name: String = row.get(0)?;
            tables.push(name);
        }

        for expected in ["entities", "person_links", "tasks", "chunk_vectors"] {
            assert!(tables.iter().any(|t| t == expected), "missing {}", expected);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("test.db");

        let db = DatabaseService::open(path.clone()).await?;
        db.close().await?;
        drop(db);

        // Second open against the same file must succeed unchanged
        let db = DatabaseService::open(path).await?;
        db.close().await?;
        Ok(())
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let formatted = format_timestamp(&now);
        let parsed = parse_timestamp(&formatted).unwrap();
        // Storage precision is microseconds
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_timestamp_parses_sqlite_format() {
        let parsed = parse_timestamp("2026-08-07 12:30:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-08-07T12:30:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_timestamp_ordering_is_lexicographic() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
    }
}
