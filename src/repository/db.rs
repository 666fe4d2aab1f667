//! Database Connection and Setup
//!
//! Manages SQLite database connection and migrations.

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to the (possibly not yet opened) connection
pub type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// Database state wrapper
#[derive(Clone)]
pub struct DbState {
    pub conn: SharedConnection,
    pub db_path: PathBuf,
}

impl DbState {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            conn: Arc::new(Mutex::new(None)),
            db_path,
        }
    }

    /// Connection handle for repositories
    pub fn connection(&self) -> SharedConnection {
        self.conn.clone()
    }

    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Drop the connection; later repository calls fail with "not initialized"
    pub async fn close(&self) {
        let mut guard = self.conn.lock().await;
        *guard = None;
    }
}

/// Open the database at `db_path` (":memory:" for a private in-memory db)
/// and bring its schema up to date.
pub async fn init_db(db_path: &Path) -> Result<DbState, String> {
    let conn = Connection::open(db_path).map_err(|e| format!("Failed to open db: {}", e))?;

    run_migrations(&conn)?;

    let state = DbState::new(db_path.to_path_buf());
    *state.conn.lock().await = Some(conn);

    log::info!("Database ready at {}", db_path.display());
    Ok(state)
}

/// Check if a column exists in a table
fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
    let query = format!("PRAGMA table_info({})", table);
    let Ok(mut stmt) = conn.prepare(&query) else {
        return false;
    };
    let Ok(mut rows) = stmt.query([]) else {
        return false;
    };
    while let Ok(Some(row)) = rows.next() {
        if let Ok(name) = row.get::<_, String>(1) {
            if name == column {
                return true;
            }
        }
    }
    false
}

/// Run database migrations
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS work_items (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT NOT NULL,
            completion INTEGER NOT NULL DEFAULT 0,
            parent_id TEXT,
            start_date TEXT,
            finish_date TEXT,
            duration_days INTEGER,
            project_id TEXT NOT NULL,
            created_at INTEGER,
            updated_at INTEGER
        )",
        [],
    )
    .map_err(|e| e.to_string())?;

    // Grouping and milestone columns arrived after the first schema
    if !column_exists(conn, "work_items", "is_milestone") {
        conn.execute(
            "ALTER TABLE work_items ADD COLUMN is_milestone INTEGER NOT NULL DEFAULT 0",
            [],
        )
        .map_err(|e| format!("Failed to add is_milestone: {}", e))?;
    }

    if !column_exists(conn, "work_items", "package") {
        conn.execute("ALTER TABLE work_items ADD COLUMN package TEXT", [])
            .map_err(|e| format!("Failed to add package: {}", e))?;
    }

    if !column_exists(conn, "work_items", "category") {
        conn.execute("ALTER TABLE work_items ADD COLUMN category TEXT", [])
            .map_err(|e| format!("Failed to add category: {}", e))?;
    }

    // Faster parent-child and scope queries
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_work_items_parent ON work_items(parent_id)",
        [],
    )
    .map_err(|e| e.to_string())?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_work_items_project ON work_items(project_id, package)",
        [],
    )
    .map_err(|e| e.to_string())?;

    Ok(())
}
