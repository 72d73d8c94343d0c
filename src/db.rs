use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Thread-safe database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path with WAL mode.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    ///
    /// The mutex serialises every reader and writer, which is the ledger's
    /// single-writer guarantee.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, rusqlite::Error>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self.conn.lock().expect("database mutex poisoned");
        f(&conn)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cost (
    email   TEXT NOT NULL,
    date    TEXT NOT NULL,
    cost    REAL NOT NULL DEFAULT 0.0,
    PRIMARY KEY (email, date)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_schema() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM cost", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_primary_key_upsert() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cost (email, date, cost) VALUES ('a@b.c', '2026-01-01', 0.5)",
                [],
            )?;
            conn.execute(
                "INSERT INTO cost (email, date, cost) VALUES ('a@b.c', '2026-01-01', 0.25)
                 ON CONFLICT(email, date) DO UPDATE SET cost = cost + excluded.cost",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let cost: f64 = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT cost FROM cost WHERE email = 'a@b.c' AND date = '2026-01-01'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert!((cost - 0.75).abs() < 1e-12);
    }
}
