//! SQLite persistence shared by the activation store and the trade ledger
//!
//! One connection guarded by a mutex; every mutation is a single statement or a
//! single transaction, so no lock is held across an `.await`.

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::errors::EscrowResult;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        init_escrow_db(&conn)?;
        info!("[STORE] Opened {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> EscrowResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_escrow_db(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> EscrowResult<T>) -> EscrowResult<T> {
        let mut guard = self.conn.lock();
        f(&mut guard)
    }
}

pub fn init_escrow_db(conn: &Connection) -> Result<(), rusqlite::Error> {
    create_tables(conn)?;
    // databases created before amounts were recorded
    add_column_if_missing(conn, "trades", "expected_amount", "INTEGER NOT NULL DEFAULT 0")
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<(), rusqlite::Error> {
    let names = {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(1))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    if names.iter().any(|n| n == column) {
        return Ok(());
    }
    info!("[STORE] Adding {}.{}", table, column);
    conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))
}

fn create_tables(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS activation_keys (
            code        TEXT PRIMARY KEY,
            used        INTEGER NOT NULL DEFAULT 0,
            created_by  TEXT,
            created_at  INTEGER NOT NULL,
            used_by     TEXT,
            used_at     INTEGER
        );
        CREATE TABLE IF NOT EXISTS activated_users (
            user_id       TEXT PRIMARY KEY,
            activated_at  INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS trades (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            initiator_id        TEXT NOT NULL,
            counterparty_id     TEXT NOT NULL,
            currency            TEXT NOT NULL,
            initiator_gives     TEXT NOT NULL,
            counterparty_gives  TEXT NOT NULL,
            expected_amount     INTEGER NOT NULL DEFAULT 0,
            deposit_address     TEXT UNIQUE,
            channel_ref         TEXT,
            status              TEXT NOT NULL,
            counterparty_role   TEXT,
            deposit_amount      INTEGER,
            released_by         TEXT,
            payout_address      TEXT,
            cancel_reason       TEXT,
            created_at          INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status);
        CREATE INDEX IF NOT EXISTS idx_trades_initiator ON trades(initiator_id);
        CREATE INDEX IF NOT EXISTS idx_trades_counterparty ON trades(counterparty_id);",
    )
}
