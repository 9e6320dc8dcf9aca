use rusqlite::{Connection, Result};

/// Initialise memory tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_memories_table(conn)?;
    create_logs_table(conn)?;
    Ok(())
}

fn create_memories_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id              TEXT PRIMARY KEY,
            server_id       TEXT NOT NULL,
            user_id         TEXT,
            content         TEXT NOT NULL,
            embedding       BLOB NOT NULL,
            importance      REAL NOT NULL DEFAULT 0.5,
            created_at      TEXT NOT NULL,
            last_recalled_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_memories_server
            ON memories(server_id);
        CREATE INDEX IF NOT EXISTS idx_memories_server_user
            ON memories(server_id, user_id);",
    )
}

/// Log rows, partitioned by `server_id`, pruned probabilistically to the
/// newest 10,000 rows per server (§6 Persisted state).
fn create_logs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS logs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            server_id   TEXT NOT NULL,
            level       TEXT NOT NULL,
            message     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_logs_server
            ON logs(server_id, created_at DESC);",
    )
}
