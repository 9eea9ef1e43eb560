use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT,
    last_sync_at TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS categories (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    icon TEXT,
    is_default INTEGER DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    amount INTEGER NOT NULL,
    txn_type TEXT NOT NULL,
    merchant TEXT NOT NULL,
    raw_merchant TEXT NOT NULL,
    category_id TEXT,
    subcategory TEXT,
    description TEXT,
    transaction_date TEXT NOT NULL,
    bank TEXT NOT NULL,
    reference TEXT,
    email_message_id TEXT NOT NULL,
    raw_email_subject TEXT,
    confidence REAL NOT NULL,
    used_llm INTEGER DEFAULT 0,
    is_verified INTEGER DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_message
    ON transactions(user_id, email_message_id);

CREATE INDEX IF NOT EXISTS idx_transactions_content
    ON transactions(user_id, amount, raw_merchant, transaction_date);
";

/// Name of the catch-all category the categorizer falls back to.
pub const FALLBACK_CATEGORY: &str = "Other";

// (name, icon)
const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("Food & Dining", "🍽️"),
    ("Groceries", "🛒"),
    ("Shopping", "🛍️"),
    ("Transport", "🚕"),
    ("Bills & Utilities", "💡"),
    ("Entertainment", "🎬"),
    ("Health", "💊"),
    ("Travel", "✈️"),
    ("Education", "📚"),
    ("Transfers", "🔁"),
    ("Income", "💰"),
    ("Investments", "📈"),
    (FALLBACK_CATEGORY, "📦"),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Create the user row on first sight and seed its category catalog.
/// Returns true when the user was new.
pub fn ensure_user(conn: &Connection, user_id: &str, email: Option<&str>) -> Result<bool> {
    let existing: Option<String> = conn
        .query_row("SELECT id FROM users WHERE id = ?1", params![user_id], |row| row.get(0))
        .optional()?;
    if existing.is_some() {
        return Ok(false);
    }

    conn.execute("INSERT INTO users (id, email) VALUES (?1, ?2)", params![user_id, email])?;
    for (name, icon) in DEFAULT_CATEGORIES {
        conn.execute(
            "INSERT INTO categories (id, user_id, name, icon, is_default) VALUES (?1, ?2, ?3, ?4, 1)",
            params![uuid::Uuid::new_v4().to_string(), user_id, name, icon],
        )?;
    }
    Ok(true)
}
