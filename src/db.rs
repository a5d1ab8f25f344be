use anyhow::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000; PRAGMA foreign_keys=ON;";

/// Open a pooled SQLite database and run migrations.
pub fn open_pool<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let manager =
        SqliteConnectionManager::file(path).with_init(|conn| conn.execute_batch(PRAGMAS));
    let pool = Pool::new(manager)?;
    pool.get()?.execute_batch(SCHEMA)?;
    Ok(pool)
}

/// Single-connection variant used by unit tests (`:memory:` databases).
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
  id TEXT PRIMARY KEY,
  display_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bookings (
  id TEXT PRIMARY KEY,
  requester_id TEXT NOT NULL REFERENCES identities(id),
  provider_id TEXT NOT NULL REFERENCES identities(id),
  start_date TEXT NOT NULL,
  end_date TEXT NOT NULL,
  care_details TEXT NOT NULL,
  contact_phone TEXT,
  status TEXT NOT NULL DEFAULT 'requested',
  created_at INTEGER NOT NULL
);

-- The UNIQUE constraint on the triple is the sole arbiter of the
-- first-open creation race.
CREATE TABLE IF NOT EXISTS rooms (
  id TEXT PRIMARY KEY,
  booking_id TEXT NOT NULL REFERENCES bookings(id),
  requester_id TEXT NOT NULL,
  provider_id TEXT NOT NULL,
  last_message_text TEXT,
  last_message_at INTEGER,
  created_at INTEGER NOT NULL,
  UNIQUE (requester_id, provider_id, booking_id)
);

-- AUTOINCREMENT keeps ids strictly increasing within every room even
-- after deletes; the id is the per-room total order.
CREATE TABLE IF NOT EXISTS messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  room_id TEXT NOT NULL REFERENCES rooms(id),
  sender_id TEXT NOT NULL,
  body TEXT NOT NULL,
  created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_room ON messages(room_id, id);

CREATE TABLE IF NOT EXISTS read_receipts (
  room_id TEXT NOT NULL REFERENCES rooms(id),
  participant_id TEXT NOT NULL,
  last_read_message_id INTEGER,
  PRIMARY KEY (room_id, participant_id)
);

CREATE TABLE IF NOT EXISTS reviews (
  id TEXT PRIMARY KEY,
  booking_id TEXT NOT NULL REFERENCES bookings(id),
  author_id TEXT NOT NULL,
  rating INTEGER NOT NULL,
  content TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  UNIQUE (booking_id, author_id)
);
"#;
