use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::Result;
use crate::model::Identity;

/// Create or refresh an identity record pushed from the profile subsystem.
pub fn upsert_identity(conn: &Connection, id: Uuid, display_name: &str) -> Result<Identity> {
    let display_name = display_name.trim();
    if display_name.is_empty() {
        return Err(crate::error::Error::validation("empty_display_name"));
    }
    conn.execute(
        "INSERT INTO identities (id, display_name) VALUES (?1, ?2) \
         ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
        params![id.to_string(), display_name],
    )?;
    Ok(Identity {
        id,
        display_name: display_name.into(),
    })
}

pub fn exists(conn: &Connection, id: Uuid) -> Result<bool> {
    let row: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM identities WHERE id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(row.is_some())
}

/// Display-name lookup for UI labels. Absence is not an error here; callers
/// fall back to a generic label.
pub fn display_name(conn: &Connection, id: Uuid) -> Result<Option<String>> {
    let name = conn
        .query_row(
            "SELECT display_name FROM identities WHERE id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name)
}
