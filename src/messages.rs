use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{uuid_from_sql, Message, Room};

const MAX_BODY_CHARS: usize = 4000;
const MAX_PAGE: usize = 200;

/// Append a message to a room's stream. The store assigns the id; the room's
/// last-message summary cache is refreshed best-effort and can never fail the
/// send itself.
pub fn post_message(conn: &Connection, room: &Room, sender: Uuid, body: &str) -> Result<Message> {
    let body = body.trim();
    if body.is_empty() {
        return Err(Error::validation("empty_message"));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(Error::validation("message_too_long"));
    }
    if !room.is_participant(sender) {
        return Err(Error::Forbidden);
    }
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO messages (room_id, sender_id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![room.id.to_string(), sender.to_string(), body, now],
    )?;
    let id = conn.last_insert_rowid();

    if let Err(e) = conn.execute(
        "UPDATE rooms SET last_message_text = ?2, last_message_at = ?3 WHERE id = ?1",
        params![room.id.to_string(), body, now],
    ) {
        tracing::warn!(room = %room.id, error = %e, "room summary cache update failed");
    }

    Ok(Message {
        id,
        room_id: room.id,
        sender_id: sender,
        body: body.into(),
        created_at: now,
    })
}

/// Messages after the given id, ascending. `after = None` starts from the
/// beginning; reconnecting clients use their newest known id to close gaps.
pub fn list_messages(
    conn: &Connection,
    room_id: Uuid,
    after: Option<i64>,
    limit: usize,
) -> Result<Vec<Message>> {
    let limit = limit.clamp(1, MAX_PAGE) as i64;
    let mut stmt = conn.prepare(
        "SELECT id, room_id, sender_id, body, created_at FROM messages \
         WHERE room_id = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
    )?;
    let raws = stmt
        .query_map(
            params![room_id.to_string(), after.unwrap_or(0), limit],
            row_to_raw,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raws.into_iter().map(raw_to_message).collect()
}

/// Newest message in the room, straight from the stream (not the cache).
pub fn last_message(conn: &Connection, room_id: Uuid) -> Result<Option<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, room_id, sender_id, body, created_at FROM messages \
         WHERE room_id = ?1 ORDER BY id DESC LIMIT 1",
    )?;
    let raw = stmt
        .query_row([room_id.to_string()], row_to_raw)
        .optional()?;
    raw.map(raw_to_message).transpose()
}

type RawMessage = (i64, String, String, String, i64);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessage> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn raw_to_message(raw: RawMessage) -> Result<Message> {
    let (id, room_id, sender_id, body, created_at) = raw;
    Ok(Message {
        id,
        room_id: uuid_from_sql(&room_id)?,
        sender_id: uuid_from_sql(&sender_id)?,
        body,
        created_at,
    })
}
