use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{uuid_from_sql, Message, Room};
use crate::{identities, messages, reads};

/// Find or create the room for a (requester, provider, booking) triple.
///
/// Lookup, insert, and on a UNIQUE violation re-run the lookup: two
/// participants opening the same booking's chat for the first time converge
/// on one row without any application-level lock. The storage constraint is
/// the only arbiter of who won. Idempotent: N calls yield the same room id.
pub fn get_or_create_room(
    conn: &Connection,
    requester: Uuid,
    provider: Uuid,
    booking_id: Uuid,
) -> Result<Room> {
    if let Some(room) = find_by_triple(conn, requester, provider, booking_id)? {
        return Ok(room);
    }
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let res = conn.execute(
        "INSERT INTO rooms (id, booking_id, requester_id, provider_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id.to_string(),
            booking_id.to_string(),
            requester.to_string(),
            provider.to_string(),
            now
        ],
    );
    match res {
        Ok(_) => Ok(Room {
            id,
            booking_id,
            requester_id: requester,
            provider_id: provider,
            last_message_text: None,
            last_message_at: None,
            created_at: now,
        }),
        Err(e) if is_unique_violation(&e) => {
            // lost the first-open race; the winner's row is now visible
            find_by_triple(conn, requester, provider, booking_id)?.ok_or(Error::Conflict)
        }
        Err(e) => Err(e.into()),
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

fn find_by_triple(
    conn: &Connection,
    requester: Uuid,
    provider: Uuid,
    booking_id: Uuid,
) -> Result<Option<Room>> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_id, requester_id, provider_id, last_message_text, \
                last_message_at, created_at \
         FROM rooms WHERE requester_id = ?1 AND provider_id = ?2 AND booking_id = ?3",
    )?;
    let raw = stmt
        .query_row(
            params![
                requester.to_string(),
                provider.to_string(),
                booking_id.to_string()
            ],
            row_to_raw,
        )
        .optional()?;
    raw.map(raw_to_room).transpose()
}

pub fn get_room(conn: &Connection, id: Uuid) -> Result<Room> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_id, requester_id, provider_id, last_message_text, \
                last_message_at, created_at \
         FROM rooms WHERE id = ?1",
    )?;
    let raw = stmt.query_row([id.to_string()], row_to_raw).optional()?;
    raw.map(raw_to_room)
        .transpose()?
        .ok_or(Error::NotFound("room"))
}

type RawRoom = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<i64>,
    i64,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRoom> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn raw_to_room(raw: RawRoom) -> Result<Room> {
    let (id, booking_id, requester_id, provider_id, last_text, last_at, created_at) = raw;
    Ok(Room {
        id: uuid_from_sql(&id)?,
        booking_id: uuid_from_sql(&booking_id)?,
        requester_id: uuid_from_sql(&requester_id)?,
        provider_id: uuid_from_sql(&provider_id)?,
        last_message_text: last_text,
        last_message_at: last_at,
        created_at,
    })
}

/// One row of the room-list view: the room, who the conversation is with,
/// the newest message and whether it is still unread for the viewer.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub room: Room,
    pub counterpart_name: Option<String>,
    pub last_message: Option<Message>,
    pub unread: bool,
}

/// Rooms the actor belongs to, most recently active first. The last message
/// is read from the message stream itself; the room's cached summary is
/// advisory and only orders the list.
pub fn list_rooms_for_actor(conn: &Connection, actor: Uuid) -> Result<Vec<RoomSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_id, requester_id, provider_id, last_message_text, \
                last_message_at, created_at \
         FROM rooms WHERE requester_id = ?1 OR provider_id = ?1 \
         ORDER BY COALESCE(last_message_at, created_at) DESC, id",
    )?;
    let raws = stmt
        .query_map([actor.to_string()], row_to_raw)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(raws.len());
    for raw in raws {
        let room = raw_to_room(raw)?;
        let last_message = messages::last_message(conn, room.id)?;
        let own_cursor = reads::get_receipt(conn, room.id, actor)?;
        let unread = reads::unread_flag(last_message.as_ref(), actor, own_cursor);
        let counterpart_name = match room.counterpart_of(actor) {
            Some(other) => identities::display_name(conn, other)?,
            None => None,
        };
        out.push(RoomSummary {
            room,
            counterpart_name,
            last_message,
            unread,
        });
    }
    Ok(out)
}
