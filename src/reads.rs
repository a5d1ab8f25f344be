use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Message, Room};

/// Advance a participant's read cursor to `message_id`.
///
/// The upsert only moves the cursor forward: a client re-rendering stale
/// state can replay old mark-read calls without regressing the counterpart's
/// seen indicators. Returns the new cursor when it actually advanced, `None`
/// when the stored value already covered it.
pub fn mark_read(
    conn: &Connection,
    room: &Room,
    participant: Uuid,
    message_id: i64,
) -> Result<Option<i64>> {
    if !room.is_participant(participant) {
        return Err(Error::Forbidden);
    }
    let known: Option<i64> = conn
        .query_row(
            "SELECT id FROM messages WHERE id = ?1 AND room_id = ?2",
            params![message_id, room.id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if known.is_none() {
        return Err(Error::NotFound("message"));
    }
    let changed = conn.execute(
        "INSERT INTO read_receipts (room_id, participant_id, last_read_message_id) \
         VALUES (?1, ?2, ?3) \
         ON CONFLICT(room_id, participant_id) DO UPDATE \
         SET last_read_message_id = excluded.last_read_message_id \
         WHERE read_receipts.last_read_message_id IS NULL \
            OR excluded.last_read_message_id > read_receipts.last_read_message_id",
        params![room.id.to_string(), participant.to_string(), message_id],
    )?;
    Ok((changed > 0).then_some(message_id))
}

/// The participant's stored cursor; `None` until their first read.
pub fn get_receipt(conn: &Connection, room_id: Uuid, participant: Uuid) -> Result<Option<i64>> {
    let cursor: Option<Option<i64>> = conn
        .query_row(
            "SELECT last_read_message_id FROM read_receipts \
             WHERE room_id = ?1 AND participant_id = ?2",
            params![room_id.to_string(), participant.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(cursor.flatten())
}

/// Whether the counterpart has seen one of the viewer's own messages: their
/// cursor has reached or passed it.
pub fn is_seen_by_counterpart(
    message: &Message,
    viewer: Uuid,
    counterpart_cursor: Option<i64>,
) -> bool {
    message.sender_id == viewer && counterpart_cursor.map_or(false, |c| c >= message.id)
}

/// Room-list unread flag: the newest message came from the other side and is
/// past the viewer's own cursor.
pub fn unread_flag(last: Option<&Message>, participant: Uuid, own_cursor: Option<i64>) -> bool {
    match last {
        Some(m) => m.sender_id != participant && m.id > own_cursor.unwrap_or(0),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookings::test_support::seed_booking;
    use crate::{db, messages, rooms};

    fn setup(conn: &Connection) -> (Uuid, Uuid, Room) {
        let (requester, provider, booking) = seed_booking(conn);
        let room = rooms::get_or_create_room(conn, requester, provider, booking.id).unwrap();
        (requester, provider, room)
    }

    #[test]
    fn cursor_never_regresses() {
        let conn = db::init_db(":memory:").unwrap();
        let (requester, provider, room) = setup(&conn);
        let m1 = messages::post_message(&conn, &room, requester, "1").unwrap();
        let m2 = messages::post_message(&conn, &room, requester, "2").unwrap();

        assert_eq!(
            mark_read(&conn, &room, provider, m2.id).unwrap(),
            Some(m2.id)
        );
        // an out-of-order update from a stale client is a no-op
        assert_eq!(mark_read(&conn, &room, provider, m1.id).unwrap(), None);
        assert_eq!(get_receipt(&conn, room.id, provider).unwrap(), Some(m2.id));
    }

    #[test]
    fn first_read_sets_null_cursor() {
        let conn = db::init_db(":memory:").unwrap();
        let (requester, provider, room) = setup(&conn);
        let m1 = messages::post_message(&conn, &room, requester, "1").unwrap();
        assert_eq!(get_receipt(&conn, room.id, provider).unwrap(), None);
        assert_eq!(
            mark_read(&conn, &room, provider, m1.id).unwrap(),
            Some(m1.id)
        );
        // replaying the same id changes nothing
        assert_eq!(mark_read(&conn, &room, provider, m1.id).unwrap(), None);
    }

    #[test]
    fn rejects_foreign_participants_and_unknown_messages() {
        let conn = db::init_db(":memory:").unwrap();
        let (requester, _, room) = setup(&conn);
        let m1 = messages::post_message(&conn, &room, requester, "1").unwrap();
        assert!(matches!(
            mark_read(&conn, &room, Uuid::new_v4(), m1.id),
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            mark_read(&conn, &room, requester, m1.id + 999),
            Err(Error::NotFound("message"))
        ));
    }

    #[test]
    fn seen_partitions_at_the_counterpart_cursor() {
        let conn = db::init_db(":memory:").unwrap();
        let (requester, provider, room) = setup(&conn);
        let m1 = messages::post_message(&conn, &room, requester, "1").unwrap();
        let m2 = messages::post_message(&conn, &room, requester, "2").unwrap();
        let m3 = messages::post_message(&conn, &room, requester, "3").unwrap();
        mark_read(&conn, &room, provider, m2.id).unwrap();

        let cursor = get_receipt(&conn, room.id, provider).unwrap();
        assert!(is_seen_by_counterpart(&m1, requester, cursor));
        assert!(is_seen_by_counterpart(&m2, requester, cursor));
        assert!(!is_seen_by_counterpart(&m3, requester, cursor));
        // the provider's own view of the requester's messages is not "seen"
        assert!(!is_seen_by_counterpart(&m1, provider, cursor));
    }

    #[test]
    fn unread_flag_rules() {
        let conn = db::init_db(":memory:").unwrap();
        let (requester, provider, room) = setup(&conn);
        assert!(!unread_flag(None, provider, None));

        let m1 = messages::post_message(&conn, &room, requester, "1").unwrap();
        // counterpart with no cursor yet
        assert!(unread_flag(Some(&m1), provider, None));
        // the sender's own message is never unread for them
        assert!(!unread_flag(Some(&m1), requester, None));

        mark_read(&conn, &room, provider, m1.id).unwrap();
        let cursor = get_receipt(&conn, room.id, provider).unwrap();
        assert!(!unread_flag(Some(&m1), provider, cursor));
    }
}
