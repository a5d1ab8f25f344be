use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identities;
use crate::model::{date_from_sql, date_to_sql, uuid_from_sql, Booking, BookingStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub provider_id: Uuid,
    pub start_date: Date,
    pub end_date: Date,
    pub care_details: String,
    #[serde(default)]
    pub contact_phone: Option<String>,
}

/// Partial update of booking content; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingEdit {
    pub start_date: Option<Date>,
    pub end_date: Option<Date>,
    pub care_details: Option<String>,
    pub contact_phone: Option<String>,
}

/// Party-driven status transitions. "Completed" is deliberately absent: it is
/// a computed predicate, not a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Accept,
    Reject,
    Cancel,
}

/// Create a booking in `requested` state on behalf of the requester.
pub fn create_booking(conn: &Connection, requester: Uuid, new: NewBooking) -> Result<Booking> {
    if new.provider_id == requester {
        return Err(Error::validation("provider_is_requester"));
    }
    if !identities::exists(conn, new.provider_id)? {
        return Err(Error::NotFound("provider"));
    }
    if new.start_date > new.end_date {
        return Err(Error::validation("invalid_date_range"));
    }
    let care_details = new.care_details.trim();
    if care_details.is_empty() {
        return Err(Error::validation("empty_care_details"));
    }
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO bookings \
         (id, requester_id, provider_id, start_date, end_date, care_details, contact_phone, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'requested', ?8)",
        params![
            id.to_string(),
            requester.to_string(),
            new.provider_id.to_string(),
            date_to_sql(new.start_date),
            date_to_sql(new.end_date),
            care_details,
            new.contact_phone,
            now
        ],
    )?;
    Ok(Booking {
        id,
        requester_id: requester,
        provider_id: new.provider_id,
        start_date: new.start_date,
        end_date: new.end_date,
        care_details: care_details.into(),
        contact_phone: new.contact_phone,
        status: BookingStatus::Requested,
        created_at: now,
    })
}

pub fn get_booking(conn: &Connection, id: Uuid) -> Result<Booking> {
    fetch_booking(conn, id)?.ok_or(Error::NotFound("booking"))
}

fn fetch_booking(conn: &Connection, id: Uuid) -> Result<Option<Booking>> {
    let mut stmt = conn.prepare(
        "SELECT id, requester_id, provider_id, start_date, end_date, care_details, \
                contact_phone, status, created_at \
         FROM bookings WHERE id = ?1",
    )?;
    let raw = stmt
        .query_row([id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })
        .optional()?;
    let Some((id, requester, provider, start, end, details, phone, status, created_at)) = raw
    else {
        return Ok(None);
    };
    Ok(Some(Booking {
        id: uuid_from_sql(&id)?,
        requester_id: uuid_from_sql(&requester)?,
        provider_id: uuid_from_sql(&provider)?,
        start_date: date_from_sql(&start)?,
        end_date: date_from_sql(&end)?,
        care_details: details,
        contact_phone: phone,
        // fails fast on unknown vocabularies, e.g. legacy "cancelled_by_user"
        status: status.parse()?,
        created_at,
    }))
}

/// Bookings where the actor is either party, newest first.
pub fn list_bookings_for_actor(conn: &Connection, actor: Uuid) -> Result<Vec<Booking>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM bookings WHERE requester_id = ?1 OR provider_id = ?1 \
         ORDER BY created_at DESC, id",
    )?;
    let ids = stmt
        .query_map([actor.to_string()], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(b) = fetch_booking(conn, uuid_from_sql(&id)?)? {
            out.push(b);
        }
    }
    Ok(out)
}

/// Edit booking content. Only the requester may edit, and only while the
/// booking is still `requested`; everything after that point is immutable.
pub fn edit_booking(
    conn: &Connection,
    booking_id: Uuid,
    actor: Uuid,
    edit: BookingEdit,
) -> Result<Booking> {
    let booking = get_booking(conn, booking_id)?;
    if actor != booking.requester_id {
        return Err(Error::Forbidden);
    }
    if booking.status != BookingStatus::Requested {
        return Err(Error::Forbidden);
    }
    let start_date = edit.start_date.unwrap_or(booking.start_date);
    let end_date = edit.end_date.unwrap_or(booking.end_date);
    if start_date > end_date {
        return Err(Error::validation("invalid_date_range"));
    }
    let care_details = match edit.care_details {
        Some(d) => {
            let d = d.trim().to_string();
            if d.is_empty() {
                return Err(Error::validation("empty_care_details"));
            }
            d
        }
        None => booking.care_details,
    };
    let contact_phone = match edit.contact_phone {
        Some(p) if p.trim().is_empty() => None,
        Some(p) => Some(p),
        None => booking.contact_phone,
    };
    conn.execute(
        "UPDATE bookings SET start_date = ?2, end_date = ?3, care_details = ?4, contact_phone = ?5 \
         WHERE id = ?1",
        params![
            booking_id.to_string(),
            date_to_sql(start_date),
            date_to_sql(end_date),
            care_details,
            contact_phone
        ],
    )?;
    Ok(Booking {
        start_date,
        end_date,
        care_details,
        contact_phone,
        ..booking
    })
}

/// Apply a party-driven status transition. Transitions are one-way: once a
/// terminal state is reached nothing can flip it back.
pub fn apply_transition(
    conn: &Connection,
    booking_id: Uuid,
    actor: Uuid,
    transition: Transition,
) -> Result<Booking> {
    let booking = get_booking(conn, booking_id)?;
    let next = match (booking.status, transition) {
        (BookingStatus::Requested, Transition::Accept) if actor == booking.provider_id => {
            BookingStatus::Accepted
        }
        (BookingStatus::Requested, Transition::Reject) if actor == booking.provider_id => {
            BookingStatus::Rejected
        }
        (BookingStatus::Requested, Transition::Cancel) if actor == booking.requester_id => {
            BookingStatus::Cancelled
        }
        _ => return Err(Error::Forbidden),
    };
    conn.execute(
        "UPDATE bookings SET status = ?2 WHERE id = ?1",
        params![booking_id.to_string(), next.as_str()],
    )?;
    Ok(Booking {
        status: next,
        ..booking
    })
}
