use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Booking, Review};
use crate::policy;

#[derive(Debug, Clone, Deserialize)]
pub struct NewReview {
    pub rating: u8,
    pub content: String,
}

pub fn has_review(conn: &Connection, booking_id: Uuid, author: Uuid) -> Result<bool> {
    let row: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM reviews WHERE booking_id = ?1 AND author_id = ?2",
            params![booking_id.to_string(), author.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(row.is_some())
}

/// Write the requester's review of a completed booking. Eligibility comes
/// from the authorization policy; the UNIQUE constraint backstops a
/// double-submit race.
pub fn create_review(
    conn: &Connection,
    booking: &Booking,
    author: Uuid,
    today: Date,
    new: NewReview,
) -> Result<Review> {
    let actions = policy::permitted_actions(
        booking,
        author,
        today,
        has_review(conn, booking.id, author)?,
    );
    if !actions.review {
        return Err(Error::Forbidden);
    }
    if !(1..=5).contains(&new.rating) {
        return Err(Error::validation("invalid_rating"));
    }
    let content = new.content.trim();
    if content.is_empty() {
        return Err(Error::validation("empty_review"));
    }
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let res = conn.execute(
        "INSERT INTO reviews (id, booking_id, author_id, rating, content, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            booking.id.to_string(),
            author.to_string(),
            new.rating,
            content,
            now
        ],
    );
    match res {
        Ok(_) => Ok(Review {
            id,
            booking_id: booking.id,
            author_id: author,
            rating: new.rating,
            content: content.into(),
            created_at: now,
        }),
        Err(e)
            if matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::ConstraintViolation)
            ) =>
        {
            Err(Error::Conflict)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookings::test_support::seed_booking;
    use crate::bookings::{apply_transition, Transition};
    use crate::db;
    use time::macros::date;

    const AFTER_END: Date = date!(2026 - 09 - 10);

    #[test]
    fn gated_by_policy() {
        let conn = db::init_db(":memory:").unwrap();
        let (requester, provider, booking) = seed_booking(&conn);
        let review = NewReview {
            rating: 5,
            content: "great care".into(),
        };

        // still requested: nobody can review
        assert!(matches!(
            create_review(&conn, &booking, requester, AFTER_END, review.clone()),
            Err(Error::Forbidden)
        ));

        let accepted = apply_transition(&conn, booking.id, provider, Transition::Accept).unwrap();
        // before the end date it is still in progress
        assert!(matches!(
            create_review(&conn, &accepted, requester, date!(2026 - 09 - 03), review.clone()),
            Err(Error::Forbidden)
        ));
        // provider never reviews
        assert!(matches!(
            create_review(&conn, &accepted, provider, AFTER_END, review.clone()),
            Err(Error::Forbidden)
        ));

        let written = create_review(&conn, &accepted, requester, AFTER_END, review.clone()).unwrap();
        assert_eq!(written.rating, 5);
        assert!(has_review(&conn, booking.id, requester).unwrap());

        // second attempt: policy sees the existing review
        assert!(matches!(
            create_review(&conn, &accepted, requester, AFTER_END, review),
            Err(Error::Forbidden)
        ));
    }

    #[test]
    fn validates_rating_and_content() {
        let conn = db::init_db(":memory:").unwrap();
        let (requester, provider, booking) = seed_booking(&conn);
        let accepted = apply_transition(&conn, booking.id, provider, Transition::Accept).unwrap();
        assert!(matches!(
            create_review(
                &conn,
                &accepted,
                requester,
                AFTER_END,
                NewReview { rating: 0, content: "x".into() }
            ),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            create_review(
                &conn,
                &accepted,
                requester,
                AFTER_END,
                NewReview { rating: 6, content: "x".into() }
            ),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            create_review(
                &conn,
                &accepted,
                requester,
                AFTER_END,
                NewReview { rating: 3, content: "  ".into() }
            ),
            Err(Error::Validation(_))
        ));
    }
}
