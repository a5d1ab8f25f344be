use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::Date;
use uuid::Uuid;

use crate::error::Error;

/// Booking lifecycle status. `requested` is the only state that permits
/// party-driven transitions; the other three are terminal. "Completed" is
/// not a stored state, see [`Booking::is_completed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Requested,
    Accepted,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Requested => "requested",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Requested)
    }
}

impl FromStr for BookingStatus {
    type Err = Error;

    /// Unrecognized stored values fail fast instead of defaulting to
    /// `requested` behaviour.
    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "requested" => Ok(BookingStatus::Requested),
            "accepted" => Ok(BookingStatus::Accepted),
            "rejected" => Ok(BookingStatus::Rejected),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(Error::Validation(format!("unknown_status:{other}"))),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A care arrangement between a requester and a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub provider_id: Uuid,
    pub start_date: Date,
    pub end_date: Date,
    pub care_details: String,
    pub contact_phone: Option<String>,
    pub status: BookingStatus,
    pub created_at: i64,
}

impl Booking {
    /// Derived sub-state: accepted and the care period is over. Gates review
    /// eligibility and list-view labels; the single call site for the date
    /// comparison.
    pub fn is_completed(&self, today: Date) -> bool {
        self.status == BookingStatus::Accepted && today > self.end_date
    }

    pub fn is_party(&self, actor: Uuid) -> bool {
        actor == self.requester_id || actor == self.provider_id
    }
}

/// A conversation scoped to one booking and its two fixed participants.
/// At most one room exists per (requester, provider, booking) triple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub requester_id: Uuid,
    pub provider_id: Uuid,
    /// Advisory summary cache for list views; never authoritative.
    pub last_message_text: Option<String>,
    pub last_message_at: Option<i64>,
    pub created_at: i64,
}

impl Room {
    pub fn is_participant(&self, actor: Uuid) -> bool {
        actor == self.requester_id || actor == self.provider_id
    }

    pub fn counterpart_of(&self, actor: Uuid) -> Option<Uuid> {
        if actor == self.requester_id {
            Some(self.provider_id)
        } else if actor == self.provider_id {
            Some(self.requester_id)
        } else {
            None
        }
    }
}

/// Immutable chat message. `id` is store-assigned and strictly increasing
/// within a room; it is the ordering and receipt-comparison key, not the
/// wall-clock timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: i64,
}

/// Per (room, participant) read cursor. `last_read_message_id` only ever
/// advances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub room_id: Uuid,
    pub participant_id: Uuid,
    pub last_read_message_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Review {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub author_id: Uuid,
    pub rating: u8,
    pub content: String,
    pub created_at: i64,
}

/// Identity record synced from the external profile subsystem. Display names
/// are used for UI labels only, never for authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
}

pub(crate) const DATE_FMT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

pub(crate) fn date_to_sql(d: Date) -> String {
    // the format description is static and covers every representable Date
    d.format(&DATE_FMT).expect("date format")
}

pub(crate) fn date_from_sql(s: &str) -> Result<Date, Error> {
    Date::parse(s, &DATE_FMT).map_err(|_| Error::Validation(format!("malformed_date:{s}")))
}

pub(crate) fn uuid_from_sql(s: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(s).map_err(|_| Error::Validation(format!("malformed_id:{s}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn status_round_trip_and_unknowns() {
        for s in ["requested", "accepted", "rejected", "cancelled"] {
            assert_eq!(s.parse::<BookingStatus>().unwrap().as_str(), s);
        }
        // legacy vocabulary from older revisions is a defect, not an alias
        assert!("cancelled_by_user".parse::<BookingStatus>().is_err());
        assert!("".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn completed_is_derived_from_status_and_end_date() {
        let mut b = Booking {
            id: Uuid::new_v4(),
            requester_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            start_date: date!(2026 - 01 - 01),
            end_date: date!(2026 - 01 - 05),
            care_details: "two cats".into(),
            contact_phone: None,
            status: BookingStatus::Accepted,
            created_at: 0,
        };
        assert!(b.is_completed(date!(2026 - 01 - 06)));
        assert!(!b.is_completed(date!(2026 - 01 - 05)));
        b.status = BookingStatus::Requested;
        assert!(!b.is_completed(date!(2026 - 01 - 06)));
    }

    #[test]
    fn date_sql_round_trip() {
        let d = date!(2026 - 08 - 29);
        assert_eq!(date_to_sql(d), "2026-08-29");
        assert_eq!(date_from_sql("2026-08-29").unwrap(), d);
        assert!(date_from_sql("29/08/2026").is_err());
    }
}
