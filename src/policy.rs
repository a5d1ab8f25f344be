use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

use crate::model::{Booking, BookingStatus};

/// Actions the policy may grant on a booking. Everything is denied by
/// default; entry points consult this before touching rooms, edits or
/// reviews and fail closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermittedActions {
    pub edit: bool,
    pub cancel: bool,
    pub chat: bool,
    pub review: bool,
}

/// Pure decision function mapping (booking, actor, today) to permitted
/// actions. `has_review` is the caller-supplied fact of an existing review by
/// this actor for this booking.
pub fn permitted_actions(
    booking: &Booking,
    actor: Uuid,
    today: Date,
    has_review: bool,
) -> PermittedActions {
    let is_requester = actor == booking.requester_id;
    let own_pending = is_requester && booking.status == BookingStatus::Requested;
    PermittedActions {
        edit: own_pending,
        cancel: own_pending,
        // the gate that prevents premature or abandoned-booking conversations
        chat: booking.is_party(actor) && booking.status == BookingStatus::Accepted,
        review: is_requester && booking.is_completed(today) && !has_review,
    }
}
