use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ReservationError;

/// Booking request lifecycle.
///
/// ```text
/// PENDING ──► PURCHASED ──► SUCCEED
///    │
///    ├──► UN_PURCHASED
///    └──► CANCELED
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Purchased,
    UnPurchased,
    Canceled,
    Succeed,
}

impl BookingStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Purchased => "PURCHASED",
            BookingStatus::UnPurchased => "UN_PURCHASED",
            BookingStatus::Canceled => "CANCELED",
            BookingStatus::Succeed => "SUCCEED",
        }
    }

    /// No transition leaves this state. `UN_PURCHASED` ends the booking, not the user.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::UnPurchased | BookingStatus::Canceled | BookingStatus::Succeed
        )
    }

    /// The transition table. Everything not listed here is rejected.
    pub const fn can_transition_to(&self, to: BookingStatus) -> bool {
        matches!(
            (self, to),
            (BookingStatus::Pending, BookingStatus::Purchased)
                | (BookingStatus::Pending, BookingStatus::UnPurchased)
                | (BookingStatus::Pending, BookingStatus::Canceled)
                | (BookingStatus::Purchased, BookingStatus::Succeed)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = ReservationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BookingStatus::Pending),
            "PURCHASED" => Ok(BookingStatus::Purchased),
            "UN_PURCHASED" => Ok(BookingStatus::UnPurchased),
            "CANCELED" => Ok(BookingStatus::Canceled),
            "SUCCEED" => Ok(BookingStatus::Succeed),
            other => Err(ReservationError::Storage(format!("unknown booking status {other}"))),
        }
    }
}

/// The events that may move a booking. Each one names exactly one edge of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Creator cancels a booking they have not paid yet.
    UserCancel,
    /// The same creator started a newer booking.
    Supersede,
    /// Payment session window elapsed without a success callback.
    Expire,
    /// Successful, idempotent gateway callback.
    PaymentConfirmed,
    /// Check-in passed; owner payout emitted.
    Settle,
    /// Operator withdrew the reservation.
    OperatorVoid,
}

impl Transition {
    pub const fn from_status(&self) -> BookingStatus {
        match self {
            Transition::Settle => BookingStatus::Purchased,
            _ => BookingStatus::Pending,
        }
    }

    pub const fn to_status(&self) -> BookingStatus {
        match self {
            Transition::UserCancel | Transition::Supersede | Transition::Expire => {
                BookingStatus::UnPurchased
            }
            Transition::PaymentConfirmed => BookingStatus::Purchased,
            Transition::Settle => BookingStatus::Succeed,
            Transition::OperatorVoid => BookingStatus::Canceled,
        }
    }

    /// Whether the booking gives its rooms back once this edge is taken.
    pub const fn releases_inventory(&self) -> bool {
        matches!(self.to_status(), BookingStatus::UnPurchased | BookingStatus::Canceled)
    }

    /// Checks the edge against the booking's current state.
    pub fn apply(&self, current: BookingStatus) -> Result<BookingStatus, ReservationError> {
        if current != self.from_status() || !current.can_transition_to(self.to_status()) {
            return Err(ReservationError::InvalidStateTransition {
                from: current.to_string(),
                to: self.to_status().to_string(),
            });
        }
        Ok(self.to_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Purchased,
        BookingStatus::UnPurchased,
        BookingStatus::Canceled,
        BookingStatus::Succeed,
    ];

    #[test]
    fn table_has_exactly_four_edges() {
        let edges: Vec<_> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();
        assert_eq!(edges.len(), 4);
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            assert!(ALL.iter().all(|to| !from.can_transition_to(*to)), "{from} leaks");
        }
    }

    #[test]
    fn every_transition_is_in_the_table() {
        for t in [
            Transition::UserCancel,
            Transition::Supersede,
            Transition::Expire,
            Transition::PaymentConfirmed,
            Transition::Settle,
            Transition::OperatorVoid,
        ] {
            assert!(t.from_status().can_transition_to(t.to_status()), "{t:?}");
            assert_eq!(t.apply(t.from_status()).unwrap(), t.to_status());
        }
    }

    #[test]
    fn settle_requires_purchased() {
        let err = Transition::Settle.apply(BookingStatus::Pending).unwrap_err();
        assert!(matches!(err, ReservationError::InvalidStateTransition { .. }));
        assert_eq!(
            err.to_string(),
            "Invalid state transition from PENDING to SUCCEED"
        );
    }

    #[test]
    fn expire_twice_is_rejected() {
        let after = Transition::Expire.apply(BookingStatus::Pending).unwrap();
        assert!(Transition::Expire.apply(after).is_err());
    }

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_string(&BookingStatus::UnPurchased).unwrap(),
            "\"UN_PURCHASED\""
        );
    }
}
