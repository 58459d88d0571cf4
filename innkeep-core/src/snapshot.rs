use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::ReservationError;
use crate::models::RoomLine;

/// Price and availability of one room as it was shown to the user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SnapshotRoom {
    pub discounted_price: i64,
    pub original_price: i64,
    pub remaining_units: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchCriteria {
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub guests: Option<u32>,
}

/// Read-only search result cached per user session.
///
/// Advisory only: it lets us reject a request before any row is locked, the
/// inventory lock decides the outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilitySnapshot {
    pub accommodation_id: Uuid,
    pub owner_id: Uuid,
    pub criteria: SearchCriteria,
    pub rooms: HashMap<Uuid, SnapshotRoom>,
    pub issued_at: DateTime<Utc>,
}

/// A requested line priced from the snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricedLine {
    pub room_id: Uuid,
    pub quantity: i32,
    pub price: i64,
    pub original_price: i64,
}

impl PricedLine {
    pub fn total(&self) -> i64 {
        self.price * i64::from(self.quantity)
    }
}

impl AvailabilitySnapshot {
    /// Checks a selection in order: room membership, quantities, then self-booking.
    pub fn validate(
        &self,
        requester_id: Uuid,
        lines: &[RoomLine],
    ) -> Result<Vec<PricedLine>, ReservationError> {
        let missing: Vec<String> = lines
            .iter()
            .filter(|line| !self.rooms.contains_key(&line.room_id))
            .map(|line| line.room_id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ReservationError::InvalidRoomSelection(format!(
                "rooms not offered in this search: {}",
                missing.join(", ")
            )));
        }

        let short: Vec<Uuid> = lines
            .iter()
            .filter(|line| line.quantity > self.rooms[&line.room_id].remaining_units)
            .map(|line| line.room_id)
            .collect();
        if !short.is_empty() {
            return Err(ReservationError::InsufficientInventory { rooms: short });
        }

        if requester_id == self.owner_id {
            return Err(ReservationError::SelfBookingForbidden);
        }

        Ok(lines
            .iter()
            .map(|line| {
                let room = self.rooms[&line.room_id];
                PricedLine {
                    room_id: line.room_id,
                    quantity: line.quantity,
                    price: room.discounted_price,
                    original_price: room.original_price,
                }
            })
            .collect())
    }
}

/// Shape checks that need no snapshot: non-empty, positive quantities, no repeats.
pub fn check_lines(lines: &[RoomLine]) -> Result<(), ReservationError> {
    if lines.is_empty() {
        return Err(ReservationError::InvalidRoomSelection(
            "at least one room is required".to_string(),
        ));
    }
    if let Some(line) = lines.iter().find(|line| line.quantity <= 0) {
        return Err(ReservationError::InvalidRoomSelection(format!(
            "quantity for room {} must be positive",
            line.room_id
        )));
    }
    let mut seen = HashSet::new();
    if let Some(line) = lines.iter().find(|line| !seen.insert(line.room_id)) {
        return Err(ReservationError::InvalidRoomSelection(format!(
            "room {} listed twice",
            line.room_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot(owner_id: Uuid, rooms: &[(Uuid, i64, i32)]) -> AvailabilitySnapshot {
        let now = Utc::now();
        AvailabilitySnapshot {
            accommodation_id: Uuid::new_v4(),
            owner_id,
            criteria: SearchCriteria {
                check_in: now + Duration::days(3),
                check_out: now + Duration::days(5),
                guests: Some(2),
            },
            rooms: rooms
                .iter()
                .map(|(id, price, remaining)| {
                    (
                        *id,
                        SnapshotRoom {
                            discounted_price: *price,
                            original_price: price + 20,
                            remaining_units: *remaining,
                        },
                    )
                })
                .collect(),
            issued_at: now,
        }
    }

    #[test]
    fn prices_lines_from_snapshot() {
        let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());
        let snap = snapshot(Uuid::new_v4(), &[(r1, 100, 3), (r2, 50, 1)]);
        let lines = [
            RoomLine { room_id: r1, quantity: 2 },
            RoomLine { room_id: r2, quantity: 1 },
        ];

        let priced = snap.validate(Uuid::new_v4(), &lines).unwrap();
        assert_eq!(priced.len(), 2);
        assert_eq!(priced[0].price, 100);
        assert_eq!(priced[0].original_price, 120);
        assert_eq!(priced.iter().map(PricedLine::total).sum::<i64>(), 250);
    }

    #[test]
    fn unknown_room_wins_over_quantity() {
        let r1 = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let snap = snapshot(owner, &[(r1, 100, 1)]);
        let lines = [
            RoomLine { room_id: r1, quantity: 5 },
            RoomLine { room_id: Uuid::new_v4(), quantity: 1 },
        ];

        // Owner, over quantity and unknown room all at once: membership is checked first.
        let err = snap.validate(owner, &lines).unwrap_err();
        assert!(matches!(err, ReservationError::InvalidRoomSelection(_)));
    }

    #[test]
    fn names_every_short_room() {
        let (r1, r2, r3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let snap = snapshot(Uuid::new_v4(), &[(r1, 100, 1), (r2, 80, 4), (r3, 60, 0)]);
        let lines = [
            RoomLine { room_id: r1, quantity: 2 },
            RoomLine { room_id: r2, quantity: 4 },
            RoomLine { room_id: r3, quantity: 1 },
        ];

        match snap.validate(Uuid::new_v4(), &lines) {
            Err(ReservationError::InsufficientInventory { rooms }) => {
                assert_eq!(rooms, vec![r1, r3]);
            }
            other => panic!("expected InsufficientInventory, got {:?}", other),
        }
    }

    #[test]
    fn owner_cannot_book_own_rooms() {
        let r1 = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let snap = snapshot(owner, &[(r1, 100, 2)]);

        let err = snap
            .validate(owner, &[RoomLine { room_id: r1, quantity: 1 }])
            .unwrap_err();
        assert!(matches!(err, ReservationError::SelfBookingForbidden));
    }

    #[test]
    fn line_shape_checks() {
        let r1 = Uuid::new_v4();
        assert!(check_lines(&[]).is_err());
        assert!(check_lines(&[RoomLine { room_id: r1, quantity: 0 }]).is_err());
        assert!(check_lines(&[
            RoomLine { room_id: r1, quantity: 1 },
            RoomLine { room_id: r1, quantity: 2 },
        ])
        .is_err());
        assert!(check_lines(&[RoomLine { room_id: r1, quantity: 2 }]).is_ok());
    }
}
