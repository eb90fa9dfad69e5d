use chrono::NaiveDate;
use tracing::info;

use crate::limits::*;
use crate::model::*;
use crate::notify::RoomEvent;
use crate::store::bounded;

use super::{Engine, EngineError};

/// Check a requested stay before any store call: non-empty, forward, not absurdly long.
pub fn validate_stay(start: NaiveDate, end: NaiveDate) -> Result<DateSpan, EngineError> {
    let stay = DateSpan::try_new(start, end)?;
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(stay)
}

impl Engine {
    /// True iff no restriction of either kind overlaps `[start, end)`.
    pub async fn is_room_available(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, EngineError> {
        let stay = validate_stay(start, end)?;
        self.require_room(room_id).await?;
        self.room_is_free(room_id, stay).await
    }

    async fn room_is_free(&self, room_id: RoomId, stay: DateSpan) -> Result<bool, EngineError> {
        let result = self.fetch_restrictions(room_id, stay).await.map(|rows| rows.is_empty());
        let label = match &result {
            Ok(true) => "available",
            Ok(false) => "unavailable",
            Err(_) => "error",
        };
        metrics::counter!(crate::observability::AVAILABILITY_CHECKS_TOTAL, "result" => label).increment(1);
        result
    }

    /// The free subset of `rooms`, in input order. An empty result means nothing is
    /// free; a storage failure is an error, never an empty list.
    pub async fn available_rooms(
        &self,
        rooms: &[Room],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Room>, EngineError> {
        validate_stay(start, end)?;
        if rooms.len() > MAX_ROOMS_PER_QUERY {
            return Err(EngineError::LimitExceeded("too many candidate rooms"));
        }
        let mut free = Vec::new();
        for room in rooms {
            if self.is_room_available(room.id, start, end).await? {
                free.push(room.clone());
            }
        }
        Ok(free)
    }

    /// Free rooms among everything in the store.
    pub async fn search_availability(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Room>, EngineError> {
        validate_stay(start, end)?;
        let rooms = self.rooms().await?;
        self.available_rooms(&rooms, start, end).await
    }

    /// Record the occupancy for a confirmed reservation.
    ///
    /// Availability is re-checked first, but nothing locks the room between the
    /// check and the insert; two simultaneous confirmations can both succeed.
    pub async fn confirm_reservation(
        &self,
        room_id: RoomId,
        reservation_id: ReservationId,
        stay: DateSpan,
    ) -> Result<Restriction, EngineError> {
        if reservation_id <= 0 {
            return Err(EngineError::Validation(format!("invalid reservation id {reservation_id}")));
        }
        let stay = validate_stay(stay.start, stay.end)?;
        if !self.is_room_available(room_id, stay.start, stay.end).await? {
            return Err(EngineError::Conflict(room_id));
        }
        let restriction = bounded(
            "insert_reservation_restriction",
            self.config.store_timeout,
            self.store.insert_reservation_restriction(room_id, reservation_id, stay),
        )
        .await?;
        info!(
            "reservation {reservation_id} holds room {room_id} from {} to {}",
            stay.start, stay.end
        );
        self.notify.send(
            room_id,
            &RoomEvent::ReservationConfirmed { room_id, reservation_id, span: stay },
        );
        Ok(restriction)
    }

    /// Release every night held by `reservation_id`. Returns the number of rows removed.
    pub async fn cancel_reservation(&self, reservation_id: ReservationId) -> Result<usize, EngineError> {
        let removed = bounded(
            "delete_reservation_restrictions",
            self.config.store_timeout,
            self.store.delete_reservation_restrictions(reservation_id),
        )
        .await?;
        info!("reservation {reservation_id} cancelled, {removed} restriction(s) removed");
        Ok(removed)
    }
}
