use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{DateSpan, RestrictionId, ReservationId, RoomId};

const CHANNEL_CAPACITY: usize = 256;

/// Things worth telling listeners about after a mutation has been stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    ReservationConfirmed {
        room_id: RoomId,
        reservation_id: ReservationId,
        span: DateSpan,
    },
    BlockAdded {
        room_id: RoomId,
        restriction_id: RestrictionId,
        day: NaiveDate,
    },
    BlockRemoved {
        room_id: RoomId,
        restriction_id: RestrictionId,
    },
}

/// Per-room broadcast hub. The confirmation mailer and live calendar views subscribe here;
/// sending never blocks or fails the mutation that triggered it.
pub struct NotifyHub {
    channels: DashMap<RoomId, broadcast::Sender<RoomEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: RoomId) -> broadcast::Receiver<RoomEvent> {
        let sender = self
            .channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, room_id: RoomId, event: &RoomEvent) {
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a room's channel; existing receivers see it close.
    pub fn remove(&self, room_id: RoomId) {
        self.channels.remove(&room_id);
    }
}
