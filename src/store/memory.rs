use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;

use crate::engine::EngineError;
use crate::limits::MAX_ROOM_NAME_LEN;
use crate::model::*;

use super::RestrictionStore;

pub struct InMemoryStore {
    rooms: DashMap<RoomId, Room>,
    /// Per-room restrictions, sorted by `span.start`.
    restrictions: DashMap<RoomId, Vec<Restriction>>,
    /// Reverse lookup: restriction id → room id
    restriction_to_room: DashMap<RestrictionId, RoomId>,
    next_room_id: AtomicI64,
    next_restriction_id: AtomicI64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            restrictions: DashMap::new(),
            restriction_to_room: DashMap::new(),
            next_room_id: AtomicI64::new(1),
            next_restriction_id: AtomicI64::new(1),
        }
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn get_room(&self, id: RoomId) -> Option<Room> {
        self.rooms.get(&id).map(|e| e.value().clone())
    }

    pub fn sorted_rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub fn room_of(&self, restriction_id: RestrictionId) -> Option<RoomId> {
        self.restriction_to_room.get(&restriction_id).map(|e| *e.value())
    }

    pub fn restriction_count(&self) -> usize {
        self.restriction_to_room.len()
    }

    /// Restrictions overlapping `window`. Binary search skips rows starting at or
    /// after `window.end`.
    pub fn overlapping(&self, room_id: RoomId, window: &DateSpan) -> Vec<Restriction> {
        let Some(list) = self.restrictions.get(&room_id) else {
            return Vec::new();
        };
        let right_bound = list.partition_point(|r| r.span.start < window.end);
        list[..right_bound]
            .iter()
            .filter(|r| r.span.overlaps(window))
            .cloned()
            .collect()
    }

    /// `(restriction id, room id)` of every row backing `reservation_id`.
    pub fn reservation_rows(&self, reservation_id: ReservationId) -> Vec<(RestrictionId, RoomId)> {
        let mut rows = Vec::new();
        for entry in self.restrictions.iter() {
            for r in entry.value() {
                if r.reservation_id() == reservation_id && !r.is_block() {
                    rows.push((r.id, r.room_id));
                }
            }
        }
        rows.sort_unstable();
        rows
    }

    /// Whether `id` is a live manual block of `room_id`. A row that exists but belongs
    /// to another room, or backs a reservation, is a validation failure.
    pub fn check_block(&self, room_id: RoomId, id: RestrictionId) -> Result<bool, EngineError> {
        let Some(owner) = self.room_of(id) else {
            return Ok(false);
        };
        if owner != room_id {
            return Err(EngineError::Validation(format!(
                "restriction {id} does not belong to room {room_id}"
            )));
        }
        let is_block = self
            .restrictions
            .get(&room_id)
            .and_then(|list| list.iter().find(|r| r.id == id).map(Restriction::is_block));
        match is_block {
            Some(true) => Ok(true),
            Some(false) => Err(EngineError::Validation(format!(
                "restriction {id} is not a manual block"
            ))),
            None => Ok(false),
        }
    }

    /// Minimal record set that recreates current state.
    pub fn records(&self) -> Vec<Record> {
        let mut out = vec![Record::NextIds {
            room: self.next_room_id.load(Ordering::SeqCst),
            restriction: self.next_restriction_id.load(Ordering::SeqCst),
        }];
        out.extend(
            self.sorted_rooms()
                .into_iter()
                .map(|room| Record::RoomAdded { id: room.id, name: room.name }),
        );
        let mut rows: Vec<Restriction> = self
            .restrictions
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|r| r.id);
        out.extend(rows.into_iter().map(Record::RestrictionInserted));
        out
    }

    // ── Record construction ──────────────────────────────────

    pub fn new_room(&self, name: String) -> Result<Room, EngineError> {
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        let id = self.next_room_id.fetch_add(1, Ordering::SeqCst);
        Ok(Room { id, name })
    }

    pub fn new_restriction(
        &self,
        room_id: RoomId,
        span: DateSpan,
        kind: RestrictionKind,
    ) -> Result<Restriction, EngineError> {
        if !self.rooms.contains_key(&room_id) {
            return Err(EngineError::Validation(format!("unknown room {room_id}")));
        }
        let now = Utc::now();
        Ok(Restriction {
            id: self.next_restriction_id.fetch_add(1, Ordering::SeqCst),
            room_id,
            span,
            kind,
            created_at: now,
            updated_at: now,
        })
    }

    // ── Record application ───────────────────────────────────

    pub fn apply(&self, record: &Record) {
        match record {
            Record::RoomAdded { id, name } => {
                self.rooms.insert(*id, Room { id: *id, name: name.clone() });
                self.next_room_id.fetch_max(id + 1, Ordering::SeqCst);
            }
            Record::RestrictionInserted(r) => {
                {
                    let mut list = self.restrictions.entry(r.room_id).or_default();
                    let pos = list.partition_point(|x| x.span.start <= r.span.start);
                    list.insert(pos, r.clone());
                }
                self.restriction_to_room.insert(r.id, r.room_id);
                self.next_restriction_id.fetch_max(r.id + 1, Ordering::SeqCst);
            }
            Record::RestrictionDeleted { id, .. } => {
                self.remove_restriction(*id);
            }
            Record::NextIds { room, restriction } => {
                self.next_room_id.fetch_max(*room, Ordering::SeqCst);
                self.next_restriction_id.fetch_max(*restriction, Ordering::SeqCst);
            }
        }
    }

    /// Drop one row; `None` if it was already gone.
    pub fn remove_restriction(&self, id: RestrictionId) -> Option<RoomId> {
        let (_, room_id) = self.restriction_to_room.remove(&id)?;
        if let Some(mut list) = self.restrictions.get_mut(&room_id) {
            list.retain(|r| r.id != id);
        }
        Some(room_id)
    }
}

#[async_trait]
impl RestrictionStore for InMemoryStore {
    async fn room(&self, id: RoomId) -> Result<Option<Room>, EngineError> {
        Ok(self.get_room(id))
    }

    async fn rooms(&self) -> Result<Vec<Room>, EngineError> {
        Ok(self.sorted_rooms())
    }

    async fn insert_room(&self, name: String) -> Result<Room, EngineError> {
        let room = self.new_room(name)?;
        self.apply(&Record::RoomAdded { id: room.id, name: room.name.clone() });
        Ok(room)
    }

    async fn restrictions_for_room_in_range(
        &self,
        room_id: RoomId,
        window: DateSpan,
    ) -> Result<Vec<Restriction>, EngineError> {
        Ok(self.overlapping(room_id, &window))
    }

    async fn insert_manual_block(&self, room_id: RoomId, day: NaiveDate) -> Result<Restriction, EngineError> {
        let r = self.new_restriction(room_id, DateSpan::one_night(day)?, RestrictionKind::ManualBlock)?;
        self.apply(&Record::RestrictionInserted(r.clone()));
        Ok(r)
    }

    async fn insert_reservation_restriction(
        &self,
        room_id: RoomId,
        reservation_id: ReservationId,
        span: DateSpan,
    ) -> Result<Restriction, EngineError> {
        let r = self.new_restriction(room_id, span, RestrictionKind::Reservation { reservation_id })?;
        self.apply(&Record::RestrictionInserted(r.clone()));
        Ok(r)
    }

    async fn delete_restriction(&self, id: RestrictionId) -> Result<bool, EngineError> {
        Ok(self.remove_restriction(id).is_some())
    }

    async fn delete_manual_block(&self, room_id: RoomId, id: RestrictionId) -> Result<bool, EngineError> {
        if !self.check_block(room_id, id)? {
            return Ok(false);
        }
        Ok(self.remove_restriction(id).is_some())
    }

    async fn delete_reservation_restrictions(&self, reservation_id: ReservationId) -> Result<usize, EngineError> {
        let removed = self
            .reservation_rows(reservation_id)
            .into_iter()
            .filter(|&(id, _)| self.remove_restriction(id).is_some())
            .count();
        Ok(removed)
    }
}
