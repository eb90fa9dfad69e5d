use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::*;

use super::{BlockSnapshot, Engine, EngineError};

/// One room's month, projected day by day from its restriction intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarGrid {
    pub room_id: RoomId,
    pub month: CalendarMonth,
    pub days_in_month: u32,
    /// Day key → reservation id occupying that day, 0 if none.
    pub reservation_map: BTreeMap<String, ReservationId>,
    /// Day key → id of the manual block on that day, 0 if none.
    pub block_map: BTreeMap<String, RestrictionId>,
}

impl CalendarGrid {
    pub fn empty(room_id: RoomId, month: CalendarMonth) -> Self {
        let zeroed: BTreeMap<String, i64> = month.days().map(|d| (day_key(d), 0)).collect();
        Self {
            room_id,
            month,
            days_in_month: month.days_in_month(),
            reservation_map: zeroed.clone(),
            block_map: zeroed,
        }
    }

    /// Reservations mark every day from check-in through checkout inclusive; blocks
    /// mark their start day. Later rows overwrite earlier ones. Days outside the month
    /// are ignored.
    pub fn project(room_id: RoomId, month: CalendarMonth, restrictions: &[Restriction]) -> Self {
        let mut grid = Self::empty(room_id, month);
        for r in restrictions {
            match r.kind {
                RestrictionKind::Reservation { reservation_id } => {
                    let first = r.span.start.max(month.first_day());
                    let last = r.span.end.min(month.last_day());
                    for day in first.iter_days().take_while(|d| *d <= last) {
                        grid.reservation_map.insert(day_key(day), reservation_id);
                    }
                }
                RestrictionKind::ManualBlock => {
                    if month.contains(r.span.start) {
                        grid.block_map.insert(day_key(r.span.start), r.id);
                    }
                }
            }
        }
        grid
    }

    pub fn reservation_on(&self, day: NaiveDate) -> ReservationId {
        self.reservation_map.get(&day_key(day)).copied().unwrap_or(0)
    }

    pub fn block_on(&self, day: NaiveDate) -> RestrictionId {
        self.block_map.get(&day_key(day)).copied().unwrap_or(0)
    }

    /// The baseline a later calendar save is reconciled against.
    pub fn block_snapshot(&self) -> BlockSnapshot {
        BlockSnapshot::new(self.room_id, self.month, self.block_map.clone())
    }
}

impl Engine {
    /// Build the grid for the month containing `reference_date` from live rows.
    pub async fn build_calendar_grid(
        &self,
        room_id: RoomId,
        reference_date: NaiveDate,
    ) -> Result<CalendarGrid, EngineError> {
        let result = self.build_grid_inner(room_id, reference_date).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::CALENDAR_BUILDS_TOTAL, "status" => status).increment(1);
        result
    }

    async fn build_grid_inner(&self, room_id: RoomId, reference_date: NaiveDate) -> Result<CalendarGrid, EngineError> {
        let month = checked_month(reference_date)?;
        self.require_room(room_id).await?;
        let rows = self.fetch_restrictions(room_id, month.window()).await?;
        Ok(CalendarGrid::project(room_id, month, &rows))
    }

    /// Grids for every room, ordered by room id.
    pub async fn build_calendar(&self, reference_date: NaiveDate) -> Result<Vec<CalendarGrid>, EngineError> {
        let month = checked_month(reference_date)?;
        let rooms = self.rooms().await?;
        let mut grids = Vec::with_capacity(rooms.len());
        for room in rooms {
            grids.push(self.build_calendar_grid(room.id, month.first_day()).await?);
        }
        Ok(grids)
    }

    /// Manual blocks currently stored for one room and month.
    pub(super) async fn current_blocks(
        &self,
        room_id: RoomId,
        month: CalendarMonth,
    ) -> Result<BTreeMap<String, RestrictionId>, EngineError> {
        let rows = self.fetch_restrictions(room_id, month.window()).await?;
        Ok(CalendarGrid::project(room_id, month, &rows).block_map)
    }
}

fn checked_month(reference_date: NaiveDate) -> Result<CalendarMonth, EngineError> {
    let month = CalendarMonth::containing(reference_date);
    CalendarMonth::from_query(month.year(), month.month())
}
