mod availability;
mod calendar;
mod error;
mod reconcile;
mod snapshot;

pub use availability::validate_stay;
pub use calendar::CalendarGrid;
pub use error::EngineError;
pub use reconcile::{plan, CalendarForm, DayOutcome, ReconcilePlan, ReconcileReport, RowOp, RowOutcome};
pub use snapshot::{run_vault_reaper, BlockSnapshot, SnapshotVault};

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::store::{bounded, RestrictionStore};

/// Availability and calendar engine. Holds no per-request state: every call reads
/// live rows through the store, so one instance serves all rooms concurrently.
pub struct Engine {
    store: Arc<dyn RestrictionStore>,
    pub notify: Arc<NotifyHub>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn RestrictionStore>, notify: Arc<NotifyHub>, config: EngineConfig) -> Self {
        Self { store, notify, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RestrictionStore> {
        &self.store
    }

    pub async fn rooms(&self) -> Result<Vec<Room>, EngineError> {
        bounded("rooms", self.config.store_timeout, self.store.rooms()).await
    }

    pub async fn add_room(&self, name: impl Into<String>) -> Result<Room, EngineError> {
        let room = bounded("insert_room", self.config.store_timeout, self.store.insert_room(name.into())).await?;
        tracing::info!("room {} created: {}", room.id, room.name);
        Ok(room)
    }

    /// Resolve a room id, turning an unknown id into a validation failure.
    pub(super) async fn require_room(&self, room_id: RoomId) -> Result<Room, EngineError> {
        bounded("room", self.config.store_timeout, self.store.room(room_id))
            .await?
            .ok_or_else(|| EngineError::Validation(format!("unknown room {room_id}")))
    }

    pub(super) async fn fetch_restrictions(
        &self,
        room_id: RoomId,
        window: DateSpan,
    ) -> Result<Vec<Restriction>, EngineError> {
        bounded(
            "restrictions_for_room_in_range",
            self.config.store_timeout,
            self.store.restrictions_for_room_in_range(room_id, window),
        )
        .await
    }
}
