mod durable;
mod memory;

pub use durable::WalStore;
pub use memory::InMemoryStore;

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::engine::EngineError;
use crate::model::*;

/// Persistence contract for rooms and restriction rows.
///
/// `delete_restriction` reports a missing row as `Ok(false)`: concurrent admin
/// edits routinely race on the same block.
#[async_trait]
pub trait RestrictionStore: Send + Sync {
    async fn room(&self, id: RoomId) -> Result<Option<Room>, EngineError>;

    /// All rooms, ordered by id.
    async fn rooms(&self) -> Result<Vec<Room>, EngineError>;

    async fn insert_room(&self, name: String) -> Result<Room, EngineError>;

    /// Every restriction of either kind on `room_id` whose span overlaps `window`,
    /// ordered by start date.
    async fn restrictions_for_room_in_range(
        &self,
        room_id: RoomId,
        window: DateSpan,
    ) -> Result<Vec<Restriction>, EngineError>;

    /// Create a one-night manual block starting on `day`.
    async fn insert_manual_block(&self, room_id: RoomId, day: NaiveDate) -> Result<Restriction, EngineError>;

    async fn insert_reservation_restriction(
        &self,
        room_id: RoomId,
        reservation_id: ReservationId,
        span: DateSpan,
    ) -> Result<Restriction, EngineError>;

    /// Returns `false` if no such row existed.
    async fn delete_restriction(&self, id: RestrictionId) -> Result<bool, EngineError>;

    /// Delete `id` only if it is a manual block of `room_id`. `Ok(false)` if it is
    /// already gone; a reservation row or another room's row is a `Validation` error
    /// and is left untouched.
    async fn delete_manual_block(&self, room_id: RoomId, id: RestrictionId) -> Result<bool, EngineError>;

    /// Drop every restriction backing `reservation_id`; returns how many went.
    async fn delete_reservation_restrictions(&self, reservation_id: ReservationId) -> Result<usize, EngineError>;
}

/// Run one store call under `timeout`, recording its latency.
pub(crate) async fn bounded<T>(
    call: &'static str,
    timeout: Duration,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::StorageUnavailable(format!(
            "{call} timed out after {}ms",
            timeout.as_millis()
        ))),
    };
    metrics::histogram!(crate::observability::STORE_CALL_DURATION_SECONDS, "call" => call)
        .record(started.elapsed().as_secs_f64());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_through_result() {
        let ok = bounded("room_lookup", Duration::from_secs(1), async { Ok::<_, EngineError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = bounded("room_lookup", Duration::from_secs(1), async {
            Err::<(), _>(EngineError::NotFound(3))
        })
        .await;
        assert!(matches!(err, Err(EngineError::NotFound(3))));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out_as_retryable() {
        let result = bounded("slow_call", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, EngineError>(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, EngineError::StorageUnavailable(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("slow_call"));
    }
}
