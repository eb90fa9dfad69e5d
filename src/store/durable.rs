use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::engine::EngineError;
use crate::model::*;
use crate::wal::Wal;

use super::{InMemoryStore, RestrictionStore};

const JOB_QUEUE_CAPACITY: usize = 1024;

// ── Log writer ───────────────────────────────────────────

/// A unit of work run on the writer thread, with exclusive use of the log.
type WalJob = Box<dyn FnOnce(&mut Wal, &InMemoryStore) + Send>;

/// Owns the log. Jobs run one at a time in arrival order, so each job's
/// check-then-write sees the state left by the previous one. Runs on its own
/// thread: fsync and compaction never stall an async worker.
fn wal_writer_loop(mut wal: Wal, state: Arc<InMemoryStore>, mut jobs: mpsc::Receiver<WalJob>) {
    while let Some(job) = jobs.blocking_recv() {
        job(&mut wal, &state);
    }
}

fn writer_gone() -> EngineError {
    EngineError::StorageUnavailable("restriction log writer stopped".into())
}

/// Log `record`, then apply it. Compacts once `threshold` appends have piled up.
fn persist_and_apply(
    wal: &mut Wal,
    state: &InMemoryStore,
    record: &Record,
    threshold: u64,
) -> Result<(), EngineError> {
    wal.append(record)?;
    state.apply(record);
    if threshold > 0 && wal.appends_since_compact() >= threshold {
        let live = state.records();
        if let Err(e) = wal.compact(&live) {
            // The append above is durable; a failed rewrite only leaves a longer log.
            warn!("compaction of {} failed: {e}", wal.path().display());
        }
    }
    Ok(())
}

// ── Store ────────────────────────────────────────────────

/// Restriction store that survives restarts: replayed in-memory state plus an
/// fsynced append-only log. Every mutation hits the log before it is applied.
///
/// Reads go straight to the in-memory state. A caller that stops waiting on a
/// mutation (e.g. a store timeout) does not cancel it: the job still runs, so the
/// log and the state never disagree.
pub struct WalStore {
    state: Arc<InMemoryStore>,
    jobs: mpsc::Sender<WalJob>,
    compact_threshold: u64,
}

impl WalStore {
    pub fn open(path: &Path, compact_threshold: u64) -> Result<Self, EngineError> {
        let records = Wal::replay(path)?;
        let state = InMemoryStore::new();
        for record in &records {
            state.apply(record);
        }
        let wal = Wal::open(path)?;
        info!(
            "restriction log {} replayed: {} records, {} live restrictions",
            path.display(),
            records.len(),
            state.restriction_count()
        );

        let state = Arc::new(state);
        let (tx, rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let writer_state = state.clone();
        std::thread::Builder::new()
            .name("lodging-wal".into())
            .spawn(move || wal_writer_loop(wal, writer_state, rx))?;

        Ok(Self {
            state,
            jobs: tx,
            compact_threshold,
        })
    }

    /// Run `job` on the writer thread and wait for its result.
    async fn submit<T, F>(&self, job: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Wal, &InMemoryStore) -> Result<T, EngineError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: WalJob = Box::new(move |wal: &mut Wal, state: &InMemoryStore| {
            let _ = tx.send(job(wal, state));
        });
        self.jobs.send(job).await.map_err(|_| writer_gone())?;
        rx.await.map_err(|_| writer_gone())?
    }

    async fn persist(&self, record: Record) -> Result<(), EngineError> {
        let threshold = self.compact_threshold;
        self.submit(move |wal, state| persist_and_apply(wal, state, &record, threshold))
            .await
    }

    /// Rewrite the log down to the records that recreate current state.
    pub async fn compact(&self) -> Result<(), EngineError> {
        self.submit(|wal, state| {
            let records = state.records();
            wal.compact(&records)?;
            info!("compacted {} to {} records", wal.path().display(), records.len());
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl RestrictionStore for WalStore {
    async fn room(&self, id: RoomId) -> Result<Option<Room>, EngineError> {
        Ok(self.state.get_room(id))
    }

    async fn rooms(&self) -> Result<Vec<Room>, EngineError> {
        Ok(self.state.sorted_rooms())
    }

    async fn insert_room(&self, name: String) -> Result<Room, EngineError> {
        let room = self.state.new_room(name)?;
        self.persist(Record::RoomAdded { id: room.id, name: room.name.clone() })
            .await?;
        Ok(room)
    }

    async fn restrictions_for_room_in_range(
        &self,
        room_id: RoomId,
        window: DateSpan,
    ) -> Result<Vec<Restriction>, EngineError> {
        Ok(self.state.overlapping(room_id, &window))
    }

    async fn insert_manual_block(&self, room_id: RoomId, day: NaiveDate) -> Result<Restriction, EngineError> {
        let r = self
            .state
            .new_restriction(room_id, DateSpan::one_night(day)?, RestrictionKind::ManualBlock)?;
        self.persist(Record::RestrictionInserted(r.clone())).await?;
        Ok(r)
    }

    async fn insert_reservation_restriction(
        &self,
        room_id: RoomId,
        reservation_id: ReservationId,
        span: DateSpan,
    ) -> Result<Restriction, EngineError> {
        let r = self
            .state
            .new_restriction(room_id, span, RestrictionKind::Reservation { reservation_id })?;
        self.persist(Record::RestrictionInserted(r.clone())).await?;
        Ok(r)
    }

    async fn delete_restriction(&self, id: RestrictionId) -> Result<bool, EngineError> {
        let threshold = self.compact_threshold;
        self.submit(move |wal, state| {
            let Some(room_id) = state.room_of(id) else {
                return Ok(false);
            };
            persist_and_apply(wal, state, &Record::RestrictionDeleted { id, room_id }, threshold)?;
            Ok(true)
        })
        .await
    }

    async fn delete_manual_block(&self, room_id: RoomId, id: RestrictionId) -> Result<bool, EngineError> {
        let threshold = self.compact_threshold;
        self.submit(move |wal, state| {
            if !state.check_block(room_id, id)? {
                return Ok(false);
            }
            persist_and_apply(wal, state, &Record::RestrictionDeleted { id, room_id }, threshold)?;
            Ok(true)
        })
        .await
    }

    async fn delete_reservation_restrictions(&self, reservation_id: ReservationId) -> Result<usize, EngineError> {
        let threshold = self.compact_threshold;
        self.submit(move |wal, state| {
            let rows = state.reservation_rows(reservation_id);
            for &(id, room_id) in &rows {
                persist_and_apply(wal, state, &Record::RestrictionDeleted { id, room_id }, threshold)?;
            }
            Ok(rows.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use ulid::Ulid;

    use crate::store::bounded;

    fn test_wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("lodging_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("{name}_{}.wal", Ulid::new()))
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    async fn appends_since_compact(store: &WalStore) -> u64 {
        store.submit(|wal, _| Ok(wal.appends_since_compact())).await.unwrap()
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = test_wal_path("reopen");
        let (room, kept, gone) = {
            let store = WalStore::open(&path, 0).unwrap();
            let room = store.insert_room("General's Quarters".into()).await.unwrap();
            let kept = store.insert_manual_block(room.id, d(3)).await.unwrap();
            let gone = store.insert_manual_block(room.id, d(4)).await.unwrap();
            store.delete_restriction(gone.id).await.unwrap();
            (room, kept, gone)
        };

        let store = WalStore::open(&path, 0).unwrap();
        assert_eq!(store.rooms().await.unwrap(), vec![room.clone()]);
        let rows = store
            .restrictions_for_room_in_range(room.id, DateSpan::new(d(1), d(30)))
            .await
            .unwrap();
        assert_eq!(rows, vec![kept]);

        // Ids keep climbing after replay, even past deleted rows.
        let fresh = store.insert_manual_block(room.id, d(5)).await.unwrap();
        assert!(fresh.id > gone.id);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_delete_writes_nothing() {
        let path = test_wal_path("missing_delete");
        let store = WalStore::open(&path, 0).unwrap();
        assert!(!store.delete_restriction(77).await.unwrap());
        assert!(!store.delete_manual_block(1, 77).await.unwrap());
        assert_eq!(appends_since_compact(&store).await, 0);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn refused_block_delete_writes_nothing() {
        let path = test_wal_path("refused_delete");
        let store = WalStore::open(&path, 0).unwrap();
        let a = store.insert_room("A".into()).await.unwrap();
        let b = store.insert_room("B".into()).await.unwrap();
        let stay = store
            .insert_reservation_restriction(b.id, 4, DateSpan::new(d(10), d(12)))
            .await
            .unwrap();
        let before = appends_since_compact(&store).await;

        let err = store.delete_manual_block(a.id, stay.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(appends_since_compact(&store).await, before);
        assert_eq!(store.state.restriction_count(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn stalled_writer_lets_callers_time_out() {
        let path = test_wal_path("stalled");
        let store = Arc::new(WalStore::open(&path, 0).unwrap());
        let room = store.insert_room("R".into()).await.unwrap();

        // Park the writer thread the way a slow fsync would.
        let (started_tx, started_rx) = oneshot::channel();
        let stalled = store.clone();
        let stall = tokio::spawn(async move {
            stalled
                .submit(move |_, _| {
                    let _ = started_tx.send(());
                    std::thread::sleep(Duration::from_millis(500));
                    Ok(())
                })
                .await
        });
        started_rx.await.unwrap();

        let result = bounded(
            "insert_manual_block",
            Duration::from_millis(50),
            store.insert_manual_block(room.id, d(3)),
        )
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, EngineError::StorageUnavailable(_)));
        assert!(err.is_retryable());

        // The abandoned insert still lands, in order, once the writer catches up.
        stall.await.unwrap().unwrap();
        store.insert_manual_block(room.id, d(4)).await.unwrap();
        let rows = store
            .restrictions_for_room_in_range(room.id, DateSpan::new(d(1), d(30)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(Wal::replay(&path).unwrap().len(), 3);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn compaction_threshold_rewrites_log() {
        let path = test_wal_path("auto_compact");
        {
            let store = WalStore::open(&path, 4).unwrap();
            let room = store.insert_room("R".into()).await.unwrap();
            for day in 1..=6 {
                let block = store.insert_manual_block(room.id, d(day)).await.unwrap();
                store.delete_restriction(block.id).await.unwrap();
            }
            store.insert_manual_block(room.id, d(20)).await.unwrap();
            assert!(appends_since_compact(&store).await < 4);
        }

        let records = Wal::replay(&path).unwrap();
        assert!(records.len() <= 5, "log should have been compacted, got {}", records.len());
        let store = WalStore::open(&path, 4).unwrap();
        let rows = store
            .restrictions_for_room_in_range(1, DateSpan::new(d(1), d(30)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].span.start, d(20));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn explicit_compact_keeps_live_state() {
        let path = test_wal_path("explicit_compact");
        let store = WalStore::open(&path, 0).unwrap();
        let room = store.insert_room("R".into()).await.unwrap();
        store
            .insert_reservation_restriction(room.id, 9, DateSpan::new(d(1), d(4)))
            .await
            .unwrap();
        store.compact().await.unwrap();

        let records = Wal::replay(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[0], Record::NextIds { room: 2, restriction: 2 }));
        assert!(matches!(records[1], Record::RoomAdded { .. }));
        let _ = std::fs::remove_file(&path);
    }
}
