use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// The block map a calendar page was rendered with, carried from render to save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub room_id: RoomId,
    pub month: CalendarMonth,
    /// Day key → manual block id, 0 for no block.
    pub blocks: BTreeMap<String, RestrictionId>,
    /// crc32 of the non-zero entries. Catches corruption and staleness, not forgery:
    /// anyone holding the JSON can recompute it. Hand the snapshot off through
    /// [`SnapshotVault`] when the client must not be able to edit it.
    pub fingerprint: u32,
}

impl BlockSnapshot {
    pub fn new(room_id: RoomId, month: CalendarMonth, blocks: BTreeMap<String, RestrictionId>) -> Self {
        let fingerprint = Self::fingerprint_of(&blocks);
        Self { room_id, month, blocks, fingerprint }
    }

    pub fn fingerprint_of(blocks: &BTreeMap<String, RestrictionId>) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for (key, id) in blocks.iter().filter(|(_, id)| **id > 0) {
            hasher.update(key.as_bytes());
            hasher.update(&id.to_le_bytes());
        }
        hasher.finalize()
    }

    /// `(day, block id)` for every day that had a block, in date order.
    pub fn active_blocks(&self) -> Result<Vec<(chrono::NaiveDate, RestrictionId)>, EngineError> {
        let mut active = Vec::new();
        for (key, &id) in &self.blocks {
            if id > 0 {
                active.push((parse_day_key(key)?, id));
            }
        }
        active.sort_unstable();
        Ok(active)
    }

    /// Check the structural invariants a snapshot from an untrusted source must hold.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (key, &id) in &self.blocks {
            let day = parse_day_key(key)?;
            if !self.month.contains(day) {
                return Err(EngineError::Validation(format!(
                    "day {key} is outside snapshot month {}",
                    self.month
                )));
            }
            if id < 0 {
                return Err(EngineError::Validation(format!("negative block id for {key}")));
            }
        }
        if Self::fingerprint_of(&self.blocks) != self.fingerprint {
            return Err(EngineError::Validation("block snapshot fingerprint mismatch".into()));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<String, EngineError> {
        serde_json::to_string(self)
            .map_err(|e| EngineError::Validation(format!("cannot encode block snapshot: {e}")))
    }

    /// Parse a snapshot handed back by a client. Anything malformed is a validation failure.
    pub fn decode(raw: &str) -> Result<Self, EngineError> {
        let snapshot: Self = serde_json::from_str(raw)
            .map_err(|e| EngineError::Validation(format!("malformed block snapshot: {e}")))?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}

struct StoredSnapshot {
    stored_at: Instant,
    snapshot: BlockSnapshot,
}

/// Server-side snapshot holding, keyed by a one-time token. Replaces keeping the
/// block map in ambient session state.
pub struct SnapshotVault {
    entries: DashMap<Ulid, StoredSnapshot>,
    ttl: Duration,
}

impl SnapshotVault {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn put(&self, snapshot: BlockSnapshot) -> Ulid {
        let token = Ulid::new();
        self.entries.insert(
            token,
            StoredSnapshot {
                stored_at: Instant::now(),
                snapshot,
            },
        );
        metrics::gauge!(crate::observability::SNAPSHOTS_ACTIVE).set(self.entries.len() as f64);
        token
    }

    /// Redeem a token. Each token works once; expired or unknown tokens are rejected.
    pub fn take(&self, token: Ulid) -> Result<BlockSnapshot, EngineError> {
        let (_, stored) = self
            .entries
            .remove(&token)
            .ok_or_else(|| EngineError::Validation(format!("unknown or used snapshot token {token}")))?;
        metrics::gauge!(crate::observability::SNAPSHOTS_ACTIVE).set(self.entries.len() as f64);
        if stored.stored_at.elapsed() >= self.ttl {
            return Err(EngineError::Validation(format!("snapshot token {token} expired")));
        }
        Ok(stored.snapshot)
    }

    /// Like [`take`](Self::take), for a token as it arrives in a form field.
    pub fn take_encoded(&self, token: &str) -> Result<BlockSnapshot, EngineError> {
        let token = Ulid::from_string(token)
            .map_err(|_| EngineError::Validation(format!("malformed snapshot token {token:?}")))?;
        self.take(token)
    }

    /// Drop expired entries. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.stored_at.elapsed() < self.ttl);
        let purged = before.saturating_sub(self.entries.len());
        metrics::gauge!(crate::observability::SNAPSHOTS_ACTIVE).set(self.entries.len() as f64);
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Background task that periodically drops unredeemed snapshots.
pub async fn run_vault_reaper(vault: Arc<SnapshotVault>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let purged = vault.purge_expired();
        if purged > 0 {
            debug!("purged {purged} expired block snapshot(s)");
        }
    }
}
