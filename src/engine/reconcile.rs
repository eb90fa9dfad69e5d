use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::limits::MAX_FORM_FIELDS;
use crate::model::*;
use crate::notify::RoomEvent;
use crate::store::bounded;

use super::{BlockSnapshot, Engine, EngineError};

/// Checked checkbox on a day that already had a block: keep it.
const KEEP_PREFIX: &str = "remove_block_";
/// Checked checkbox on a free day: block it.
const ADD_PREFIX: &str = "add_block_";

/// What the administrator submitted for one room's calendar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarForm {
    keep: BTreeSet<NaiveDate>,
    add: BTreeSet<NaiveDate>,
}

impl CalendarForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep(mut self, day: NaiveDate) -> Self {
        self.keep.insert(day);
        self
    }

    pub fn add(mut self, day: NaiveDate) -> Self {
        self.add.insert(day);
        self
    }

    /// Read the checkbox field names of a calendar post, e.g. `remove_block_3_2025-06-14`
    /// or `add_block_3_2025-06-15`. Fields for other rooms and unrelated fields are
    /// skipped; a malformed field for this room rejects the whole form.
    pub fn parse<'a>(room_id: RoomId, fields: impl IntoIterator<Item = &'a str>) -> Result<Self, EngineError> {
        let mut form = Self::default();
        for (seen, name) in fields.into_iter().enumerate() {
            if seen >= MAX_FORM_FIELDS {
                return Err(EngineError::Validation("too many calendar form fields".into()));
            }
            let (rest, target) = if let Some(rest) = name.strip_prefix(KEEP_PREFIX) {
                (rest, &mut form.keep)
            } else if let Some(rest) = name.strip_prefix(ADD_PREFIX) {
                (rest, &mut form.add)
            } else {
                continue;
            };
            let (room, day) = rest
                .split_once('_')
                .ok_or_else(|| EngineError::Validation(format!("malformed calendar field {name:?}")))?;
            let room: RoomId = room
                .parse()
                .map_err(|_| EngineError::Validation(format!("malformed room in calendar field {name:?}")))?;
            if room != room_id {
                continue;
            }
            target.insert(parse_day_key(day)?);
        }
        Ok(form)
    }

    pub fn keeps(&self, day: NaiveDate) -> bool {
        self.keep.contains(&day)
    }

    pub fn additions(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.add.iter().copied()
    }
}

/// Row operations needed to move stored blocks from the snapshot to the submitted form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// `(day, block id)` whose keep flag was absent, in date order.
    pub deletes: Vec<(NaiveDate, RestrictionId)>,
    /// Days to block, in date order, each at most once.
    pub inserts: Vec<NaiveDate>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty()
    }
}

/// Diff a snapshot against a form. Pure; touches no storage.
///
/// At most one operation per day: an add directive on a day the snapshot already
/// shows blocked keeps that block instead of replacing it.
pub fn plan(previous: &BlockSnapshot, form: &CalendarForm) -> Result<ReconcilePlan, EngineError> {
    let active = previous.active_blocks()?;
    let blocked: BTreeSet<NaiveDate> = active.iter().map(|(day, _)| *day).collect();
    let deletes = active
        .into_iter()
        .filter(|(day, _)| !form.keeps(*day) && !form.add.contains(day))
        .collect();
    let inserts = form.additions().filter(|day| !blocked.contains(day)).collect();
    Ok(ReconcilePlan { deletes, inserts })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    Delete,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Applied,
    /// Delete target was already gone (another admin, or a retried save).
    AlreadyGone,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayOutcome {
    pub day: NaiveDate,
    pub op: RowOp,
    /// Deleted block id, or the id of the newly inserted block.
    pub restriction_id: Option<RestrictionId>,
    pub outcome: RowOutcome,
}

/// Per-day results of one reconciliation, removals first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub room_id: RoomId,
    pub rows: Vec<DayOutcome>,
}

impl ReconcileReport {
    fn count(&self, op: RowOp, outcome: &RowOutcome) -> usize {
        self.rows
            .iter()
            .filter(|r| r.op == op && &r.outcome == outcome)
            .count()
    }

    pub fn deleted(&self) -> usize {
        self.count(RowOp::Delete, &RowOutcome::Applied)
    }

    pub fn already_gone(&self) -> usize {
        self.count(RowOp::Delete, &RowOutcome::AlreadyGone)
    }

    pub fn inserted(&self) -> usize {
        self.count(RowOp::Insert, &RowOutcome::Applied)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DayOutcome> {
        self.rows.iter().filter(|r| matches!(r.outcome, RowOutcome::Failed(_)))
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl Engine {
    /// Apply an administrator's calendar save for one room.
    ///
    /// Only manual blocks of `room_id` are ever deleted: an id in the snapshot that
    /// names a reservation or another room's row is reported as failed and left alone.
    /// Errors only for a bad snapshot (wrong room, malformed, stale when staleness
    /// checks are on), always before any row is touched. Individual row failures are
    /// logged and reported; the remaining days are still processed. Nothing is rolled
    /// back if the caller goes away mid-way.
    pub async fn reconcile(
        &self,
        room_id: RoomId,
        snapshot: &BlockSnapshot,
        form: &CalendarForm,
    ) -> Result<ReconcileReport, EngineError> {
        if snapshot.room_id != room_id {
            return Err(EngineError::Validation(format!(
                "snapshot belongs to room {}, not {room_id}",
                snapshot.room_id
            )));
        }
        let plan = plan(snapshot, form)?;

        if self.config.reject_stale_snapshots {
            let current = self.current_blocks(room_id, snapshot.month).await?;
            if BlockSnapshot::fingerprint_of(&current) != snapshot.fingerprint {
                warn!("rejecting stale calendar save for room {room_id}, month {}", snapshot.month);
                return Err(EngineError::StaleSnapshot { room_id });
            }
        }

        let mut rows = Vec::with_capacity(plan.deletes.len() + plan.inserts.len());

        for &(day, id) in &plan.deletes {
            let result = bounded(
                "delete_manual_block",
                self.config.store_timeout,
                self.store.delete_manual_block(room_id, id),
            )
            .await;
            let outcome = match result {
                Ok(true) => {
                    info!("removed block {id} on {day} for room {room_id}");
                    self.notify.send(room_id, &RoomEvent::BlockRemoved { room_id, restriction_id: id });
                    RowOutcome::Applied
                }
                Ok(false) => {
                    debug!("block {id} on {day} for room {room_id} already removed");
                    RowOutcome::AlreadyGone
                }
                Err(e) => {
                    warn!("failed to remove block {id} on {day} for room {room_id}: {e}");
                    RowOutcome::Failed(e.to_string())
                }
            };
            record_op("delete", &outcome);
            rows.push(DayOutcome { day, op: RowOp::Delete, restriction_id: Some(id), outcome });
        }

        for &day in &plan.inserts {
            let result = bounded(
                "insert_manual_block",
                self.config.store_timeout,
                self.store.insert_manual_block(room_id, day),
            )
            .await;
            let (restriction_id, outcome) = match result {
                Ok(block) => {
                    info!("added block {} on {day} for room {room_id}", block.id);
                    self.notify.send(
                        room_id,
                        &RoomEvent::BlockAdded { room_id, restriction_id: block.id, day },
                    );
                    (Some(block.id), RowOutcome::Applied)
                }
                Err(e) => {
                    warn!("failed to add block on {day} for room {room_id}: {e}");
                    (None, RowOutcome::Failed(e.to_string()))
                }
            };
            record_op("insert", &outcome);
            rows.push(DayOutcome { day, op: RowOp::Insert, restriction_id, outcome });
        }

        Ok(ReconcileReport { room_id, rows })
    }
}

fn record_op(op: &'static str, outcome: &RowOutcome) {
    let status = crate::observability::outcome_label(outcome);
    metrics::counter!(crate::observability::RECONCILE_OPS_TOTAL, "op" => op, "status" => status).increment(1);
}
