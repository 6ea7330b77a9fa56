use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use casegrid_core::{GridError, GridSnapshot, GridStore, RelationMode};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::session::GridSession;

pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(200);

/// One grid awaiting a save: the case it was edited under and its mode.
pub type DirtyGrid = (String, RelationMode);

/// Where the coalescer reads the current full snapshot of a dirty grid at flush time.
pub trait SnapshotSource: Send + Sync {
    /// `None` unless `case_id` is the case currently held.
    fn snapshot(&self, case_id: &str, mode: RelationMode) -> Option<GridSnapshot>;
}

impl SnapshotSource for Mutex<GridSession> {
    fn snapshot(&self, case_id: &str, mode: RelationMode) -> Option<GridSnapshot> {
        let session = self.lock();
        if session.case_id() != Some(case_id) {
            return None;
        }
        session.snapshot(mode).cloned()
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: Vec<RelationMode>,
    pub failed: Vec<(RelationMode, GridError)>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct CoalescerState {
    dirty: BTreeSet<DirtyGrid>,
    /// Snapshots whose last upsert failed, resent if their case is no longer held.
    unsaved: BTreeMap<DirtyGrid, GridSnapshot>,
    /// Generation of the armed timer, if any. A timer whose generation no longer
    /// matches has been pre-empted by an explicit flush and must not fire.
    armed: Option<u64>,
    generation: u64,
}

struct Inner {
    store: Arc<dyn GridStore>,
    source: Arc<dyn SnapshotSource>,
    delay: Duration,
    state: Mutex<CoalescerState>,
    reports: broadcast::Sender<FlushReport>,
    runtime: Handle,
}

/// Batches dirty grids behind a single arm-once timer and flushes each one as a
/// whole-snapshot upsert.
///
/// The timer is armed only when none is pending; later mutations join the pending
/// batch without pushing the deadline back. Dirty entries remember the case they
/// were edited under, so a case switch never sends one case's grid for another.
#[derive(Clone)]
pub struct SaveCoalescer {
    inner: Arc<Inner>,
}

impl SaveCoalescer {
    /// Must be called from within a Tokio runtime; timers are spawned onto it.
    pub fn new(
        store: Arc<dyn GridStore>,
        source: Arc<dyn SnapshotSource>,
        delay: Duration,
    ) -> Self {
        let (reports, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Inner {
                store,
                source,
                delay,
                state: Mutex::new(CoalescerState::default()),
                reports,
                runtime: Handle::current(),
            }),
        }
    }

    pub fn mark_dirty(&self, case_id: &str, mode: RelationMode) {
        let mut state = self.inner.state.lock();
        state.dirty.insert((case_id.to_string(), mode));
        if state.armed.is_some() {
            return;
        }
        state.generation += 1;
        let generation = state.generation;
        state.armed = Some(generation);
        drop(state);

        debug!(
            target: "casegrid::coalescer",
            case_id = %case_id,
            %mode,
            delay_ms = self.inner.delay.as_millis() as u64,
            "armed save timer"
        );
        let deadline = Instant::now() + self.inner.delay;
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            inner.fire(generation).await;
        });
    }

    pub fn dirty_grids(&self) -> Vec<DirtyGrid> {
        self.inner.state.lock().dirty.iter().cloned().collect()
    }

    pub fn has_dirty(&self) -> bool {
        !self.inner.state.lock().dirty.is_empty()
    }

    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().armed.is_some()
    }

    /// Flushes every dirty grid immediately, disarming the pending timer.
    pub async fn flush_now(&self) -> FlushReport {
        let grids = {
            let mut state = self.inner.state.lock();
            state.armed = None;
            std::mem::take(&mut state.dirty)
        };
        self.inner.flush(grids).await
    }

    /// Forgets every dirty grid and disarms the timer. Returns the grids dropped.
    pub fn discard(&self) -> Vec<DirtyGrid> {
        let mut state = self.inner.state.lock();
        state.armed = None;
        state.unsaved.clear();
        std::mem::take(&mut state.dirty).into_iter().collect()
    }

    /// Every flush report, including those of timer-driven flushes.
    pub fn subscribe(&self) -> broadcast::Receiver<FlushReport> {
        self.inner.reports.subscribe()
    }
}

impl Inner {
    async fn fire(&self, generation: u64) {
        let grids = {
            let mut state = self.state.lock();
            if state.armed != Some(generation) {
                return;
            }
            state.armed = None;
            std::mem::take(&mut state.dirty)
        };
        self.flush(grids).await;
    }

    /// The held snapshot when its case is still open, else the copy kept from a failed save.
    fn resolve(&self, case_id: &str, mode: RelationMode) -> Option<GridSnapshot> {
        if let Some(snapshot) = self.source.snapshot(case_id, mode) {
            return Some(snapshot);
        }
        let key = (case_id.to_string(), mode);
        self.state.lock().unsaved.get(&key).cloned()
    }

    async fn flush(&self, grids: BTreeSet<DirtyGrid>) -> FlushReport {
        let mut report = FlushReport::default();
        if grids.is_empty() {
            return report;
        }

        let mut snapshots = Vec::with_capacity(grids.len());
        for (case_id, mode) in grids {
            match self.resolve(&case_id, mode) {
                Some(snapshot) => snapshots.push(snapshot),
                None => {
                    warn!(
                        target: "casegrid::coalescer",
                        case_id = %case_id,
                        %mode,
                        "dirty grid is no longer held; nothing to save"
                    );
                    let err = GridError::PersistenceFailure(format!(
                        "no local grid for case {case_id} ({mode})"
                    ));
                    report.failed.push((mode, err));
                }
            }
        }

        let upserts = snapshots.into_iter().map(|snapshot| {
            let store = self.store.clone();
            async move {
                let result = store.upsert(snapshot.clone()).await;
                (snapshot, result)
            }
        });

        let mut retry = Vec::new();
        for (snapshot, result) in join_all(upserts).await {
            let mode = snapshot.mode;
            match result {
                Ok(_) => {
                    debug!(
                        target: "casegrid::coalescer",
                        case_id = %snapshot.case_id,
                        %mode,
                        "grid saved"
                    );
                    let key = (snapshot.case_id, mode);
                    self.state.lock().unsaved.remove(&key);
                    report.saved.push(mode);
                }
                Err(err) => {
                    warn!(
                        target: "casegrid::coalescer",
                        case_id = %snapshot.case_id,
                        %mode,
                        error = %err,
                        "grid save failed; keeping local edits"
                    );
                    report.failed.push((mode, err));
                    retry.push(snapshot);
                }
            }
        }

        if !retry.is_empty() {
            // Failed grids ride along with the next armed flush, under their own case.
            let mut state = self.state.lock();
            for snapshot in retry {
                let key = (snapshot.case_id.clone(), snapshot.mode);
                state.dirty.insert(key.clone());
                state.unsaved.insert(key, snapshot);
            }
        }

        let _ = self.reports.send(report.clone());
        report
    }
}
