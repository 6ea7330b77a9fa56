use std::sync::Arc;

use async_trait::async_trait;
use casegrid_core::{GridError, GridSnapshot, GridStore, RelationMode, ServerEvent};
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::storage::{SharedStorage, StorageError};

pub type ViewerId = Uuid;

/// Fan-out of grid updates to every connected viewer.
///
/// Viewers are not scoped to a case; each one filters what it receives.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    viewers: Arc<DashMap<ViewerId, mpsc::UnboundedSender<Arc<str>>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> (ViewerId, mpsc::UnboundedReceiver<Arc<str>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.viewers.insert(id, tx);
        debug!(
            target: "casegrid::hub",
            viewer = %id,
            viewers = self.viewers.len(),
            "viewer connected"
        );
        (id, rx)
    }

    pub fn disconnect(&self, id: ViewerId) {
        if self.viewers.remove(&id).is_some() {
            debug!(
                target: "casegrid::hub",
                viewer = %id,
                viewers = self.viewers.len(),
                "viewer disconnected"
            );
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Sends `snapshot` as a `grid:update` event to every viewer. Returns how many
    /// viewers it was queued for.
    pub fn publish(&self, snapshot: &GridSnapshot) -> usize {
        let event = ServerEvent::GridUpdate(snapshot.clone());
        let text: Arc<str> = match serde_json::to_string(&event) {
            Ok(text) => text.into(),
            Err(err) => {
                error!(target: "casegrid::hub", error = %err, "failed to encode grid update");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.viewers.iter() {
            if entry.value().send(text.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*entry.key());
            }
        }
        // Removing while iterating would deadlock on the shard lock.
        for id in dead {
            trace!(target: "casegrid::hub", viewer = %id, "pruning closed viewer");
            self.viewers.remove(&id);
        }
        delivered
    }
}

/// Grid writes on the server: persist, then broadcast what was persisted.
///
/// Writes to the same `(case, mode)` are serialized so broadcasts for a key go out
/// in the order the store completed them. Grid writes hold their case's lock shared
/// and case deletion holds it exclusively, so no grid outlives its case.
#[derive(Clone)]
pub struct GridPublisher {
    storage: SharedStorage,
    hub: BroadcastHub,
    cases: Arc<DashMap<String, Arc<RwLock<()>>>>,
    keys: Arc<DashMap<(String, RelationMode), Arc<Mutex<()>>>>,
}

impl GridPublisher {
    pub fn new(storage: SharedStorage, hub: BroadcastHub) -> Self {
        Self {
            storage,
            hub,
            cases: Arc::new(DashMap::new()),
            keys: Arc::new(DashMap::new()),
        }
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    fn case_lock(&self, case_id: &str) -> Arc<RwLock<()>> {
        self.cases.entry(case_id.to_string()).or_default().clone()
    }

    /// Persists and broadcasts `snapshot` if its case exists. `Ok(None)` when it does not.
    pub async fn save_to_case(
        &self,
        snapshot: GridSnapshot,
    ) -> Result<Option<GridSnapshot>, GridError> {
        let case = self.case_lock(&snapshot.case_id);
        let _case = case.read().await;
        if self.storage.get_case(&snapshot.case_id).await?.is_none() {
            return Ok(None);
        }
        self.write(snapshot).await.map(Some)
    }

    /// Deletes a case and its grids once no grid write for it is in flight. Returns
    /// whether the case existed.
    pub async fn delete_case(&self, case_id: &str) -> Result<bool, StorageError> {
        let case = self.case_lock(case_id);
        let _case = case.write().await;
        let existed = self.storage.delete_case(case_id).await?;
        // Nothing holds a key lock of this case while its lock is held exclusively, and
        // writers still queued on the old case lock find the case gone.
        self.keys.retain(|(id, _), _| id != case_id);
        self.cases.remove(case_id);
        Ok(existed)
    }

    /// Caller holds the case lock.
    async fn write(&self, snapshot: GridSnapshot) -> Result<GridSnapshot, GridError> {
        let key = (snapshot.case_id.clone(), snapshot.mode);
        let lock = self.keys.entry(key).or_default().clone();
        let _key = lock.lock().await;

        let saved = self.storage.upsert(snapshot).await?;
        let delivered = self.hub.publish(&saved);
        debug!(
            target: "casegrid::hub",
            case_id = %saved.case_id,
            mode = %saved.mode,
            cells = saved.cells.len(),
            delivered,
            "grid persisted and broadcast"
        );
        Ok(saved)
    }
}

#[async_trait]
impl GridStore for GridPublisher {
    async fn load(&self, case_id: &str, mode: RelationMode) -> Result<GridSnapshot, GridError> {
        self.storage.load(case_id, mode).await
    }

    async fn upsert(&self, snapshot: GridSnapshot) -> Result<GridSnapshot, GridError> {
        let case = self.case_lock(&snapshot.case_id);
        let _case = case.read().await;
        self.write(snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CaseStore, MemoryStorage};
    use casegrid_core::{Case, CaseDraft, CellState, GridDimensions};
    use std::time::Duration;
    use tokio::time::sleep;

    const WS: RelationMode = RelationMode::WeaponsSuspects;

    fn snapshot(case_id: &str) -> GridSnapshot {
        let mut snapshot =
            GridSnapshot::empty(case_id, RelationMode::WeaponsSuspects, GridDimensions::new(2, 2));
        snapshot.set(0, 0, CellState::Yes);
        snapshot
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn publish_reaches_every_viewer_regardless_of_case() {
        let hub = BroadcastHub::new();
        let (_, mut a) = hub.connect();
        let (_, mut b) = hub.connect();

        assert_eq!(hub.publish(&snapshot("c9")), 2);
        let expected = concat!(
            r#"{"type":"grid:update","caseId":"c9","mode":"weapons","#,
            r#""rows":2,"cols":2,"cells":{"0:0":"yes"}}"#
        );
        assert_eq!(&*a.recv().await.expect("a"), expected);
        assert_eq!(&*b.recv().await.expect("b"), expected);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn closed_viewers_are_pruned_on_publish() {
        let hub = BroadcastHub::new();
        let (_, live) = hub.connect();
        let (_, closed) = hub.connect();
        drop(closed);

        assert_eq!(hub.publish(&snapshot("c1")), 1);
        assert_eq!(hub.viewer_count(), 1);
        drop(live);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn disconnect_stops_delivery() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.connect();
        hub.disconnect(id);
        assert_eq!(hub.publish(&snapshot("c1")), 0);
        assert!(rx.recv().await.is_none());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn upsert_persists_then_broadcasts() {
        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let publisher = GridPublisher::new(storage.clone(), BroadcastHub::new());
        let (_, mut rx) = publisher.hub().connect();

        publisher.upsert(snapshot("c1")).await.expect("upsert");
        let event: ServerEvent =
            serde_json::from_str(&rx.recv().await.expect("event")).expect("decode");
        let ServerEvent::GridUpdate(received) = event;
        assert_eq!(received, snapshot("c1"));
        assert_eq!(
            storage
                .load("c1", RelationMode::WeaponsSuspects)
                .await
                .expect("stored"),
            received
        );
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn same_key_writes_broadcast_in_completion_order() {
        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let publisher = GridPublisher::new(storage.clone(), BroadcastHub::new());
        let (_, mut rx) = publisher.hub().connect();

        let writes = (0..2usize).map(|col| {
            let publisher = publisher.clone();
            let mut snapshot =
                GridSnapshot::empty("c1", RelationMode::WeaponsSuspects, GridDimensions::new(2, 2));
            snapshot.set(1, col, CellState::No);
            tokio::spawn(async move { publisher.upsert(snapshot).await })
        });
        for write in writes.collect::<Vec<_>>() {
            write.await.expect("join").expect("upsert");
        }

        let mut last = None;
        while let Ok(text) = rx.try_recv() {
            let ServerEvent::GridUpdate(snapshot) = serde_json::from_str(&text).expect("decode");
            last = Some(snapshot);
        }
        let stored = storage
            .load("c1", RelationMode::WeaponsSuspects)
            .await
            .expect("stored");
        assert_eq!(last, Some(stored));
    }

    #[test_timeout::tokio_timeout_test(20, multi_thread)]
    async fn viewers_joining_and_leaving_mid_publish_keep_the_registry_consistent() {
        const ROUNDS: usize = 500;
        let hub = BroadcastHub::new();
        let (_, mut steady) = hub.connect();

        let churn = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for round in 0..ROUNDS {
                    let (id, rx) = hub.connect();
                    tokio::task::yield_now().await;
                    if round % 2 == 0 {
                        hub.disconnect(id);
                    } else {
                        drop(rx);
                    }
                }
            })
        };
        let publishes = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for _ in 0..ROUNDS {
                    assert!(hub.publish(&snapshot("c1")) >= 1);
                    tokio::task::yield_now().await;
                }
            })
        };
        churn.await.expect("churn");
        publishes.await.expect("publishes");

        let mut received = 0;
        while steady.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, ROUNDS);

        // Viewers that dropped their receiver are pruned by the next publish.
        assert_eq!(hub.publish(&snapshot("c1")), 1);
        assert_eq!(hub.viewer_count(), 1);
    }

    /// Memory storage whose case lookups take a while.
    struct SlowLookups(MemoryStorage);

    #[async_trait]
    impl GridStore for SlowLookups {
        async fn load(&self, case_id: &str, mode: RelationMode) -> Result<GridSnapshot, GridError> {
            self.0.load(case_id, mode).await
        }

        async fn upsert(&self, snapshot: GridSnapshot) -> Result<GridSnapshot, GridError> {
            self.0.upsert(snapshot).await
        }
    }

    #[async_trait]
    impl CaseStore for SlowLookups {
        async fn list_cases(&self) -> Result<Vec<Case>, StorageError> {
            self.0.list_cases().await
        }

        async fn get_case(&self, id: &str) -> Result<Option<Case>, StorageError> {
            sleep(Duration::from_millis(50)).await;
            self.0.get_case(id).await
        }

        async fn put_case(&self, case: Case) -> Result<Case, StorageError> {
            self.0.put_case(case).await
        }

        async fn delete_case(&self, id: &str) -> Result<bool, StorageError> {
            self.0.delete_case(id).await
        }
    }

    fn case(id: &str) -> Case {
        Case::new(
            id,
            CaseDraft {
                title: "Quarry".into(),
                clues: "Gravel in the boot".into(),
                suspects: vec!["Ann".into(), "Bo".into()],
                locations: vec!["Pit".into(), "Shed".into()],
                weapons: vec!["Rope".into(), "Pipe".into()],
            },
        )
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn delete_waits_for_a_grid_write_already_past_its_case_check() {
        let storage: SharedStorage = Arc::new(SlowLookups(MemoryStorage::new()));
        storage.put_case(case("c1")).await.expect("put");
        let publisher = GridPublisher::new(storage.clone(), BroadcastHub::new());

        let save = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.save_to_case(snapshot("c1")).await })
        };
        sleep(Duration::from_millis(10)).await;
        assert!(publisher.delete_case("c1").await.expect("delete"));

        let saved = save.await.expect("join").expect("save");
        assert_eq!(saved, Some(snapshot("c1")));
        assert!(storage
            .load("c1", WS)
            .await
            .expect_err("grid removed with its case")
            .is_not_found());

        assert_eq!(publisher.save_to_case(snapshot("c1")).await.expect("save"), None);
        assert!(storage.load("c1", WS).await.is_err());
        assert!(publisher.keys.is_empty());
    }
}
