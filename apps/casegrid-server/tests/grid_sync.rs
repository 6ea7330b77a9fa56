use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use casegrid_client::{ApiClient, ClientConfig, ConnectionState, RecordingRenderer, Tool, Viewer};
use casegrid_core::{Case, CaseDraft, CellState, GridStore, RelationMode};
use casegrid_server::storage::{MemoryStorage, SharedStorage};
use casegrid_server::AppState;
use tokio::net::TcpListener;
use tokio::time::sleep;

const WS: RelationMode = RelationMode::WeaponsSuspects;

async fn start_server_on(listener: TcpListener) -> (String, AppState) {
    let addr = listener.local_addr().expect("addr");
    let storage: SharedStorage = Arc::new(MemoryStorage::new());
    let state = AppState::new(storage);
    let served = state.clone();
    tokio::spawn(async move {
        let _ = casegrid_server::serve(listener, served).await;
    });
    (format!("http://{addr}"), state)
}

async fn start_server() -> (String, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    start_server_on(listener).await
}

fn config(base_url: &str) -> ClientConfig {
    ClientConfig::new(base_url)
        .with_save_delay(Duration::from_millis(50))
        .with_reconnect_delay(Duration::from_millis(50))
}

async fn create_case(api: &ApiClient, title: &str) -> Case {
    api.create_case(&CaseDraft {
        title: title.into(),
        clues: "The lamp was moved".into(),
        suspects: vec!["Ann".into(), "Bo".into()],
        locations: vec!["Hall".into(), "Attic".into()],
        weapons: vec!["Rope".into(), "Pipe".into()],
    })
    .await
    .expect("create case")
}

async fn wait_for_viewers(state: &AppState, count: usize) {
    while state.hub().viewer_count() < count {
        sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_cell(
    viewer: &Viewer,
    mode: RelationMode,
    row: usize,
    col: usize,
    state: CellState,
) {
    while viewer.cell(mode, row, col) != Some(state) {
        sleep(Duration::from_millis(10)).await;
    }
}

#[test_timeout::tokio_timeout_test(20)]
async fn edit_reaches_viewers_of_the_same_case_only() {
    let (base_url, state) = start_server().await;
    let api = ApiClient::new(&base_url);
    let case = create_case(&api, "Lighthouse").await;
    let other = create_case(&api, "Orchard").await;

    let a_paint = Arc::new(RecordingRenderer::new());
    let b_paint = Arc::new(RecordingRenderer::new());
    let c_paint = Arc::new(RecordingRenderer::new());
    let a = Viewer::connect(&config(&base_url), a_paint.clone());
    let b = Viewer::connect(&config(&base_url), b_paint.clone());
    let c = Viewer::connect(&config(&base_url), c_paint.clone());
    assert!(a.open(&case).await);
    assert!(b.open(&case).await);
    assert!(c.open(&other).await);
    for viewer in [&a, &b, &c] {
        viewer.wait_connected().await.expect("connected");
    }
    wait_for_viewers(&state, 3).await;
    a_paint.take();
    b_paint.take();
    c_paint.take();

    let mut reports = a.flush_reports();
    assert_eq!(a.cycle(WS, 0, 0), Some(CellState::Yes));
    wait_for_cell(&b, WS, 0, 0, CellState::Yes).await;

    let report = reports.recv().await.expect("flush report");
    assert_eq!(report.saved, vec![WS]);
    assert!(report.failed.is_empty());

    let painted = b_paint.take();
    assert_eq!(painted.len(), 1);
    assert_eq!((painted[0].row, painted[0].col, painted[0].state), (0, 0, CellState::Yes));

    // Give the echo and the other case's copy time to arrive.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(a_paint.take().len(), 1);
    assert!(c_paint.painted().is_empty());
    assert_eq!(c.cell(WS, 0, 0), Some(CellState::Unknown));

    let stored = api.load(&case.id, WS).await.expect("round trip");
    assert_eq!((stored.rows, stored.cols), (2, 2));
    assert_eq!(stored.get(0, 0), CellState::Yes);
    assert_eq!(stored.cells.len(), 1);
    assert!(api
        .load(&other.id, WS)
        .await
        .expect_err("other case untouched")
        .is_not_found());
}

#[test_timeout::tokio_timeout_test(20)]
async fn paint_gesture_arrives_as_one_snapshot() {
    let (base_url, state) = start_server().await;
    let api = ApiClient::new(&base_url);
    let case = create_case(&api, "Harbor").await;

    let painter = Viewer::connect(&config(&base_url), Arc::new(RecordingRenderer::new()));
    let watcher_paint = Arc::new(RecordingRenderer::new());
    let watcher = Viewer::connect(&config(&base_url), watcher_paint.clone());
    painter.open(&case).await;
    watcher.open(&case).await;
    watcher.wait_connected().await.expect("connected");
    wait_for_viewers(&state, 2).await;
    watcher_paint.take();

    let mode = RelationMode::WeaponsLocations;
    painter.pointer_down(mode, 0, 0, Tool::No);
    painter.pointer_enter(mode, 0, 1);
    painter.pointer_enter(mode, 1, 1);
    painter.pointer_up();

    wait_for_cell(&watcher, mode, 1, 1, CellState::No).await;
    let painted = watcher_paint.take();
    assert_eq!(painted.len(), 3);
    assert!(painted.iter().all(|change| change.state == CellState::No));
    assert_eq!(watcher.cell(mode, 1, 0), Some(CellState::Unknown));
}

#[test_timeout::tokio_timeout_test(20)]
async fn viewer_connects_once_the_server_comes_up() {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("probe");
    let addr: SocketAddr = probe.local_addr().expect("addr");
    drop(probe);
    let base_url = format!("http://{addr}");

    let late_paint = Arc::new(RecordingRenderer::new());
    let late = Viewer::connect(&config(&base_url), late_paint.clone());
    sleep(Duration::from_millis(120)).await;
    assert_ne!(late.sync_state(), Some(ConnectionState::Connected));

    let listener = TcpListener::bind(addr).await.expect("rebind");
    let (_, state) = start_server_on(listener).await;
    late.wait_connected().await.expect("reconnected");

    let api = ApiClient::new(&base_url);
    let case = create_case(&api, "Mill").await;
    late.open(&case).await;
    let writer = Viewer::connect(&config(&base_url), Arc::new(RecordingRenderer::new()));
    writer.open(&case).await;
    writer.wait_connected().await.expect("connected");
    wait_for_viewers(&state, 2).await;

    writer.apply_tool(RelationMode::LocationsSuspects, 1, 0, Tool::Yes);
    wait_for_cell(&late, RelationMode::LocationsSuspects, 1, 0, CellState::Yes).await;
}
