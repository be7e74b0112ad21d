#![cfg(not(target_family = "wasm"))]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use wordlink_client::loopback::LoopbackSwitchboard;
use wordlink_client::native::NativeConnector;
use wordlink_client::{
    ClientConfig, ClientError, ConnectionEvent, ConnectionManager, DisconnectReason, EventKind,
    SessionConfig,
};
use wordlink_core::net::messages::PeerMessage;
use wordlink_core::participant::Role;
use wordlink_server::build_app;
use wordlink_server::config::ServerConfig;
use wordlink_server::state::AppState;

struct TestServer {
    url: String,
    state: AppState,
    _handle: tokio::task::JoinHandle<()>,
}

async fn start_server() -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (app, state) = build_app(ServerConfig::default());
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    TestServer {
        url: format!("ws://{addr}/ws"),
        state,
        _handle: handle,
    }
}

fn manager(server: &TestServer, board: &LoopbackSwitchboard) -> ConnectionManager {
    let connector = NativeConnector::new(Rc::new(board.clone()));
    ConnectionManager::new(Box::new(connector), ClientConfig::new(server.url.clone()))
}

fn record(mgr: &ConnectionManager) -> Rc<RefCell<Vec<ConnectionEvent>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    mgr.on_any(move |e| sink.borrow_mut().push(e.clone()));
    log
}

fn received(log: &Rc<RefCell<Vec<ConnectionEvent>>>) -> Vec<PeerMessage> {
    log.borrow()
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::Message(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

/// Poll every manager until `done` holds, yielding to the server in between.
async fn pump_until(managers: &[&ConnectionManager], mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        for mgr in managers {
            mgr.poll();
        }
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

#[tokio::test]
async fn word_selected_before_open_is_delivered_once() {
    let server = start_server().await;
    let board = LoopbackSwitchboard::new();
    let host = manager(&server, &board);
    let guest = manager(&server, &board);
    let host_log = record(&host);
    let guest_log = record(&guest);

    let host_lease = host.acquire(SessionConfig::host("Alice")).unwrap();
    pump_until(&[&host], || host_lease.is_joined()).await;
    assert_eq!(host_lease.role(), Some(Role::Host));
    let code = host_lease.room_code().unwrap();

    // Nobody to talk to yet: the word waits in the queue.
    host.send(&host_lease, PeerMessage::word_select("CRANE"))
        .unwrap();
    assert_eq!(host_lease.pending_len(), 1);

    let guest_lease = guest.acquire(SessionConfig::guest(&code, "Bob")).unwrap();
    pump_until(&[&host, &guest], || !received(&guest_log).is_empty()).await;
    assert!(host_lease.is_ready());
    assert!(guest_lease.is_ready());
    assert_eq!(guest_lease.role(), Some(Role::Guest));

    // Let any stray duplicates arrive before counting.
    for _ in 0..5 {
        host.poll();
        guest.poll();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received(&guest_log), vec![PeerMessage::word_select("CRANE")]);
    assert!(host_log.borrow().contains(&ConnectionEvent::ChannelOpen { flushed: 1 }));

    guest.send(&guest_lease, PeerMessage::guess("SLATE", 1))
        .unwrap();
    guest.send(&guest_lease, PeerMessage::guess("CRANE", 2))
        .unwrap();
    pump_until(&[&host, &guest], || received(&host_log).len() == 2).await;
    assert_eq!(
        received(&host_log),
        vec![PeerMessage::guess("SLATE", 1), PeerMessage::guess("CRANE", 2)]
    );
}

#[tokio::test]
async fn views_share_one_server_seat() {
    let server = start_server().await;
    let board = LoopbackSwitchboard::new();
    let client = manager(&server, &board);

    let lobby = client.acquire(SessionConfig::host("Alice")).unwrap();
    pump_until(&[&client], || lobby.is_joined()).await;
    let game = client.acquire(SessionConfig::host("Alice")).unwrap();
    for _ in 0..5 {
        client.poll();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(game.identity(), lobby.identity());
    let (rooms, participants) = server.state.rooms.read().await.stats();
    assert_eq!((rooms, participants), (1, 1));
}

#[tokio::test]
async fn host_release_closes_room_for_guest() {
    let server = start_server().await;
    let board = LoopbackSwitchboard::new();
    let host = manager(&server, &board);
    let guest = manager(&server, &board);
    let guest_log = record(&guest);

    let host_lease = host.acquire(SessionConfig::host("Alice")).unwrap();
    pump_until(&[&host], || host_lease.is_joined()).await;
    let code = host_lease.room_code().unwrap();
    let guest_lease = guest.acquire(SessionConfig::guest(&code, "Bob")).unwrap();
    pump_until(&[&host, &guest], || guest_lease.is_ready()).await;

    drop(host_lease);
    pump_until(&[&host, &guest], || !guest.is_connected()).await;

    let log = guest_log.borrow();
    assert!(log.iter().any(|e| e.kind() == EventKind::ChannelClosed));
    assert_eq!(
        log.iter()
            .filter(|e| e.kind() == EventKind::Disconnected)
            .count(),
        1
    );
}

#[tokio::test]
async fn unknown_room_is_reported() {
    let server = start_server().await;
    let board = LoopbackSwitchboard::new();
    let guest = manager(&server, &board);
    let log = record(&guest);

    let _lease = guest.acquire(SessionConfig::guest("ZZZ999", "Bob")).unwrap();
    pump_until(&[&guest], || !guest.is_connected()).await;

    let log = log.borrow();
    assert!(
        log.iter()
            .any(|e| matches!(e, ConnectionEvent::Error(ClientError::RoomUnavailable(_))))
    );
    assert_eq!(
        log.last(),
        Some(&ConnectionEvent::Disconnected {
            reason: DisconnectReason::RoomUnavailable
        })
    );
}
