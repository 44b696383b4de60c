//! Session lifecycle, input routing and tick behaviour of `StateManager`.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use metamind_protocol::{ClientId, ClientInput, ServerEvent};
use metamind_session::{
    ClientPhase, SessionConfig, SessionError, StateManager,
};
use metamind_sync::{MirrorOutcome, StateMirror, SyncConfig, init_sync_context};
use serde_json::json;
use tokio::time::Instant;

use common::{Counter, Flaky, KeysOnly, Panicky, RecordingSink};

const C1: ClientId = ClientId(1);
const C2: ClientId = ClientId(2);

fn manager(sink: &Arc<RecordingSink>) -> StateManager {
    StateManager::new(
        SessionConfig::default(),
        init_sync_context(SyncConfig::default()),
        sink.clone(),
    )
}

fn later(ms: u64) -> Instant {
    Instant::now() + Duration::from_millis(ms)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_start_session_without_connect_returns_not_connected() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);

    let result = mgr.start_session(C1, "counter", Box::new(Counter::new()));

    assert!(matches!(result, Err(SessionError::NotConnected(id)) if id == C1));
    assert_eq!(mgr.phase(C1), ClientPhase::Disconnected);
}

#[test]
fn test_start_session_connected_client_enters_session() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);
    assert_eq!(mgr.phase(C1), ClientPhase::Connected);

    let info = mgr
        .start_session(C1, "counter", Box::new(Counter::new()))
        .unwrap();

    assert_eq!(mgr.phase(C1), ClientPhase::InSession);
    assert_eq!(info.module_id, "counter");
    assert_eq!(info.session_id.0.len(), 32);
    assert_eq!(
        sink.events_for(C1),
        vec![ServerEvent::SessionStarted {
            session_id: info.session_id,
            module_id: "counter".into(),
        }]
    );
}

#[test]
fn test_end_session_runs_cleanup_and_notifies_client() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    let module = Counter::new();
    let cleaned_up = Arc::clone(&module.cleaned_up);
    mgr.connect_client(C1);
    let info = mgr.start_session(C1, "counter", Box::new(module)).unwrap();

    let ended = mgr.end_session(C1, "done").unwrap();

    assert_eq!(ended, info.session_id);
    assert!(cleaned_up.load(Ordering::SeqCst));
    assert_eq!(mgr.phase(C1), ClientPhase::Connected);
    assert!(sink.events_for(C1).contains(&ServerEvent::SessionEnded {
        session_id: info.session_id,
        reason: "done".into(),
    }));
}

#[test]
fn test_end_session_without_session_returns_error() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);

    let result = mgr.end_session(C1, "none");

    assert!(matches!(result, Err(SessionError::NoActiveSession(_))));
}

#[test]
fn test_start_session_twice_replaces_and_restarts_with_full_update() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);
    let first = mgr
        .start_session(C1, "counter", Box::new(Counter::new()))
        .unwrap();
    mgr.tick(later(100));
    mgr.tick(later(200));

    let second = mgr
        .start_session(C1, "counter", Box::new(Counter::new()))
        .unwrap();
    sink.clear();
    mgr.tick(later(300));

    assert_ne!(first.session_id, second.session_id);
    assert_eq!(mgr.session_count(), 1);
    let updates = sink.updates_for(C1);
    assert_eq!(updates.len(), 1);
    assert!(!updates[0].is_delta);
}

#[test]
fn test_disconnect_client_ends_session_and_drops_sync_record() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    let module = Counter::new();
    let cleaned_up = Arc::clone(&module.cleaned_up);
    mgr.connect_client(C1);
    mgr.start_session(C1, "counter", Box::new(module)).unwrap();

    mgr.disconnect_client(C1);

    assert_eq!(mgr.phase(C1), ClientPhase::Disconnected);
    assert!(cleaned_up.load(Ordering::SeqCst));
    assert!(!mgr.synchronizer().is_registered(C1));
    assert!(!mgr.has_sessions());
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[test]
fn test_handle_client_input_click_reaches_module() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);
    mgr.start_session(C1, "counter", Box::new(Counter::new()))
        .unwrap();

    let result = mgr
        .handle_client_input(C1, ClientInput::Click { x: 3, y: 3 })
        .unwrap();

    assert_eq!(result, json!({ "hit": true, "clicks": 1 }));
}

#[test]
fn test_handle_client_input_missing_capability_returns_unsupported() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);
    mgr.start_session(C1, "counter", Box::new(Counter::new()))
        .unwrap();

    let result = mgr.handle_client_input(
        C1,
        ClientInput::Key {
            key: "space".into(),
        },
    );

    assert!(matches!(
        result,
        Err(SessionError::Unsupported { input: "key", .. })
    ));
}

#[test]
fn test_handle_client_input_module_error_is_returned() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);
    mgr.start_session(C1, "keys", Box::new(KeysOnly)).unwrap();

    let ok = mgr.handle_client_input(
        C1,
        ClientInput::Key {
            key: "space".into(),
        },
    );
    let bad = mgr.handle_client_input(C1, ClientInput::Key { key: "q".into() });

    assert_eq!(ok.unwrap(), json!({ "accepted": true }));
    assert!(matches!(bad, Err(SessionError::Module(_))));
    // Input errors don't end the session.
    assert_eq!(mgr.phase(C1), ClientPhase::InSession);
}

#[test]
fn test_handle_client_input_without_session_returns_error() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);

    let result = mgr.handle_client_input(C1, ClientInput::FullStateRequest);

    assert!(matches!(result, Err(SessionError::NoActiveSession(_))));
}

#[test]
fn test_full_state_request_makes_next_update_full() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);
    mgr.start_session(C1, "counter", Box::new(Counter::new()))
        .unwrap();
    mgr.tick(later(100));
    mgr.tick(later(200));

    let result = mgr
        .handle_client_input(C1, ClientInput::FullStateRequest)
        .unwrap();
    mgr.tick(later(300));

    assert_eq!(result, json!({ "full_state_sent": true }));
    let kinds: Vec<bool> =
        sink.updates_for(C1).iter().map(|u| u.is_delta).collect();
    assert_eq!(kinds, vec![false, true, false]);
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_tick_passes_elapsed_time_to_module() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    let module = Counter::new();
    let last_dt = Arc::clone(&module.last_dt);
    let start = Instant::now();
    mgr.connect_client(C1);
    mgr.start_session(C1, "counter", Box::new(module)).unwrap();

    mgr.tick(start + Duration::from_millis(250));
    assert_eq!(*last_dt.lock().unwrap(), Some(Duration::from_millis(250)));

    mgr.tick(start + Duration::from_millis(400));
    assert_eq!(*last_dt.lock().unwrap(), Some(Duration::from_millis(150)));
}

#[test]
fn test_tick_updates_reconstruct_module_state_on_client() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);
    mgr.start_session(C1, "counter", Box::new(Counter::new()))
        .unwrap();

    for n in 1..=5 {
        mgr.tick(later(n * 100));
        if n == 3 {
            mgr.handle_client_input(C1, ClientInput::Click { x: 1, y: 2 })
                .unwrap();
        }
    }

    let mut mirror = StateMirror::new();
    for update in sink.updates_for(C1) {
        let outcome = mirror.apply(&update).unwrap();
        assert!(matches!(outcome, MirrorOutcome::Applied { .. }));
    }
    assert_eq!(mirror.version(), 5);
    assert_eq!(mirror.state()["clicks"], 1);
}

#[test]
fn test_tick_failing_session_does_not_affect_other_sessions() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    let (broken, _switch) = Flaky::new(true);
    mgr.connect_client(C1);
    mgr.connect_client(C2);
    mgr.start_session(C1, "flaky", Box::new(broken)).unwrap();
    mgr.start_session(C2, "counter", Box::new(Counter::new()))
        .unwrap();

    let report = mgr.tick(later(100));

    assert_eq!(report.updated, vec![C2]);
    assert_eq!(report.failed, vec![C1]);
    assert!(report.ended.is_empty());
    assert!(sink.updates_for(C1).is_empty());
    assert_eq!(sink.updates_for(C2).len(), 1);
}

#[test]
fn test_tick_panicking_module_counts_as_failure() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);
    mgr.connect_client(C2);
    mgr.start_session(C1, "panicky", Box::new(Panicky)).unwrap();
    mgr.start_session(C2, "counter", Box::new(Counter::new()))
        .unwrap();

    let report = mgr.tick(later(100));
    assert_eq!(report.failed, vec![C1]);
    assert_eq!(report.updated, vec![C2]);

    mgr.tick(later(200));
    let report = mgr.tick(later(300));

    assert_eq!(report.ended, vec![C1]);
    assert_eq!(mgr.phase(C1), ClientPhase::Connected);
    assert_eq!(sink.updates_for(C2).len(), 3);
}

#[test]
fn test_tick_three_consecutive_failures_ends_session() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    let (broken, _switch) = Flaky::new(true);
    mgr.connect_client(C1);
    let info = mgr.start_session(C1, "flaky", Box::new(broken)).unwrap();

    assert!(mgr.tick(later(100)).ended.is_empty());
    assert!(mgr.tick(later(200)).ended.is_empty());
    let report = mgr.tick(later(300));

    assert_eq!(report.ended, vec![C1]);
    assert_eq!(mgr.phase(C1), ClientPhase::Connected);
    assert!(sink.events_for(C1).iter().any(|e| matches!(
        e,
        ServerEvent::SessionEnded { session_id, .. } if *session_id == info.session_id
    )));
}

#[test]
fn test_tick_success_resets_failure_count() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    let (flaky, switch) = Flaky::new(true);
    mgr.connect_client(C1);
    mgr.start_session(C1, "flaky", Box::new(flaky)).unwrap();

    mgr.tick(later(100));
    mgr.tick(later(200));
    switch.store(false, Ordering::SeqCst);
    assert_eq!(mgr.tick(later(300)).updated, vec![C1]);
    switch.store(true, Ordering::SeqCst);
    mgr.tick(later(400));
    let report = mgr.tick(later(500));

    assert!(report.ended.is_empty());
    assert_eq!(mgr.phase(C1), ClientPhase::InSession);
}

#[test]
fn test_tick_without_sessions_reports_nothing() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);

    let report = mgr.tick(later(100));

    assert!(report.updated.is_empty() && report.failed.is_empty());
}

#[test]
fn test_send_update_after_context_shutdown_fails() {
    let sink = RecordingSink::new();
    let mut mgr = manager(&sink);
    mgr.connect_client(C1);
    mgr.start_session(C1, "counter", Box::new(Counter::new()))
        .unwrap();
    mgr.synchronizer().context().shutdown();

    let result = mgr.send_update(C1);

    assert!(matches!(result, Err(SessionError::Sync(_))));
}

#[test]
fn test_max_consecutive_failures_is_configurable() {
    let sink = RecordingSink::new();
    let mut mgr = StateManager::new(
        SessionConfig {
            max_consecutive_failures: 1,
            ..SessionConfig::default()
        },
        init_sync_context(SyncConfig::default()),
        sink.clone(),
    );
    let (broken, _switch) = Flaky::new(true);
    mgr.connect_client(C1);
    mgr.start_session(C1, "flaky", Box::new(broken)).unwrap();

    assert_eq!(mgr.tick(later(100)).ended, vec![C1]);
}
