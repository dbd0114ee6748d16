//! Integration tests for the coordinator actor.
//!
//! These tests drive the spawned coordinator through its handle, the same
//! surface the socket server uses, and observe callbacks through channel
//! notifiers.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};

use warden_core::{ClientId, ClientStatus};
use wardend::audit::{spawn_audit_writer, AuditEventType, AuditHandle, MemorySink};
use wardend::config::CoordinatorConfig;
use wardend::coordinator::{spawn_coordinator, CoordinatorError, CoordinatorEvent, CoordinatorHandle, RemovalReason};
use wardend::notifier::{ChannelNotifier, Notification, Notifier};
use wardend::relay::Delivery;

// ============================================================================
// Test Helpers
// ============================================================================

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default timings: the ticker never fires during a test, so only explicit
/// monitor passes and simulated failures detect deaths.
fn spawn_default() -> CoordinatorHandle {
    spawn_coordinator(CoordinatorConfig::default(), AuditHandle::disabled())
}

/// Short timings for tests that rely on the background monitor.
fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        heartbeat_interval: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_millis(500),
        monitor_interval: Duration::from_millis(50),
    }
}

fn notifier() -> (Arc<dyn Notifier>, mpsc::UnboundedReceiver<Notification>) {
    let (notifier, rx) = ChannelNotifier::channel();
    (Arc::new(notifier), rx)
}

/// Drains everything currently queued on a notifier.
fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

async fn next_event(events: &mut broadcast::Receiver<CoordinatorEvent>) -> CoordinatorEvent {
    timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("event should arrive")
        .expect("event channel open")
}

/// Waits for the first event matching `pred`, skipping others.
async fn wait_for_event(
    events: &mut broadcast::Receiver<CoordinatorEvent>,
    pred: impl Fn(&CoordinatorEvent) -> bool,
) -> CoordinatorEvent {
    timeout(EVENT_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("matching event should arrive")
}

// ============================================================================
// End-to-End Scenarios
// ============================================================================

#[tokio::test]
async fn test_failover_promotes_standby() {
    let handle = spawn_default();
    let (n1, mut rx1) = notifier();
    let (n2, mut rx2) = notifier();

    handle.register("C1", false, n1).await.unwrap();
    handle.register("C2", true, n2).await.unwrap();
    assert_eq!(drain(&mut rx1), vec![Notification::StartWorking]);
    assert!(drain(&mut rx2).is_empty());

    let report = handle
        .simulate_failure(ClientId::new("C1"))
        .await
        .expect("C1 is registered");

    assert_eq!(report.dead.len(), 1);
    assert_eq!(report.dead[0].client_id, ClientId::new("C1"));
    assert_eq!(report.dead[0].previous_status, ClientStatus::Working);

    let clients = handle.list_clients().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].id, ClientId::new("C2"));
    assert_eq!(clients[0].status, ClientStatus::Working);
    assert!(!clients[0].is_standby);

    assert_eq!(drain(&mut rx2), vec![Notification::StartWorking]);
    assert_eq!(drain(&mut rx1), vec![Notification::StopWorking]);
}

#[tokio::test]
async fn test_failover_without_standby_is_fail_open() {
    let handle = spawn_default();
    let mut events = handle.subscribe();
    let (n1, _rx1) = notifier();

    handle.register("C1", false, n1).await.unwrap();
    let report = handle.simulate_failure(ClientId::new("C1")).await.unwrap();

    assert_eq!(report.exhausted, vec![ClientId::new("C1")]);
    assert!(handle.list_clients().await.is_empty());

    let event = wait_for_event(&mut events, |e| {
        matches!(e, CoordinatorEvent::RedundancyExhausted { .. })
    })
    .await;
    assert_eq!(
        event,
        CoordinatorEvent::RedundancyExhausted {
            failed_id: ClientId::new("C1")
        }
    );

    // Still serving requests in degraded mode.
    assert!(handle.is_connected());
    let (n3, mut rx3) = notifier();
    let outcome = handle.register("C3", false, n3).await.unwrap();
    assert_eq!(outcome.status, ClientStatus::Working);
    assert_eq!(drain(&mut rx3), vec![Notification::StartWorking]);
}

#[tokio::test]
async fn test_oldest_standby_promoted_first() {
    let handle = spawn_default();
    let (nw, _rxw) = notifier();
    let (n1, mut rx1) = notifier();
    let (n2, mut rx2) = notifier();

    handle.register("W", false, nw).await.unwrap();
    handle.register("S1", true, n1).await.unwrap();
    sleep(Duration::from_millis(5)).await;
    handle.register("S2", true, n2).await.unwrap();

    let report = handle.simulate_failure(ClientId::new("W")).await.unwrap();

    assert_eq!(report.promotions.len(), 1);
    assert_eq!(report.promotions[0].promoted_id, ClientId::new("S1"));
    assert_eq!(drain(&mut rx1), vec![Notification::StartWorking]);
    assert!(drain(&mut rx2).is_empty());

    // The next failure promotes the remaining standby.
    let report = handle.simulate_failure(ClientId::new("S1")).await.unwrap();
    assert_eq!(report.promotions[0].promoted_id, ClientId::new("S2"));
    assert_eq!(drain(&mut rx2), vec![Notification::StartWorking]);
}

#[tokio::test]
async fn test_simultaneous_registrations_promote_in_insertion_order() {
    let handle = spawn_default();
    let (nw, _rxw) = notifier();
    handle.register("W", false, nw).await.unwrap();

    let mut receivers = Vec::new();
    for id in ["S-c", "S-a", "S-b"] {
        let (n, rx) = notifier();
        handle.register(id, true, n).await.unwrap();
        receivers.push(rx);
    }

    let report = handle.simulate_failure(ClientId::new("W")).await.unwrap();
    assert_eq!(report.promotions[0].promoted_id, ClientId::new("S-c"));
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_register_twice_is_idempotent() {
    let handle = spawn_default();
    let (n1, _rx1) = notifier();
    let (n2, mut rx2) = notifier();

    let first = handle.register("C2", true, n1).await.unwrap();
    let second = handle.register("C2", false, n2).await.unwrap();

    assert!(!first.reconnected);
    assert!(second.reconnected);
    assert_eq!(second.status, ClientStatus::Standby);

    let clients = handle.list_clients().await;
    assert_eq!(clients.len(), 1);
    assert!(clients[0].is_standby);
    assert!(drain(&mut rx2).is_empty());
}

#[tokio::test]
async fn test_rejoin_after_death_is_a_new_session() {
    let handle = spawn_default();
    let (n1, mut rx1) = notifier();

    handle.register("C1", true, n1).await.unwrap();
    let first_registered_at = handle.list_clients().await[0].registered_at;

    let report = handle.simulate_failure(ClientId::new("C1")).await.unwrap();
    assert_eq!(report.dead[0].previous_status, ClientStatus::Standby);
    assert!(handle.list_clients().await.is_empty());
    assert!(drain(&mut rx1).is_empty());

    // Keep the wall-clock stamps apart.
    sleep(Duration::from_millis(10)).await;

    let (n2, mut rx2) = notifier();
    let outcome = handle.register("C1", false, n2).await.unwrap();

    assert!(!outcome.reconnected);
    assert_eq!(outcome.status, ClientStatus::Working);
    assert_eq!(drain(&mut rx2), vec![Notification::StartWorking]);

    let clients = handle.list_clients().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].status, ClientStatus::Working);
    assert!(!clients[0].is_standby);
    assert!(clients[0].registered_at > first_registered_at);
}

#[tokio::test]
async fn test_reconnect_rebinds_callbacks() {
    let handle = spawn_default();
    let (old, old_rx) = notifier();
    let (new, mut new_rx) = notifier();

    handle.register("R", true, old).await.unwrap();
    drop(old_rx);
    handle.register("R", true, new).await.unwrap();

    let outcome = handle
        .relay(ClientId::new("X"), ClientId::new("R"), "cGF5bG9hZA==".to_string())
        .await;

    assert_eq!(outcome.delivery, Delivery::Delivered);
    assert_eq!(
        drain(&mut new_rx),
        vec![Notification::Deliver {
            ciphertext: "cGF5bG9hZA==".to_string(),
            sender_id: ClientId::new("X"),
            receiver_id: ClientId::new("R"),
        }]
    );
}

#[tokio::test]
async fn test_invalid_client_id_rejected() {
    let handle = spawn_default();
    let (n, _rx) = notifier();

    let result = handle.register("bad\u{7}id", false, n.clone()).await;
    assert!(matches!(result, Err(CoordinatorError::InvalidClientId(_))));

    let result = handle.register("", false, n).await;
    assert!(matches!(result, Err(CoordinatorError::InvalidClientId(_))));

    assert!(handle.list_clients().await.is_empty());
}

// ============================================================================
// Heartbeats and Liveness
// ============================================================================

#[tokio::test]
async fn test_unknown_heartbeat_is_noop() {
    let handle = spawn_default();
    assert!(!handle.heartbeat(ClientId::new("ghost")).await);
    assert!(!handle.unregister(ClientId::new("ghost")).await);
    assert!(handle.simulate_failure(ClientId::new("ghost")).await.is_none());
    assert!(handle.list_clients().await.is_empty());
}

#[tokio::test]
async fn test_heartbeats_keep_session_alive() {
    let handle = spawn_coordinator(fast_config(), AuditHandle::disabled());
    let (n, _rx) = notifier();
    handle.register("W", false, n).await.unwrap();

    // Three times the timeout, heartbeating at the advertised interval.
    for _ in 0..15 {
        sleep(Duration::from_millis(100)).await;
        assert!(handle.heartbeat(ClientId::new("W")).await);
    }

    let clients = handle.list_clients().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].status, ClientStatus::Working);
}

#[tokio::test]
async fn test_background_monitor_detects_silence() {
    let handle = spawn_coordinator(fast_config(), AuditHandle::disabled());
    let mut events = handle.subscribe();
    let (nw, mut rxw) = notifier();
    let (ns, mut rxs) = notifier();

    handle.register("W", false, nw).await.unwrap();
    handle.register("S", true, ns).await.unwrap();

    // Only the standby keeps heartbeating.
    let keepalive = {
        let handle = handle.clone();
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(100)).await;
                handle.heartbeat(ClientId::new("S")).await;
            }
        })
    };

    let event = wait_for_event(&mut events, |e| matches!(e, CoordinatorEvent::Promoted { .. })).await;
    keepalive.abort();

    assert_eq!(
        event,
        CoordinatorEvent::Promoted {
            client_id: ClientId::new("S"),
            failed_id: ClientId::new("W"),
        }
    );
    assert_eq!(
        drain(&mut rxw),
        vec![Notification::StartWorking, Notification::StopWorking]
    );
    assert_eq!(drain(&mut rxs), vec![Notification::StartWorking]);
}

#[tokio::test]
async fn test_registry_never_holds_dead_sessions() {
    let handle = spawn_default();
    let mut rxs = Vec::new();
    for (id, standby) in [("A", false), ("B", true), ("C", true), ("D", false)] {
        let (n, rx) = notifier();
        handle.register(id, standby, n).await.unwrap();
        rxs.push(rx);
    }

    handle.simulate_failure(ClientId::new("A")).await.unwrap();
    handle.simulate_failure(ClientId::new("C")).await.unwrap();
    handle.run_monitor_cycle().await.unwrap();

    let clients = handle.list_clients().await;
    assert_eq!(clients.len(), 2);
    for client in clients {
        assert!(matches!(
            client.status,
            ClientStatus::Working | ClientStatus::Standby
        ));
    }
}

// ============================================================================
// Unregister
// ============================================================================

#[tokio::test]
async fn test_unregister_working_stops_without_failover() {
    let handle = spawn_default();
    let mut events = handle.subscribe();
    let (nw, mut rxw) = notifier();
    let (ns, mut rxs) = notifier();

    handle.register("W", false, nw).await.unwrap();
    handle.register("S", true, ns).await.unwrap();

    assert!(handle.unregister(ClientId::new("W")).await);

    assert_eq!(
        drain(&mut rxw),
        vec![Notification::StartWorking, Notification::StopWorking]
    );
    assert!(drain(&mut rxs).is_empty());

    let event = wait_for_event(&mut events, |e| matches!(e, CoordinatorEvent::Removed { .. })).await;
    assert_eq!(
        event,
        CoordinatorEvent::Removed {
            client_id: ClientId::new("W"),
            reason: RemovalReason::Unregistered,
        }
    );

    let clients = handle.list_clients().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].status, ClientStatus::Standby);
}

// ============================================================================
// Relay
// ============================================================================

#[tokio::test]
async fn test_relay_miss_returns_payload() {
    let handle = spawn_default();
    let (na, mut rxa) = notifier();
    handle.register("A", true, na).await.unwrap();

    let outcome = handle
        .relay(ClientId::new("A"), ClientId::new("ghost"), "payload".to_string())
        .await;

    assert_eq!(outcome.ciphertext, "payload");
    assert_eq!(outcome.delivery, Delivery::ReceiverUnknown);
    assert!(drain(&mut rxa).is_empty());
}

#[tokio::test]
async fn test_relay_delivers_once() {
    let handle = spawn_default();
    let mut events = handle.subscribe();
    let (na, _rxa) = notifier();
    let (nb, mut rxb) = notifier();
    handle.register("A", true, na).await.unwrap();
    handle.register("B", true, nb).await.unwrap();

    let outcome = handle
        .relay(ClientId::new("A"), ClientId::new("B"), "c2VjcmV0".to_string())
        .await;

    assert_eq!(outcome.ciphertext, "c2VjcmV0");
    assert_eq!(
        drain(&mut rxb),
        vec![Notification::Deliver {
            ciphertext: "c2VjcmV0".to_string(),
            sender_id: ClientId::new("A"),
            receiver_id: ClientId::new("B"),
        }]
    );

    let event = wait_for_event(&mut events, |e| matches!(e, CoordinatorEvent::Relayed { .. })).await;
    assert_eq!(
        event,
        CoordinatorEvent::Relayed {
            sender_id: ClientId::new("A"),
            receiver_id: ClientId::new("B"),
            delivered: true,
        }
    );
}

#[tokio::test]
async fn test_relay_to_broken_callback_still_succeeds() {
    let handle = spawn_default();
    let (nb, rxb) = notifier();
    handle.register("B", true, nb).await.unwrap();
    drop(rxb);

    let outcome = handle
        .relay(ClientId::new("A"), ClientId::new("B"), "payload".to_string())
        .await;

    assert_eq!(outcome.ciphertext, "payload");
    assert!(matches!(outcome.delivery, Delivery::Failed(_)));
    // A failed push does not kill the session.
    assert_eq!(handle.list_clients().await.len(), 1);
}

// ============================================================================
// Events and Audit
// ============================================================================

#[tokio::test]
async fn test_event_sequence_for_failover() {
    let handle = spawn_default();
    let mut events = handle.subscribe();
    let (n1, _rx1) = notifier();
    let (n2, _rx2) = notifier();

    handle.register("C1", false, n1).await.unwrap();
    handle.register("C2", true, n2).await.unwrap();
    handle.simulate_failure(ClientId::new("C1")).await.unwrap();

    assert!(matches!(next_event(&mut events).await, CoordinatorEvent::Registered { .. }));
    assert!(matches!(next_event(&mut events).await, CoordinatorEvent::Registered { .. }));
    assert_eq!(
        next_event(&mut events).await,
        CoordinatorEvent::Died {
            client_id: ClientId::new("C1")
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        CoordinatorEvent::Promoted {
            client_id: ClientId::new("C2"),
            failed_id: ClientId::new("C1"),
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        CoordinatorEvent::Removed {
            client_id: ClientId::new("C1"),
            reason: RemovalReason::HeartbeatTimeout,
        }
    );
}

#[tokio::test]
async fn test_audit_trail_records_failover() {
    let sink = MemorySink::new();
    let audit = spawn_audit_writer(Box::new(sink.clone()));
    let handle = spawn_coordinator(CoordinatorConfig::default(), audit);
    let (n1, _rx1) = notifier();
    let (n2, _rx2) = notifier();

    handle.register("C1", false, n1).await.unwrap();
    handle.register("C2", true, n2).await.unwrap();
    handle.simulate_failure(ClientId::new("C1")).await.unwrap();

    let events = timeout(EVENT_TIMEOUT, async {
        loop {
            let events: Vec<AuditEventType> =
                sink.records().await.iter().filter_map(|r| r.event()).collect();
            if events.contains(&AuditEventType::Promoted) {
                return events;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("audit writer should catch up");

    assert_eq!(
        events,
        vec![
            AuditEventType::Registered,
            AuditEventType::Registered,
            AuditEventType::SimulatedFailure,
            AuditEventType::HeartbeatTimeout,
            AuditEventType::Promoted,
        ]
    );
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_registrations_and_heartbeats() {
    let handle = spawn_default();

    let mut tasks = Vec::new();
    for i in 0..20 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            let (n, rx) = notifier();
            let id = format!("worker-{i}");
            handle.register(&id, i % 2 == 0, n).await.unwrap();
            for _ in 0..10 {
                assert!(handle.heartbeat(ClientId::new(id.clone())).await);
            }
            rx
        }));
    }

    let mut receivers = Vec::new();
    for task in tasks {
        receivers.push(task.await.unwrap());
    }

    let clients = handle.list_clients().await;
    assert_eq!(clients.len(), 20);
    let working = clients
        .iter()
        .filter(|c| c.status == ClientStatus::Working)
        .count();
    assert_eq!(working, 10);

    // Listing is ordered by registration time.
    for pair in clients.windows(2) {
        assert!(pair[0].registered_at <= pair[1].registered_at);
    }
}
