pub mod test_utils;

use fleet_tracking_core::config::TrackingConfig;
use fleet_tracking_core::connection::{
    ConnectionManager, ConnectionStatus, DisconnectReason, TransportError, TransportEvent,
};
use fleet_tracking_core::entity::{Coordinate, EntityId};
use serde_json::json;
use std::time::{Duration, Instant};
use test_utils::*;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[test]
fn initialize_opens_once_and_connects() {
    let (transport, wire) = MockTransport::new();
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, record) = RecordingHandler::new();
    let now = Instant::now();

    manager.initialize(handler, now);
    assert_eq!(manager.status().status, ConnectionStatus::Connecting);

    // already connecting, nothing happens
    manager.connect(now);
    assert_eq!(wire.lock().unwrap().opens, 1);

    manager.handle_event(now, TransportEvent::Connected);
    assert!(manager.is_connected());
    assert_eq!(record.lock().unwrap().connects, 1);

    manager.connect(now);
    assert_eq!(wire.lock().unwrap().opens, 1);
}

#[test]
fn backoff_grows_then_gives_up() {
    let (transport, wire) = MockTransport::failing(TransportError::new("xhr poll error"));
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, record) = RecordingHandler::new();
    let mut now = Instant::now();

    manager.initialize(handler, now);
    for expected in [2000, 4000, 8000] {
        let deadline = manager.next_deadline().unwrap();
        assert_eq!(deadline - now, ms(expected));

        // not yet due
        manager.poll(deadline - ms(1));
        assert_eq!(manager.next_deadline(), Some(deadline));

        now = deadline;
        manager.poll(now);
    }

    let state = manager.status();
    assert_eq!(wire.lock().unwrap().opens, 4);
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(state.retry_count, 3);
    assert!(state.retries_exhausted);
    assert!(!state.unauthorized);
    assert_eq!(manager.next_deadline(), None);
    assert_eq!(record.lock().unwrap().errors.len(), 4);
    assert_eq!(record.lock().unwrap().unauthorized, 0);

    // stays quiet until a manual reconnect
    manager.poll(now + ms(60_000));
    assert_eq!(wire.lock().unwrap().opens, 4);
}

#[test]
fn reconnect_resets_retry_bound() {
    let (transport, wire) = MockTransport::failing(TransportError::new("timeout"));
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, _record) = RecordingHandler::new();
    let mut now = Instant::now();

    manager.initialize(handler, now);
    while let Some(deadline) = manager.next_deadline() {
        now = deadline;
        manager.poll(now);
    }
    assert!(manager.status().retries_exhausted);

    manager.reconnect(now);
    let state = manager.status();
    assert_eq!(state.retry_count, 0);
    assert!(!state.retries_exhausted);
    assert_eq!(manager.next_deadline(), Some(now + ms(1000)));

    manager.poll(now + ms(1000));
    assert_eq!(wire.lock().unwrap().opens, 5);
    // a fresh round of retries starts at the first step again
    assert_eq!(manager.status().retry_count, 1);
    assert_eq!(manager.next_deadline(), Some(now + ms(1000) + ms(2000)));
}

#[test]
fn connected_resets_retry_count() {
    let (transport, _wire) = MockTransport::new();
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, _record) = RecordingHandler::new();
    let now = Instant::now();

    manager.initialize(handler, now);
    manager.handle_event(now, TransportEvent::ConnectError(TransportError::new("refused")));
    assert_eq!(manager.status().retry_count, 1);

    let deadline = manager.next_deadline().unwrap();
    manager.poll(deadline);
    manager.handle_event(deadline, TransportEvent::Connected);

    let state = manager.status();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.last_error, None);
}

#[test]
fn unauthorized_connect_error_is_not_retried() {
    let (transport, wire) = MockTransport::new();
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, record) = RecordingHandler::new();
    let now = Instant::now();

    manager.initialize(handler, now);
    manager.handle_event(
        now,
        TransportEvent::ConnectError(TransportError::from_payload(&json!({"status": 401}))),
    );

    let state = manager.status();
    assert!(state.unauthorized);
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(state.retry_count, 0);
    assert_eq!(manager.next_deadline(), None);
    assert_eq!(record.lock().unwrap().unauthorized, 1);
    assert!(record.lock().unwrap().errors.is_empty());

    manager.poll(now + ms(60_000));
    assert_eq!(wire.lock().unwrap().opens, 1);
}

#[test]
fn unauthorized_when_opening_fails() {
    let (transport, _wire) =
        MockTransport::failing(TransportError::new("jwt expired").with_type("UnauthorizedError"));
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, record) = RecordingHandler::new();

    manager.initialize(handler, Instant::now());

    assert!(manager.status().unauthorized);
    assert_eq!(manager.next_deadline(), None);
    assert_eq!(record.lock().unwrap().unauthorized, 1);
}

#[test]
fn unauthorized_event_disconnects() {
    let (transport, wire) = MockTransport::new();
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, record) = RecordingHandler::new();
    let now = Instant::now();

    manager.initialize(handler, now);
    manager.handle_event(now, TransportEvent::Connected);
    manager.handle_event(
        now,
        TransportEvent::Message {
            event: "unauthorized".to_string(),
            payload: json!({}),
        },
    );

    assert!(!manager.is_connected());
    assert!(manager.status().unauthorized);
    assert_eq!(wire.lock().unwrap().closes, 1);
    assert_eq!(record.lock().unwrap().unauthorized, 1);
    assert_eq!(manager.next_deadline(), None);
}

#[test]
fn tracking_error_is_reported_without_retry() {
    let (transport, _wire) = MockTransport::new();
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, record) = RecordingHandler::new();
    let now = Instant::now();

    manager.initialize(handler, now);
    manager.handle_event(now, TransportEvent::Connected);
    manager.handle_event(
        now,
        TransportEvent::Message {
            event: "tracking-error".to_string(),
            payload: json!({"code": "ORDER_NOT_FOUND", "message": "order not found"}),
        },
    );

    assert!(manager.is_connected());
    assert_eq!(manager.next_deadline(), None);
    let record = record.lock().unwrap();
    assert_eq!(record.errors.len(), 1);
    assert_eq!(record.errors[0].message, "order not found");
    assert_eq!(manager.status().last_error.unwrap().message, "order not found");
}

#[test]
fn unauthorized_message_on_error_event() {
    let (transport, _wire) = MockTransport::new();
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, record) = RecordingHandler::new();
    let now = Instant::now();

    manager.initialize(handler, now);
    manager.handle_event(now, TransportEvent::Connected);
    manager.handle_event(
        now,
        TransportEvent::Error(TransportError::new("Unauthorized access")),
    );

    assert!(manager.status().unauthorized);
    assert!(!manager.is_connected());
    assert_eq!(record.lock().unwrap().unauthorized, 1);
    assert!(record.lock().unwrap().errors.is_empty());
}

#[test]
fn disconnect_reasons_decide_retry() {
    let cases = [
        (DisconnectReason::ClientRequested, false),
        (DisconnectReason::ServerRequested, false),
        (DisconnectReason::TransportClosed, true),
        (DisconnectReason::PingTimeout, true),
        (DisconnectReason::Other("parse error".to_string()), true),
    ];
    for (reason, retries) in cases {
        let (transport, _wire) = MockTransport::new();
        let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
        let (handler, record) = RecordingHandler::new();
        let now = Instant::now();

        manager.initialize(handler, now);
        manager.handle_event(now, TransportEvent::Connected);
        manager.handle_event(now, TransportEvent::Disconnected(reason.clone()));

        assert_eq!(manager.status().status, ConnectionStatus::Disconnected);
        assert_eq!(record.lock().unwrap().disconnects, vec![reason.clone()]);
        assert_eq!(
            manager.next_deadline().is_some(),
            retries,
            "unexpected retry decision for {reason}"
        );
        assert!(record.lock().unwrap().errors.is_empty());
    }
}

#[test]
fn events_are_ignored_while_disconnected() {
    let (transport, _wire) = MockTransport::new();
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, record) = RecordingHandler::new();
    let now = Instant::now();

    manager.initialize(handler, now);
    manager.handle_event(now, TransportEvent::Connected);
    manager.disconnect();

    let update = manager.handle_event(now, tracking_message(bike_payload(39, -7.7479, 110.3898)));
    assert!(update.is_none());
    manager.handle_event(now, TransportEvent::Connected);

    assert!(!manager.is_connected());
    let record = record.lock().unwrap();
    assert!(record.updates.is_empty());
    assert_eq!(record.connects, 1);
}

#[test]
fn updates_reach_the_handler() {
    let (transport, _wire) = MockTransport::new();
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, record) = RecordingHandler::new();
    let now = Instant::now();

    manager.initialize(handler, now);
    manager.handle_event(now, TransportEvent::Connected);
    let update = manager
        .handle_event(now, tracking_message(bike_payload(39, -7.7479, 110.3898)))
        .unwrap();

    assert_eq!(update.id, EntityId::new("39"));
    assert_eq!(record.lock().unwrap().updates, vec![update]);

    // malformed and unknown events never reach the handler
    manager.handle_event(now, tracking_message(json!({"order_id": 39})));
    manager.handle_event(
        now,
        TransportEvent::Message {
            event: "chat-message".to_string(),
            payload: json!({"text": "hi"}),
        },
    );
    assert_eq!(record.lock().unwrap().updates.len(), 1);
}

#[test]
fn reinitialize_replaces_handler() {
    let (transport, _wire) = MockTransport::new();
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (first, first_record) = RecordingHandler::new();
    let (second, second_record) = RecordingHandler::new();
    let now = Instant::now();

    let stale = manager.initialize(first, now);
    let current = manager.initialize(second, now);
    assert_ne!(stale.id(), current.id());

    manager.handle_event(now, TransportEvent::Connected);
    manager.handle_event(now, tracking_message(bike_payload(7, 1.0, 2.0)));

    assert_eq!(first_record.lock().unwrap().updates.len(), 0);
    assert_eq!(second_record.lock().unwrap().updates.len(), 1);

    // the superseded subscription can no longer tear anything down
    manager.dispose(stale);
    assert!(manager.is_connected());
    manager.handle_event(now, tracking_message(bike_payload(7, 1.5, 2.0)));
    assert_eq!(second_record.lock().unwrap().updates.len(), 2);

    manager.dispose(current);
    assert!(!manager.is_connected());
    manager.connect(now);
    manager.handle_event(now, TransportEvent::Connected);
    manager.handle_event(now, tracking_message(bike_payload(7, 2.0, 2.0)));
    assert_eq!(second_record.lock().unwrap().updates.len(), 2);
}

#[test]
fn disconnect_keeps_handler() {
    let (transport, _wire) = MockTransport::new();
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, record) = RecordingHandler::new();
    let now = Instant::now();

    manager.initialize(handler, now);
    manager.handle_event(now, TransportEvent::Connected);
    manager.disconnect();
    manager.connect(now);
    manager.handle_event(now, TransportEvent::Connected);

    assert_eq!(record.lock().unwrap().connects, 2);
}

#[test]
fn emit_requires_connection() {
    let (transport, wire) = MockTransport::new();
    let mut manager = ConnectionManager::new(transport, &TrackingConfig::default());
    let (handler, _record) = RecordingHandler::new();
    let now = Instant::now();
    let order = EntityId::new("39");

    assert!(!manager.join_tracking_room(&order));
    assert!(!manager.send_tracking_history(&order, &[]));
    manager.initialize(handler, now);
    assert!(!manager.join_tracking_room(&order));

    manager.handle_event(now, TransportEvent::Connected);
    assert!(manager.join_tracking_room(&order));
    assert!(manager.send_tracking_update(&order, Coordinate::new(-7.7479, 110.3898)));
    assert!(manager.send_tracking_history(
        &order,
        &[Coordinate::new(-7.7479, 110.3898), Coordinate::new(-7.7480, 110.3899)]
    ));
    assert!(manager.leave_tracking_room(&order));

    let wire = wire.lock().unwrap();
    assert_eq!(
        wire.emitted,
        vec![
            (
                "join_tracking_room".to_string(),
                json!({"orderId": "39"})
            ),
            (
                "tracking-update".to_string(),
                json!({"orderId": "39", "latitude": -7.7479, "longitude": 110.3898})
            ),
            (
                "tracking-history".to_string(),
                json!({
                    "orderId": "39",
                    "history": [
                        {"latitude": -7.7479, "longitude": 110.3898},
                        {"latitude": -7.7480, "longitude": 110.3899}
                    ]
                })
            ),
            (
                "leave_tracking_room".to_string(),
                json!({"orderId": "39"})
            ),
        ]
    );
}
