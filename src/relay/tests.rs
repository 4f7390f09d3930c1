use super::cache::StateCache;
use super::engine::{Broadcaster, lock, run_event_pump};
use super::event::TelemetryEvent;
use super::health;
use crate::config::Settings;
use crate::session::{SessionState, ViewerMirror, ViewerSession};
use crate::transport::message::ServerMessage;
use crate::upstream::{StateTopicFilter, TelemetryClient};
use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

fn event(device: &str, property: &str, value: &str) -> TelemetryEvent {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    TelemetryEvent::new(
        device,
        property,
        value,
        at,
        format!("bluetti/state/{device}/{property}"),
    )
}

fn decode(msg: WsMessage) -> ServerMessage {
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

fn connect(broadcaster: &mut Broadcaster) -> (String, mpsc::UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let id = broadcaster.register_session(ViewerSession::new(tx)).unwrap();
    (id, rx)
}

fn drain_into(mirror: &mut ViewerMirror, rx: &mut mpsc::UnboundedReceiver<WsMessage>) {
    while let Ok(msg) = rx.try_recv() {
        mirror.apply(&decode(msg));
    }
}

#[test]
fn test_cache_last_write_wins() {
    let mut cache = StateCache::new();
    cache.apply(&event("A", "X", "10"));
    cache.apply(&event("A", "X", "12"));
    assert_eq!(cache.get("A", "X").unwrap().value, "12");
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_cache_apply_is_idempotent() {
    let e = event("A", "X", "10");
    let mut once = StateCache::new();
    once.apply(&e);
    let mut twice = StateCache::new();
    twice.apply(&e);
    twice.apply(&e);
    assert_eq!(once.snapshot(), twice.snapshot());
    assert_eq!(once.get("A", "X"), twice.get("A", "X"));
}

#[test]
fn test_cache_creates_devices_on_demand() {
    let mut cache = StateCache::new();
    assert!(cache.is_empty());
    cache.apply(&event("A", "X", "1"));
    cache.apply(&event("A", "Y", "2"));
    cache.apply(&event("B", "X", "3"));
    assert_eq!(cache.device_count(), 2);
    assert_eq!(cache.len(), 3);
    assert!(cache.get("C", "X").is_none());
    assert!(cache.get("A", "Z").is_none());
}

#[test]
fn test_snapshot_is_isolated_from_later_applies() {
    let mut cache = StateCache::new();
    cache.apply(&event("A", "X", "10"));
    let snapshot = cache.snapshot();

    cache.apply(&event("A", "X", "11"));
    cache.apply(&event("B", "Y", "1"));

    assert_eq!(snapshot.get("A", "X"), Some("10"));
    assert!(snapshot.get("B", "Y").is_none());
    assert_eq!(cache.snapshot().get("A", "X"), Some("11"));
}

#[test]
fn test_snapshot_serializes_as_nested_object() {
    let mut cache = StateCache::new();
    cache.apply(&event("AC200MAX", "battery_percentage", "87"));
    let value = serde_json::to_value(cache.snapshot()).unwrap();
    assert_eq!(value, json!({"AC200MAX": {"battery_percentage": "87"}}));
}

#[test]
fn test_malformed_topic_leaves_cache_untouched() {
    let client = TelemetryClient::new(Settings::default().mqtt);
    let mut broadcaster = Broadcaster::default();
    if let Some(e) = client.on_publish("foo/bar", b"1") {
        broadcaster.handle_event(e);
    }
    assert!(broadcaster.cache().is_empty());
}

#[test]
fn test_register_pushes_snapshot_first() {
    let mut broadcaster = Broadcaster::default();
    broadcaster.handle_event(event("A", "X", "1"));

    let (id, mut rx) = connect(&mut broadcaster);
    broadcaster.handle_event(event("A", "X", "2"));

    let first = decode(rx.try_recv().unwrap());
    match first {
        ServerMessage::InitialData(snapshot) => assert_eq!(snapshot.get("A", "X"), Some("1")),
        other => panic!("Expected initial-data, got {other:?}"),
    }
    match decode(rx.try_recv().unwrap()) {
        ServerMessage::BluettiData(update) => assert_eq!(update.value, "2"),
        other => panic!("Expected bluetti-data, got {other:?}"),
    }
    assert_eq!(
        broadcaster.session(&id).unwrap().state(),
        SessionState::Open
    );
}

#[test]
fn test_register_fails_for_dead_queue() {
    let mut broadcaster = Broadcaster::default();
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    drop(rx);
    assert!(broadcaster.register_session(ViewerSession::new(tx)).is_err());
    assert_eq!(broadcaster.session_count(), 0);
}

#[test]
fn test_delta_wire_format() {
    let mut broadcaster = Broadcaster::default();
    let (_id, mut rx) = connect(&mut broadcaster);
    rx.try_recv().unwrap();

    assert_eq!(broadcaster.handle_event(event("AC200MAX", "battery_percentage", "87")), 1);

    let text = rx.try_recv().unwrap().into_text().unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "bluetti-data",
            "data": {
                "deviceName": "AC200MAX",
                "property": "battery_percentage",
                "value": "87",
                "timestamp": "2024-05-01T12:00:00.000Z"
            }
        })
    );
}

#[test]
fn test_closed_session_does_not_block_others() {
    let mut broadcaster = Broadcaster::default();
    let (_dead, dead_rx) = connect(&mut broadcaster);
    let (_live_a, mut rx_a) = connect(&mut broadcaster);
    let (_live_b, mut rx_b) = connect(&mut broadcaster);
    drop(dead_rx);
    rx_a.try_recv().unwrap();
    rx_b.try_recv().unwrap();

    let delivered = broadcaster.handle_event(event("A", "X", "1"));

    assert_eq!(delivered, 2);
    assert!(matches!(decode(rx_a.try_recv().unwrap()), ServerMessage::BluettiData(_)));
    assert!(matches!(decode(rx_b.try_recv().unwrap()), ServerMessage::BluettiData(_)));
}

#[test]
fn test_closing_session_is_skipped() {
    let mut broadcaster = Broadcaster::default();
    let (closing, mut rx) = connect(&mut broadcaster);
    rx.try_recv().unwrap();

    broadcaster.begin_close(&closing);
    assert_eq!(broadcaster.handle_event(event("A", "X", "1")), 0);
    assert!(rx.try_recv().is_err());
    // Still counts as a member until removed.
    assert_eq!(broadcaster.session_count(), 1);
}

#[tokio::test]
async fn test_remove_session_is_idempotent_and_cancels_timer() {
    let mut broadcaster = Broadcaster::default();
    let (id, _rx) = connect(&mut broadcaster);
    let timer = tokio::spawn(std::future::pending::<()>());
    broadcaster.attach_liveness(&id, timer.abort_handle());

    assert!(broadcaster.remove_session(&id));
    assert!(!broadcaster.remove_session(&id));
    assert_eq!(broadcaster.session_count(), 0);
    assert!(timer.await.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_attach_liveness_to_missing_session_cancels_timer() {
    let mut broadcaster = Broadcaster::default();
    let timer = tokio::spawn(std::future::pending::<()>());
    broadcaster.attach_liveness(&"gone".to_string(), timer.abort_handle());
    assert!(timer.await.unwrap_err().is_cancelled());
}

#[test]
fn test_probe_pings_live_session() {
    let mut broadcaster = Broadcaster::default();
    let (id, mut rx) = connect(&mut broadcaster);
    rx.try_recv().unwrap();

    assert!(broadcaster.probe(&id));
    assert_eq!(decode(rx.try_recv().unwrap()), ServerMessage::Ping);
    assert_eq!(broadcaster.session_count(), 1);
}

#[test]
fn test_probe_reaps_dead_session() {
    let mut broadcaster = Broadcaster::default();
    let (id, rx) = connect(&mut broadcaster);
    drop(rx);

    assert!(!broadcaster.probe(&id));
    assert_eq!(broadcaster.session_count(), 0);
    assert!(!broadcaster.probe(&id));
}

#[test]
fn test_reply_pong() {
    let mut broadcaster = Broadcaster::default();
    let (id, mut rx) = connect(&mut broadcaster);
    rx.try_recv().unwrap();

    broadcaster.reply_pong(&id);
    assert_eq!(decode(rx.try_recv().unwrap()), ServerMessage::Pong);

    // Unknown session: nothing happens.
    broadcaster.reply_pong(&"missing".to_string());
}

#[test]
fn test_late_joiners_converge() {
    let mut broadcaster = Broadcaster::default();
    let mut viewers = Vec::new();
    let script = [
        ("AC200MAX", "battery_percentage", "90"),
        ("AC200MAX", "ac_output_power", "300"),
        ("EB3A", "battery_percentage", "40"),
        ("AC200MAX", "battery_percentage", "89"),
        ("AC200MAX", "battery_percentage", "89"),
        ("EB3A", "dc_input_power", "120"),
        ("AC200MAX", "ac_output_power", "0"),
    ];

    for (step, (device, property, value)) in script.iter().enumerate() {
        // A new viewer joins before every other event.
        if step % 2 == 0 {
            let (_id, rx) = connect(&mut broadcaster);
            viewers.push((ViewerMirror::new(), rx));
        }
        broadcaster.handle_event(event(device, property, value));

        for (mirror, rx) in viewers.iter_mut() {
            drain_into(mirror, rx);
            assert!(mirror.is_synced());
            assert_eq!(mirror.state(), &broadcaster.snapshot());
        }
    }
    assert_eq!(viewers.len(), 4);
}

#[test]
fn test_end_to_end_scenario() {
    let filter = StateTopicFilter::new("state-namespace");
    let mut broadcaster = Broadcaster::default();

    let (_early, mut early_rx) = connect(&mut broadcaster);
    assert_eq!(
        decode(early_rx.try_recv().unwrap()),
        ServerMessage::InitialData(Default::default())
    );

    let e = filter
        .parse("state-namespace/state/AC200MAX/battery_percentage", b"87")
        .unwrap();
    broadcaster.handle_event(e);

    match decode(early_rx.try_recv().unwrap()) {
        ServerMessage::BluettiData(update) => {
            assert_eq!(update.device_name, "AC200MAX");
            assert_eq!(update.property, "battery_percentage");
            assert_eq!(update.value, "87");
        }
        other => panic!("Expected bluetti-data, got {other:?}"),
    }

    let (_late, mut late_rx) = connect(&mut broadcaster);
    let text = late_rx.try_recv().unwrap().into_text().unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        value,
        json!({"type": "initial-data", "data": {"AC200MAX": {"battery_percentage": "87"}}})
    );
    assert!(late_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_event_pump_preserves_order() {
    let broadcaster = Broadcaster::default().shared();
    let (_id, mut rx) = connect(&mut lock(&broadcaster));
    rx.try_recv().unwrap();

    let (tx, events) = mpsc::channel(4);
    let pump = tokio::spawn(run_event_pump(broadcaster.clone(), events));
    for i in 0..20 {
        tx.send(event("A", "X", &i.to_string())).await.unwrap();
    }
    drop(tx);
    pump.await.unwrap();

    let values: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|msg| match decode(msg) {
            ServerMessage::BluettiData(update) => update.value,
            other => panic!("Expected bluetti-data, got {other:?}"),
        })
        .collect();
    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(values, expected);
    assert_eq!(lock(&broadcaster).cache().get("A", "X").unwrap().value, "19");
}

#[test]
fn test_health_report_counts() {
    let client = TelemetryClient::new(Settings::default().mqtt);
    let broadcaster = Broadcaster::default().shared();
    {
        let mut b = lock(&broadcaster);
        b.handle_event(event("A", "X", "1"));
        b.handle_event(event("A", "Y", "1"));
        b.handle_event(event("B", "X", "1"));
        let (_id, _rx) = connect(&mut b);
    }

    let report = health::report(&broadcaster, &client.status_handle());
    assert_eq!(report.status, "ok");
    assert_eq!(report.devices, 2);
    assert_eq!(report.keys, 3);
    assert!(!report.mqtt.connected);
    // The receiver was dropped but the session stays until probed.
    assert_eq!(report.viewers, 1);

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["mqtt"]["state"], "disconnected");
}

#[test]
fn test_probe_reaps_viewer_that_stopped_reading() {
    let mut broadcaster = Broadcaster::default();
    // The receiver stays alive but nothing ever drains it.
    let (id, _rx) = connect(&mut broadcaster);

    for i in 0..5_000 {
        broadcaster.handle_event(event("A", "X", &i.to_string()));
        if i % 1_000 == 0 && !broadcaster.probe(&id) {
            break;
        }
    }

    assert!(broadcaster.session(&id).is_none());
    assert_eq!(broadcaster.session_count(), 0);
    assert_eq!(broadcaster.handle_event(event("A", "X", "late")), 0);
}

#[test]
fn test_probe_keeps_viewer_whose_writer_keeps_up() {
    let mut broadcaster = Broadcaster::default();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let session = ViewerSession::new(tx);
    let progress = session.write_progress();
    let id = broadcaster.register_session(session).unwrap();

    for round in 0..5 {
        broadcaster.handle_event(event("A", "X", &round.to_string()));
        assert!(broadcaster.probe(&id));
        while rx.try_recv().is_ok() {
            progress.record_written();
        }
        assert_eq!(broadcaster.session(&id).unwrap().backlog(), 0);
    }
    assert_eq!(broadcaster.session_count(), 1);
}
