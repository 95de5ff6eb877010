//! End-to-end tests for the reporting service
//!
//! These tests drive a [`MonitoringService`] against [`MockConnector`] on a
//! paused tokio clock, so every reconnect and tick delay is asserted exactly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use statlink_core::transport::{MockConnector, MockPeer};
use statlink_core::{
    Error, MessageType, MonitoringService, ServiceConfig, ServiceEvent, StatsSource,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

fn config(interval_ms: u64) -> ServiceConfig {
    statlink_core::logging::init_test();
    ServiceConfig::new("ws://monitor.test/feed", "exampleToken")
        .unwrap()
        .with_interval(Duration::from_millis(interval_ms))
        .unwrap()
}

/// Next envelope written by the client, decoded
async fn next_envelope(peer: &mut MockPeer) -> (Instant, Value) {
    let (at, text) = peer.next_text().await.expect("client closed the connection");
    (at, serde_json::from_str(&text).expect("client sent invalid JSON"))
}

async fn wait_for<F>(events: &mut UnboundedReceiver<ServiceEvent>, mut pred: F) -> ServiceEvent
where
    F: FnMut(&ServiceEvent) -> bool,
{
    loop {
        let event = events.recv().await.expect("service event stream ended");
        if pred(&event) {
            return event;
        }
    }
}

fn millis(from: Instant, to: Instant) -> u64 {
    (to - from).as_millis() as u64
}

/// Stats source that records when it was called and replays a script,
/// repeating the last entry once the script runs out.
#[derive(Clone)]
struct ScriptedStats {
    calls: Arc<Mutex<Vec<Instant>>>,
    script: Arc<Vec<Option<Value>>>,
}

impl ScriptedStats {
    fn new(script: Vec<Option<Value>>) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(script),
        }
    }

    fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

impl StatsSource for ScriptedStats {
    fn collect(&mut self) -> statlink_core::Result<Option<Value>> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(Instant::now());
        let index = (calls.len() - 1).min(self.script.len() - 1);
        Ok(self.script[index].clone())
    }
}

// ============================================
// Steady-state reporting
// ============================================

#[tokio::test(start_paused = true)]
async fn test_settings_then_logs_every_interval() {
    let connector = MockConnector::new();
    let stats = ScriptedStats::new(vec![Some(json!({"a": 1}))]);
    let mut service = MonitoringService::with_connector(config(1_000), stats, connector.clone());

    let started = Instant::now();
    service.connect();
    let mut peer = connector.accepted().await;

    let (at, settings) = next_envelope(&mut peer).await;
    assert_eq!(settings, json!({"type": "SETTINGS", "data": {"serviceTimeout": 2000}}));
    assert_eq!(millis(started, at), 0);

    let mut sent_at = Vec::new();
    for _ in 0..5 {
        let (at, log) = next_envelope(&mut peer).await;
        assert_eq!(log, json!({"type": "LOG", "data": {"stats": {"a": 1}}}));
        sent_at.push(at);
    }

    // First tick after the short initial delay, then one per interval.
    assert_eq!(millis(started, sent_at[0]), 100);
    let gaps: Vec<u64> = sent_at.windows(2).map(|w| millis(w[0], w[1])).collect();
    assert_eq!(gaps, vec![1_000; 4]);

    service.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn test_empty_ticks_stretch_cadence_until_data_returns() {
    let connector = MockConnector::new();
    let stats = ScriptedStats::new(vec![None, Some(Value::Null), None, Some(json!({"b": 2}))]);
    let mut service =
        MonitoringService::with_connector(config(10_000), stats.clone(), connector.clone());

    service.connect();
    let mut peer = connector.accepted().await;
    let (_, settings) = next_envelope(&mut peer).await;
    assert_eq!(settings["data"]["serviceTimeout"], 20_000);

    let (first_log, log) = next_envelope(&mut peer).await;
    assert_eq!(log["data"]["stats"], json!({"b": 2}));
    let (second_log, _) = next_envelope(&mut peer).await;

    let calls = stats.calls();
    let gaps: Vec<u64> = calls.windows(2).map(|w| millis(w[0], w[1])).collect();
    // Three empty ticks: counter 1, 2, 3 -> 2s, 4s, min(8s, 10s).
    // Fourth tick sends, counter resets -> next tick after the full interval.
    assert_eq!(&gaps[..4], &[2_000, 4_000, 8_000, 10_000]);
    assert_eq!(first_log, calls[3]);
    assert_eq!(millis(first_log, second_log), 10_000);

    service.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_log_sent_for_empty_payload() {
    let connector = MockConnector::new();
    let stats = ScriptedStats::new(vec![None]);
    let mut service =
        MonitoringService::with_connector(config(1_000), stats.clone(), connector.clone());

    service.connect();
    let mut peer = connector.accepted().await;
    let (_, settings) = next_envelope(&mut peer).await;
    assert_eq!(settings["type"], "SETTINGS");

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(stats.calls().len() >= 5);
    assert!(peer.try_next_frame().is_none());

    service.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_and_panicking_sources_do_not_stop_reporting() {
    let connector = MockConnector::new();
    let mut calls = 0u32;
    let stats = move || {
        calls += 1;
        match calls {
            1 => panic!("stats source exploded"),
            _ => Some(json!({ "call": calls })),
        }
    };
    let config = config(1_000).with_verbose(true);
    let mut service = MonitoringService::with_connector(config, stats, connector.clone());

    service.connect();
    let mut peer = connector.accepted().await;
    let (_, settings) = next_envelope(&mut peer).await;
    assert_eq!(settings["type"], "SETTINGS");

    let (_, log) = next_envelope(&mut peer).await;
    assert_eq!(log["data"]["stats"]["call"], 2);
    assert!(service.is_active());

    service.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn test_erroring_source_counts_as_failure() {
    struct Broken;
    impl StatsSource for Broken {
        fn collect(&mut self) -> statlink_core::Result<Option<Value>> {
            Err(Error::Stats("collector offline".to_string()))
        }
    }

    let connector = MockConnector::new();
    let mut service = MonitoringService::with_connector(config(1_000), Broken, connector.clone());
    service.connect();
    let mut peer = connector.accepted().await;
    let (_, settings) = next_envelope(&mut peer).await;
    assert_eq!(settings["type"], "SETTINGS");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(peer.try_next_frame().is_none());
    assert!(service.is_active());

    service.terminate().await;
}

// ============================================
// Connection lifecycle
// ============================================

#[tokio::test(start_paused = true)]
async fn test_settings_sent_once_per_open() {
    let connector = MockConnector::new();
    let stats = ScriptedStats::new(vec![None]);
    let mut service = MonitoringService::with_connector(config(1_000), stats, connector.clone());
    let mut events = service.take_events().unwrap();
    assert!(service.take_events().is_none());

    service.connect();
    wait_for(&mut events, |e| matches!(e, ServiceEvent::Opened)).await;
    let mut first = connector.accepted().await;
    let (_, settings) = next_envelope(&mut first).await;
    assert_eq!(settings["type"], "SETTINGS");

    let dropped_at = Instant::now();
    first.disconnect();
    wait_for(&mut events, |e| matches!(e, ServiceEvent::Closed)).await;
    wait_for(&mut events, |e| matches!(e, ServiceEvent::Opened)).await;

    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(millis(dropped_at, attempts[1].at), 2_000);
    assert_eq!(attempts[1].authorization, "Bearer exampleToken");

    let mut second = connector.accepted().await;
    let (_, settings) = next_envelope(&mut second).await;
    assert_eq!(settings["type"], "SETTINGS");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(first.try_next_frame().is_none());
    assert!(second.try_next_frame().is_none());

    service.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn test_settings_precede_logs_on_every_connection() {
    let connector = MockConnector::new();
    // With a 100ms cadence, every reconnect lands on a tick boundary.
    connector.refuse_next(1);
    let stats = ScriptedStats::new(vec![Some(json!({"a": 1}))]);
    let mut service = MonitoringService::with_connector(config(100), stats, connector.clone());

    service.connect();
    for _ in 0..10 {
        let mut peer = connector.accepted().await;
        let (_, first) = next_envelope(&mut peer).await;
        assert_eq!(first["type"], "SETTINGS");
        let (_, log) = next_envelope(&mut peer).await;
        assert_eq!(log["type"], "LOG");
        peer.disconnect();
    }

    service.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_connections_are_annotated_and_backed_off() {
    let connector = MockConnector::new();
    connector.refuse_next(6);
    let stats = ScriptedStats::new(vec![Some(json!({"a": 1}))]);
    let mut service =
        MonitoringService::with_connector(config(1_000), stats.clone(), connector.clone());
    let mut events = service.take_events().unwrap();

    service.connect();

    let mut refusals = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            ServiceEvent::Error(e) => {
                assert!(e.is_connection_refused());
                refusals.push(e.connection_attempts().unwrap());
            }
            ServiceEvent::Opened => break,
            ServiceEvent::Closed => {}
            ServiceEvent::Result(_) => panic!("unexpected result"),
        }
    }
    assert_eq!(refusals, vec![0, 1, 2, 3, 4, 5]);

    // Nothing was collected while the channel was down.
    assert!(stats.calls().is_empty());

    let gaps: Vec<u64> = connector
        .attempts()
        .windows(2)
        .map(|w| millis(w[0].at, w[1].at))
        .collect();
    assert_eq!(gaps, vec![2_000, 4_000, 8_000, 16_000, 32_000, 32_000]);

    let mut peer = connector.accepted().await;
    let (_, settings) = next_envelope(&mut peer).await;
    assert_eq!(settings["type"], "SETTINGS");
    let (_, log) = next_envelope(&mut peer).await;
    assert_eq!(log["type"], "LOG");

    service.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn test_terminate_cancels_pending_reconnect() {
    let connector = MockConnector::new();
    connector.refuse_next(100);
    let stats = ScriptedStats::new(vec![Some(json!({"a": 1}))]);
    let mut service = MonitoringService::with_connector(config(1_000), stats, connector.clone());
    let mut events = service.take_events().unwrap();

    service.connect();
    wait_for(&mut events, |e| matches!(e, ServiceEvent::Error(_))).await;
    wait_for(&mut events, |e| matches!(e, ServiceEvent::Closed)).await;

    // Reconnect pending in 2s; terminate halfway.
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    service.terminate().await;
    assert!(!service.is_active());

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(connector.attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_stops_ticks_and_closes() {
    let connector = MockConnector::new();
    let stats = ScriptedStats::new(vec![Some(json!({"a": 1}))]);
    let mut service =
        MonitoringService::with_connector(config(1_000), stats.clone(), connector.clone());
    let mut events = service.take_events().unwrap();

    service.connect();
    let mut peer = connector.accepted().await;
    next_envelope(&mut peer).await;
    next_envelope(&mut peer).await;

    service.terminate().await;
    wait_for(&mut events, |e| matches!(e, ServiceEvent::Closed)).await;

    let calls_at_terminate = stats.calls().len();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(stats.calls().len(), calls_at_terminate);
    assert_eq!(connector.attempts().len(), 1);

    // Stray sends after terminate are inert.
    service.send(MessageType::Log, json!({"late": true}));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(peer.try_next_frame().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_terminate_during_in_flight_tick() {
    let connector = MockConnector::new();
    connector.delay_sends(Duration::from_millis(500));
    let stats = ScriptedStats::new(vec![Some(json!({"a": 1}))]);
    let mut service =
        MonitoringService::with_connector(config(1_000), stats.clone(), connector.clone());

    let started = Instant::now();
    service.connect();
    let mut peer = connector.accepted().await;

    // SETTINGS is written at 500ms, the overdue tick collects right after
    // and its LOG is still being written at 700ms.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(stats.calls().len(), 1);
    assert_eq!(millis(started, stats.calls()[0]), 500);

    service.terminate().await;
    assert!(!service.is_active());

    let (_, settings) = next_envelope(&mut peer).await;
    assert_eq!(settings["type"], "SETTINGS");
    let (at, log) = next_envelope(&mut peer).await;
    assert_eq!(log["type"], "LOG");
    assert_eq!(millis(started, at), 1_000);
    assert!(peer.next_text().await.is_none());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(stats.calls().len(), 1);
    assert_eq!(connector.attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_noop_while_running_and_restarts_after_terminate() {
    let connector = MockConnector::new();
    let stats = ScriptedStats::new(vec![Some(json!({"a": 1}))]);
    let mut service = MonitoringService::with_connector(config(1_000), stats, connector.clone());

    service.connect();
    service.connect();
    let mut peer = connector.accepted().await;
    next_envelope(&mut peer).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(connector.attempts().len(), 1);

    service.terminate().await;
    service.connect();
    let mut peer = connector.accepted().await;
    let (_, settings) = next_envelope(&mut peer).await;
    assert_eq!(settings["type"], "SETTINGS");
    assert_eq!(connector.attempts().len(), 2);

    service.terminate().await;
}

// ============================================
// Inbound dispatch and host sends
// ============================================

#[tokio::test(start_paused = true)]
async fn test_inbound_dispatch() {
    let connector = MockConnector::new();
    let stats = ScriptedStats::new(vec![None]);
    let mut service = MonitoringService::with_connector(config(1_000), stats, connector.clone());
    let mut events = service.take_events().unwrap();

    service.connect();
    wait_for(&mut events, |e| matches!(e, ServiceEvent::Opened)).await;
    let peer = connector.accepted().await;

    peer.push_text(r#"{"type":"SHUTDOWN","data":{}}"#);
    peer.push_text("this is not json");
    peer.push_text(r#"{"type":"RESULT","data":{"score":42}}"#);

    match wait_for(&mut events, |e| matches!(e, ServiceEvent::Error(_))).await {
        ServiceEvent::Error(Error::Json(_)) => {}
        other => panic!("expected JSON error, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        ServiceEvent::Result(data) => assert_eq!(data, json!({"score": 42})),
        other => panic!("expected result, got {other:?}"),
    }

    service.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn test_host_send_when_connected() {
    let connector = MockConnector::new();
    let stats = ScriptedStats::new(vec![None]);
    let mut service = MonitoringService::with_connector(config(60_000), stats, connector.clone());
    let mut events = service.take_events().unwrap();

    // Not running yet: dropped.
    service.send(MessageType::Log, json!({"early": true}));

    service.connect();
    wait_for(&mut events, |e| matches!(e, ServiceEvent::Opened)).await;
    let mut peer = connector.accepted().await;
    next_envelope(&mut peer).await;

    service.send(MessageType::Log, json!({"manual": true}));
    let (_, envelope) = next_envelope(&mut peer).await;
    assert_eq!(envelope, json!({"type": "LOG", "data": {"manual": true}}));

    service.terminate().await;
}
