//! End-to-end behavior of the hub: ingest, events, pairing and sweeps.

use chrono::{Duration, TimeZone, Utc};
use crossbeam_channel::{unbounded, Receiver};
use std::sync::Arc;
use weather_sensor_agent::{
    notify::{ChannelNotifier, Notification, NOTIFY_ACTIVE, NOTIFY_INACTIVE},
    settings::KEY_APP,
    CompositeId, DeviceBinding, FieldValue, Hub, HubEvent, HubOptions, MemorySettings,
    PairedDevice, ProtocolRegistry, RawSignalResult, SensorType, SettingsStore, Topic,
};

fn hub_with_app(inactive: u64, notify: u32) -> (Hub, Receiver<Notification>) {
    let mut settings = MemorySettings::new();
    settings
        .set(
            KEY_APP,
            serde_json::json!({"inactive": inactive, "notify": notify}),
        )
        .unwrap();

    let (tx, rx) = unbounded();
    let hub = Hub::new(
        ProtocolRegistry::builtin(),
        Box::new(settings),
        Box::new(ChannelNotifier::new(tx)),
        HubOptions::default(),
    );
    (hub, rx)
}

fn temperature(sensor: &str, ts: chrono::DateTime<Utc>, value: f64) -> RawSignalResult {
    let mut data = weather_sensor_agent::sensor::FieldMap::new();
    data.insert("temperature".into(), FieldValue::Number(value));
    RawSignalResult::new("P1", sensor, 1, ts, data)
}

#[test]
fn test_end_to_end_temperature_sensor() {
    let (mut hub, _notes) = hub_with_app(1800, 0);
    let id = CompositeId::new("P1", "42", 1);
    let (_, events) = hub.bus_mut().subscribe_channel(Topic::All, 64);

    let t0 = Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap();
    let t1 = t0 + Duration::seconds(30);

    let first = hub.ingest(temperature("42", t0, 21.0)).unwrap();
    assert!(first.is_new);
    assert_eq!(first.record.id.to_string(), "P1:42:1");
    assert_eq!(first.record.type_tag, Some(SensorType::Temperature));
    events.try_iter().count();

    let second = hub.ingest(temperature("42", t1, 22.0)).unwrap();
    assert!(!second.is_new);
    assert_eq!(second.record.update_count, 2);
    assert_eq!(second.record.id, id);

    let received: Vec<HubEvent> = events.try_iter().collect();
    let values: Vec<&HubEvent> = received
        .iter()
        .filter(|e| matches!(e, HubEvent::ValueChanged { .. }))
        .collect();
    assert_eq!(
        values,
        vec![&HubEvent::ValueChanged {
            id: id.clone(),
            capability: "measure_temperature".into(),
            value: FieldValue::Number(22.0),
        }]
    );
    let updates: Vec<&HubEvent> = received
        .iter()
        .filter(|e| matches!(e, HubEvent::Updated { .. }))
        .collect();
    assert_eq!(
        updates,
        vec![&HubEvent::Updated {
            id: id.clone(),
            timestamp: t1,
        }]
    );
}

#[test]
fn test_unchanged_payload_only_updates() {
    let (mut hub, _notes) = hub_with_app(1800, 0);
    let t0 = Utc::now();
    hub.ingest(temperature("7", t0, 18.5));

    let (_, events) = hub.bus_mut().subscribe_channel(Topic::All, 16);
    hub.ingest(temperature("7", t0 + Duration::seconds(1), 18.5));

    let received: Vec<HubEvent> = events.try_iter().collect();
    assert!(!received
        .iter()
        .any(|e| matches!(e, HubEvent::ValueChanged { .. })));
    assert_eq!(
        received
            .iter()
            .filter(|e| matches!(e, HubEvent::Updated { .. }))
            .count(),
        1
    );
}

#[test]
fn test_payload_through_protocol_publishes_stats() {
    let (mut hub, _notes) = hub_with_app(1800, 0);
    let mut realtime = hub.realtime();

    let line = r#"{"time":"2024-01-22 10:00:00","model":"Nexus-TH","id":42,"channel":1,
        "battery_ok":1,"temperature_C":21.5,"humidity":55}"#;
    let outcome = hub.handle_payload("rtl433", line).unwrap().unwrap();
    assert_eq!(outcome.record.id.to_string(), "Nexus-TH:42:1");
    assert_eq!(outcome.record.type_tag, Some(SensorType::Th));

    let mut names = Vec::new();
    while let Ok(message) = realtime.try_recv() {
        names.push(message.name());
    }
    assert_eq!(names, vec!["sensor_update", "stats_update"]);

    let stats = hub.query().statistics();
    assert_eq!(stats["rtl433"].stats.total, 1);
    assert_eq!(stats["rtl433"].stats.ok, 1);
    assert_eq!(stats["normalized"].stats.total, 0);
}

#[test]
fn test_paired_device_receives_values() {
    let (mut hub, _notes) = hub_with_app(1800, 0);
    let id = CompositeId::new("P1", "42", 1);
    let device = Arc::new(PairedDevice::new("Garden", Utc::now()));
    hub.pair(id.clone(), device.clone());

    let ts = Utc::now();
    hub.ingest(temperature("42", ts, 21.0));
    assert_eq!(
        device.value("measure_temperature"),
        Some(FieldValue::Number(21.0))
    );
    assert_eq!(device.last_setting_update(), Some(ts));

    let views = hub.query().all_sensors();
    assert!(views[0].paired);
    assert_eq!(views[0].name.as_deref(), Some("Garden"));

    hub.unpair(&id);
    hub.ingest(temperature("42", ts + Duration::seconds(5), 23.0));
    assert_eq!(
        device.value("measure_temperature"),
        Some(FieldValue::Number(21.0))
    );
    assert!(!hub.query().all_sensors()[0].paired);
}

#[test]
fn test_sweep_threshold_boundary() {
    let (mut hub, _notes) = hub_with_app(60, 0);
    let t0 = Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap();
    hub.ingest(temperature("1", t0, 10.0));

    let report = hub.sweep(t0 + Duration::seconds(59));
    assert!(report.removed.is_empty());
    assert_eq!(hub.store().len(), 1);

    let report = hub.sweep(t0 + Duration::seconds(61));
    assert_eq!(report.removed, vec![CompositeId::new("P1", "1", 1)]);
    assert!(hub.store().is_empty());
}

#[test]
fn test_sweep_marks_paired_device_and_notifies() {
    let (mut hub, notes) = hub_with_app(60, NOTIFY_ACTIVE | NOTIFY_INACTIVE);
    let t0 = Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap();
    let id = CompositeId::new("P1", "9", 1);
    let device = Arc::new(PairedDevice::new("Shed", t0));
    hub.pair(id.clone(), device.clone());
    hub.ingest(temperature("9", t0, 4.0));

    let report = hub.sweep(t0 + Duration::seconds(61));
    assert_eq!(report.marked_unavailable, vec![id.clone()]);
    assert!(report.removed.is_empty());
    assert!(hub.store().contains(&id));
    assert!(!device.available());
    assert!(device
        .unavailable_reason()
        .unwrap()
        .starts_with("No data since 2024-01-22T10:00:00"));
    assert_eq!(notes.try_recv().unwrap().excerpt, "Shed has not sent any data");

    // A second sweep leaves an already unavailable device alone.
    let report = hub.sweep(t0 + Duration::seconds(120));
    assert!(report.marked_unavailable.is_empty());
    assert!(notes.try_recv().is_err());

    hub.ingest(temperature("9", t0 + Duration::seconds(130), 5.0));
    assert!(device.available());
    assert_eq!(notes.try_recv().unwrap().excerpt, "Shed is sending data again");
}

#[test]
fn test_malformed_results_are_ignored() {
    let (mut hub, _notes) = hub_with_app(1800, 0);
    let no_id: RawSignalResult =
        serde_json::from_str(r#"{"protocolId":"P1","data":{"temperature":1.0}}"#).unwrap();
    let no_data: RawSignalResult =
        serde_json::from_str(r#"{"protocolId":"P1","sensorId":"3"}"#).unwrap();

    assert!(hub.ingest(no_id).is_none());
    assert!(hub.ingest(no_data).is_none());
    assert!(hub.store().is_empty());
    assert!(hub.handle_payload("normalized", "garbage").unwrap().is_none());
    assert!(hub.handle_payload("x10", "{}").is_err());
}

#[test]
fn test_unclassified_sensor_is_not_listed() {
    let (mut hub, _notes) = hub_with_app(1800, 0);
    let mut data = weather_sensor_agent::sensor::FieldMap::new();
    data.insert("rssi".into(), FieldValue::Number(-80.0));
    let outcome = hub
        .ingest(RawSignalResult::new("P1", "5", 0, Utc::now(), data))
        .unwrap();

    assert!(!outcome.classified);
    assert_eq!(hub.store().len(), 1);
    assert!(hub.query().all_sensors().is_empty());
}

#[test]
fn test_local_rtl433_time_survives_sweep() {
    let zone = chrono_tz::America::New_York;
    let mut hub = Hub::new(
        ProtocolRegistry::builtin_in(zone),
        Box::new(MemorySettings::new()),
        Box::new(weather_sensor_agent::LogNotifier),
        HubOptions {
            timezone: zone,
            ..HubOptions::default()
        },
    );

    let now = Utc::now();
    let wall = now.with_timezone(&zone).format("%Y-%m-%d %H:%M:%S");
    let line = format!(
        r#"{{"time":"{wall}","model":"Nexus-TH","id":42,"channel":1,"temperature_C":21.5}}"#
    );
    let outcome = hub.handle_payload("rtl433", &line).unwrap().unwrap();
    let skew = (outcome.record.last_update - now).num_seconds().abs();
    assert!(skew <= 1, "stored {} for {}", outcome.record.last_update, now);

    let report = hub.sweep(Utc::now());
    assert!(report.removed.is_empty());
    assert!(hub.store().contains(&CompositeId::new("Nexus-TH", "42", 1)));
}
