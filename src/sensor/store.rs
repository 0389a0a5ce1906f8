//! Keyed store of merged sensor state.
//!
//! Every payload is merged into the record for its composite id: fields in
//! the payload overwrite, fields absent from the payload keep their previous
//! value. Type and display view are only recomputed when the merged field
//! set classifies; an unrecognized shape keeps whatever the last successful
//! classification produced.

use crate::device::DeviceBindingRegistry;
use crate::events::{EventBus, HubEvent};
use crate::sensor::capability::{CapabilityMapper, CapabilityValue};
use crate::sensor::classify::classify;
use crate::sensor::id::CompositeId;
use crate::sensor::types::{DisplayView, Locale, RawSignalResult, SensorRecord, SensorType};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, BTreeSet};

/// Result of a successful ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub is_new: bool,
    pub changed_fields: BTreeSet<String>,
    /// Whether the merged fields matched a sensor type
    pub classified: bool,
    /// Copy of the record after the merge
    pub record: SensorRecord,
}

/// Owner of all sensor records.
#[derive(Debug)]
pub struct SensorStore {
    records: BTreeMap<CompositeId, SensorRecord>,
    mapper: CapabilityMapper,
    locale: Locale,
    timezone: Tz,
}

impl SensorStore {
    pub fn new(mapper: CapabilityMapper, locale: Locale, timezone: Tz) -> Self {
        Self {
            records: BTreeMap::new(),
            mapper,
            locale,
            timezone,
        }
    }

    pub fn mapper(&self) -> &CapabilityMapper {
        &self.mapper
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Merge a decoded payload and publish the resulting events.
    ///
    /// `protocol_label` is the display name of the decoding protocol. Returns
    /// `None` when the payload has no sensor id or no data.
    pub fn ingest(
        &mut self,
        raw: RawSignalResult,
        protocol_label: &str,
        bindings: &DeviceBindingRegistry,
        bus: &mut EventBus,
    ) -> Option<IngestOutcome> {
        let Some(id) = raw.composite_id() else {
            tracing::debug!("Ignoring {} payload without sensor id", raw.protocol_id);
            return None;
        };
        let Some(data) = raw.data else {
            tracing::debug!("Ignoring payload without data for {}", id);
            return None;
        };

        let is_new = !self.records.contains_key(&id);
        if is_new {
            tracing::debug!(
                "Found a new sensor {}. Total found is now {}",
                id,
                self.records.len() + 1
            );
        }
        let record = self
            .records
            .entry(id.clone())
            .or_insert_with(|| SensorRecord::empty(id.clone(), raw.timestamp));

        let mut changed_fields = BTreeSet::new();
        let mut value_events = Vec::new();
        for (field, value) in data {
            if record.raw_data.get(&field) == Some(&value) {
                continue;
            }
            if let Some(CapabilityValue { capability, value }) = self.mapper.map(&field, &value) {
                value_events.push(HubEvent::ValueChanged {
                    id: id.clone(),
                    capability,
                    value,
                });
            }
            changed_fields.insert(field.clone());
            record.raw_data.insert(field, value);
        }

        record.last_update = raw.timestamp;
        if raw.name.is_some() {
            record.name = raw.name;
        }

        let sensor_type = classify(record.raw_data.keys().map(String::as_str));
        let classified = match sensor_type {
            Some(sensor_type) => {
                record.type_tag = Some(sensor_type);
                record.update_count += 1;
                record.new_data = !changed_fields.is_empty();
                record.protocol_label = protocol_label.to_string();
                record.display = Some(build_display(
                    record,
                    sensor_type,
                    bindings,
                    self.locale,
                    &self.timezone,
                ));
                tracing::debug!("Sensor {} value has changed: {}", id, record.new_data);
                true
            }
            None => {
                tracing::debug!(
                    "Cannot determine sensor type for {} with fields {:?}",
                    id,
                    record.raw_data.keys().collect::<Vec<_>>()
                );
                false
            }
        };

        let outcome = IngestOutcome {
            is_new,
            changed_fields,
            classified,
            record: record.clone(),
        };

        for event in value_events {
            bus.publish(event);
        }
        bus.publish(HubEvent::Updated {
            id,
            timestamp: raw.timestamp,
        });
        if classified {
            bus.publish(HubEvent::SnapshotChanged {
                sensors: self.display_views(bindings),
            });
        }

        Some(outcome)
    }

    /// Remove a record outright.
    pub fn delete(&mut self, id: &CompositeId) -> Option<SensorRecord> {
        self.records.remove(id)
    }

    pub fn get(&self, id: &CompositeId) -> Option<&SensorRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &CompositeId) -> bool {
        self.records.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CompositeId, &SensorRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids of records whose last update is more than `threshold` before `now`.
    pub fn stale_ids(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> Vec<CompositeId> {
        self.records
            .values()
            .filter(|r| now - r.last_update > threshold)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Display views of every classified record, with the paired flag and
    /// name taken from the bindings as they are now.
    pub fn display_views(&self, bindings: &DeviceBindingRegistry) -> Vec<DisplayView> {
        self.records
            .values()
            .filter_map(|r| r.display.as_ref().map(|d| with_binding(d.clone(), r, bindings)))
            .collect()
    }
}

fn with_binding(
    mut view: DisplayView,
    record: &SensorRecord,
    bindings: &DeviceBindingRegistry,
) -> DisplayView {
    match bindings.get(&record.id) {
        Some(binding) => {
            view.paired = true;
            view.name = Some(binding.name());
        }
        None => {
            view.paired = false;
            view.name = record.name.clone();
        }
    }
    view
}

fn build_display(
    record: &SensorRecord,
    sensor_type: SensorType,
    bindings: &DeviceBindingRegistry,
    locale: Locale,
    timezone: &Tz,
) -> DisplayView {
    let channel = match record.id.channel() {
        0 => "-".to_string(),
        c => c.to_string(),
    };
    let view = DisplayView {
        key: record.id.clone(),
        protocol: record.protocol_label.clone(),
        type_label: sensor_type.label(locale).to_string(),
        icon: sensor_type.icon().to_string(),
        name: None,
        channel,
        id: record.id.sensor().to_string(),
        update: format_update(record.last_update, timezone),
        data: record.raw_data.clone(),
        paired: false,
    };
    with_binding(view, record, bindings)
}

/// Last-update text shown in the UI.
pub fn format_update(ts: DateTime<Utc>, timezone: &Tz) -> String {
    ts.with_timezone(timezone)
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PairedDevice;
    use crate::events::Topic;
    use crate::sensor::types::{FieldMap, FieldValue};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn store() -> SensorStore {
        SensorStore::new(CapabilityMapper::default(), Locale::En, chrono_tz::UTC)
    }

    fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_first_ingest_creates_record() {
        let mut store = store();
        let mut bus = EventBus::new();
        let bindings = DeviceBindingRegistry::new();

        let raw = RawSignalResult::new("P1", "42", 1, t(0), fields(&[("temperature", 21.0.into())]));
        let outcome = store.ingest(raw, "Protocol 1", &bindings, &mut bus).unwrap();

        assert!(outcome.is_new);
        assert!(outcome.classified);
        assert_eq!(outcome.record.id.to_string(), "P1:42:1");
        assert_eq!(outcome.record.type_tag, Some(SensorType::Temperature));
        assert_eq!(outcome.record.update_count, 1);
        assert!(outcome.changed_fields.contains("temperature"));

        let display = outcome.record.display.unwrap();
        assert_eq!(display.protocol, "Protocol 1");
        assert_eq!(display.type_label, "Temperature");
        assert_eq!(display.channel, "1");
        assert_eq!(display.id, "42");
        assert!(!display.paired);
    }

    #[test]
    fn test_missing_id_or_data_is_ignored() {
        let mut store = store();
        let mut bus = EventBus::new();
        let (_, rx) = bus.subscribe_channel(Topic::All, 16);
        let bindings = DeviceBindingRegistry::new();

        let mut no_id = RawSignalResult::new("P1", "1", 0, t(0), FieldMap::new());
        no_id.sensor_id = None;
        let mut no_data = RawSignalResult::new("P1", "1", 0, t(0), FieldMap::new());
        no_data.data = None;

        assert!(store.ingest(no_id, "P", &bindings, &mut bus).is_none());
        assert!(store.ingest(no_data, "P", &bindings, &mut bus).is_none());
        assert!(store.is_empty());
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut store = store();
        let mut bus = EventBus::new();
        let bindings = DeviceBindingRegistry::new();

        let first = fields(&[("temperature", 21.0.into()), ("humidity", 50.0.into())]);
        store.ingest(RawSignalResult::new("P1", "1", 0, t(0), first), "P", &bindings, &mut bus);
        let second = fields(&[("temperature", 22.0.into())]);
        let outcome = store
            .ingest(RawSignalResult::new("P1", "1", 0, t(1), second), "P", &bindings, &mut bus)
            .unwrap();

        assert_eq!(outcome.record.raw_data["humidity"], FieldValue::Number(50.0));
        assert_eq!(outcome.record.raw_data["temperature"], FieldValue::Number(22.0));
        assert_eq!(outcome.changed_fields.len(), 1);
        assert_eq!(outcome.record.type_tag, Some(SensorType::Th));
    }

    #[test]
    fn test_only_changed_fields_emit_values() {
        let mut store = store();
        let mut bus = EventBus::new();
        let bindings = DeviceBindingRegistry::new();
        let id = CompositeId::new("P1", "1", 0);

        let data = fields(&[("temperature", 21.0.into()), ("lowbattery", false.into())]);
        store.ingest(RawSignalResult::new("P1", "1", 0, t(0), data), "P", &bindings, &mut bus);

        let (_, values) = bus.subscribe_channel(Topic::Value(id.clone()), 16);
        let (_, updates) = bus.subscribe_channel(Topic::Update(id.clone()), 16);

        let data = fields(&[("temperature", 22.0.into()), ("lowbattery", false.into())]);
        store.ingest(RawSignalResult::new("P1", "1", 0, t(1), data), "P", &bindings, &mut bus);

        let values: Vec<_> = values.try_iter().collect();
        assert_eq!(
            values,
            vec![HubEvent::ValueChanged {
                id: id.clone(),
                capability: "measure_temperature".into(),
                value: FieldValue::Number(22.0),
            }]
        );
        assert_eq!(updates.try_iter().count(), 1);
    }

    #[test]
    fn test_unchanged_payload_still_heartbeats() {
        let mut store = store();
        let mut bus = EventBus::new();
        let bindings = DeviceBindingRegistry::new();

        let data = fields(&[("temperature", 21.0.into())]);
        store.ingest(RawSignalResult::new("P1", "1", 0, t(0), data.clone()), "P", &bindings, &mut bus);

        let (_, rx) = bus.subscribe_channel(Topic::All, 16);
        let outcome = store
            .ingest(RawSignalResult::new("P1", "1", 0, t(5), data), "P", &bindings, &mut bus)
            .unwrap();

        assert!(outcome.changed_fields.is_empty());
        assert!(!outcome.record.new_data);
        assert_eq!(outcome.record.update_count, 2);
        assert_eq!(outcome.record.last_update, t(5));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], HubEvent::Updated { .. }));
        assert!(matches!(events[1], HubEvent::SnapshotChanged { .. }));
    }

    #[test]
    fn test_unclassified_shape_keeps_raw_data_without_display() {
        let mut store = store();
        let mut bus = EventBus::new();
        let (_, snapshots) = bus.subscribe_channel(Topic::Snapshot, 16);
        let bindings = DeviceBindingRegistry::new();

        let data = fields(&[("lowbattery", true.into())]);
        let outcome = store
            .ingest(RawSignalResult::new("P1", "9", 0, t(0), data), "P", &bindings, &mut bus)
            .unwrap();

        assert!(!outcome.classified);
        assert!(outcome.record.type_tag.is_none());
        assert!(outcome.record.display.is_none());
        assert_eq!(outcome.record.update_count, 0);
        assert_eq!(store.len(), 1);
        assert_eq!(snapshots.try_iter().count(), 0);
        assert!(store.display_views(&bindings).is_empty());
    }

    #[test]
    fn test_paired_name_overrides_decoded_name() {
        let mut store = store();
        let mut bus = EventBus::new();
        let mut bindings = DeviceBindingRegistry::new();
        let id = CompositeId::new("P1", "1", 0);
        bindings.insert(id.clone(), Arc::new(PairedDevice::new("Garden", t(0))));

        let data = fields(&[("temperature", 21.0.into())]);
        let raw = RawSignalResult::new("P1", "1", 0, t(0), data).with_name("TX141");
        let outcome = store.ingest(raw, "P", &bindings, &mut bus).unwrap();

        let display = outcome.record.display.unwrap();
        assert!(display.paired);
        assert_eq!(display.name.as_deref(), Some("Garden"));
        assert_eq!(display.channel, "-");
        assert_eq!(outcome.record.name.as_deref(), Some("TX141"));
    }

    #[test]
    fn test_delete() {
        let mut store = store();
        let mut bus = EventBus::new();
        let bindings = DeviceBindingRegistry::new();
        let data = fields(&[("brightness", 300.0.into())]);
        store.ingest(RawSignalResult::new("P1", "1", 0, t(0), data), "P", &bindings, &mut bus);

        let id = CompositeId::new("P1", "1", 0);
        assert!(store.delete(&id).is_some());
        assert!(!store.contains(&id));
        assert!(store.delete(&id).is_none());
    }

    #[test]
    fn test_format_update_uses_timezone() {
        let tz: Tz = "Europe/Amsterdam".parse().unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap();
        assert_eq!(format_update(ts, &tz), "2024-01-22 11:00:00 CET");
    }
}
