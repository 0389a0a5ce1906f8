//! Read-only projections for external callers.
//!
//! Every result is an owned copy; nothing returned here borrows the store.

use crate::device::DeviceBindingRegistry;
use crate::protocol::{ProtocolInfo, ProtocolRegistry};
use crate::sensor::{
    capability_for, CapabilityValue, CompositeId, DisplayView, SensorStore, SensorType,
};
use crate::stats::ProtocolStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device settings proposed to the pairing flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSummary {
    pub protocol: String,
    #[serde(rename = "type")]
    pub type_label: String,
    pub channel: String,
    pub id: String,
    pub update: String,
}

/// A sensor offered for pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCandidate {
    pub suggested_name: String,
    pub composite_id: CompositeId,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub derived_capabilities: Vec<String>,
    pub settings_summary: SettingsSummary,
}

/// Per-protocol entry of `getStatistics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStatus {
    pub signal: String,
    pub enabled: bool,
    pub stats: ProtocolStats,
}

/// Query surface over the hub's state.
pub struct Query<'a> {
    pub store: &'a SensorStore,
    pub bindings: &'a DeviceBindingRegistry,
    pub protocols: &'a ProtocolRegistry,
}

impl Query<'_> {
    /// Sensors of one type, shaped for the pairing flow.
    pub fn sensors(&self, sensor_type: SensorType) -> Vec<PairingCandidate> {
        self.store
            .iter()
            .filter(|(_, r)| r.type_tag == Some(sensor_type))
            .filter_map(|(id, record)| {
                let display = record.display.as_ref()?;
                let derived_capabilities = record
                    .raw_data
                    .keys()
                    .filter_map(|field| capability_for(field))
                    .map(str::to_string)
                    .collect();
                let suggested_name = record.name.clone().unwrap_or_else(|| {
                    format!("{}: {} {}", display.protocol, sensor_type, id.sensor())
                });
                Some(PairingCandidate {
                    suggested_name,
                    composite_id: id.clone(),
                    sensor_type,
                    derived_capabilities,
                    settings_summary: SettingsSummary {
                        protocol: display.protocol.clone(),
                        type_label: record
                            .name
                            .clone()
                            .unwrap_or_else(|| display.type_label.clone()),
                        channel: display.channel.clone(),
                        id: id.sensor().to_string(),
                        update: display.update.clone(),
                    },
                })
            })
            .collect()
    }

    /// Display view of every classified sensor, paired or not.
    pub fn all_sensors(&self) -> Vec<DisplayView> {
        self.store.display_views(self.bindings)
    }

    /// Current capability values of one sensor; empty for an unknown id.
    pub fn sensor_values(&self, id: &CompositeId) -> Vec<CapabilityValue> {
        let Some(record) = self.store.get(id) else {
            return Vec::new();
        };
        let mapper = self.store.mapper();
        record
            .raw_data
            .iter()
            .filter_map(|(field, value)| mapper.map(field, value))
            .collect()
    }

    pub fn protocols(&self) -> Vec<ProtocolInfo> {
        self.protocols.infos(self.store.locale())
    }

    pub fn statistics(&self) -> BTreeMap<String, ProtocolStatus> {
        self.protocols
            .infos(self.store.locale())
            .into_iter()
            .map(|info| {
                let stats = self.protocols.stats_of(&info.id).unwrap_or_default();
                (
                    info.id,
                    ProtocolStatus {
                        signal: info.name,
                        enabled: info.watching,
                        stats,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PairedDevice;
    use crate::events::EventBus;
    use crate::sensor::{CapabilityMapper, FieldMap, FieldValue, Locale, RawSignalResult};
    use chrono::Utc;
    use std::sync::Arc;

    fn ingest(store: &mut SensorStore, bindings: &DeviceBindingRegistry, sid: &str, pairs: &[(&str, FieldValue)]) {
        let data: FieldMap = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        store.ingest(
            RawSignalResult::new("P1", sid, 0, Utc::now(), data),
            "Protocol 1",
            bindings,
            &mut EventBus::new(),
        );
    }

    fn store() -> SensorStore {
        SensorStore::new(CapabilityMapper::default(), Locale::En, chrono_tz::UTC)
    }

    #[test]
    fn test_sensors_filters_by_type() {
        let mut store = store();
        let bindings = DeviceBindingRegistry::new();
        let protocols = ProtocolRegistry::builtin();
        ingest(&mut store, &bindings, "1", &[("temperature", 20.0.into()), ("humidity", 60.0.into()), ("rssi", (-70.0).into())]);
        ingest(&mut store, &bindings, "2", &[("temperature", 18.0.into())]);

        let query = Query { store: &store, bindings: &bindings, protocols: &protocols };
        let th = query.sensors(SensorType::Th);
        assert_eq!(th.len(), 1);

        let candidate = &th[0];
        assert_eq!(candidate.suggested_name, "Protocol 1: TH 1");
        assert_eq!(candidate.composite_id.to_string(), "P1:1:0");
        assert_eq!(
            candidate.derived_capabilities,
            vec!["measure_humidity", "measure_temperature"]
        );
        assert_eq!(candidate.settings_summary.type_label, "Temperature/humidity");
        assert_eq!(candidate.settings_summary.channel, "-");

        assert_eq!(query.sensors(SensorType::Temperature).len(), 1);
        assert!(query.sensors(SensorType::Wind).is_empty());
    }

    #[test]
    fn test_candidate_wire_format() {
        let mut store = store();
        let bindings = DeviceBindingRegistry::new();
        let protocols = ProtocolRegistry::builtin();
        ingest(&mut store, &bindings, "7", &[("uvindex", 3.0.into())]);

        let query = Query { store: &store, bindings: &bindings, protocols: &protocols };
        let json = serde_json::to_value(&query.sensors(SensorType::Uv)[0]).unwrap();
        assert_eq!(json["compositeId"], "P1:7:0");
        assert_eq!(json["type"], "UV");
        assert_eq!(json["derivedCapabilities"][0], "measure_ultraviolet");
        assert_eq!(json["settingsSummary"]["protocol"], "Protocol 1");
    }

    #[test]
    fn test_paired_flag_follows_bindings_at_call_time() {
        let mut store = store();
        let mut bindings = DeviceBindingRegistry::new();
        let protocols = ProtocolRegistry::builtin();
        ingest(&mut store, &bindings, "1", &[("temperature", 20.0.into())]);

        let id = CompositeId::new("P1", "1", 0);
        bindings.insert(id.clone(), Arc::new(PairedDevice::new("Shed", Utc::now())));
        let query = Query { store: &store, bindings: &bindings, protocols: &protocols };
        let all = query.all_sensors();
        assert!(all[0].paired);
        assert_eq!(all[0].name.as_deref(), Some("Shed"));

        bindings.remove(&id);
        let query = Query { store: &store, bindings: &bindings, protocols: &protocols };
        assert!(!query.all_sensors()[0].paired);
    }

    #[test]
    fn test_sensor_values() {
        let mut store = store();
        let bindings = DeviceBindingRegistry::new();
        let protocols = ProtocolRegistry::builtin();
        ingest(&mut store, &bindings, "1", &[("temperature", 20.0.into()), ("forecast", "sunny".into()), ("rssi", (-70.0).into())]);

        let query = Query { store: &store, bindings: &bindings, protocols: &protocols };
        let values = query.sensor_values(&CompositeId::new("P1", "1", 0));
        assert_eq!(values.len(), 2);
        assert!(values.contains(&CapabilityValue {
            capability: "measure_forecast".into(),
            value: FieldValue::Text("Sunny".into()),
        }));
        assert!(query.sensor_values(&CompositeId::new("P1", "nope", 0)).is_empty());
    }

    #[test]
    fn test_statistics_lists_every_protocol() {
        let store = store();
        let bindings = DeviceBindingRegistry::new();
        let protocols = ProtocolRegistry::builtin();
        let query = Query { store: &store, bindings: &bindings, protocols: &protocols };

        let stats = query.statistics();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["rtl433"].signal, "rtl_433");
        assert!(!stats["rtl433"].enabled);
        assert_eq!(query.protocols().len(), 2);
    }
}
