//! The hub: single owner of all sensor state.
//!
//! Every mutation (ingest, sweep, settings change, pairing) is a method taking
//! `&mut self` and runs to completion before the next one starts. The runtime
//! serializes calls from other threads onto the owning thread.

use crate::device::{BindingSubscriber, DeviceBinding, DeviceBindingRegistry};
use crate::error::HubError;
use crate::events::{EventBus, HubEvent, RealtimeMessage, SubscriptionId, Topic};
use crate::lifecycle::{LifecycleMonitor, SweepReport, DEFAULT_SWEEP_INTERVAL};
use crate::notify::Notifier;
use crate::protocol::ProtocolRegistry;
use crate::query::Query;
use crate::sensor::{
    CapabilityMapper, CompositeId, IngestOutcome, Locale, RawSignalResult, SensorStore,
};
use crate::settings::{
    read_app, read_protocols, ProtocolWatch, SettingsStore, KEY_APP, KEY_PROTOCOLS,
};
use crate::stats::ProtocolStats;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Construction options.
#[derive(Debug)]
pub struct HubOptions {
    pub locale: Locale,
    pub timezone: Tz,
    pub sweep_interval: Duration,
    pub mapper: Option<CapabilityMapper>,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            locale: Locale::En,
            timezone: chrono_tz::UTC,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            mapper: None,
        }
    }
}

pub struct Hub {
    store: SensorStore,
    bindings: DeviceBindingRegistry,
    binding_subscriptions: HashMap<CompositeId, [SubscriptionId; 2]>,
    monitor: LifecycleMonitor,
    bus: EventBus,
    protocols: ProtocolRegistry,
    settings: Box<dyn SettingsStore>,
    notifier: Box<dyn Notifier>,
}

impl Hub {
    pub fn new(
        protocols: ProtocolRegistry,
        settings: Box<dyn SettingsStore>,
        notifier: Box<dyn Notifier>,
        options: HubOptions,
    ) -> Self {
        let mapper = options
            .mapper
            .unwrap_or_else(|| CapabilityMapper::for_locale(options.locale));
        let app = read_app(settings.as_ref()).unwrap_or_default();

        let mut hub = Self {
            store: SensorStore::new(mapper, options.locale, options.timezone),
            bindings: DeviceBindingRegistry::new(),
            binding_subscriptions: HashMap::new(),
            monitor: LifecycleMonitor::new(options.sweep_interval, app),
            bus: EventBus::new(),
            protocols,
            settings,
            notifier,
        };
        hub.init_protocols();
        hub
    }

    /// Apply the saved protocol selection, writing a watch-everything default
    /// when nothing has been saved yet.
    fn init_protocols(&mut self) {
        if self.protocols.load_selection(self.settings.as_ref()) {
            return;
        }
        tracing::info!("No protocol selection saved, watching all protocols");
        match serde_json::to_value(self.protocols.default_settings()) {
            Ok(value) => {
                if let Err(e) = self.settings.set(KEY_PROTOCOLS, value) {
                    tracing::warn!("Could not save default protocol selection: {}", e);
                }
            }
            Err(e) => tracing::warn!("Could not encode protocol selection: {}", e),
        }
    }

    /// Decode a payload with the given protocol and ingest the result.
    ///
    /// Returns `Ok(None)` when the protocol is not watched, the payload does
    /// not decode, or the result is missing its id or data.
    pub fn handle_payload(
        &mut self,
        protocol_id: &str,
        payload: &str,
    ) -> Result<Option<IngestOutcome>, HubError> {
        let Some(raw) = self.protocols.decode(protocol_id, payload)? else {
            return Ok(None);
        };
        let label = self
            .protocols
            .name_of(protocol_id)
            .unwrap_or(protocol_id)
            .to_string();
        let outcome = self.ingest_labelled(raw, &label);

        if let Some(stats) = self.protocols.stats_of(protocol_id) {
            self.bus.publish(HubEvent::StatsUpdate {
                protocol_id: protocol_id.to_string(),
                stats,
            });
        }
        Ok(outcome)
    }

    /// Ingest an already decoded result.
    pub fn ingest(&mut self, raw: RawSignalResult) -> Option<IngestOutcome> {
        let label = self
            .protocols
            .name_of(&raw.protocol_id)
            .unwrap_or(&raw.protocol_id)
            .to_string();
        self.ingest_labelled(raw, &label)
    }

    fn ingest_labelled(&mut self, raw: RawSignalResult, label: &str) -> Option<IngestOutcome> {
        let binding = raw
            .composite_id()
            .and_then(|id| self.bindings.get(&id).cloned());
        let was_available = binding.as_ref().map(|b| b.available());

        let outcome = self
            .store
            .ingest(raw, label, &self.bindings, &mut self.bus)?;

        if let (Some(binding), Some(false)) = (binding, was_available) {
            if binding.available() {
                self.monitor
                    .notify_active(&binding.name(), self.notifier.as_ref());
            }
        }
        Some(outcome)
    }

    /// Run one staleness sweep.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let report = self
            .monitor
            .sweep(now, &mut self.store, &self.bindings, self.notifier.as_ref());
        if !report.removed.is_empty() {
            self.publish_snapshot();
        }
        report
    }

    /// React to a settings key having changed.
    pub fn settings_changed(&mut self, key: &str) {
        match key {
            KEY_APP => {
                self.monitor.refresh_from(self.settings.as_ref());
            }
            KEY_PROTOCOLS => match read_protocols(self.settings.as_ref()) {
                Some(selection) => self.protocols.apply_watch(&selection),
                None => tracing::debug!("Protocol selection unavailable, keeping current"),
            },
            other => tracing::trace!("Ignoring change of settings key {}", other),
        }
    }

    /// Reload externally modified settings and apply the changed keys.
    pub fn refresh_settings(&mut self) {
        for key in self.settings.refresh() {
            tracing::debug!("Settings key {} changed", key);
            self.settings_changed(&key);
        }
    }

    /// Change the watch state of one protocol and persist it.
    pub fn set_watching(&mut self, protocol_id: &str, watching: bool) -> Result<(), HubError> {
        if !self.protocols.contains(protocol_id) {
            return Err(HubError::UnknownProtocol(protocol_id.to_string()));
        }
        let mut selection = read_protocols(self.settings.as_ref())
            .unwrap_or_else(|| self.protocols.default_settings());
        selection.insert(protocol_id.to_string(), ProtocolWatch { watching });

        match serde_json::to_value(&selection) {
            Ok(value) => {
                if let Err(e) = self.settings.set(KEY_PROTOCOLS, value) {
                    tracing::warn!("Could not save protocol selection: {}", e);
                }
            }
            Err(e) => tracing::warn!("Could not encode protocol selection: {}", e),
        }
        self.protocols.apply_watch(&selection);
        Ok(())
    }

    /// Attach a device binding to a sensor id.
    pub fn pair(&mut self, id: CompositeId, binding: Arc<dyn DeviceBinding>) {
        self.unsubscribe_binding(&id);
        tracing::info!("Pairing {} as {}", id, binding.name());

        let value = self.bus.subscribe(
            Topic::Value(id.clone()),
            BindingSubscriber(binding.clone()),
        );
        let update = self.bus.subscribe(
            Topic::Update(id.clone()),
            BindingSubscriber(binding.clone()),
        );
        self.binding_subscriptions.insert(id.clone(), [value, update]);
        self.bindings.insert(id, binding);
        self.publish_snapshot();
    }

    /// Detach the binding for a sensor id. The sensor record is untouched.
    pub fn unpair(&mut self, id: &CompositeId) -> Option<Arc<dyn DeviceBinding>> {
        self.unsubscribe_binding(id);
        let removed = self.bindings.remove(id);
        if removed.is_some() {
            tracing::info!("Unpaired {}", id);
            self.publish_snapshot();
        }
        removed
    }

    fn unsubscribe_binding(&mut self, id: &CompositeId) {
        if let Some(subscriptions) = self.binding_subscriptions.remove(id) {
            for sub in subscriptions {
                self.bus.unsubscribe(sub);
            }
        }
    }

    fn publish_snapshot(&mut self) {
        let sensors = self.store.display_views(&self.bindings);
        self.bus.publish(HubEvent::SnapshotChanged { sensors });
    }

    pub fn query(&self) -> Query<'_> {
        Query {
            store: &self.store,
            bindings: &self.bindings,
            protocols: &self.protocols,
        }
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn realtime(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.bus.realtime()
    }

    pub fn realtime_sender(&self) -> broadcast::Sender<RealtimeMessage> {
        self.bus.realtime_sender()
    }

    pub fn store(&self) -> &SensorStore {
        &self.store
    }

    pub fn bindings(&self) -> &DeviceBindingRegistry {
        &self.bindings
    }

    pub fn monitor(&self) -> &LifecycleMonitor {
        &self.monitor
    }

    pub fn protocol_stats(&self) -> BTreeMap<String, ProtocolStats> {
        self.protocols.statistics()
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("sensors", &self.store.len())
            .field("bindings", &self.bindings.len())
            .field("protocols", &self.protocols)
            .finish_non_exhaustive()
    }
}
