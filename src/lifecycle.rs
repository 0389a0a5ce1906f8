//! Staleness policy for sensors and paired devices.
//!
//! A sweep removes unpaired sensors that stopped reporting and marks paired
//! devices unavailable. Paired sensors are never removed here: the device
//! layer owns their lifetime. Nothing in a sweep is fatal; a failing device
//! is logged and the sweep moves on to the next one.

use crate::device::{DeviceBinding, DeviceBindingRegistry};
use crate::notify::{Notification, Notifier, NOTIFY_ACTIVE, NOTIFY_INACTIVE};
use crate::sensor::{CompositeId, SensorStore};
use crate::settings::{read_app, AppSettings, SettingsStore};
use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(1000);

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Unpaired sensors deleted from the store
    pub removed: Vec<CompositeId>,
    /// Paired devices marked unavailable
    pub marked_unavailable: Vec<CompositeId>,
    /// Device-layer or notification failures that were caught
    pub failures: usize,
}

/// Periodic staleness check.
#[derive(Debug, Clone)]
pub struct LifecycleMonitor {
    interval: Duration,
    app: AppSettings,
}

impl LifecycleMonitor {
    pub fn new(interval: Duration, app: AppSettings) -> Self {
        Self { interval, app }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn settings(&self) -> AppSettings {
        self.app
    }

    pub fn inactivity_threshold(&self) -> chrono::Duration {
        i64::try_from(self.app.inactive)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Replace the configuration. `None` keeps the last known one.
    pub fn apply_settings(&mut self, app: Option<AppSettings>) -> bool {
        match app {
            Some(app) if app != self.app => {
                tracing::info!(
                    "Inactivity threshold {}s, notification mask {}",
                    app.inactive,
                    app.notify
                );
                self.app = app;
                true
            }
            Some(_) => false,
            None => {
                tracing::debug!("No app settings available, keeping current configuration");
                false
            }
        }
    }

    /// Re-read the `app` key from the settings collaborator.
    pub fn refresh_from(&mut self, settings: &dyn SettingsStore) -> bool {
        self.apply_settings(read_app(settings))
    }

    /// Run one sweep at time `now`.
    pub fn sweep(
        &self,
        now: DateTime<Utc>,
        store: &mut SensorStore,
        bindings: &DeviceBindingRegistry,
        notifier: &dyn Notifier,
    ) -> SweepReport {
        let threshold = self.inactivity_threshold();
        let mut report = SweepReport::default();

        for id in store.stale_ids(now, threshold) {
            if bindings.contains(&id) {
                continue;
            }
            tracing::info!("Removing {} from display list", id);
            store.delete(&id);
            report.removed.push(id);
        }

        for (id, binding) in bindings.iter() {
            let checked = catch_unwind(AssertUnwindSafe(|| {
                self.check_binding(id, binding.as_ref(), now, threshold, notifier)
            }));
            match checked {
                Ok(None) => {}
                Ok(Some(failures)) => {
                    report.failures += failures;
                    report.marked_unavailable.push(id.clone());
                }
                Err(_) => {
                    report.failures += 1;
                    tracing::error!("Device {} panicked during sweep", id);
                }
            }
        }

        report
    }

    /// Mark one binding unavailable if it went stale. Returns the number of
    /// failures when it was marked, `None` when it was left alone.
    fn check_binding(
        &self,
        id: &CompositeId,
        binding: &dyn DeviceBinding,
        now: DateTime<Utc>,
        threshold: chrono::Duration,
        notifier: &dyn Notifier,
    ) -> Option<usize> {
        let last = binding.last_setting_update()?;
        if !binding.available() || now - last <= threshold {
            return None;
        }

        tracing::info!("Marking {} as inactive", id);
        let mut failures = 0;
        let reason = format!("No data since {}", last.to_rfc3339());
        if let Err(e) = binding.set_unavailable(&reason) {
            failures += 1;
            tracing::error!("Cannot mark device {} as unavailable: {}", id, e);
        }

        if self.app.notify & NOTIFY_INACTIVE != 0 {
            let excerpt = format!("{} has not sent any data", binding.name());
            if let Err(e) = notifier.notify(Notification { excerpt }) {
                failures += 1;
                tracing::warn!("Cannot send inactivity notification for {}: {}", id, e);
            }
        }
        Some(failures)
    }

    /// Notify that a device that was unavailable is receiving data again.
    pub fn notify_active(&self, name: &str, notifier: &dyn Notifier) {
        if self.app.notify & NOTIFY_ACTIVE == 0 {
            return;
        }
        let excerpt = format!("{name} is sending data again");
        if let Err(e) = notifier.notify(Notification { excerpt }) {
            tracing::warn!("Cannot send activity notification for {}: {}", name, e);
        }
    }
}

impl Default for LifecycleMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_INTERVAL, AppSettings::default())
    }
}
