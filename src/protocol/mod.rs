//! Protocol decoders and the fixed registry that selects them.
//!
//! Decoding itself is a black box: each protocol turns a payload into a
//! `RawSignalResult` or rejects it. The registry is built once at startup;
//! which protocols are watched comes from the `protocols` setting.

pub mod normalized;
pub mod rtl433;

pub use normalized::NormalizedProtocol;
pub use rtl433::Rtl433Protocol;

use crate::error::HubError;
use crate::sensor::{Locale, RawSignalResult};
use crate::settings::{read_protocols, ProtocolSettings, ProtocolWatch, SettingsStore};
use crate::stats::ProtocolStats;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A payload decoder.
pub trait Protocol: Send {
    /// Stable identifier used in settings and statistics.
    fn id(&self) -> &str;

    /// Display name, shown as the protocol label of a sensor.
    fn name(&self) -> &str;

    /// Short help text for the settings UI.
    fn hint(&self, locale: Locale) -> String;

    /// Decode one payload. `None` when the payload is not valid for this protocol.
    fn decode(&mut self, payload: &str) -> Option<RawSignalResult>;

    fn statistics(&self) -> ProtocolStats;
}

/// Registry metadata returned by `getProtocols`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub id: String,
    pub name: String,
    pub hint: String,
    pub watching: bool,
}

struct Entry {
    protocol: Box<dyn Protocol>,
    watching: bool,
}

/// Fixed set of protocols known to the agent.
pub struct ProtocolRegistry {
    entries: Vec<Entry>,
}

impl ProtocolRegistry {
    /// Registry over the given protocols, none of them watched yet.
    pub fn new(protocols: Vec<Box<dyn Protocol>>) -> Self {
        Self {
            entries: protocols
                .into_iter()
                .map(|protocol| Entry {
                    protocol,
                    watching: false,
                })
                .collect(),
        }
    }

    /// The decoders shipped with the agent, reading local times as UTC.
    pub fn builtin() -> Self {
        Self::builtin_in(chrono_tz::UTC)
    }

    /// The decoders shipped with the agent, reading local times in `timezone`.
    pub fn builtin_in(timezone: Tz) -> Self {
        Self::new(vec![
            Box::new(NormalizedProtocol::new()),
            Box::new(Rtl433Protocol::with_timezone(timezone)),
        ])
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.protocol.id().to_string())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.protocol.id() == id)
    }

    pub fn is_watching(&self, id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.watching && e.protocol.id() == id)
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.protocol.id() == id)
            .map(|e| e.protocol.name())
    }

    /// Settings value with every protocol watched.
    pub fn default_settings(&self) -> ProtocolSettings {
        self.entries
            .iter()
            .map(|e| (e.protocol.id().to_string(), ProtocolWatch { watching: true }))
            .collect()
    }

    /// Apply watch state. Protocols without an entry keep their current state.
    pub fn apply_watch(&mut self, settings: &ProtocolSettings) {
        for entry in &mut self.entries {
            let id = entry.protocol.id();
            let Some(watch) = settings.get(id) else {
                continue;
            };
            if watch.watching && !entry.watching {
                tracing::info!("Protocol {} registered", id);
            } else if !watch.watching && entry.watching {
                tracing::info!("Protocol {} unregistered", id);
            }
            entry.watching = watch.watching;
        }
    }

    /// Apply the saved watch selection without writing anything back.
    ///
    /// Returns `false` when no selection is saved, in which case every
    /// protocol is watched.
    pub fn load_selection(&mut self, settings: &dyn SettingsStore) -> bool {
        match read_protocols(settings) {
            Some(selection) => {
                self.apply_watch(&selection);
                true
            }
            None => {
                self.apply_watch(&self.default_settings());
                false
            }
        }
    }

    /// Decode a payload with a watched protocol.
    ///
    /// Payloads for protocols that are not watched are dropped (`Ok(None)`)
    /// without touching their statistics.
    pub fn decode(
        &mut self,
        protocol_id: &str,
        payload: &str,
    ) -> Result<Option<RawSignalResult>, HubError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.protocol.id() == protocol_id)
            .ok_or_else(|| HubError::UnknownProtocol(protocol_id.to_string()))?;

        if !entry.watching {
            tracing::trace!("Dropping payload for unwatched protocol {}", protocol_id);
            return Ok(None);
        }
        Ok(entry.protocol.decode(payload))
    }

    pub fn stats_of(&self, id: &str) -> Option<ProtocolStats> {
        self.entries
            .iter()
            .find(|e| e.protocol.id() == id)
            .map(|e| e.protocol.statistics())
    }

    pub fn infos(&self, locale: Locale) -> Vec<ProtocolInfo> {
        self.entries
            .iter()
            .map(|e| ProtocolInfo {
                id: e.protocol.id().to_string(),
                name: e.protocol.name().to_string(),
                hint: e.protocol.hint(locale),
                watching: e.watching,
            })
            .collect()
    }

    pub fn statistics(&self) -> BTreeMap<String, ProtocolStats> {
        self.entries
            .iter()
            .map(|e| (e.protocol.id().to_string(), e.protocol.statistics()))
            .collect()
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}
