//! Mapping from decoded field names to capability names.
//!
//! The table is fixed. Fields without an entry are internal to the decoder
//! (or simply unknown) and never produce value events.

use crate::sensor::types::{FieldValue, Locale};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Field name -> capability name.
const CAPABILITIES: &[(&str, &str)] = &[
    ("temperature", "measure_temperature"),
    ("humidity", "measure_humidity"),
    ("pressure", "measure_pressure"),
    ("rainrate", "measure_rain"),
    ("raintotal", "meter_rain"),
    ("direction", "measure_wind_angle"),
    ("currentspeed", "measure_gust_strength"),
    ("averagespeed", "measure_wind_strength"),
    ("uvindex", "measure_ultraviolet"),
    ("brightness", "measure_luminance"),
    ("forecast", "measure_forecast"),
    ("lowbattery", "alarm_battery"),
];

/// Look up the capability name for a field.
pub fn capability_for(field: &str) -> Option<&'static str> {
    CAPABILITIES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, cap)| *cap)
}

/// A value ready for a consumer: capability name plus display value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityValue {
    pub capability: String,
    pub value: FieldValue,
}

/// Source of localized strings for textual values.
pub trait Translate: Send + Sync {
    fn translate(&self, key: &str) -> Option<String>;
}

/// Key/value translation catalog for one locale.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<String, String>,
}

impl Catalog {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Forecast labels shipped with the agent.
    pub fn builtin(locale: Locale) -> Self {
        let pairs: &[(&str, &str)] = match locale {
            Locale::En => &[
                ("measure_forecast.sunny", "Sunny"),
                ("measure_forecast.partly_cloudy", "Partly cloudy"),
                ("measure_forecast.cloudy", "Cloudy"),
                ("measure_forecast.rainy", "Rainy"),
                ("measure_forecast.snowy", "Snowy"),
            ],
            Locale::Nl => &[
                ("measure_forecast.sunny", "Zonnig"),
                ("measure_forecast.partly_cloudy", "Half bewolkt"),
                ("measure_forecast.cloudy", "Bewolkt"),
                ("measure_forecast.rainy", "Regenachtig"),
                ("measure_forecast.snowy", "Sneeuw"),
            ],
        };
        Self {
            entries: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Load a flat JSON object of `key -> text` on top of the built-in entries.
    pub fn with_overrides_from(mut self, path: &Path) -> Result<Self, crate::error::SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let extra: HashMap<String, String> = serde_json::from_str(&content)?;
        self.entries.extend(extra);
        Ok(self)
    }
}

impl Translate for Catalog {
    fn translate(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}

/// Turns changed fields into capability values.
pub struct CapabilityMapper {
    translations: Box<dyn Translate>,
}

impl CapabilityMapper {
    pub fn new(translations: Box<dyn Translate>) -> Self {
        Self { translations }
    }

    pub fn for_locale(locale: Locale) -> Self {
        Self::new(Box::new(Catalog::builtin(locale)))
    }

    /// Map one field. Unknown fields give `None`.
    ///
    /// Text values are looked up as `<capability>.<value>`; a missing
    /// translation keeps the raw text.
    pub fn map(&self, field: &str, value: &FieldValue) -> Option<CapabilityValue> {
        let capability = capability_for(field)?;
        let value = match value {
            FieldValue::Text(label) => {
                let key = format!("{capability}.{label}");
                FieldValue::Text(self.translations.translate(&key).unwrap_or_else(|| label.clone()))
            }
            other => other.clone(),
        };
        Some(CapabilityValue {
            capability: capability.to_string(),
            value,
        })
    }
}

impl Default for CapabilityMapper {
    fn default() -> Self {
        Self::for_locale(Locale::En)
    }
}

impl std::fmt::Debug for CapabilityMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityMapper").finish_non_exhaustive()
    }
}
