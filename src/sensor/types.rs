//! Data model for decoded payloads and merged sensor state.

use crate::sensor::id::CompositeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single decoded field value.
///
/// Decoders emit numbers for measurements, booleans for flags such as
/// `lowbattery`, and text labels for enumerated readings such as `forecast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// Field name to value mapping, ordered for stable output.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Normalized output of a protocol decoder.
///
/// `sensor_id` and `data` are optional on the wire; a result missing either is
/// ignored by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSignalResult {
    pub protocol_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub sensor_id: Option<String>,
    #[serde(default)]
    pub channel: Option<u32>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RawSignalResult {
    /// Build a result with all required parts present.
    pub fn new(
        protocol_id: impl Into<String>,
        sensor_id: impl Into<String>,
        channel: u32,
        timestamp: DateTime<Utc>,
        data: FieldMap,
    ) -> Self {
        Self {
            protocol_id: protocol_id.into(),
            sensor_id: Some(sensor_id.into()),
            channel: Some(channel),
            timestamp,
            data: Some(data),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The composite id, if the result carries a sensor id.
    pub fn composite_id(&self) -> Option<CompositeId> {
        self.sensor_id
            .as_ref()
            .map(|sid| CompositeId::new(&self.protocol_id, sid, self.channel.unwrap_or(0)))
    }
}

/// Sensor ids arrive as either JSON strings or numbers depending on the decoder.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Display language for type labels and value translations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Nl,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Nl => "nl",
        }
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" => Ok(Locale::En),
            "nl" => Ok(Locale::Nl),
            other => Err(format!("unsupported locale: {other}")),
        }
    }
}

/// Generic sensor type inferred from the fields a sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorType {
    /// Temperature, humidity and barometric pressure.
    #[serde(rename = "THB")]
    Thb,
    #[serde(rename = "TH")]
    Th,
    #[serde(rename = "W")]
    Wind,
    #[serde(rename = "R")]
    Rain,
    #[serde(rename = "UV")]
    Uv,
    #[serde(rename = "L")]
    Light,
    #[serde(rename = "T")]
    Temperature,
}

impl SensorType {
    pub const ALL: [SensorType; 7] = [
        SensorType::Thb,
        SensorType::Th,
        SensorType::Wind,
        SensorType::Rain,
        SensorType::Uv,
        SensorType::Light,
        SensorType::Temperature,
    ];

    /// Short tag used by the pairing flow.
    pub fn tag(&self) -> &'static str {
        match self {
            SensorType::Thb => "THB",
            SensorType::Th => "TH",
            SensorType::Wind => "W",
            SensorType::Rain => "R",
            SensorType::Uv => "UV",
            SensorType::Light => "L",
            SensorType::Temperature => "T",
        }
    }

    /// Human readable label. Falls back to English where no translation exists.
    pub fn label(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (SensorType::Thb, Locale::Nl) => "Weerstation",
            (SensorType::Thb, _) => "Weather station",
            (SensorType::Th, Locale::Nl) => "Temperatuur/vochtigheid",
            (SensorType::Th, _) => "Temperature/humidity",
            (SensorType::Wind, Locale::Nl) => "Windmeter",
            (SensorType::Wind, _) => "Anemometer",
            (SensorType::Rain, Locale::Nl) => "Regenmeter",
            (SensorType::Rain, _) => "Rain gauge",
            (SensorType::Uv, _) => "Ultra Violet",
            (SensorType::Light, Locale::Nl) => "Lichtsterkte",
            (SensorType::Light, _) => "Brightness",
            (SensorType::Temperature, Locale::Nl) => "Temperatuur",
            (SensorType::Temperature, _) => "Temperature",
        }
    }

    /// Icon reference for the UI.
    pub fn icon(&self) -> &'static str {
        match self {
            SensorType::Thb => "/drivers/temphumbar/assets/icon.svg",
            SensorType::Th => "/drivers/temphum/assets/icon.svg",
            SensorType::Wind => "/drivers/wind/assets/icon.svg",
            SensorType::Rain => "/drivers/rain/assets/icon.svg",
            SensorType::Uv => "/drivers/uv/assets/icon.svg",
            SensorType::Light => "/drivers/luminance/assets/icon.svg",
            SensorType::Temperature => "/drivers/temp/assets/icon.svg",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SensorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorType::ALL
            .into_iter()
            .find(|t| t.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown sensor type: {s}"))
    }
}

/// UI-facing projection of a sensor record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayView {
    /// Composite id of the sensor this view belongs to
    pub key: CompositeId,
    /// Label of the protocol that decoded the sensor
    pub protocol: String,
    /// Human readable type label
    #[serde(rename = "type")]
    pub type_label: String,
    pub icon: String,
    /// Friendly name: the paired device name, else the decoded name
    pub name: Option<String>,
    /// Channel as text, `-` when the sensor has no channel
    pub channel: String,
    /// Raw sensor id as reported by the protocol
    pub id: String,
    /// Last update time, formatted in the configured timezone
    pub update: String,
    pub data: FieldMap,
    pub paired: bool,
}

/// Merged state of one physical sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRecord {
    pub id: CompositeId,
    /// Latest value for every field ever reported
    pub raw_data: FieldMap,
    pub type_tag: Option<SensorType>,
    /// Number of successfully classified updates
    pub update_count: u64,
    pub last_update: DateTime<Utc>,
    /// Name carried by the most recent payload that had one
    pub name: Option<String>,
    /// Label of the protocol that last decoded this sensor
    pub protocol_label: String,
    /// Whether the last classified update changed any field
    pub new_data: bool,
    /// `None` until the record is classified for the first time
    pub display: Option<DisplayView>,
}

impl SensorRecord {
    pub(crate) fn empty(id: CompositeId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            raw_data: FieldMap::new(),
            type_tag: None,
            update_count: 0,
            last_update: now,
            name: None,
            protocol_label: String::new(),
            new_data: false,
            display: None,
        }
    }
}
