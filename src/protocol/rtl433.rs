//! Adapter for `rtl_433 -F json` output.
//!
//! rtl_433 does the radio work and prints one JSON object per decoded
//! message. Its measurement keys are renamed to the agent's field names;
//! keys without a counterpart are dropped.
//!
//! rtl_433 prints `time` as local wall-clock time without an offset, so
//! naive times are read in the timezone the adapter was built with.

use crate::protocol::Protocol;
use crate::sensor::{FieldMap, FieldValue, Locale, RawSignalResult};
use crate::stats::{DecodeCounters, ProtocolStats};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};

/// rtl_433 key -> field name.
const FIELD_KEYS: &[(&str, &str)] = &[
    ("temperature_C", "temperature"),
    ("humidity", "humidity"),
    ("pressure_hPa", "pressure"),
    ("rain_mm", "raintotal"),
    ("rain_rate_mm_h", "rainrate"),
    ("wind_dir_deg", "direction"),
    ("wind_max_m_s", "currentspeed"),
    ("wind_avg_m_s", "averagespeed"),
    ("uv", "uvindex"),
    ("uvi", "uvindex"),
    ("light_lux", "brightness"),
];

#[derive(Debug)]
pub struct Rtl433Protocol {
    counters: DecodeCounters,
    timezone: Tz,
}

impl Rtl433Protocol {
    pub fn new() -> Self {
        Self::with_timezone(chrono_tz::UTC)
    }

    /// Adapter for an rtl_433 process running with local time `timezone`.
    pub fn with_timezone(timezone: Tz) -> Self {
        Self {
            counters: DecodeCounters::default(),
            timezone,
        }
    }
}

impl Default for Rtl433Protocol {
    fn default() -> Self {
        Self::new()
    }
}

/// Offset times are exact. Naive times are local to `timezone`; a time
/// skipped by a DST gap or an unparsable one falls back to receive time.
fn parse_time(value: Option<&Value>, timezone: &Tz) -> DateTime<Utc> {
    let Some(text) = value.and_then(Value::as_str) else {
        return Utc::now();
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return ts.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .and_then(|naive| timezone.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Numeric channels pass through; lettered channels (A, B, C, ...) count from 1.
fn parse_channel(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0),
        Some(Value::String(s)) => {
            let mut chars = s.trim().chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => {
                    u32::from(c.to_ascii_uppercase()) - u32::from('A') + 1
                }
                _ => s.trim().parse().unwrap_or(0),
            }
        }
        _ => 0,
    }
}

fn sensor_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn fields(object: &Map<String, Value>) -> FieldMap {
    let mut data = FieldMap::new();
    for (key, field) in FIELD_KEYS {
        if let Some(n) = object.get(*key).and_then(Value::as_f64) {
            data.insert(field.to_string(), FieldValue::Number(n));
        }
    }
    let battery_ok = match object.get("battery_ok") {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::Number(n)) => n.as_f64().map(|n| n > 0.0),
        _ => None,
    };
    if let Some(ok) = battery_ok {
        data.insert("lowbattery".to_string(), FieldValue::Bool(!ok));
    }
    data
}

impl Protocol for Rtl433Protocol {
    fn id(&self) -> &str {
        "rtl433"
    }

    fn name(&self) -> &str {
        "rtl_433"
    }

    fn hint(&self, locale: Locale) -> String {
        match locale {
            Locale::Nl => "JSON-uitvoer van rtl_433 (start met -F json)".into(),
            Locale::En => "JSON output of rtl_433 (run with -F json)".into(),
        }
    }

    fn decode(&mut self, payload: &str) -> Option<RawSignalResult> {
        self.counters.record_attempt();

        let value: Value = serde_json::from_str(payload).ok()?;
        let object = value.as_object()?;
        let model = object.get("model").and_then(Value::as_str)?;

        let result = RawSignalResult {
            protocol_id: model.to_string(),
            sensor_id: sensor_id(object.get("id")),
            channel: Some(parse_channel(object.get("channel"))),
            timestamp: parse_time(object.get("time"), &self.timezone),
            data: Some(fields(object)),
            name: Some(model.to_string()),
        };
        self.counters.record_ok();
        Some(result)
    }

    fn statistics(&self) -> ProtocolStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_weather_station() {
        let mut protocol = Rtl433Protocol::new();
        let line = r#"{"time":"2024-01-22 10:00:00","model":"Fineoffset-WH24","id":140,
            "battery_ok":1,"temperature_C":7.3,"humidity":84,"wind_dir_deg":225,
            "wind_avg_m_s":1.2,"wind_max_m_s":2.4,"rain_mm":93.6,"uv":120,"light_lux":5000.0,
            "mic":"CRC"}"#;

        let result = protocol.decode(line).unwrap();
        assert_eq!(result.protocol_id, "Fineoffset-WH24");
        assert_eq!(result.sensor_id.as_deref(), Some("140"));
        assert_eq!(result.channel, Some(0));
        assert_eq!(
            result.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap()
        );

        let data = result.data.unwrap();
        assert_eq!(data["temperature"], FieldValue::Number(7.3));
        assert_eq!(data["averagespeed"], FieldValue::Number(1.2));
        assert_eq!(data["raintotal"], FieldValue::Number(93.6));
        assert_eq!(data["lowbattery"], FieldValue::Bool(false));
        assert!(!data.contains_key("mic"));
    }

    #[test]
    fn test_naive_time_is_local_to_timezone() {
        let mut protocol = Rtl433Protocol::with_timezone(chrono_tz::America::New_York);
        let line = r#"{"time":"2024-01-22 10:00:00","model":"Nexus-TH","id":42,"temperature_C":1.0}"#;

        let result = protocol.decode(line).unwrap();
        assert_eq!(
            result.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 22, 15, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_offset_time_ignores_timezone() {
        let zone = chrono_tz::Asia::Tokyo;
        let time = Value::String("2024-01-22T10:00:00+01:00".into());
        assert_eq!(
            parse_time(Some(&time), &zone),
            Utc.with_ymd_and_hms(2024, 1, 22, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_time_in_dst_gap_falls_back_to_now() {
        let zone = chrono_tz::Europe::Amsterdam;
        let before = Utc::now();
        let time = Value::String("2024-03-31 02:30:00".into());
        assert!(parse_time(Some(&time), &zone) >= before);
    }

    #[test]
    fn test_lettered_channel() {
        assert_eq!(parse_channel(Some(&Value::String("A".into()))), 1);
        assert_eq!(parse_channel(Some(&Value::String("c".into()))), 3);
        assert_eq!(parse_channel(Some(&Value::String("2".into()))), 2);
        assert_eq!(parse_channel(Some(&serde_json::json!(3))), 3);
        assert_eq!(parse_channel(None), 0);
    }

    #[test]
    fn test_rejects_non_sensor_lines() {
        let mut protocol = Rtl433Protocol::new();
        assert!(protocol.decode("rtl_433 version 23.11").is_none());
        assert!(protocol.decode(r#"{"center_frequency":433920000}"#).is_none());
        assert_eq!(protocol.statistics(), ProtocolStats { total: 2, ok: 0 });
    }
}
