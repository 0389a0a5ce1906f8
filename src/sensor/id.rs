//! Stable identity for one physical sensor.
//!
//! A sensor is identified by the protocol that produced it, the id the
//! protocol reported and the channel the sensor transmits on. The key is kept
//! structured so map lookups never depend on string concatenation. The text
//! form `protocol:sensor:channel` is what external callers see; `:` and `\`
//! inside a component are escaped with a backslash so two distinct triples can
//! never render to the same string.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const SEPARATOR: char = ':';
const ESCAPE: char = '\\';

/// Composite identity of a sensor: `(protocol id, sensor id, channel)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeId {
    protocol: String,
    sensor: String,
    channel: u32,
}

impl CompositeId {
    pub fn new(protocol: impl Into<String>, sensor: impl Into<String>, channel: u32) -> Self {
        Self {
            protocol: protocol.into(),
            sensor: sensor.into(),
            channel,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn sensor(&self) -> &str {
        &self.sensor
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, component: &str) -> fmt::Result {
    for c in component.chars() {
        if c == SEPARATOR || c == ESCAPE {
            write!(f, "{ESCAPE}")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.protocol)?;
        write!(f, "{SEPARATOR}")?;
        write_escaped(f, &self.sensor)?;
        write!(f, "{SEPARATOR}{}", self.channel)
    }
}

/// Error returned when a string is not a valid composite id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid sensor id '{0}'")]
pub struct ParseIdError(pub String);

impl FromStr for CompositeId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<String> = Vec::with_capacity(3);
        let mut current = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => match chars.next() {
                    Some(next) => current.push(next),
                    None => return Err(ParseIdError(s.to_string())),
                },
                SEPARATOR => parts.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        parts.push(current);

        if parts.len() != 3 {
            return Err(ParseIdError(s.to_string()));
        }
        let channel = parts[2]
            .parse::<u32>()
            .map_err(|_| ParseIdError(s.to_string()))?;
        let sensor = parts.swap_remove(1);
        let protocol = parts.swap_remove(0);

        Ok(Self::new(protocol, sensor, channel))
    }
}

impl Serialize for CompositeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CompositeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_id_format() {
        let id = CompositeId::new("P1", "42", 1);
        assert_eq!(id.to_string(), "P1:42:1");
    }

    #[test]
    fn test_identical_triples_give_identical_ids() {
        let a = CompositeId::new("oregon", "7", 0);
        let b = CompositeId::new("oregon", "7", 0);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_separator_in_component_does_not_collide() {
        // Naive concatenation renders both of these as "a:b:c:0".
        let a = CompositeId::new("a:b", "c", 0);
        let b = CompositeId::new("a", "b:c", 0);
        assert_ne!(a, b);
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_escape_character_does_not_collide() {
        let a = CompositeId::new("a\\", "b", 0);
        let b = CompositeId::new("a", "\\b", 0);
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_parse_inverts_display() {
        for id in [
            CompositeId::new("P1", "42", 1),
            CompositeId::new("a:b", "c\\d", 7),
            CompositeId::new("", "", 0),
        ] {
            let parsed: CompositeId = id.to_string().parse().unwrap();
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("P1:42".parse::<CompositeId>().is_err());
        assert!("P1:42:x".parse::<CompositeId>().is_err());
        assert!("P1:42:1:9".parse::<CompositeId>().is_err());
        assert!("P1\\".parse::<CompositeId>().is_err());
    }

    #[test]
    fn test_serde_uses_text_form() {
        let id = CompositeId::new("P1", "42", 1);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"P1:42:1\"");
        let back: CompositeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
