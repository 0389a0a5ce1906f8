//! Payloads that are already `RawSignalResult` JSON.

use crate::protocol::Protocol;
use crate::sensor::{Locale, RawSignalResult};
use crate::stats::{DecodeCounters, ProtocolStats};

/// Accepts one JSON-encoded `RawSignalResult` per payload.
#[derive(Debug, Default)]
pub struct NormalizedProtocol {
    counters: DecodeCounters,
}

impl NormalizedProtocol {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Protocol for NormalizedProtocol {
    fn id(&self) -> &str {
        "normalized"
    }

    fn name(&self) -> &str {
        "Normalized JSON"
    }

    fn hint(&self, locale: Locale) -> String {
        match locale {
            Locale::Nl => "Sensorgegevens die al door een externe decoder zijn omgezet".into(),
            Locale::En => "Sensor results already decoded by an external decoder".into(),
        }
    }

    fn decode(&mut self, payload: &str) -> Option<RawSignalResult> {
        self.counters.record_attempt();
        match serde_json::from_str::<RawSignalResult>(payload) {
            Ok(result) => {
                self.counters.record_ok();
                Some(result)
            }
            Err(e) => {
                tracing::debug!("Invalid normalized payload: {}", e);
                None
            }
        }
    }

    fn statistics(&self) -> ProtocolStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_and_invalid() {
        let mut protocol = NormalizedProtocol::new();
        let result = protocol
            .decode(r#"{"protocolId":"P1","sensorId":"42","channel":1,"data":{"temperature":21.0}}"#)
            .unwrap();
        assert_eq!(result.composite_id().unwrap().to_string(), "P1:42:1");

        assert!(protocol.decode("not json").is_none());
        assert_eq!(protocol.statistics(), ProtocolStats { total: 2, ok: 1 });
    }
}
