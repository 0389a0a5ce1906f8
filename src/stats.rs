//! Decode statistics per protocol.
//!
//! Each protocol counts every payload it sees (`total`) and every payload it
//! decoded into a result (`ok`). `StatsLog` keeps totals from earlier runs so
//! the status command can show cumulative numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Counters reported on the `stats_update` channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStats {
    pub total: u64,
    pub ok: u64,
}

impl ProtocolStats {
    pub fn merged(self, other: ProtocolStats) -> ProtocolStats {
        ProtocolStats {
            total: self.total + other.total,
            ok: self.ok + other.ok,
        }
    }
}

/// Running decode counters owned by a protocol.
#[derive(Debug, Default)]
pub struct DecodeCounters {
    total: u64,
    ok: u64,
}

impl DecodeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one payload seen.
    pub fn record_attempt(&mut self) {
        self.total += 1;
    }

    /// Record one payload decoded.
    pub fn record_ok(&mut self) {
        self.ok += 1;
    }

    pub fn snapshot(&self) -> ProtocolStats {
        ProtocolStats {
            total: self.total,
            ok: self.ok,
        }
    }
}

/// Cumulative statistics across runs.
#[derive(Debug)]
pub struct StatsLog {
    /// Totals loaded from earlier runs
    previous: BTreeMap<String, ProtocolStats>,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl StatsLog {
    pub fn new() -> Self {
        Self {
            previous: BTreeMap::new(),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a stats log backed by a file, loading earlier totals if present.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous statistics: {}", e);
        }

        log
    }

    /// Earlier totals combined with the current session's counters.
    pub fn cumulative(
        &self,
        current: &BTreeMap<String, ProtocolStats>,
    ) -> BTreeMap<String, ProtocolStats> {
        let mut all = self.previous.clone();
        for (protocol, stats) in current {
            let entry = all.entry(protocol.clone()).or_default();
            *entry = entry.merged(*stats);
        }
        all
    }

    pub fn summary(&self, current: &BTreeMap<String, ProtocolStats>) -> String {
        let mut out = format!(
            "Session Statistics ({} seconds):\n",
            (Utc::now() - self.session_start).num_seconds()
        );
        if current.is_empty() {
            out.push_str("  no payloads received\n");
        }
        for (protocol, stats) in current {
            out.push_str(&format!(
                "  {protocol}: {} payloads, {} decoded\n",
                stats.total, stats.ok
            ));
        }
        out
    }

    /// Persist the cumulative totals.
    pub fn save(&self, current: &BTreeMap<String, ProtocolStats>) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats {
                protocols: self.cumulative(current),
                last_updated: Utc::now(),
            };
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                self.previous = persisted.protocols;
            }
        }
        Ok(())
    }
}

impl Default for StatsLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub protocols: BTreeMap<String, ProtocolStats>,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_counters() {
        let mut counters = DecodeCounters::new();
        counters.record_attempt();
        counters.record_attempt();
        counters.record_ok();

        assert_eq!(counters.snapshot(), ProtocolStats { total: 2, ok: 1 });
    }

    #[test]
    fn test_persistence_accumulates_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let mut current = BTreeMap::new();
        current.insert("rtl433".to_string(), ProtocolStats { total: 10, ok: 7 });

        StatsLog::with_persistence(path.clone()).save(&current).unwrap();

        let log = StatsLog::with_persistence(path);
        let all = log.cumulative(&current);
        assert_eq!(all["rtl433"], ProtocolStats { total: 20, ok: 14 });
    }

    #[test]
    fn test_summary_format() {
        let log = StatsLog::new();
        let mut current = BTreeMap::new();
        current.insert("normalized".to_string(), ProtocolStats { total: 3, ok: 3 });

        let summary = log.summary(&current);
        assert!(summary.contains("Session Statistics"));
        assert!(summary.contains("normalized: 3 payloads, 3 decoded"));
    }
}
