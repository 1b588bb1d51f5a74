//! Identification history
//!
//! Results are kept newest first and persisted as JSON between runs.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Local, Utc};
use goggles_common::GogglesError;
use goggles_net::BottleDetails;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Entries kept before the oldest are dropped.
pub const DEFAULT_CAPACITY: usize = 50;

const UNKNOWN_BOTTLE: &str = "Unknown Bottle";

/// Average MSRP as the server reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Msrp {
    /// Dollars.
    Amount(f64),
    /// A price the server sent as text that is not a number, such as `call`.
    Text(String),
}

impl fmt::Display for Msrp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Msrp::Amount(dollars) => write!(f, "${dollars:.2}"),
            Msrp::Text(raw) => write!(f, "${raw}"),
        }
    }
}

/// One identification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub name: String,
    pub msrp: Option<Msrp>,
    /// Keypoints matched
    pub confidence: u64,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_details(details: &BottleDetails, recorded_at: DateTime<Utc>) -> Self {
        Self {
            name: details
                .name()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(UNKNOWN_BOTTLE)
                .to_string(),
            msrp: details.avg_msrp().and_then(parse_msrp),
            confidence: details.good_matches().unwrap_or(0),
            recorded_at,
        }
    }

    /// `$42.50`, or `N/A` without a price.
    pub fn msrp_display(&self) -> String {
        match &self.msrp {
            Some(msrp) => msrp.to_string(),
            None => "N/A".to_string(),
        }
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {}  Avg MSRP: {}  Match Confidence: {} keypoints matched",
            self.recorded_at.with_timezone(&Local).format("%H:%M:%S"),
            self.name,
            self.msrp_display(),
            self.confidence
        )
    }
}

/// Zero, empty and non-finite prices count as missing. Text that is not a
/// number is kept as sent.
fn parse_msrp(value: &Value) -> Option<Msrp> {
    let amount = |m: f64| (m.is_finite() && m > 0.0).then_some(Msrp::Amount(m));
    match value {
        Value::Number(n) => n.as_f64().and_then(amount),
        Value::String(s) => {
            let raw = s.trim();
            match raw.trim_start_matches('$').parse::<f64>() {
                Ok(m) => amount(m),
                Err(_) if raw.is_empty() => None,
                Err(_) => Some(Msrp::Text(raw.to_string())),
            }
        }
        _ => None,
    }
}

/// Newest-first, bounded list of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentificationHistory {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl Default for IdentificationHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl IdentificationHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Load history from file, starting empty when it is absent or unreadable.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path).map(|raw| serde_json::from_str::<Self>(&raw)) {
            Ok(Ok(mut history)) => {
                history.capacity = history.capacity.max(1);
                history.entries.truncate(history.capacity);
                history
            }
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable history");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read history");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), GogglesError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| GogglesError::internal(format!("Failed to serialize history: {e}")))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Record a result now.
    pub fn record(&mut self, details: &BottleDetails) -> &HistoryEntry {
        self.push(HistoryEntry::from_details(details, Utc::now()))
    }

    pub fn push(&mut self, entry: HistoryEntry) -> &HistoryEntry {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
        &self.entries[0]
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn details(value: Value) -> BottleDetails {
        match value {
            Value::Object(map) => BottleDetails::new(map),
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_entry_fields() {
        let entry = HistoryEntry::from_details(
            &details(json!({ "name": "Blanton's", "avg_msrp": 64.5, "_match_good_matches": 41 })),
            Utc::now(),
        );
        assert_eq!(entry.name, "Blanton's");
        assert_eq!(entry.msrp_display(), "$64.50");
        assert_eq!(entry.confidence, 41);
    }

    #[test]
    fn test_entry_fallbacks() {
        let entry = HistoryEntry::from_details(&details(json!({ "avg_msrp": 0 })), Utc::now());
        assert_eq!(entry.name, "Unknown Bottle");
        assert_eq!(entry.msrp_display(), "N/A");
        assert_eq!(entry.confidence, 0);
    }

    #[test]
    fn test_string_msrp() {
        let entry = HistoryEntry::from_details(
            &details(json!({ "name": "Weller", "avg_msrp": "$29.9" })),
            Utc::now(),
        );
        assert_eq!(entry.msrp_display(), "$29.90");

        let entry = HistoryEntry::from_details(
            &details(json!({ "name": "Weller", "avg_msrp": "call" })),
            Utc::now(),
        );
        assert_eq!(entry.msrp, Some(Msrp::Text("call".to_string())));
        assert_eq!(entry.msrp_display(), "$call");

        let entry = HistoryEntry::from_details(
            &details(json!({ "name": "Weller", "avg_msrp": "  " })),
            Utc::now(),
        );
        assert_eq!(entry.msrp_display(), "N/A");
    }

    #[test]
    fn test_newest_first_and_bounded() {
        let mut history = IdentificationHistory::with_capacity(2);
        for name in ["first", "second", "third"] {
            history.record(&details(json!({ "name": name })));
        }

        let names: Vec<_> = history.entries().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["third", "second"]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let mut history = IdentificationHistory::default();
        history.record(&details(json!({ "name": "Eagle Rare", "avg_msrp": 39.99 })));
        history.save(&path).unwrap();

        let loaded = IdentificationHistory::load(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries().next(), history.entries().next());
    }

    #[test]
    fn test_load_missing_or_corrupt_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        assert!(IdentificationHistory::load(&path).is_empty());

        std::fs::write(&path, "[not json").unwrap();
        assert!(IdentificationHistory::load(&path).is_empty());
    }
}
