// Threatdesk Engine — Results Ledger
//
// In-memory map of analysis identifier → AnalysisRecord for the lifetime of
// a session. Keys are unique; a later write with the same identifier
// replaces the earlier record (last write wins, no merge). Listing re-sorts
// by creation time, newest first.

use crate::atoms::types::AnalysisRecord;
use log::{info, warn};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Ledger {
    records: HashMap<String, AnalysisRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by identifier. Returns the replaced record, if any.
    pub fn upsert(&mut self, record: AnalysisRecord) -> Option<AnalysisRecord> {
        if let Some(prev) = self.records.get(&record.id) {
            if prev.fingerprint != record.fingerprint {
                warn!(
                    "[ledger] Analysis {} overwritten by a different payload ({} → {})",
                    record.id, prev.fingerprint, record.fingerprint
                );
            }
        }
        self.records.insert(record.id.clone(), record)
    }

    pub fn get(&self, id: &str) -> Option<&AnalysisRecord> {
        self.records.get(id)
    }

    /// All records, newest first. Equal timestamps fall back to identifier
    /// order so the listing is deterministic.
    pub fn list(&self) -> Vec<&AnalysisRecord> {
        let mut all: Vec<&AnalysisRecord> = self.records.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn clear(&mut self) {
        let n = self.records.len();
        self.records.clear();
        info!("[ledger] Cleared {} record(s)", n);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::AnalysisStatus;
    use chrono::{Duration, Local, TimeZone};

    fn record(id: &str, minute: i64, fp: &str) -> AnalysisRecord {
        let base = Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        AnalysisRecord {
            id: id.into(),
            created_at: base + Duration::minutes(minute),
            prompt: format!("payload {}", id),
            response: "reply".into(),
            status: AnalysisStatus::Completed,
            fingerprint: fp.into(),
            model: "gemini-1.5-flash".into(),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let mut ledger = Ledger::new();
        assert!(ledger.upsert(record("A1", 0, "aaaa0000")).is_none());
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("A1").unwrap().fingerprint, "aaaa0000");
        assert!(ledger.get("missing").is_none());
    }

    #[test]
    fn test_upsert_replaces_same_id() {
        let mut ledger = Ledger::new();
        ledger.upsert(record("A1", 0, "aaaa0000"));
        let prev = ledger.upsert(record("A1", 5, "bbbb1111")).unwrap();
        assert_eq!(prev.fingerprint, "aaaa0000");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("A1").unwrap().fingerprint, "bbbb1111");
    }

    #[test]
    fn test_list_newest_first() {
        let mut ledger = Ledger::new();
        ledger.upsert(record("old", 0, "1"));
        ledger.upsert(record("new", 30, "2"));
        ledger.upsert(record("mid", 10, "3"));
        let ids: Vec<&str> = ledger.list().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_list_ties_by_id() {
        let mut ledger = Ledger::new();
        ledger.upsert(record("b", 0, "1"));
        ledger.upsert(record("a", 0, "2"));
        let ids: Vec<&str> = ledger.list().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_clear() {
        let mut ledger = Ledger::new();
        ledger.upsert(record("A1", 0, "1"));
        ledger.clear();
        assert!(ledger.is_empty());
        assert!(ledger.list().is_empty());
    }
}
