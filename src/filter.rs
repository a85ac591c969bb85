//! Restricts decoded records to the monitored bus lines.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::ping::RawPing;

/// The set of line identifiers the pipeline keeps.
///
/// Built from a list; repeated identifiers collapse into one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitoredLines(BTreeSet<String>);

impl MonitoredLines {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        let mut listed = 0usize;
        for line in lines {
            listed += 1;
            set.insert(line.into().trim().to_string());
        }
        if listed > set.len() {
            debug!(listed, unique = set.len(), "Duplicate monitored lines collapsed");
        }
        MonitoredLines(set)
    }

    pub fn contains(&self, line_id: &str) -> bool {
        self.0.contains(line_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<'de> Deserialize<'de> for MonitoredLines {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let lines = Vec::<String>::deserialize(deserializer)?;
        Ok(MonitoredLines::new(lines))
    }
}

/// Returns the records whose line is monitored, in their original order.
pub fn filter_lines(records: &[RawPing], lines: &MonitoredLines) -> Vec<RawPing> {
    records
        .iter()
        .filter(|r| r.line_id.as_deref().is_some_and(|id| lines.contains(id)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(line: Option<&str>, ts: i64) -> RawPing {
        RawPing {
            line_id: line.map(str::to_string),
            timestamp_ms: Some(ts),
            ..Default::default()
        }
    }

    #[test]
    fn test_duplicates_collapse() {
        let lines = MonitoredLines::new(["232", "415", "232", "415", "3"]);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.iter().collect::<Vec<_>>(), vec!["232", "3", "415"]);
    }

    #[test]
    fn test_deserialize_deduplicates() {
        let lines: MonitoredLines = serde_json::from_str(r#"["108","108","905"]"#).unwrap();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_filter_keeps_members_in_order() {
        let lines = MonitoredLines::new(["107", "3"]);
        let records = vec![
            raw(Some("3"), 5),
            raw(Some("999"), 1),
            raw(None, 2),
            raw(Some("107"), 3),
            raw(Some("3"), 4),
        ];

        let kept = filter_lines(&records, &lines);
        let stamps: Vec<_> = kept.iter().map(|r| r.timestamp_ms.unwrap()).collect();
        assert_eq!(stamps, vec![5, 3, 4]);
        // input untouched
        assert_eq!(records.len(), 5);
    }

    #[test]
    fn test_duplicate_config_does_not_double_count() {
        let lines = MonitoredLines::new(["107", "107"]);
        let kept = filter_lines(&[raw(Some("107"), 1)], &lines);
        assert_eq!(kept.len(), 1);
    }
}
