//! Query side of the conversation logs: usage totals, per-prompt-version
//! breakdowns, and conversation browsing over the append-only JSONL
//! streams the runtime writes.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;
use trellis_runtime::LogRecord;

/// Grouping key for model calls whose record carries no prompt version.
pub const UNVERSIONED: &str = "unversioned";

const LLM_CALL_TYPE: &str = "llm_call";

/// Every record under `conversation_logs/`, loaded once. Malformed lines
/// are skipped.
pub struct LogStore {
    records: Vec<LogRecord>,
}

/// Aggregated model usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageStats {
    pub llm_calls: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_latency_ms: u64,
}

impl UsageStats {
    fn add(&mut self, record: &LogRecord) {
        self.llm_calls += 1;
        self.input_tokens += record.input_tokens.unwrap_or_default();
        self.output_tokens += record.output_tokens.unwrap_or_default();
        self.total_latency_ms += record.duration_ms.unwrap_or_default();
    }

    pub fn average_latency_ms(&self) -> u64 {
        if self.llm_calls == 0 {
            0
        } else {
            self.total_latency_ms / self.llm_calls as u64
        }
    }
}

impl LogStore {
    pub fn load(log_root: &Path) -> io::Result<Self> {
        let dir = log_root.join("conversation_logs");
        let mut records = Vec::new();
        if !dir.exists() {
            return Ok(Self { records });
        }
        let mut paths: Vec<_> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        paths.sort();
        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Ok(record) = serde_json::from_str::<LogRecord>(line) {
                    records.push(record);
                }
            }
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let ids: BTreeSet<&str> = self
            .records
            .iter()
            .map(|r| r.conversation_id.as_str())
            .collect();
        ids.into_iter().map(str::to_string).collect()
    }

    /// Records of one conversation, in append order.
    pub fn conversation(&self, conversation_id: &str) -> Vec<&LogRecord> {
        self.records
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .collect()
    }

    /// Overall model usage across every conversation.
    pub fn stats(&self) -> UsageStats {
        let mut stats = UsageStats::default();
        for record in self.llm_calls() {
            stats.add(record);
        }
        stats
    }

    /// Model usage grouped by the prompt version behind each call.
    pub fn stats_by_version(&self) -> BTreeMap<String, UsageStats> {
        let mut by_version: BTreeMap<String, UsageStats> = BTreeMap::new();
        for record in self.llm_calls() {
            let version = record
                .prompt_version_id
                .clone()
                .unwrap_or_else(|| UNVERSIONED.to_string());
            by_version.entry(version).or_default().add(record);
        }
        by_version
    }

    /// The most recent model calls, newest first.
    pub fn recent_llm_calls(&self, limit: usize) -> Vec<&LogRecord> {
        let mut calls: Vec<&LogRecord> = self.llm_calls().collect();
        calls.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        calls.truncate(limit);
        calls
    }

    fn llm_calls(&self) -> impl Iterator<Item = &LogRecord> {
        self.records
            .iter()
            .filter(|r| r.record_type == LLM_CALL_TYPE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_runtime::{LogLevel, LogSource};

    fn llm_record(
        conversation_id: &str,
        version: Option<&str>,
        input_tokens: u64,
        output_tokens: u64,
        latency_ms: u64,
    ) -> LogRecord {
        let mut record = LogRecord::now(
            "llm_call",
            conversation_id,
            LogLevel::Info,
            LogSource::Llm,
            "model call",
        )
        .with_agent("codegen")
        .with_model_call("p", "r", "test-model", latency_ms)
        .with_token_usage(Some(input_tokens), Some(output_tokens));
        if let Some(version) = version {
            record = record.with_prompt_version(version);
        }
        record
    }

    fn seeded_store() -> (tempfile::TempDir, LogStore) {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("conversation_logs");
        std::fs::create_dir_all(&logs).unwrap();

        let c1 = [
            serde_json::to_string(&llm_record("C-1", Some("1.0"), 100, 20, 40)).unwrap(),
            serde_json::to_string(&llm_record("C-1", Some("1.1"), 200, 30, 60)).unwrap(),
            "{ not json".to_string(),
        ];
        std::fs::write(logs.join("C-1.jsonl"), c1.join("\n")).unwrap();

        let c2 = [
            serde_json::to_string(&llm_record("C-2", None, 50, 10, 20)).unwrap(),
            serde_json::to_string(&LogRecord::now(
                "message_summary",
                "C-2",
                LogLevel::Info,
                LogSource::Agent,
                "pipeline succeeded",
            ))
            .unwrap(),
        ];
        std::fs::write(logs.join("C-2.jsonl"), c2.join("\n")).unwrap();

        let store = LogStore::load(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn stats_total_model_usage_and_skip_non_llm_records() {
        let (_dir, store) = seeded_store();
        let stats = store.stats();
        assert_eq!(stats.llm_calls, 3);
        assert_eq!(stats.input_tokens, 350);
        assert_eq!(stats.output_tokens, 60);
        assert_eq!(stats.average_latency_ms(), 40);
    }

    #[test]
    fn stats_group_by_prompt_version_with_an_unversioned_bucket() {
        let (_dir, store) = seeded_store();
        let by_version = store.stats_by_version();
        assert_eq!(by_version["1.0"].input_tokens, 100);
        assert_eq!(by_version["1.1"].input_tokens, 200);
        assert_eq!(by_version[UNVERSIONED].llm_calls, 1);
    }

    #[test]
    fn conversations_are_listed_and_filtered() {
        let (_dir, store) = seeded_store();
        assert_eq!(store.conversation_ids(), ["C-1", "C-2"]);
        assert_eq!(store.conversation("C-1").len(), 2);
        assert_eq!(store.conversation("C-2").len(), 2);
    }

    #[test]
    fn recent_calls_come_back_newest_first_and_bounded() {
        let (_dir, store) = seeded_store();
        let recent = store.recent_llm_calls(2);
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp >= recent[1].timestamp);
    }

    #[test]
    fn a_missing_log_directory_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::load(dir.path()).unwrap();
        assert!(store.records().is_empty());
        assert_eq!(store.stats(), UsageStats::default());
    }
}
