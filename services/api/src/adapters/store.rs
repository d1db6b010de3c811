//! services/api/src/adapters/store.rs
//!
//! This module contains the JSON-file-backed report store.
//! It implements the `ReportStore` port from the `core` crate: each report
//! list is one independent blob, loaded once at startup and rewritten
//! wholesale on every new report. A missing file loads as an empty list.

use async_trait::async_trait;
use german_coach_core::domain::{ConversationReport, WritingReport};
use german_coach_core::ports::{PortError, PortResult, ReportStore};
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const CONVERSATION_REPORTS_FILE: &str = "conversation_reports.json";
const WRITING_REPORTS_FILE: &str = "writing_reports.json";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A report store persisting each list as a JSON array file under one data
/// directory.
#[derive(Clone)]
pub struct JsonReportStore {
    dir: PathBuf,
}

impl JsonReportStore {
    /// Creates a new `JsonReportStore` rooted at the given directory.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    async fn read_list<T: DeserializeOwned>(&self, file_name: &str) -> PortResult<Vec<T>> {
        let path = self.dir.join(file_name);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                PortError::Unexpected(format!("failed to parse {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(PortError::Unexpected(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn write_list<T: Serialize>(&self, file_name: &str, items: &[T]) -> PortResult<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            PortError::Unexpected(format!(
                "failed to create data directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let path = self.dir.join(file_name);
        let json = serde_json::to_string_pretty(items)
            .map_err(|e| PortError::Unexpected(format!("failed to serialize reports: {e}")))?;
        tokio::fs::write(&path, json).await.map_err(|e| {
            PortError::Unexpected(format!("failed to write {}: {e}", path.display()))
        })
    }
}

//=========================================================================================
// `ReportStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ReportStore for JsonReportStore {
    async fn load_conversation_reports(&self) -> PortResult<Vec<ConversationReport>> {
        self.read_list(CONVERSATION_REPORTS_FILE).await
    }

    async fn save_conversation_reports(&self, reports: &[ConversationReport]) -> PortResult<()> {
        self.write_list(CONVERSATION_REPORTS_FILE, reports).await
    }

    async fn load_writing_reports(&self) -> PortResult<Vec<WritingReport>> {
        self.read_list(WRITING_REPORTS_FILE).await
    }

    async fn save_writing_reports(&self, reports: &[WritingReport]) -> PortResult<()> {
        self.write_list(WRITING_REPORTS_FILE, reports).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use german_coach_core::domain::{ChatMessage, WritingCorrection};
    use tempfile::tempdir;

    fn conversation_report(id: &str) -> ConversationReport {
        ConversationReport {
            id: id.to_string(),
            date: Utc::now(),
            overall_feedback: "Gut gemacht!".to_string(),
            grammar_score: 80.0,
            vocabulary_score: 70.0,
            fluency_score: 90.0,
            positive_points: vec!["Correct verb position".to_string()],
            areas_for_improvement: vec!["Practice dative case".to_string()],
            transcript: vec![ChatMessage::user("Hallo"), ChatMessage::model("Guten Tag!")],
        }
    }

    #[tokio::test]
    async fn missing_files_load_as_empty_lists() {
        let dir = tempdir().expect("tempdir");
        let store = JsonReportStore::new(dir.path());

        assert!(store.load_conversation_reports().await.unwrap().is_empty());
        assert!(store.load_writing_reports().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversation_reports_round_trip_with_dates_intact() {
        let dir = tempdir().expect("tempdir");
        let store = JsonReportStore::new(dir.path());

        let reports = vec![conversation_report("b"), conversation_report("a")];
        store.save_conversation_reports(&reports).await.expect("save");

        let loaded = store.load_conversation_reports().await.expect("load");
        assert_eq!(loaded, reports);
        assert_eq!(loaded[0].date, reports[0].date);
    }

    #[tokio::test]
    async fn saving_rewrites_the_list_wholesale() {
        let dir = tempdir().expect("tempdir");
        let store = JsonReportStore::new(dir.path());

        store
            .save_conversation_reports(&[conversation_report("old")])
            .await
            .expect("save");
        store
            .save_conversation_reports(&[conversation_report("new")])
            .await
            .expect("save");

        let loaded = store.load_conversation_reports().await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "new");
    }

    #[tokio::test]
    async fn writing_reports_round_trip() {
        let dir = tempdir().expect("tempdir");
        let store = JsonReportStore::new(dir.path());

        let report = WritingReport {
            id: "2024-05-01T10:00:00.000Z".to_string(),
            date: Utc::now(),
            image_url: "data:image/png;base64,aGFsbG8=".to_string(),
            overall_feedback: "Schön geschrieben!".to_string(),
            corrections: vec![WritingCorrection {
                original: "Ich habe gegangen".to_string(),
                corrected: "Ich bin gegangen".to_string(),
                explanation: "gehen forms its perfect tense with sein".to_string(),
            }],
            positive_points: vec!["Clear handwriting".to_string()],
        };
        store.save_writing_reports(&[report.clone()]).await.expect("save");

        let loaded = store.load_writing_reports().await.expect("load");
        assert_eq!(loaded, vec![report]);
    }
}
