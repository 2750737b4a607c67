//! Run journals and their persistence.
//!
//! A journal holds the completed steps of one run, keyed by the step's
//! sequence number; a later record for the same step replaces the earlier one.
//! Stores persist whole journals; the file store keeps one JSON document per
//! run, written atomically.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use signflow_util::expand_tilde_path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One completed (or, for timers, armed) step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalRecord {
    ActivityCompleted {
        seq: u32,
        name: String,
        output: Value,
        attempts: u32,
    },
    TimerStarted {
        seq: u32,
        wake_at: DateTime<Utc>,
    },
    TimerFired {
        seq: u32,
    },
    ChildStarted {
        seq: u32,
        name: String,
        child_run_id: String,
    },
    ChildCompleted {
        seq: u32,
        name: String,
        output: Value,
    },
}

impl JournalRecord {
    pub fn seq(&self) -> u32 {
        match self {
            Self::ActivityCompleted { seq, .. }
            | Self::TimerStarted { seq, .. }
            | Self::TimerFired { seq }
            | Self::ChildStarted { seq, .. }
            | Self::ChildCompleted { seq, .. } => *seq,
        }
    }

    /// Short label used in mismatch reports.
    pub fn describe(&self) -> String {
        match self {
            Self::ActivityCompleted { name, .. } => format!("activity {name}"),
            Self::TimerStarted { .. } | Self::TimerFired { .. } => "timer".to_string(),
            Self::ChildStarted { name, .. } | Self::ChildCompleted { name, .. } => format!("child workflow {name}"),
        }
    }
}

/// Final result of a run, recorded when it ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded { output: Value },
    Failed { kind: String, error: String },
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunJournal {
    pub run_id: String,
    pub workflow: String,
    pub task_queue: String,
    pub input: Value,
    pub started_at: DateTime<Utc>,
    /// How many times the run discarded its history and started over.
    #[serde(default)]
    pub continued: u32,
    #[serde(default)]
    pub records: BTreeMap<u32, JournalRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

impl RunJournal {
    pub fn new(run_id: impl Into<String>, workflow: impl Into<String>, task_queue: impl Into<String>, input: Value) -> Self {
        Self {
            run_id: run_id.into(),
            workflow: workflow.into(),
            task_queue: task_queue.into(),
            input,
            started_at: Utc::now(),
            continued: 0,
            records: BTreeMap::new(),
            outcome: None,
        }
    }

    /// Latest record written for `seq`.
    pub fn latest(&self, seq: u32) -> Option<&JournalRecord> {
        self.records.get(&seq)
    }

    pub fn push(&mut self, record: JournalRecord) {
        self.records.insert(record.seq(), record);
    }

    /// Drops every step record and restarts numbering under `input`. A
    /// resumed run replays the workflow from its first step.
    pub fn continue_as_new(&mut self, input: Value) {
        self.records.clear();
        self.input = input;
        self.continued += 1;
    }
}

/// Persistence for run journals.
pub trait JournalStore: Send + Sync {
    fn load(&self, run_id: &str) -> Result<Option<RunJournal>, JournalError>;
    fn save(&self, journal: &RunJournal) -> Result<(), JournalError>;
}

/// Process-local store, mainly for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryJournalStore {
    journals: Mutex<HashMap<String, RunJournal>>,
}

impl MemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_ids(&self) -> Vec<String> {
        let journals = self.journals.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = journals.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl JournalStore for MemoryJournalStore {
    fn load(&self, run_id: &str) -> Result<Option<RunJournal>, JournalError> {
        let journals = self.journals.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(journals.get(run_id).cloned())
    }

    fn save(&self, journal: &RunJournal) -> Result<(), JournalError> {
        let mut journals = self.journals.lock().unwrap_or_else(PoisonError::into_inner);
        journals.insert(journal.run_id.clone(), journal.clone());
        Ok(())
    }
}

/// One `<run id>.json` file per run under a directory.
#[derive(Debug, Clone)]
pub struct FileJournalStore {
    directory: PathBuf,
}

impl FileJournalStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: expand_tilde_path(directory.into()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        let file_stem: String = run_id
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') { ch } else { '_' })
            .collect();
        self.directory.join(format!("{file_stem}.json"))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> JournalError + '_ {
    move |source| JournalError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl JournalStore for FileJournalStore {
    fn load(&self, run_id: &str) -> Result<Option<RunJournal>, JournalError> {
        let path = self.path_for(run_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(io_error(&path)(error)),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, journal: &RunJournal) -> Result<(), JournalError> {
        fs::create_dir_all(&self.directory).map_err(io_error(&self.directory))?;
        let path = self.path_for(&journal.run_id);
        let staging = path.with_extension("json.tmp");
        let content = serde_json::to_vec(journal)?;
        fs::write(&staging, content).map_err(io_error(&staging))?;
        fs::rename(&staging, &path).map_err(io_error(&path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn journal(run_id: &str) -> RunJournal {
        let mut journal = RunJournal::new(run_id, "send_for_signature", "nda", json!({"principal": "U1"}));
        journal.push(JournalRecord::ActivityCompleted {
            seq: 0,
            name: "CreateEnvelope".into(),
            output: json!({"envelopeId": "E1", "status": "created"}),
            attempts: 2,
        });
        journal.push(JournalRecord::TimerStarted {
            seq: 1,
            wake_at: Utc::now(),
        });
        journal.push(JournalRecord::TimerFired { seq: 1 });
        journal
    }

    #[test]
    fn file_store_persists_and_reloads_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJournalStore::new(dir.path().join("runs"));
        let original = journal("send_for_signature-1234");

        store.save(&original).unwrap();
        let loaded = store.load("send_for_signature-1234").unwrap().expect("journal on disk");

        assert_eq!(loaded, original);
        assert!(store.path_for("send_for_signature-1234").exists());
        assert!(!store.path_for("send_for_signature-1234").with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_run_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJournalStore::new(dir.path());
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn run_ids_are_sanitized_into_file_names() {
        let store = FileJournalStore::new("/var/lib/signflow");
        assert_eq!(store.path_for("../etc/passwd"), PathBuf::from("/var/lib/signflow/.._etc_passwd.json"));
    }

    #[test]
    fn latest_record_for_a_sequence_wins() {
        let journal = journal("r");
        assert_eq!(journal.latest(1), Some(&JournalRecord::TimerFired { seq: 1 }));
        assert!(journal.latest(7).is_none());
        assert_eq!(journal.records.len(), 2);
    }

    #[test]
    fn continue_as_new_discards_steps_and_keeps_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJournalStore::new(dir.path());
        let mut journal = journal("send_for_signature-1234.3");

        journal.continue_as_new(json!({"envelopeId": "E1"}));
        store.save(&journal).unwrap();
        let loaded = store.load("send_for_signature-1234.3").unwrap().expect("journal on disk");

        assert!(loaded.records.is_empty());
        assert_eq!(loaded.continued, 1);
        assert_eq!(loaded.input, json!({"envelopeId": "E1"}));
        assert_eq!(loaded.workflow, "send_for_signature");
        assert!(loaded.latest(0).is_none());
    }
}
