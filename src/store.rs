//! Persistent key/value state that survives page loads and agent restarts.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::config::AutomationConfig;
use crate::error::StoreError;
use crate::log_book::{LogBook, LogEntry};
use crate::state::{RunState, SubjectUrlCache, SubmitOutcome};

pub mod keys {
    pub const ACTIVE: &str = "active";
    pub const RETRY_COUNT: &str = "retry_count";
    pub const SUBMIT_OUTCOME: &str = "submit_outcome";
    pub const HALTED: &str = "halted";
    pub const SUBJECT_CACHE: &str = "subject_url_cache";
    pub const LOGS: &str = "logs";
    pub const SUBJECT_ID: &str = "subject_id";
    pub const REQUEST_ID: &str = "request_id";
    pub const ACTIVATION_AT: &str = "activation_at";
}

/// Raw string storage, shaped like browser local storage.
pub trait StateStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// A single JSON file holding every entry.
///
/// Nothing is cached: every read goes to disk and every mutation is a
/// read-modify-write of the current file, so the CLI and a running agent can
/// share one path. Writes land through a sibling temp file and a rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Opens (or starts) the store at `path`. An unreadable file is treated
    /// as empty and will be overwritten by the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| io_error(&path, source))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => return Err(io_error(&self.path, source)),
        };
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file is corrupt, reading it as empty");
                Ok(BTreeMap::new())
            }
        }
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let staging = self.path.with_extension("json.tmp");
        let file = File::create(&staging).map_err(|source| io_error(&staging, source))?;
        serde_json::to_writer_pretty(file, entries).map_err(|source| StoreError::Encode {
            key: "*".to_string(),
            source,
        })?;
        std::fs::rename(&staging, &self.path).map_err(|source| io_error(&self.path, source))
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.load() {
            Ok(mut entries) => entries.remove(key),
            Err(e) => {
                warn!(key, error = %e, "state file unreadable");
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Typed view over a [`StateStore`].
///
/// Every entry is JSON-encoded under its own key. An entry that no longer
/// decodes is dropped and read back as its default.
pub struct PersistentState<S: StateStore> {
    store: S,
    max_retries: u32,
    log_cap: usize,
}

impl<S: StateStore> PersistentState<S> {
    pub fn new(store: S, max_retries: u32, log_cap: usize) -> Self {
        Self {
            store,
            max_retries,
            log_cap,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn read<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable entry");
                if let Err(e) = self.store.remove(key) {
                    warn!(key, error = %e, "could not drop undecodable entry");
                }
                None
            }
        }
    }

    fn write<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store.set(key, encoded)
    }

    fn write_opt<T: Serialize>(&mut self, key: &str, value: Option<&T>) -> Result<(), StoreError> {
        match value {
            Some(value) => self.write(key, value),
            None => self.store.remove(key),
        }
    }

    /// A store that has never been written starts active, matching a fresh
    /// install.
    pub fn run_state(&mut self) -> RunState {
        let mut state = RunState::fresh(self.max_retries);
        state.active = self.read(keys::ACTIVE).unwrap_or(true);
        state.retry_count = self.read(keys::RETRY_COUNT).unwrap_or(0);
        state.submit_outcome = self
            .read(keys::SUBMIT_OUTCOME)
            .unwrap_or(SubmitOutcome::Unknown);
        state.halted = self.read(keys::HALTED).unwrap_or(false);
        state
    }

    pub fn save_run_state(&mut self, state: &RunState) -> Result<(), StoreError> {
        self.write(keys::ACTIVE, &state.active)?;
        self.write(keys::RETRY_COUNT, &state.retry_count)?;
        self.write(keys::SUBMIT_OUTCOME, &state.submit_outcome)?;
        self.write(keys::HALTED, &state.halted)
    }

    pub fn config(&mut self) -> AutomationConfig {
        AutomationConfig {
            subject_id: self.read(keys::SUBJECT_ID),
            request_id: self.read(keys::REQUEST_ID),
            activation_at: self.read::<DateTime<Local>>(keys::ACTIVATION_AT),
        }
    }

    pub fn save_config(&mut self, config: &AutomationConfig) -> Result<(), StoreError> {
        self.write_opt(keys::SUBJECT_ID, config.subject_id.as_ref())?;
        self.write_opt(keys::REQUEST_ID, config.request_id.as_ref())?;
        self.write_opt(keys::ACTIVATION_AT, config.activation_at.as_ref())
    }

    pub fn subject_cache(&mut self) -> SubjectUrlCache {
        self.read(keys::SUBJECT_CACHE).unwrap_or_default()
    }

    pub fn cache_subject_url(
        &mut self,
        subject: &str,
        url: String,
    ) -> Result<Option<String>, StoreError> {
        let mut cache = self.subject_cache();
        let previous = cache.insert(subject, url);
        self.write(keys::SUBJECT_CACHE, &cache)?;
        Ok(previous)
    }

    /// The only way cache keys ever go away.
    pub fn reset_subject_cache(&mut self) -> Result<(), StoreError> {
        self.store.remove(keys::SUBJECT_CACHE)
    }

    pub fn log_book(&mut self) -> LogBook {
        let entries: Vec<LogEntry> = self.read(keys::LOGS).unwrap_or_default();
        LogBook::from_entries(entries, self.log_cap)
    }

    pub fn append_log(&mut self, message: impl Into<String>) -> Result<LogEntry, StoreError> {
        let mut book = self.log_book();
        let entry = book.push(message);
        self.write(keys::LOGS, &book.to_vec())?;
        Ok(entry)
    }

    pub fn clear_logs(&mut self) -> Result<(), StoreError> {
        self.store.remove(keys::LOGS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> PersistentState<MemoryStore> {
        PersistentState::new(MemoryStore::default(), 3, 5)
    }

    #[test]
    fn fresh_store_starts_active_with_nothing_configured() {
        let mut state = memory();
        let run = state.run_state();
        assert!(run.active);
        assert_eq!(run.retry_count, 0);
        assert_eq!(run.max_retries, 3);
        assert_eq!(state.config(), AutomationConfig::default());
        assert!(state.subject_cache().is_empty());
    }

    #[test]
    fn run_state_round_trips_through_the_store() {
        let mut state = memory();
        let mut run = state.run_state();
        run.retry_count = 2;
        run.submit_outcome = SubmitOutcome::Uncertain;
        run.pause();
        state.save_run_state(&run).unwrap();
        assert_eq!(state.run_state(), run);
    }

    #[test]
    fn undecodable_entry_is_reset_and_others_survive() {
        let mut state = memory();
        state.cache_subject_url("A", "https://a".into()).unwrap();
        state
            .store
            .set(keys::RETRY_COUNT, "not a number".into())
            .unwrap();

        assert_eq!(state.run_state().retry_count, 0);
        assert_eq!(state.store().get(keys::RETRY_COUNT), None);
        assert_eq!(state.subject_cache().get("A"), Some("https://a"));
    }

    #[test]
    fn clearing_optional_config_removes_the_keys() {
        let mut state = memory();
        let config = AutomationConfig::from_input("04026360364", "46317", "").unwrap();
        state.save_config(&config).unwrap();
        assert_eq!(state.config(), config);

        let cleared = AutomationConfig {
            subject_id: None,
            ..config
        };
        state.save_config(&cleared).unwrap();
        assert_eq!(state.store().get(keys::SUBJECT_ID), None);
        assert_eq!(state.config().request_id(), Some("46317"));
    }

    #[test]
    fn log_is_capped_when_persisted() {
        let mut state = memory();
        for n in 0..8 {
            state.append_log(format!("{n}")).unwrap();
        }
        let book = state.log_book();
        assert_eq!(book.len(), 5);
        assert_eq!(book.entries_newest_first().next().unwrap().message, "7");
        state.clear_logs().unwrap();
        assert!(state.log_book().is_empty());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        {
            let mut state = PersistentState::new(JsonFileStore::open(&path).unwrap(), 3, 5);
            state.cache_subject_url("S", "https://s".into()).unwrap();
            let mut run = state.run_state();
            run.retry_count = 1;
            state.save_run_state(&run).unwrap();
        }
        let mut state = PersistentState::new(JsonFileStore::open(&path).unwrap(), 3, 5);
        assert_eq!(state.run_state().retry_count, 1);
        assert_eq!(state.subject_cache().get("S"), Some("https://s"));
    }

    #[test]
    fn corrupt_file_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ this is not json").unwrap();

        let mut store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get(keys::ACTIVE), None);
        store.set(keys::ACTIVE, "false".into()).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get(keys::ACTIVE).as_deref(), Some("false"));
    }

    #[test]
    fn file_store_sees_writes_from_another_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut agent = PersistentState::new(JsonFileStore::open(&path).unwrap(), 3, 5);
        agent.append_log("agent started").unwrap();

        let mut cli = PersistentState::new(JsonFileStore::open(&path).unwrap(), 3, 5);
        let config = AutomationConfig::from_input("", "46317", "").unwrap();
        cli.save_config(&config).unwrap();
        let mut run = cli.run_state();
        run.pause();
        cli.save_run_state(&run).unwrap();

        assert_eq!(agent.config().request_id(), Some("46317"));
        assert!(!agent.run_state().active);
        agent.append_log("still here").unwrap();

        let mut reopened = PersistentState::new(JsonFileStore::open(&path).unwrap(), 3, 5);
        assert_eq!(reopened.config().request_id(), Some("46317"));
        assert_eq!(reopened.log_book().len(), 2);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
