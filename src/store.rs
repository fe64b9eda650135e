//! Persistent participant state
//!
//! The instrument does a full navigation between every step, so everything a
//! later page needs lives in a string key-value store that outlives the page.
//! [`SessionStore`] layers typed accessors over it; reads never fail and fall
//! back to a typed default when a key is missing or malformed.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::AttentionError;

const SESSION_ID_KEY: &str = "session_id";
const ASSIGNED_PASSAGES_KEY: &str = "assigned_passages";
const CONSENT_KEY: &str = "consent_agreed";

/// Browser-storage-like string map
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), AttentionError>;
    fn remove(&self, key: &str) -> Result<(), AttentionError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &S {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AttentionError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), AttentionError> {
        (**self).remove(key)
    }
}

/// Volatile store, for tests and one-shot tools
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AttentionError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AttentionError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Store persisted as a JSON object on disk, written through on every change
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RefCell<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    ///
    /// A corrupt file is treated as empty rather than failing, matching the
    /// typed-default contract of reads.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AttentionError> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "discarding unreadable session store");
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: RefCell::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), AttentionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&*self.entries.borrow())?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path).map_err(|err| {
            AttentionError::Store(format!("cannot replace {}: {}", self.path.display(), err))
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AttentionError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn remove(&self, key: &str) -> Result<(), AttentionError> {
        let removed = self.entries.borrow_mut().remove(key).is_some();
        if removed {
            self.persist()?;
        }
        Ok(())
    }
}

/// Typed view over a [`KeyValueStore`]
#[derive(Debug)]
pub struct SessionStore<S> {
    inner: S,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    // ── Session ───────────────────────────────────────────────────────────

    /// Session id issued at consent; `None` means the participant has not consented
    pub fn session_id(&self) -> Option<String> {
        self.inner
            .get(SESSION_ID_KEY)
            .filter(|id| !id.trim().is_empty())
    }

    pub fn set_session_id(&self, id: &str) -> Result<(), AttentionError> {
        self.inner.set(SESSION_ID_KEY, id)
    }

    pub fn consent_agreed(&self) -> bool {
        self.inner.get(CONSENT_KEY).as_deref() == Some("1")
    }

    pub fn set_consent_agreed(&self) -> Result<(), AttentionError> {
        self.inner.set(CONSENT_KEY, "1")
    }

    pub fn assigned_passages(&self) -> Vec<String> {
        self.get_json(ASSIGNED_PASSAGES_KEY).unwrap_or_default()
    }

    pub fn set_assigned_passages(&self, ids: &[String]) -> Result<(), AttentionError> {
        self.set_json(ASSIGNED_PASSAGES_KEY, ids)
    }

    /// Passage id at `index` of the assigned list
    pub fn passage_at(&self, index: usize) -> Option<String> {
        self.assigned_passages().into_iter().nth(index)
    }

    pub fn require_passage(&self, index: usize) -> Result<String, AttentionError> {
        self.passage_at(index).ok_or(AttentionError::MissingPassage(index))
    }

    // ── Per-passage counters ──────────────────────────────────────────────

    pub fn back_clicks(&self, passage_id: &str) -> u64 {
        self.get_count(&format!("back_clicks_{}", passage_id))
    }

    pub fn set_back_clicks(&self, passage_id: &str, n: u64) -> Result<(), AttentionError> {
        self.inner
            .set(&format!("back_clicks_{}", passage_id), &n.to_string())
    }

    pub fn visit_count(&self, passage_id: &str) -> u64 {
        self.get_count(&format!("passage_visits_{}", passage_id))
    }

    pub fn set_visit_count(&self, passage_id: &str, n: u64) -> Result<(), AttentionError> {
        self.inner
            .set(&format!("passage_visits_{}", passage_id), &n.to_string())
    }

    /// Increment and return the visit count
    pub fn record_visit(&self, passage_id: &str) -> Result<u64, AttentionError> {
        let visits = self.visit_count(passage_id) + 1;
        self.set_visit_count(passage_id, visits)?;
        Ok(visits)
    }

    pub fn current_question(&self, passage_id: &str) -> Option<u32> {
        self.inner
            .get(&format!("current_q_{}", passage_id))
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn set_current_question(&self, passage_id: &str, index: u32) -> Result<(), AttentionError> {
        self.inner
            .set(&format!("current_q_{}", passage_id), &index.to_string())
    }

    pub fn clear_current_question(&self, passage_id: &str) -> Result<(), AttentionError> {
        self.inner.remove(&format!("current_q_{}", passage_id))
    }

    /// Time already spent on this passage's question pages
    pub fn question_time_ms(&self, passage_id: &str) -> u64 {
        self.get_count(&format!("qtime_{}", passage_id))
    }

    /// Add `elapsed_ms` to the question-time accumulator and return the new total
    pub fn add_question_time(&self, passage_id: &str, elapsed_ms: u64) -> Result<u64, AttentionError> {
        let total = self.question_time_ms(passage_id).saturating_add(elapsed_ms);
        self.inner
            .set(&format!("qtime_{}", passage_id), &total.to_string())?;
        Ok(total)
    }

    pub fn clear_question_time(&self, passage_id: &str) -> Result<(), AttentionError> {
        self.inner.remove(&format!("qtime_{}", passage_id))
    }

    // ── Per-passage answers ───────────────────────────────────────────────

    /// Saved multiple-choice answers, question id to choice id
    pub fn answers(&self, passage_id: &str) -> HashMap<String, String> {
        self.get_json(&format!("answers_{}", passage_id))
            .unwrap_or_default()
    }

    pub fn set_answers(
        &self,
        passage_id: &str,
        answers: &HashMap<String, String>,
    ) -> Result<(), AttentionError> {
        self.set_json(&format!("answers_{}", passage_id), answers)
    }

    pub fn save_answer(
        &self,
        passage_id: &str,
        question_id: &str,
        choice_id: &str,
    ) -> Result<(), AttentionError> {
        let mut answers = self.answers(passage_id);
        answers.insert(question_id.to_string(), choice_id.to_string());
        self.set_answers(passage_id, &answers)
    }

    /// Scoring result returned by the backend, cached for the post-task page
    pub fn mcq_result(&self, passage_id: &str) -> Option<serde_json::Value> {
        self.get_json(&format!("mcq_result_{}", passage_id))
    }

    pub fn set_mcq_result(
        &self,
        passage_id: &str,
        result: &serde_json::Value,
    ) -> Result<(), AttentionError> {
        self.set_json(&format!("mcq_result_{}", passage_id), result)
    }

    // ── Coercion helpers ──────────────────────────────────────────────────

    fn get_count(&self, key: &str) -> u64 {
        self.inner
            .get(key)
            .and_then(|v| coerce_count(&v))
            .unwrap_or(0)
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner
            .get(key)
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), AttentionError> {
        let json = serde_json::to_string(value)?;
        self.inner.set(key, &json)
    }
}

/// Numeric coercion for stored counters; fractional values are truncated and
/// negatives are treated as absent.
fn coerce_count(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<u64>() {
        return Some(n);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as u64)
}

/// Human label for a passage position ("One", "Two", ...)
pub fn passage_ordinal(index: usize) -> String {
    const WORDS: [&str; 5] = ["One", "Two", "Three", "Four", "Five"];
    WORDS
        .get(index)
        .map(|w| w.to_string())
        .unwrap_or_else(|| (index + 1).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> SessionStore<MemoryStore> {
        SessionStore::new(MemoryStore::new())
    }

    #[test]
    fn test_missing_keys_yield_defaults() {
        let store = store();
        assert_eq!(store.session_id(), None);
        assert!(store.assigned_passages().is_empty());
        assert_eq!(store.visit_count("p1"), 0);
        assert_eq!(store.back_clicks("p1"), 0);
        assert_eq!(store.current_question("p1"), None);
        assert!(store.answers("p1").is_empty());
        assert!(!store.consent_agreed());
    }

    #[test]
    fn test_blank_session_id_counts_as_absent() {
        let store = store();
        store.set_session_id("  ").unwrap();
        assert_eq!(store.session_id(), None);
        store.set_session_id("abc").unwrap();
        assert_eq!(store.session_id().as_deref(), Some("abc"));
    }

    #[test]
    fn test_non_numeric_counter_defaults_to_zero() {
        let store = store();
        store.inner().set("back_clicks_p1", "lots").unwrap();
        assert_eq!(store.back_clicks("p1"), 0);
        store.inner().set("back_clicks_p1", "3.0").unwrap();
        assert_eq!(store.back_clicks("p1"), 3);
    }

    #[test]
    fn test_malformed_json_defaults() {
        let store = store();
        store.inner().set("assigned_passages", "[oops").unwrap();
        assert!(store.assigned_passages().is_empty());
    }

    #[test]
    fn test_assigned_passages_round_trip() {
        let store = store();
        let ids = vec!["bees".to_string(), "tides".to_string()];
        store.set_assigned_passages(&ids).unwrap();
        assert_eq!(store.inner().get("assigned_passages").unwrap(), r#"["bees","tides"]"#);
        assert_eq!(store.passage_at(1).as_deref(), Some("tides"));
        assert_eq!(store.passage_at(2), None);
        assert!(matches!(
            store.require_passage(2),
            Err(AttentionError::MissingPassage(2))
        ));
    }

    #[test]
    fn test_visits_and_question_time_accumulate() {
        let store = store();
        assert_eq!(store.record_visit("bees").unwrap(), 1);
        assert_eq!(store.record_visit("bees").unwrap(), 2);

        assert_eq!(store.add_question_time("bees", 1_200).unwrap(), 1_200);
        assert_eq!(store.add_question_time("bees", 800).unwrap(), 2_000);
        store.clear_question_time("bees").unwrap();
        assert_eq!(store.question_time_ms("bees"), 0);
    }

    #[test]
    fn test_answers_merge() {
        let store = store();
        store.save_answer("bees", "q1", "a").unwrap();
        store.save_answer("bees", "q2", "c").unwrap();
        store.save_answer("bees", "q1", "b").unwrap();

        let answers = store.answers("bees");
        assert_eq!(answers.len(), 2);
        assert_eq!(answers["q1"], "b");
    }

    #[test]
    fn test_current_question_clear() {
        let store = store();
        store.set_current_question("bees", 2).unwrap();
        assert_eq!(store.current_question("bees"), Some(2));
        store.clear_current_question("bees").unwrap();
        assert_eq!(store.current_question("bees"), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("session.json");

        {
            let store = SessionStore::new(FileStore::open(&path).unwrap());
            store.set_session_id("sess-9").unwrap();
            store.set_assigned_passages(&["bees".to_string()]).unwrap();
        }

        let reopened = SessionStore::new(FileStore::open(&path).unwrap());
        assert_eq!(reopened.session_id().as_deref(), Some("sess-9"));
        assert_eq!(reopened.assigned_passages(), vec!["bees".to_string()]);
    }

    #[test]
    fn test_file_store_tolerates_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("session_id"), None);
    }

    #[test]
    fn test_passage_ordinal() {
        assert_eq!(passage_ordinal(0), "One");
        assert_eq!(passage_ordinal(4), "Five");
        assert_eq!(passage_ordinal(5), "6");
    }
}
