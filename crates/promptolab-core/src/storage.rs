//! Directory-backed persistence of test sets, one JSON document per set.

use crate::errors::{EngineError, EngineResult};
use crate::model::TestSet;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct TestSetStore {
    dir: PathBuf,
}

/// File stem for a test set name: alphanumerics, dash and underscore survive.
pub fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Just enough of a stored set to tell whose file it is.
#[derive(Deserialize)]
struct StoredHeader {
    name: String,
}

fn stored_name(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str::<StoredHeader>(&text)
        .ok()
        .map(|h| h.name)
}

fn io_err(action: &str, path: &Path, e: std::io::Error) -> EngineError {
    EngineError::storage(format!("failed to {action} {}: {e}", path.display()))
}

impl TestSetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> EngineResult<PathBuf> {
        let stem = sanitize_name(name);
        if stem.is_empty() {
            return Err(EngineError::validation("test set name must not be empty"));
        }
        Ok(self.dir.join(format!("{stem}.{EXTENSION}")))
    }

    /// Distinct names can sanitize to the same file ("a b" and "a_b").
    /// Refuse to touch a file that holds a different set.
    fn check_owner(&self, name: &str, path: &Path) -> EngineResult<()> {
        match stored_name(path) {
            Some(stored) if stored.trim() != name.trim() => Err(EngineError::storage(format!(
                "test set '{name}' maps to {}, which already holds '{stored}'",
                path.display()
            ))),
            _ => Ok(()),
        }
    }

    /// Write atomically: serialize to a temp file in the store dir, then rename.
    pub fn save(&self, test_set: &TestSet) -> EngineResult<PathBuf> {
        let path = self.path_for(&test_set.name)?;
        self.check_owner(&test_set.name, &path)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err("create", &self.dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| io_err("create temp file in", &self.dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, test_set)
            .map_err(|e| EngineError::storage(format!("failed to serialize test set: {e}")))?;
        tmp.write_all(b"\n")
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| io_err("write", tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| io_err("replace", &path, e.error))?;

        debug!(test_set = %test_set.name, path = %path.display(), cases = test_set.len(), "saved test set");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> EngineResult<TestSet> {
        let path = self.path_for(name)?;
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::storage(format!(
                    "test set '{name}' not found in {}",
                    self.dir.display()
                )))
            }
            Err(e) => return Err(io_err("read", &path, e)),
        };
        let test_set: TestSet = serde_json::from_str(&text).map_err(|e| {
            EngineError::storage(format!("failed to parse {}: {e}", path.display()))
        })?;
        if test_set.name.trim() != name.trim() {
            return Err(EngineError::storage(format!(
                "test set '{name}' not found in {} ({} holds '{}')",
                self.dir.display(),
                path.display(),
                test_set.name
            )));
        }
        Ok(test_set)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Names of all readable test sets, sorted. Unreadable files are skipped.
    pub fn list(&self) -> EngineResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err("list", &self.dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_err("list", &self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|t| serde_json::from_str::<TestSet>(&t).map_err(|e| e.to_string()));
            match parsed {
                Ok(ts) => names.push(ts.name),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable test set"),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Returns whether a file was removed.
    pub fn delete(&self, name: &str) -> EngineResult<bool> {
        let path = self.path_for(name)?;
        self.check_owner(name, &path)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err("delete", &path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::model::TestCase;

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_name("Support FAQ v2"), "Support_FAQ_v2");
        assert_eq!(sanitize_name("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_name("  "), "");
    }

    #[test]
    fn save_load_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = TestSetStore::new(dir.path().join("sets"));
        assert!(store.list().unwrap().is_empty());

        let mut ts = TestSet::new("Greetings").with_system_prompt("be brief");
        ts.test_cases.push(TestCase::with_id("a", "hi").with_baseline("hello"));
        let path = store.save(&ts).unwrap();
        assert!(path.ends_with("Greetings.json"));

        assert_eq!(store.load("Greetings").unwrap(), ts);
        assert!(store.exists("Greetings"));
        assert_eq!(store.list().unwrap(), vec!["Greetings".to_string()]);

        assert!(store.delete("Greetings").unwrap());
        assert!(!store.delete("Greetings").unwrap());
    }

    #[test]
    fn missing_and_corrupt_files_are_storage_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = TestSetStore::new(dir.path());
        assert_eq!(store.load("nope").unwrap_err().kind(), ErrorKind::Storage);

        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        assert_eq!(store.load("broken").unwrap_err().kind(), ErrorKind::Storage);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn names_sharing_a_file_do_not_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let store = TestSetStore::new(dir.path());
        let mut first = TestSet::new("a b");
        first.test_cases.push(TestCase::with_id("1", "kept"));
        store.save(&first).unwrap();

        let err = store.save(&TestSet::new("a_b")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.to_string().contains("already holds 'a b'"));
        assert_eq!(store.load("a_b").unwrap_err().kind(), ErrorKind::Storage);
        assert!(store.delete("a_b").is_err());

        // The original set is untouched and can still be re-saved.
        assert_eq!(store.load("a b").unwrap(), first);
        store.save(&first).unwrap();
    }

    #[test]
    fn empty_name_is_rejected() {
        let store = TestSetStore::new("unused");
        assert_eq!(
            store.save(&TestSet::new(" ")).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }
}
