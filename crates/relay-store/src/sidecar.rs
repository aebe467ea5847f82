//! Definitions file plus sidecar runtime-state file.
//!
//! Cron-style collaborators persist stable configuration (the definitions
//! file) separately from mutable runtime fields (the sidecar), so operator
//! edits and runtime churn never fight over one file. State writes are
//! atomic; definitions writes can keep a `.bak` of the previous contents.
//!
//! A syntactically invalid definitions file is surfaced as a load failure
//! (operator error). A corrupt sidecar is treated as empty.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::transcript::atomic_write;

/// Mutable runtime fields persisted alongside the definitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState<S> {
    pub updated_at_ms: i64,
    pub state: S,
}

pub struct SidecarStore<D, S> {
    defs_path: PathBuf,
    state_path: PathBuf,
    bak_path: PathBuf,
    keep_backup: bool,
    _marker: PhantomData<(D, S)>,
}

impl<D, S> SidecarStore<D, S>
where
    D: Serialize + DeserializeOwned,
    S: Serialize + DeserializeOwned,
{
    pub fn new(defs_path: impl Into<PathBuf>, keep_backup: bool) -> Self {
        let defs_path = defs_path.into();
        let state_path = defs_path.with_extension("state.json");
        let bak_path = PathBuf::from(format!("{}.bak", defs_path.display()));
        Self {
            defs_path,
            state_path,
            bak_path,
            keep_backup,
            _marker: PhantomData,
        }
    }

    pub fn definitions_path(&self) -> &Path {
        &self.defs_path
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Load the definitions file. Invalid JSON is an operator error and is
    /// surfaced, not swallowed.
    pub fn load_definitions(&self) -> Result<D, StoreError> {
        let content = match std::fs::read_to_string(&self.defs_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.defs_path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: self.defs_path.display().to_string(),
            detail: e.to_string(),
        })
    }

    /// Write the definitions atomically, keeping a `.bak` of the previous
    /// file when configured.
    pub fn save_definitions(&self, definitions: &D) -> Result<(), StoreError> {
        if let Some(parent) = self.defs_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if self.keep_backup && self.defs_path.exists() {
            std::fs::copy(&self.defs_path, &self.bak_path)?;
        }
        let body = serde_json::to_vec_pretty(definitions)?;
        atomic_write(&self.defs_path, &body)
    }

    /// Load the sidecar runtime state. Missing or corrupt state is `None`.
    pub fn load_state(&self) -> Option<RuntimeState<S>> {
        let content = match std::fs::read_to_string(&self.state_path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.state_path.display(), error = %e, "failed to read sidecar state");
                }
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(
                    path = %self.state_path.display(),
                    error = %e,
                    "corrupt sidecar state, treating as empty"
                );
                None
            }
        }
    }

    /// Write the sidecar runtime state atomically, stamping `updated_at_ms`.
    pub fn save_state(&self, state: &S) -> Result<(), StoreError> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct RuntimeStateRef<'a, S: Serialize> {
            updated_at_ms: i64,
            state: &'a S,
        }
        let wrapped = RuntimeStateRef {
            updated_at_ms: Utc::now().timestamp_millis(),
            state,
        };
        let body = serde_json::to_vec_pretty(&wrapped)?;
        atomic_write(&self.state_path, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Defs {
        entries: Vec<String>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct State {
        last_run_ms: i64,
    }

    fn store_at(dir: &Path, backup: bool) -> SidecarStore<Defs, State> {
        SidecarStore::new(dir.join("jobs.json"), backup)
    }

    #[test]
    fn definitions_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), false);

        let defs = Defs {
            entries: vec!["daily-digest".into()],
        };
        store.save_definitions(&defs).unwrap();
        assert_eq!(store.load_definitions().unwrap(), defs);
    }

    #[test]
    fn missing_definitions_is_not_found() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), false);
        assert!(matches!(
            store.load_definitions(),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn invalid_definitions_surface_as_corrupt() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), false);
        std::fs::write(store.definitions_path(), b"{ nope").unwrap();
        assert!(matches!(
            store.load_definitions(),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn backup_keeps_previous_definitions() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), true);

        let first = Defs { entries: vec!["a".into()] };
        let second = Defs { entries: vec!["b".into()] };
        store.save_definitions(&first).unwrap();
        store.save_definitions(&second).unwrap();

        let bak = dir.path().join("jobs.json.bak");
        assert!(bak.exists());
        let restored: Defs =
            serde_json::from_str(&std::fs::read_to_string(&bak).unwrap()).unwrap();
        assert_eq!(restored, first);
        assert_eq!(store.load_definitions().unwrap(), second);
    }

    #[test]
    fn state_roundtrip_stamps_updated_at() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), false);

        store.save_state(&State { last_run_ms: 99 }).unwrap();
        let loaded = store.load_state().unwrap();
        assert_eq!(loaded.state, State { last_run_ms: 99 });
        assert!(loaded.updated_at_ms > 0);
    }

    #[test]
    fn missing_state_is_none() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), false);
        assert!(store.load_state().is_none());
    }

    #[test]
    fn corrupt_state_is_treated_as_empty() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), false);
        std::fs::write(store.state_path(), b"garbage").unwrap();
        assert!(store.load_state().is_none());
    }

    #[test]
    fn state_and_definitions_paths_differ() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), false);
        assert_ne!(store.definitions_path(), store.state_path());
        assert!(store
            .state_path()
            .to_string_lossy()
            .ends_with("jobs.state.json"));
    }
}
