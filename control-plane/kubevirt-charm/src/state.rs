//! Unit state that has to survive between hook invocations.

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::manifests::ConfigHash;

const STATE_FILE: &str = "state.json";
const DEFERRED_FILE: &str = "deferred.json";

#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error("failed to create state directory: {0}")]
    CreateDir(#[source] io::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("corrupt {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentState {
    /// Sum of controller hashes last converged on.
    pub config_hash: Option<ConfigHash>,
    pub deployed: bool,
    pub install_failure: Option<String>,
    pub has_kvm: bool,
    /// Passed along from kube-control.
    pub cluster_tag: Option<String>,
}

/// JSON files under the unit's state directory.
#[derive(Clone, Debug)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load(&self) -> Result<PersistentState, StateError> {
        Ok(self.read(STATE_FILE)?.unwrap_or_default())
    }

    pub fn save(&self, state: &PersistentState) -> Result<(), StateError> {
        self.write(STATE_FILE, state)
    }

    /// Events waiting for redelivery, oldest first.
    pub fn load_deferred<T: DeserializeOwned>(&self) -> Result<Vec<T>, StateError> {
        Ok(self.read(DEFERRED_FILE)?.unwrap_or_default())
    }

    pub fn save_deferred<T: Serialize>(&self, events: &[T]) -> Result<(), StateError> {
        self.write(DEFERRED_FILE, &events)
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StateError> {
        let path = self.dir.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Read { path, source }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StateError::Parse { path, source })
    }

    /// Write to a temporary file, then rename over the target.
    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir).map_err(StateError::CreateDir)?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let content =
            serde_json::to_string_pretty(value).map_err(StateError::Serialize)?;
        fs::write(&tmp, content).map_err(|source| StateError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StateError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "state written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_run_uses_defaults() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        assert_eq!(store.load().unwrap(), PersistentState::default());
        assert!(store.load_deferred::<String>().unwrap().is_empty());
    }

    #[test]
    fn state_round_trips_with_large_hash() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = PersistentState {
            config_hash: Some(ConfigHash(u128::MAX - 7)),
            deployed: true,
            install_failure: None,
            has_kvm: true,
            cluster_tag: Some("kubernetes-4ypskxahbu3rnfgsds3pksvwe3uh0lxt".into()),
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn older_files_missing_fields_still_load() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(STATE_FILE),
            r#"{"config_hash": 12, "deployed": true}"#,
        )
        .unwrap();
        let state = StateStore::new(dir.path()).load().unwrap();
        assert_eq!(state.config_hash, Some(ConfigHash(12)));
        assert!(!state.has_kvm);
    }

    #[test]
    fn corrupt_state_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(STATE_FILE), "{not json").unwrap();
        assert!(matches!(
            StateStore::new(dir.path()).load(),
            Err(StateError::Parse { .. })
        ));
    }

    #[test]
    fn deferred_queue_keeps_order() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .save_deferred(&["config-changed".to_string(), "stop".to_string()])
            .unwrap();
        assert_eq!(
            store.load_deferred::<String>().unwrap(),
            vec!["config-changed", "stop"]
        );
    }
}
