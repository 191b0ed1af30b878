//! Keyed on-device persistence. Every value is a JSON document stored under a
//! fixed key; writes replace the whole value.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

use crate::{
    dao::storage::{StorageError, StorageResult},
    state::game::timestamp_now,
};

/// Abstraction over the device's keyed storage.
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value stored under `key`.
    fn load(&self, key: &str) -> StorageResult<Option<String>>;
    /// Replace the value stored under `key`.
    fn save(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Move the value under `key` aside, returning the key it now lives under.
    fn quarantine(&self, key: &str) -> StorageResult<Option<String>>;
}

fn quarantine_key(key: &str) -> String {
    format!("{key}.corrupt-{}", timestamp_now())
}

/// Read and decode the JSON value stored under `key`.
pub fn load_json<T>(store: &dyn KeyValueStore, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    match store.load(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Like [`load_json`], but an undecodable value is moved aside and reported as
/// absent so the caller can start fresh without overwriting it.
pub fn load_json_or_quarantine<T>(store: &dyn KeyValueStore, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    match load_json(store, key) {
        Err(err @ StorageError::Corrupt { .. }) => {
            let backup = store.quarantine(key)?;
            warn!(
                key,
                backup = backup.as_deref().unwrap_or("-"),
                error = %err,
                "stored value is unreadable; kept a copy and starting fresh"
            );
            Ok(None)
        }
        other => other,
    }
}

/// Encode `value` as JSON and store it under `key`.
pub fn save_json<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> StorageResult<()>
where
    T: ?Sized + Serialize,
{
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.save(key, &raw)
}

/// Directory-backed store writing one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) the storage directory.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| {
            StorageError::unavailable(format!("cannot create `{}`", root.display()), source)
        })?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::unavailable(
                format!("cannot read `{}`", path.display()),
                err,
            )),
        }
    }

    fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        // Write to a sibling file first so readers never observe a torn value.
        let path = self.path_for(key);
        let staging = self.root.join(format!("{key}.json.tmp"));
        fs::write(&staging, value).map_err(|source| {
            StorageError::unavailable(format!("cannot write `{}`", staging.display()), source)
        })?;
        fs::rename(&staging, &path).map_err(|source| {
            StorageError::unavailable(format!("cannot replace `{}`", path.display()), source)
        })
    }

    fn quarantine(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key);
        let backup = quarantine_key(key);
        match fs::rename(&path, self.path_for(&backup)) {
            Ok(()) => Ok(Some(backup)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::unavailable(
                format!("cannot move `{}` aside", path.display()),
                err,
            )),
        }
    }
}

/// Volatile store used when no durable storage is available, and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn quarantine(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.remove(key).map(|(_, value)| {
            let backup = quarantine_key(key);
            self.entries.insert(backup.clone(), value);
            backup
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_and_reports_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nested")).unwrap();

        assert_eq!(store.load("games_library").unwrap(), None);
        save_json(&store, "games_library", &vec![1, 2, 3]).unwrap();
        let loaded: Option<Vec<u32>> = load_json(&store, "games_library").unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));
        assert!(!dir.path().join("nested/games_library.json.tmp").exists());
    }

    #[test]
    fn corrupt_values_are_reported_with_their_key() {
        let store = MemoryStore::new();
        store.save("action_queue", "{not json").unwrap();
        let err = load_json::<Vec<u32>>(&store, "action_queue").unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { key, .. } if key == "action_queue"));
    }

    #[test]
    fn unreadable_file_is_moved_aside_before_starting_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save("games_library", "{truncated").unwrap();

        let loaded = load_json_or_quarantine::<Vec<u32>>(&store, "games_library").unwrap();
        assert_eq!(loaded, None);
        assert_eq!(store.load("games_library").unwrap(), None);

        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.starts_with("games_library.corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
        let kept = fs::read_to_string(dir.path().join(&backups[0])).unwrap();
        assert_eq!(kept, "{truncated");
    }
}
