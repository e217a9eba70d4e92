//! A JSON file-backed implementation of the [`KvStore`][super::KvStore] trait.
//!
//! Wraps an [`InMemoryStorage`][super::memory::InMemoryStorage] instance, persisting updates to a
//! JSON file on disk that can be reloaded across restarts.
use crate::error::Error;
use crate::storage::memory::InMemoryStorage;
use crate::storage::KvStore;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use tokio::fs::File;
use tokio::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// A file-backed key/value store. After each update the whole key space is written to a JSON
/// file, one member per key with the stored JSON value as a string.
///
/// Wraps an [`InMemoryStorage`][super::memory::InMemoryStorage], operating the same way except
/// for maintaining state beyond in-memory.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct FileStorage {
    store: InMemoryStorage,
    path: String,
    save_lock: Mutex<()>,
}

impl FileStorage {
    /// Save the state of the store as JSON to the configured path, or return an Error.
    ///
    /// The state is written to a sibling temporary file first and renamed over the target, so
    /// a failed save never leaves a truncated file behind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if a stored value isn't UTF-8.
    ///
    /// Returns [`Error::IO`] if the serialized state can't be written to the backing file path.
    pub async fn save(&self) -> Result<(), Error> {
        let _guard = self.save_lock.lock().await;
        self.persist().await
    }

    async fn persist(&self) -> Result<(), Error> {
        let state = self
            .store
            .snapshot()
            .await
            .into_iter()
            .map(|(key, value)| {
                String::from_utf8(value)
                    .map(|value| (key.clone(), value))
                    .map_err(|_| Error::Internal(format!("value of {key} is not UTF-8")))
            })
            .collect::<Result<BTreeMap<String, String>, Error>>()?;
        let data = serde_json::to_string_pretty(&state)?;
        let tmp = format!("{}.tmp", self.path);
        let mut output_file = File::create(&tmp).await?;
        output_file.write_all(data.as_bytes()).await?;
        output_file.flush().await?;
        output_file.sync_all().await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply one change and save; when the save fails the in-memory entry is put back so memory
    /// and disk don't drift apart.
    async fn update(&self, key: &str, value: Option<Vec<u8>>) -> Result<(), Error> {
        let _guard = self.save_lock.lock().await;
        let previous = self.store.get(key).await?;
        self.set(key, value).await?;
        if let Err(err) = self.persist().await {
            tracing::warn!(key, error = %err, "failed to save store, reverting");
            self.set(key, previous).await?;
            return Err(err);
        }
        Ok(())
    }

    async fn set(&self, key: &str, value: Option<Vec<u8>>) -> Result<(), Error> {
        match value {
            Some(value) => self.store.put(key, value).await,
            None => self.store.delete(key).await,
        }
    }

    /// Load a [`FileStorage`] from the JSON state located at the given path, creating an empty
    /// one if the path doesn't exist, or return an Error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJSON`] if the JSON state file is invalid.
    ///
    /// Returns [`Error::IO`] if the path can't be opened or read.
    pub async fn try_from_file(p: &str) -> Result<Self, Error> {
        let contents = match File::open(p).await {
            Ok(mut f) => {
                let mut buf = vec![];
                f.read_to_end(&mut buf).await?;
                buf
            }
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Self::write_empty_state(File::create(&p).await?).await?,
                _ => return Err(Error::IO(err)),
            },
        };

        let state: BTreeMap<String, String> = serde_json::from_slice(&contents)?;
        let data = state
            .into_iter()
            .map(|(key, value)| (key, value.into_bytes()))
            .collect();
        Ok(Self {
            store: InMemoryStorage::from_map(data),
            path: p.to_string(),
            save_lock: Mutex::new(()),
        })
    }

    async fn write_empty_state(mut f: File) -> io::Result<Vec<u8>> {
        let default_data = serde_json::to_string_pretty(&BTreeMap::<String, String>::new())?;
        let default_bytes = default_data.as_bytes();
        f.write_all(default_bytes).await?;
        f.flush().await?;
        Ok(default_bytes.to_vec())
    }
}

#[async_trait::async_trait]
impl KvStore for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.store.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        self.update(key, Some(value)).await
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.update(key, None).await
    }

    async fn search(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Error> {
        self.store.search(prefix).await
    }

    async fn has(&self, key: &str) -> Result<bool, Error> {
        self.store.has(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let path = path.to_str().unwrap();

        let store = FileStorage::try_from_file(path).await.unwrap();
        assert!(store.search("").await.unwrap().is_empty());
        store.put("version", b"10".to_vec()).await.unwrap();
        store.put("user-01", br#"{"id":"01"}"#.to_vec()).await.unwrap();
        store.put("user-02", b"{}".to_vec()).await.unwrap();
        store.delete("user-02").await.unwrap();

        let reloaded = FileStorage::try_from_file(path).await.unwrap();
        assert_eq!(reloaded.get("version").await.unwrap(), Some(b"10".to_vec()));
        assert_eq!(reloaded.search("user-").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_state_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, "[1, 2").await.unwrap();
        assert!(matches!(
            FileStorage::try_from_file(path.to_str().unwrap()).await,
            Err(Error::InvalidJSON(_))
        ));
    }

    #[tokio::test]
    async fn failed_saves_leave_memory_and_disk_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let path = path.to_str().unwrap();

        let store = FileStorage::try_from_file(path).await.unwrap();
        store.put("version", b"9".to_vec()).await.unwrap();
        let on_disk = tokio::fs::read_to_string(path).await.unwrap();

        // A directory where the temporary file goes makes every save fail.
        tokio::fs::create_dir(format!("{path}.tmp")).await.unwrap();
        assert!(matches!(store.put("version", b"10".to_vec()).await, Err(Error::IO(_))));
        assert!(store.put("user-01", b"{}".to_vec()).await.is_err());
        assert!(store.delete("version").await.is_err());

        assert_eq!(store.get("version").await.unwrap(), Some(b"9".to_vec()));
        assert!(!store.has("user-01").await.unwrap());
        assert_eq!(tokio::fs::read_to_string(path).await.unwrap(), on_disk);

        tokio::fs::remove_dir(format!("{path}.tmp")).await.unwrap();
        store.put("version", b"10".to_vec()).await.unwrap();
        let reloaded = FileStorage::try_from_file(path).await.unwrap();
        assert_eq!(reloaded.get("version").await.unwrap(), Some(b"10".to_vec()));
    }
}
