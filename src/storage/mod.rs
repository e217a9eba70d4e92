//! Key/value persistence.
//!
//! Everything the service stores lives in a flat, prefix-keyed key/value space. Backends implement
//! the narrow [`KvStore`] trait; [`Storage`] layers typed accessors for every key family on top.
//!
//! Two backends are provided, [`memory::InMemoryStorage`] and [`file::FileStorage`]. The former
//! is not durable across restarts. The latter writes its state to disk after each update and
//! loads it again on startup.
//!
//! Single-key writes are atomic; no cross-key transactions are offered. Values are UTF-8 JSON.

use crate::error::Error;
use crate::identifier::Identifier;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub mod checks;
pub mod domain_log;
pub mod domains;
pub mod file;
pub mod insights;
pub mod memory;
pub mod migrations;
pub mod providers;
pub mod sessions;
pub mod tidy;
pub mod users;
pub mod zones;

pub use checks::{
    CheckExecution, CheckResult, CheckSchedule, CheckStatus, CheckTarget, CheckerOptions,
    CheckerOptionsPositional, ExecutionStatus, TargetType,
};
pub use domain_log::{DomainLog, DomainLogWithDomainId, LogLevel};
pub use domains::Domain;
#[allow(clippy::module_name_repetitions)]
pub use file::FileStorage;
#[allow(clippy::module_name_repetitions)]
pub use memory::InMemoryStorage;
pub use sessions::Session;
pub use users::{User, UserAuth, UserSettings};

/// `DynKvStore` is a backend shared by every request handler. Backends do their own locking.
pub type DynKvStore = Arc<dyn KvStore + Send + Sync>;

/// An async trait describing an ordered key/value store.
#[async_trait::async_trait]
pub trait KvStore {
    /// Value stored at `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Store `value` at `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// Every key starting with `prefix` with its value, in lexical key order.
    async fn search(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Error>;

    async fn has(&self, key: &str) -> Result<bool, Error> {
        Ok(self.get(key).await?.is_some())
    }

    /// A fresh identifier whose key `prefix + hex(id)` isn't present. The caller is expected to
    /// write that key right away.
    async fn find_identifier_key(&self, prefix: &str) -> Result<(String, Identifier), Error> {
        loop {
            let id = Identifier::new_random();
            let key = format!("{prefix}{id}");
            if !self.has(&key).await? {
                return Ok((key, id));
            }
        }
    }
}

/// Decode a stored value.
///
/// # Errors
///
/// Returns [`Error::InvalidJSON`] if `data` doesn't decode to `T`.
pub fn decode_data<T: DeserializeOwned>(data: &[u8]) -> Result<T, Error> {
    Ok(serde_json::from_slice(data)?)
}

/// Encode a value for storage.
///
/// # Errors
///
/// Returns [`Error::InvalidJSON`] if `value` can't be serialized.
pub fn encode_data<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, Error> {
    Ok(serde_json::to_vec(value)?)
}

/// Typed access to every key family, over any backend.
#[derive(Clone)]
pub struct Storage {
    kv: DynKvStore,
}

impl Storage {
    #[must_use]
    pub fn new(kv: DynKvStore) -> Self {
        Self { kv }
    }

    /// A storage over a fresh [`InMemoryStorage`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStorage::default()))
    }

    #[must_use]
    pub fn kv(&self) -> &DynKvStore {
        &self.kv
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.kv.get(key).await? {
            Some(data) => Ok(Some(decode_data(&data)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn put_json<T: Serialize + Sync + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), Error> {
        self.kv.put(key, encode_data(value)?).await
    }

    /// Decoded values under `prefix`, with their keys, in key order.
    pub(crate) async fn search_json<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, Error> {
        self.kv
            .search(prefix)
            .await?
            .into_iter()
            .map(|(key, data)| Ok((key, decode_data(&data)?)))
            .collect()
    }

    /// Delete every key under `prefix`; returns how many were removed.
    pub(crate) async fn delete_prefix(&self, prefix: &str) -> Result<usize, Error> {
        let keys = self.kv.search(prefix).await?;
        for (key, _) in &keys {
            self.kv.delete(key).await?;
        }
        Ok(keys.len())
    }

    /// The stored schema version, if the store was ever initialised.
    ///
    /// # Errors
    ///
    /// Fails if the backend does or the version isn't a number.
    pub async fn schema_version(&self) -> Result<Option<u64>, Error> {
        self.get_json("version").await
    }

    pub(crate) async fn set_schema_version(&self, version: u64) -> Result<(), Error> {
        self.put_json("version", &version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identifier_keys_are_free() {
        let storage = Storage::in_memory();
        for _ in 0..32 {
            let (key, id) = storage.kv().find_identifier_key("user-").await.unwrap();
            assert_eq!(key, format!("user-{}", id.to_hex()));
            assert!(!storage.kv().has(&key).await.unwrap());
            storage.kv().put(&key, b"{}".to_vec()).await.unwrap();
        }
        assert_eq!(storage.kv().search("user-").await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let storage = Storage::in_memory();
        assert_eq!(storage.schema_version().await.unwrap(), None);
        storage.set_schema_version(10).await.unwrap();
        assert_eq!(storage.schema_version().await.unwrap(), Some(10));

        storage.put_json("a-1", &vec![1, 2]).await.unwrap();
        storage.put_json("a-2", &vec![3]).await.unwrap();
        let found: Vec<(String, Vec<u8>)> = storage.search_json("a-").await.unwrap();
        assert_eq!(found, vec![("a-1".into(), vec![1, 2]), ("a-2".into(), vec![3])]);
        assert_eq!(storage.delete_prefix("a-").await.unwrap(), 2);
        assert!(storage.kv().search("a-").await.unwrap().is_empty());
    }
}
