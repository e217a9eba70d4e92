use crate::error::Error;
use crate::storage::KvStore;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// An ordered in-memory store. Not durable across restarts.
#[derive(Default, Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct InMemoryStorage {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn from_map(data: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// A copy of the whole key space.
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.data.read().await.clone()
    }
}

#[async_trait::async_trait]
impl KvStore for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn search(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Error> {
        Ok(self
            .data
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn has(&self, key: &str) -> Result<bool, Error> {
        Ok(self.data.read().await.contains_key(key))
    }
}
