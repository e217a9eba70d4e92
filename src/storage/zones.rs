use crate::error::Error;
use crate::identifier::Identifier;
use crate::storage::Storage;
use crate::zone::Zone;
use tracing::debug;

pub(crate) const ZONE_PREFIX: &str = "domain.zone-";

fn zone_key(id: &Identifier) -> String {
    format!("{ZONE_PREFIX}{id}")
}

impl Storage {
    /// # Errors
    ///
    /// Returns [`Error::ZoneNotFound`] if no such zone exists.
    pub async fn get_zone(&self, id: &Identifier) -> Result<Zone, Error> {
        self.get_json(&zone_key(id)).await?.ok_or(Error::ZoneNotFound)
    }

    /// Store a new zone under a fresh identifier, replacing the one it carries.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn create_zone(&self, zone: &mut Zone) -> Result<(), Error> {
        let (key, id) = self.kv().find_identifier_key(ZONE_PREFIX).await?;
        zone.id = id;
        self.put_json(&key, zone).await
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn update_zone(&self, zone: &Zone) -> Result<(), Error> {
        self.put_json(&zone_key(&zone.id), zone).await
    }

    /// Store `zone` unless the stored copy changed since `loaded_at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when the stored zone's modification time moved past
    /// `loaded_at`.
    pub async fn update_zone_if_unchanged(
        &self,
        zone: &Zone,
        loaded_at: time::OffsetDateTime,
    ) -> Result<(), Error> {
        let stored = self.get_zone(&zone.id).await?;
        if stored.last_modified > loaded_at {
            debug!(zone = %zone.id, "refusing stale zone write");
            return Err(Error::Conflict(zone.id.clone()));
        }
        self.update_zone(zone).await
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn delete_zone(&self, id: &Identifier) -> Result<(), Error> {
        self.kv().delete(&zone_key(id)).await
    }

    /// Identifiers of every stored zone.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_zone_ids(&self) -> Result<Vec<Identifier>, Error> {
        Ok(self
            .kv()
            .search(ZONE_PREFIX)
            .await?
            .into_iter()
            .filter_map(|(key, _)| key[ZONE_PREFIX.len()..].parse().ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[tokio::test]
    async fn stale_writes_conflict() {
        let storage = Storage::in_memory();
        let mut zone = Zone::new(Identifier::from_bytes(vec![1]), 3600);
        storage.create_zone(&mut zone).await.unwrap();
        assert_eq!(storage.list_zone_ids().await.unwrap(), vec![zone.id.clone()]);

        let loaded_at = zone.last_modified;
        let mut concurrent = zone.clone();
        concurrent.last_modified = loaded_at + Duration::seconds(5);
        storage.update_zone(&concurrent).await.unwrap();

        zone.commit_message = Some("mine".into());
        assert!(matches!(
            storage.update_zone_if_unchanged(&zone, loaded_at).await,
            Err(Error::Conflict(_))
        ));
        storage
            .update_zone_if_unchanged(&zone, concurrent.last_modified)
            .await
            .unwrap();
        assert_eq!(
            storage.get_zone(&zone.id).await.unwrap().commit_message.as_deref(),
            Some("mine")
        );

        storage.delete_zone(&zone.id).await.unwrap();
        assert!(matches!(
            storage.get_zone(&zone.id).await,
            Err(Error::ZoneNotFound)
        ));
    }
}
