use crate::error::Error;
use crate::identifier::Identifier;
use crate::provider::ProviderRecord;
use crate::storage::Storage;

pub(crate) const PROVIDER_PREFIX: &str = "provider-";

fn provider_key(id: &Identifier) -> String {
    format!("{PROVIDER_PREFIX}{id}")
}

impl Storage {
    /// # Errors
    ///
    /// Returns [`Error::ProviderNotFound`] if no such provider exists.
    pub async fn get_provider(&self, id: &Identifier) -> Result<ProviderRecord, Error> {
        self.get_json(&provider_key(id))
            .await?
            .ok_or(Error::ProviderNotFound)
    }

    /// Provider `id`, provided `user` owns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderNotFound`] if it doesn't exist or belongs to someone else.
    pub async fn get_user_provider(
        &self,
        user: &Identifier,
        id: &Identifier,
    ) -> Result<ProviderRecord, Error> {
        let provider = self.get_provider(id).await?;
        if provider.id_owner != *user {
            return Err(Error::ProviderNotFound);
        }
        Ok(provider)
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_providers(&self, owner: &Identifier) -> Result<Vec<ProviderRecord>, Error> {
        Ok(self
            .search_json::<ProviderRecord>(PROVIDER_PREFIX)
            .await?
            .into_iter()
            .map(|(_, p)| p)
            .filter(|p| p.id_owner == *owner)
            .collect())
    }

    /// Store `provider`, giving it a fresh identifier if it has none.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn create_or_update_provider(&self, provider: &mut ProviderRecord) -> Result<(), Error> {
        if provider.id.is_empty() {
            let (key, id) = self.kv().find_identifier_key(PROVIDER_PREFIX).await?;
            provider.id = id;
            return self.put_json(&key, provider).await;
        }
        self.put_json(&provider_key(&provider.id), provider).await
    }

    /// Delete a provider no domain uses anymore.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] while a domain still refers to it.
    pub async fn delete_provider(&self, id: &Identifier) -> Result<(), Error> {
        if let Some(domain) = self
            .list_all_domains()
            .await?
            .into_iter()
            .find(|d| d.id_provider == *id)
        {
            return Err(Error::Validation(format!(
                "provider is still used by {}",
                domain.domain
            )));
        }
        self.kv().delete(&provider_key(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Domain;

    #[tokio::test]
    async fn providers_in_use_are_kept() {
        let storage = Storage::in_memory();
        let owner = Identifier::from_bytes(vec![1]);
        let mut provider = ProviderRecord {
            id: Identifier::default(),
            id_owner: owner.clone(),
            provider_type: "InMemory".into(),
            comment: String::new(),
            settings: serde_json::Value::Null,
        };
        storage.create_or_update_provider(&mut provider).await.unwrap();
        assert_eq!(storage.list_providers(&owner).await.unwrap().len(), 1);
        assert!(matches!(
            storage
                .get_user_provider(&Identifier::from_bytes(vec![2]), &provider.id)
                .await,
            Err(Error::ProviderNotFound)
        ));

        let mut domain = Domain::new(owner, provider.id.clone(), "example.com.");
        storage.create_or_update_domain(&mut domain).await.unwrap();
        assert!(matches!(
            storage.delete_provider(&provider.id).await,
            Err(Error::Validation(_))
        ));
        storage.delete_domain(&domain).await.unwrap();
        storage.delete_provider(&provider.id).await.unwrap();
        assert!(storage.get_provider(&provider.id).await.is_err());
    }
}
