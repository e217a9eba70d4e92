use crate::error::Error;
use crate::identifier::Identifier;
use crate::rr::name;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};

pub(crate) const DOMAIN_PREFIX: &str = "domain-";

/// A domain managed through a provider, with the history of its zones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: Identifier,
    pub id_owner: Identifier,
    pub id_provider: Identifier,
    /// Absolute name of the zone origin.
    pub domain: String,
    #[serde(default)]
    pub group: String,
    /// Zones of this domain, current one first.
    #[serde(default)]
    pub zone_history: Vec<Identifier>,
}

impl Domain {
    #[must_use]
    pub fn new(owner: Identifier, provider: Identifier, domain: &str) -> Self {
        Self {
            id: Identifier::default(),
            id_owner: owner,
            id_provider: provider,
            domain: name::fqdn(domain),
            group: String::new(),
            zone_history: Vec::new(),
        }
    }

    /// Identifier of the current zone.
    #[must_use]
    pub fn current_zone(&self) -> Option<&Identifier> {
        self.zone_history.first()
    }
}

fn domain_key(id: &Identifier) -> String {
    format!("{DOMAIN_PREFIX}{id}")
}

impl Storage {
    /// # Errors
    ///
    /// Returns [`Error::DomainNotFound`] if no such domain exists.
    pub async fn get_domain(&self, id: &Identifier) -> Result<Domain, Error> {
        self.get_json(&domain_key(id))
            .await?
            .ok_or(Error::DomainNotFound)
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_all_domains(&self) -> Result<Vec<Domain>, Error> {
        Ok(self
            .search_json::<Domain>(DOMAIN_PREFIX)
            .await?
            .into_iter()
            .map(|(_, d)| d)
            .collect())
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_domains(&self, owner: &Identifier) -> Result<Vec<Domain>, Error> {
        Ok(self
            .list_all_domains()
            .await?
            .into_iter()
            .filter(|d| d.id_owner == *owner)
            .collect())
    }

    /// Domain `id`, provided `user` owns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DomainNotFound`] if it doesn't exist and [`Error::Forbidden`] if another
    /// user owns it.
    pub async fn get_user_domain(&self, user: &Identifier, id: &Identifier) -> Result<Domain, Error> {
        let domain = self.get_domain(id).await?;
        if domain.id_owner != *user {
            return Err(Error::Forbidden);
        }
        Ok(domain)
    }

    /// # Errors
    ///
    /// Returns [`Error::DomainNotFound`] if `owner` has no domain by that name.
    pub async fn get_domain_by_name(&self, owner: &Identifier, fqdn: &str) -> Result<Domain, Error> {
        let fqdn = name::fqdn(fqdn);
        self.list_domains(owner)
            .await?
            .into_iter()
            .find(|d| d.domain.eq_ignore_ascii_case(&fqdn))
            .ok_or(Error::DomainNotFound)
    }

    /// Store `domain`, giving it a fresh identifier if it has none.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn create_or_update_domain(&self, domain: &mut Domain) -> Result<(), Error> {
        if domain.id.is_empty() {
            let (key, id) = self.kv().find_identifier_key(DOMAIN_PREFIX).await?;
            domain.id = id;
            return self.put_json(&key, domain).await;
        }
        self.put_json(&domain_key(&domain.id), domain).await
    }

    /// Delete a domain with its zones and log.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn delete_domain(&self, domain: &Domain) -> Result<(), Error> {
        for zone in &domain.zone_history {
            self.delete_zone(zone).await?;
        }
        self.delete_domain_logs(&domain.id).await?;
        self.kv().delete(&domain_key(&domain.id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn domains_per_owner() {
        let storage = Storage::in_memory();
        let alice = Identifier::from_bytes(vec![1]);
        let bob = Identifier::from_bytes(vec![2]);
        let mut example = Domain::new(alice.clone(), Identifier::from_bytes(vec![7]), "example.com");
        storage.create_or_update_domain(&mut example).await.unwrap();
        let mut other = Domain::new(bob.clone(), Identifier::from_bytes(vec![7]), "other.org.");
        storage.create_or_update_domain(&mut other).await.unwrap();

        assert_eq!(example.domain, "example.com.");
        assert_eq!(storage.list_domains(&alice).await.unwrap(), vec![example.clone()]);
        assert_eq!(
            storage
                .get_domain_by_name(&alice, "EXAMPLE.com")
                .await
                .unwrap()
                .id,
            example.id
        );
        assert!(matches!(
            storage.get_user_domain(&bob, &example.id).await,
            Err(Error::Forbidden)
        ));

        storage.delete_domain(&example).await.unwrap();
        assert!(matches!(
            storage.get_domain(&example.id).await,
            Err(Error::DomainNotFound)
        ));
        assert_eq!(storage.list_all_domains().await.unwrap().len(), 1);
    }
}
