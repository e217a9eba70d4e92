//! Housekeeping over the whole store.

use crate::error::Error;
use crate::identifier::Identifier;
use crate::storage::Storage;
use std::collections::HashSet;
use time::OffsetDateTime;
use tracing::info;

impl Storage {
    /// Delete zones no domain history refers to; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn tidy_orphan_zones(&self) -> Result<usize, Error> {
        let referenced: HashSet<Identifier> = self
            .list_all_domains()
            .await?
            .into_iter()
            .flat_map(|d| d.zone_history)
            .collect();
        let mut removed = 0;
        for id in self.list_zone_ids().await? {
            if !referenced.contains(&id) {
                self.delete_zone(&id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "deleted orphan zones");
        }
        Ok(removed)
    }

    /// Delete domain log entries dated before `cutoff`; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn tidy_domain_logs(&self, cutoff: OffsetDateTime) -> Result<usize, Error> {
        let mut removed = 0;
        for entry in self.list_all_domain_logs().await? {
            if entry.log.date < cutoff {
                self.delete_domain_log(&entry.domain_id, &entry.log.id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "deleted old domain logs");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Domain, DomainLog, LogLevel};
    use crate::zone::Zone;
    use time::Duration;

    #[tokio::test]
    async fn unreferenced_zones_and_old_logs_go() {
        let storage = Storage::in_memory();
        let owner = Identifier::from_bytes(vec![1]);
        let mut kept = Zone::new(owner.clone(), 3600);
        let mut orphan = Zone::new(owner.clone(), 3600);
        storage.create_zone(&mut kept).await.unwrap();
        storage.create_zone(&mut orphan).await.unwrap();

        let mut domain = Domain::new(owner.clone(), Identifier::from_bytes(vec![2]), "example.com.");
        domain.zone_history.push(kept.id.clone());
        storage.create_or_update_domain(&mut domain).await.unwrap();

        assert_eq!(storage.tidy_orphan_zones().await.unwrap(), 1);
        assert!(storage.get_zone(&kept.id).await.is_ok());
        assert!(storage.get_zone(&orphan.id).await.is_err());

        let mut old = DomainLog::new(owner.clone(), LogLevel::Info, "old");
        old.date -= Duration::days(100);
        storage.append_domain_log(&domain.id, &mut old).await.unwrap();
        storage
            .append_domain_log(&domain.id, &mut DomainLog::new(owner, LogLevel::Info, "new"))
            .await
            .unwrap();
        let cutoff = OffsetDateTime::now_utc() - Duration::days(90);
        assert_eq!(storage.tidy_domain_logs(cutoff).await.unwrap(), 1);
        assert_eq!(storage.list_domain_logs(&domain.id).await.unwrap().len(), 1);
    }
}
