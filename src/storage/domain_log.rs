//! Append-only audit trail per domain.

use crate::error::Error;
use crate::identifier::Identifier;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub(crate) const LOG_PREFIX: &str = "domain.log|";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainLog {
    #[serde(default)]
    pub id: Identifier,
    pub id_user: Identifier,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub level: LogLevel,
    pub content: String,
}

impl DomainLog {
    #[must_use]
    pub fn new(user: Identifier, level: LogLevel, content: impl Into<String>) -> Self {
        Self {
            id: Identifier::default(),
            id_user: user,
            date: OffsetDateTime::now_utc(),
            level,
            content: content.into(),
        }
    }
}

/// A log entry with the domain its key belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainLogWithDomainId {
    pub domain_id: Identifier,
    pub log: DomainLog,
}

fn domain_prefix(domain: &Identifier) -> String {
    format!("{LOG_PREFIX}{domain}|")
}

fn log_key(domain: &Identifier, log: &Identifier) -> String {
    format!("{LOG_PREFIX}{domain}|{log}")
}

fn parse_key(key: &str) -> Option<(Identifier, Identifier)> {
    let (domain, log) = key.strip_prefix(LOG_PREFIX)?.split_once('|')?;
    Some((domain.parse().ok()?, log.parse().ok()?))
}

impl Storage {
    /// Append `log` to the trail of `domain`, giving it a fresh identifier.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn append_domain_log(&self, domain: &Identifier, log: &mut DomainLog) -> Result<(), Error> {
        let (key, id) = self.kv().find_identifier_key(&domain_prefix(domain)).await?;
        log.id = id;
        self.put_json(&key, log).await
    }

    /// Entries of `domain`, newest first.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_domain_logs(&self, domain: &Identifier) -> Result<Vec<DomainLog>, Error> {
        let mut logs: Vec<DomainLog> = self
            .search_json::<DomainLog>(&domain_prefix(domain))
            .await?
            .into_iter()
            .map(|(_, log)| log)
            .collect();
        logs.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(logs)
    }

    /// Every entry of every domain, in key order.
    ///
    /// # Errors
    ///
    /// Fails if the backend does, or if a key doesn't follow the log layout.
    pub async fn list_all_domain_logs(&self) -> Result<Vec<DomainLogWithDomainId>, Error> {
        self.search_json::<DomainLog>(LOG_PREFIX)
            .await?
            .into_iter()
            .map(|(key, log)| {
                let (domain_id, _) = parse_key(&key)
                    .ok_or_else(|| Error::Internal(format!("malformed log key {key}")))?;
                Ok(DomainLogWithDomainId { domain_id, log })
            })
            .collect()
    }

    /// # Errors
    ///
    /// Returns [`Error::DomainLogNotFound`] if there's no such entry.
    pub async fn get_domain_log(&self, domain: &Identifier, id: &Identifier) -> Result<DomainLog, Error> {
        self.get_json(&log_key(domain, id))
            .await?
            .ok_or(Error::DomainLogNotFound)
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn delete_domain_log(&self, domain: &Identifier, id: &Identifier) -> Result<(), Error> {
        self.kv().delete(&log_key(domain, id)).await
    }

    /// Drop the whole trail of `domain`.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn delete_domain_logs(&self, domain: &Identifier) -> Result<usize, Error> {
        self.delete_prefix(&domain_prefix(domain)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[tokio::test]
    async fn logs_are_listed_per_domain_newest_first() {
        let storage = Storage::in_memory();
        let user = Identifier::from_bytes(vec![1]);
        let d1 = Identifier::from_bytes(vec![0xd1]);
        let d2 = Identifier::from_bytes(vec![0xd2]);

        let mut old = DomainLog::new(user.clone(), LogLevel::Info, "imported");
        old.date -= Duration::days(2);
        storage.append_domain_log(&d1, &mut old).await.unwrap();
        let mut new = DomainLog::new(user.clone(), LogLevel::Warn, "applied");
        storage.append_domain_log(&d1, &mut new).await.unwrap();
        storage
            .append_domain_log(&d2, &mut DomainLog::new(user, LogLevel::Info, "x"))
            .await
            .unwrap();

        let logs = storage.list_domain_logs(&d1).await.unwrap();
        assert_eq!(logs, vec![new.clone(), old.clone()]);
        assert_eq!(storage.get_domain_log(&d1, &old.id).await.unwrap(), old);

        let all = storage.list_all_domain_logs().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().filter(|l| l.domain_id == d2).count(), 1);

        assert_eq!(storage.delete_domain_logs(&d1).await.unwrap(), 2);
        assert!(matches!(
            storage.get_domain_log(&d1, &old.id).await,
            Err(Error::DomainLogNotFound)
        ));
    }
}
