use crate::diff::Correction;
use crate::error::Error;
use crate::provider::{ProviderDriver, ProviderSpec};
use crate::rr::{name, parse_zone, RData, Record, RrType};
use crate::services::schema::{Field, FieldType};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

pub const TYPE: &str = "InMemory";

#[derive(Default, Deserialize)]
struct Settings {
    /// Zone text per origin, loaded at construction.
    #[serde(default)]
    zones: HashMap<String, String>,
}

/// A sandbox provider keeping its zones in memory. Not durable across restarts.
#[derive(Default, Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct InMemoryProvider {
    zones: RwLock<BTreeMap<String, Vec<Record>>>,
    unsupported: Vec<RrType>,
}

fn zone_key(fqdn: &str) -> String {
    name::fqdn(fqdn).to_ascii_lowercase()
}

fn no_zone(fqdn: &str) -> Error {
    Error::Provider(format!("zone {fqdn} is not hosted here"))
}

impl InMemoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored settings: `{"zones": {"<origin>": "<zone text>"}}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the settings or a zone text don't parse.
    pub fn from_settings(settings: &serde_json::Value) -> Result<Self, Error> {
        let settings: Settings = if settings.is_null() {
            Settings::default()
        } else {
            serde_json::from_value(settings.clone())
                .map_err(|err| Error::Validation(format!("invalid settings: {err}")))?
        };
        let mut zones = BTreeMap::new();
        for (origin, text) in settings.zones {
            let records = parse_zone(&text, &origin)
                .map_err(|err| Error::Validation(format!("zone {origin}: {err}")))?;
            zones.insert(zone_key(&origin), records);
        }
        Ok(Self {
            zones: RwLock::new(zones),
            unsupported: Vec::new(),
        })
    }

    /// Refuse to manage records of the given types.
    #[must_use]
    pub fn with_unsupported_types(mut self, unsupported: Vec<RrType>) -> Self {
        self.unsupported = unsupported;
        self
    }

    /// Host `records` as zone `origin`, replacing whatever was there.
    pub async fn insert_zone(&self, origin: &str, records: Vec<Record>) {
        let origin = name::fqdn(origin);
        let records = records.into_iter().map(|rr| rr.fqdn(&origin)).collect();
        self.zones.write().await.insert(zone_key(&origin), records);
    }
}

#[async_trait::async_trait]
impl ProviderDriver for InMemoryProvider {
    async fn list_zones(&self) -> Result<Vec<String>, Error> {
        Ok(self.zones.read().await.keys().cloned().collect())
    }

    async fn get_zone_records(&self, fqdn: &str) -> Result<Vec<Record>, Error> {
        self.zones
            .read()
            .await
            .get(&zone_key(fqdn))
            .cloned()
            .ok_or_else(|| no_zone(fqdn))
    }

    async fn get_nameservers(&self, fqdn: &str) -> Result<Vec<String>, Error> {
        let apex = zone_key(fqdn);
        Ok(self
            .get_zone_records(fqdn)
            .await?
            .into_iter()
            .filter(|rr| rr.name.to_ascii_lowercase() == apex)
            .filter_map(|rr| match rr.data {
                RData::NS { ns } => Some(ns),
                _ => None,
            })
            .collect())
    }

    fn supports_type(&self, rrtype: RrType) -> bool {
        !self.unsupported.contains(&rrtype)
    }

    async fn apply_correction(&self, fqdn: &str, correction: &Correction) -> Result<(), Error> {
        let mut zones = self.zones.write().await;
        let records = zones.get_mut(&zone_key(fqdn)).ok_or_else(|| no_zone(fqdn))?;
        correction.apply_to(records)
    }
}

pub(super) fn spec() -> ProviderSpec {
    ProviderSpec {
        provider_type: TYPE,
        name: "In-memory sandbox",
        description: "Zones kept in memory, lost on restart. For trying things out.",
        list_zones: true,
        fields: vec![Field::new(
            "zones",
            "Initial zones",
            FieldType::Text,
        )
        .description("Master-file text per zone origin.")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_records;

    const ORIGIN: &str = "example.com.";

    #[tokio::test]
    async fn serves_and_updates_zones() {
        let provider = InMemoryProvider::new();
        provider
            .insert_zone(
                "Example.com",
                parse_zone("@ 3600 NS ns1\n@ 3600 NS ns2.other.net.", ORIGIN).unwrap(),
            )
            .await;
        assert_eq!(
            provider.get_nameservers(ORIGIN).await.unwrap(),
            vec!["ns1.example.com.", "ns2.other.net."]
        );

        let live = provider.get_zone_records(ORIGIN).await.unwrap();
        let desired = parse_zone("@ 3600 NS ns1", ORIGIN).unwrap();
        for c in diff_records(&live, &desired, ORIGIN) {
            provider.apply_correction(ORIGIN, &c).await.unwrap();
        }
        assert_eq!(provider.get_zone_records(ORIGIN).await.unwrap(), desired);
    }

    #[tokio::test]
    async fn unknown_zones_are_provider_errors() {
        let provider = InMemoryProvider::new();
        assert!(matches!(
            provider.get_zone_records("nope.org.").await,
            Err(Error::Provider(_))
        ));
        assert!(InMemoryProvider::from_settings(&serde_json::json!({"zones": 3})).is_err());
    }
}
