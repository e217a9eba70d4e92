//! Provider drivers.
//!
//! A driver is the narrow surface the core needs from whatever hosts a zone: list the zones it
//! serves, read a zone's records and nameservers, and apply [`Correction`]s one at a time. Two
//! drivers ship with the crate, [`InMemoryProvider`] and [`ZoneFileProvider`]. The former keeps
//! zones in memory only. The latter keeps one master file per zone in a directory.
//!
//! The core never retries a driver call; driver errors surface as [`Error::Provider`].

use crate::diff::{correction_id, diff_zone_against, Correction, CorrectionKind};
use crate::error::Error;
use crate::identifier::Identifier;
use crate::rr::{Record, RrType};
use crate::services::schema::Field;
use crate::zone::Zone;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod memory;
pub mod zonefile;

#[allow(clippy::module_name_repetitions)]
pub use memory::InMemoryProvider;
#[allow(clippy::module_name_repetitions)]
pub use zonefile::ZoneFileProvider;

/// `DynProvider` is a driver shared between request handlers. Drivers do their own locking.
#[allow(clippy::module_name_repetitions)]
pub type DynProvider = Arc<dyn ProviderDriver + Send + Sync>;

/// An async trait describing a DNS hosting provider, addressed by zone FQDN.
#[async_trait::async_trait]
#[allow(clippy::module_name_repetitions)]
pub trait ProviderDriver {
    /// The zones this provider serves.
    async fn list_zones(&self) -> Result<Vec<String>, Error> {
        Err(Error::Unsupported("listing zones"))
    }

    /// Records of zone `fqdn`, with absolute names.
    async fn get_zone_records(&self, fqdn: &str) -> Result<Vec<Record>, Error>;

    /// Nameservers the provider publishes for zone `fqdn`.
    async fn get_nameservers(&self, fqdn: &str) -> Result<Vec<String>, Error>;

    /// Whether the driver can create or delete records of `rrtype`.
    fn supports_type(&self, _rrtype: RrType) -> bool {
        true
    }

    /// Corrections turning `live` into the records of `desired`.
    ///
    /// The default diffs record by record, grouped per service, and turns corrections touching
    /// record types the driver can't handle into [`CorrectionKind::Unmanaged`] ones. Drivers
    /// speaking a structured API override this to return their own corrections.
    ///
    /// # Errors
    ///
    /// Fails if a service of `desired` can't be expanded.
    fn build_corrections(
        &self,
        fqdn: &str,
        desired: &Zone,
        live: &[Record],
    ) -> Result<Vec<Correction>, Error> {
        Ok(self.mark_unmanaged(diff_zone_against(live, desired, fqdn)?))
    }

    /// Turn corrections touching record types the driver can't handle into
    /// [`CorrectionKind::Unmanaged`] ones.
    fn mark_unmanaged(&self, corrections: Vec<Correction>) -> Vec<Correction> {
        corrections
            .into_iter()
            .map(|c| {
                let managed = c
                    .rrs
                    .iter()
                    .chain(&c.previous)
                    .all(|rr| self.supports_type(rr.rr_type()));
                if managed {
                    c
                } else {
                    unmanaged(c)
                }
            })
            .collect()
    }

    /// Apply one correction to zone `fqdn`.
    async fn apply_correction(&self, fqdn: &str, correction: &Correction) -> Result<(), Error>;
}

fn unmanaged(c: Correction) -> Correction {
    Correction {
        id: correction_id(CorrectionKind::Unmanaged, &c.rrs, &c.previous),
        kind: CorrectionKind::Unmanaged,
        msg: format!("Unmanaged: {}", c.msg),
        ..c
    }
}

/// Forward the corrections whose id is in `selected` to `driver`, in the order they appear in
/// `corrections`. Stops at the first failure; corrections already applied stay applied.
///
/// Returns the corrections that were applied.
///
/// # Errors
///
/// Returns [`Error::Validation`] if a selected id names no correction, [`Error::Cancelled`] when
/// `cancel` fires between or during driver calls, or the driver's own error.
pub async fn apply_selected(
    driver: &(dyn ProviderDriver + Send + Sync),
    fqdn: &str,
    corrections: &[Correction],
    selected: &[Identifier],
    cancel: &CancellationToken,
) -> Result<Vec<Correction>, Error> {
    if let Some(missing) = selected
        .iter()
        .find(|id| !corrections.iter().any(|c| c.id == **id))
    {
        return Err(Error::Validation(format!("no pending correction {missing}")));
    }

    let mut applied = Vec::new();
    for correction in corrections.iter().filter(|c| selected.contains(&c.id)) {
        if correction.kind == CorrectionKind::Unmanaged {
            debug!(id = %correction.id, "skipping unmanaged correction");
            continue;
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            res = driver.apply_correction(fqdn, correction) => res?,
        }
        info!(zone = fqdn, id = %correction.id, msg = %correction.msg, "applied correction");
        applied.push(correction.clone());
    }
    Ok(applied)
}

/// A provider as stored: the driver type plus settings only that driver interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: Identifier,
    pub id_owner: Identifier,
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// A driver type with its settings form.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSpec {
    #[serde(rename = "type")]
    pub provider_type: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub list_zones: bool,
    pub fields: Vec<Field>,
}

/// Every driver type this build knows about.
#[must_use]
pub fn specs() -> Vec<ProviderSpec> {
    vec![memory::spec(), zonefile::spec()]
}

/// Spec of driver type `provider_type`.
#[must_use]
pub fn find_spec(provider_type: &str) -> Option<ProviderSpec> {
    specs()
        .into_iter()
        .find(|spec| spec.provider_type == provider_type)
}

/// Build the driver a stored provider describes.
///
/// # Errors
///
/// Returns [`Error::Validation`] for an unknown driver type or settings the driver rejects.
pub async fn from_record(record: &ProviderRecord) -> Result<DynProvider, Error> {
    match record.provider_type.as_str() {
        memory::TYPE => Ok(Arc::new(InMemoryProvider::from_settings(&record.settings)?)),
        zonefile::TYPE => Ok(Arc::new(
            ZoneFileProvider::from_settings(&record.settings).await?,
        )),
        other => Err(Error::Validation(format!("unknown provider type \"{other}\""))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::parse_zone;
    use crate::services::analyze_zone;
    use serde_json::json;

    const ORIGIN: &str = "example.com.";

    fn zone_of(text: &str) -> Zone {
        let records = parse_zone(text, ORIGIN).unwrap();
        Zone::from_analysis(Identifier::default(), analyze_zone(ORIGIN, &records).unwrap())
    }

    async fn provider() -> InMemoryProvider {
        let provider = InMemoryProvider::new();
        provider
            .insert_zone(ORIGIN, parse_zone("www 300 A 192.0.2.1", ORIGIN).unwrap())
            .await;
        provider
    }

    #[tokio::test]
    async fn selected_corrections_apply_in_emitted_order() {
        let provider = provider().await;
        let desired = zone_of("www 300 A 192.0.2.2\nmail 300 A 192.0.2.3");
        let live = provider.get_zone_records(ORIGIN).await.unwrap();
        let corrections = provider.build_corrections(ORIGIN, &desired, &live).unwrap();
        assert_eq!(corrections.len(), 2);

        let selected = vec![corrections[1].id.clone()];
        let applied = apply_selected(
            &provider,
            ORIGIN,
            &corrections,
            &selected,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(provider.get_zone_records(ORIGIN).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_ids_and_cancellation_apply_nothing() {
        let provider = provider().await;
        let desired = zone_of("www 300 A 192.0.2.2");
        let live = provider.get_zone_records(ORIGIN).await.unwrap();
        let corrections = provider.build_corrections(ORIGIN, &desired, &live).unwrap();

        let err = apply_selected(
            &provider,
            ORIGIN,
            &corrections,
            &[Identifier::from_bytes(vec![1, 2])],
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let ids: Vec<_> = corrections.iter().map(|c| c.id.clone()).collect();
        let err = apply_selected(&provider, ORIGIN, &corrections, &ids, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(provider.get_zone_records(ORIGIN).await.unwrap(), live);
    }

    #[tokio::test]
    async fn unsupported_types_are_unmanaged() {
        let provider = provider().await.with_unsupported_types(vec![RrType::CAA]);
        let desired = zone_of("www 300 A 192.0.2.1\n@ 300 CAA 0 issue \"letsencrypt.org\"");
        let live = provider.get_zone_records(ORIGIN).await.unwrap();
        let corrections = provider.build_corrections(ORIGIN, &desired, &live).unwrap();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].kind, CorrectionKind::Unmanaged);
        assert!(corrections[0].msg.starts_with("Unmanaged: Create"));

        let ids = vec![corrections[0].id.clone()];
        let applied = apply_selected(&provider, ORIGIN, &corrections, &ids, &CancellationToken::new())
            .await
            .unwrap();
        assert!(applied.is_empty());
    }

    #[tokio::test]
    async fn drivers_are_built_from_records() {
        let record = ProviderRecord {
            id: Identifier::from_bytes(vec![1]),
            id_owner: Identifier::from_bytes(vec![2]),
            provider_type: memory::TYPE.to_string(),
            comment: "sandbox".into(),
            settings: json!({"zones": {"example.com.": "www 300 A 192.0.2.1"}}),
        };
        let driver = from_record(&record).await.unwrap();
        assert_eq!(driver.list_zones().await.unwrap(), vec![ORIGIN.to_string()]);

        let bad = ProviderRecord {
            provider_type: "Nope".into(),
            ..record
        };
        assert!(matches!(from_record(&bad).await, Err(Error::Validation(_))));
        assert!(find_spec(zonefile::TYPE).unwrap().list_zones);
    }
}
