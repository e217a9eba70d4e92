//! Import, review and publish cycle of a domain's zone.
//!
//! A domain's `zone_history` holds its zones newest first. Importing analyzes the provider's
//! records into a new head zone. Publishing applies a selection of the corrections between the
//! head zone and the live records, freezes the head and pushes an editable copy in front of it.

use crate::diff::Correction;
use crate::error::Error;
use crate::identifier::Identifier;
use crate::provider::{apply_selected, ProviderDriver};
use crate::rr::Record;
use crate::services::analyzer::is_dnssec_record;
use crate::services::analyze_zone;
use crate::storage::{Domain, DomainLog, LogLevel, Storage};
use crate::zone::Zone;
use std::future::Future;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Driver = dyn ProviderDriver + Send + Sync;

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

async fn log(storage: &Storage, domain: &Domain, user: &Identifier, level: LogLevel, content: String) {
    let mut entry = DomainLog::new(user.clone(), level, content);
    if let Err(err) = storage.append_domain_log(&domain.id, &mut entry).await {
        warn!(domain = %domain.domain, %err, "unable to write domain log");
    }
}

/// Live records of `domain` without the DNSSEC material the provider manages on its own.
async fn live_records(driver: &Driver, domain: &Domain, cancel: &CancellationToken) -> Result<Vec<Record>, Error> {
    let records = cancellable(cancel, driver.get_zone_records(&domain.domain)).await?;
    let (dnssec, records): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|rr| is_dnssec_record(&rr.relative(&domain.domain)));
    if !dnssec.is_empty() {
        debug!(zone = %domain.domain, hidden = dnssec.len(), "hiding DNSSEC records");
    }
    Ok(records)
}

/// Analyze the provider's records of `domain` into a new zone at the head of its history.
///
/// # Errors
///
/// Returns the driver's or the backend's error, or [`Error::Cancelled`].
pub async fn import_zone(
    storage: &Storage,
    driver: &Driver,
    domain: &mut Domain,
    cancel: &CancellationToken,
) -> Result<Zone, Error> {
    let records = cancellable(cancel, driver.get_zone_records(&domain.domain)).await?;
    let analysis = analyze_zone(&domain.domain, &records)?;
    let mut zone = Zone::from_analysis(domain.id_owner.clone(), analysis);
    zone.id_domain = domain.id.clone();

    cancellable(cancel, storage.create_zone(&mut zone)).await?;
    domain.zone_history.insert(0, zone.id.clone());
    cancellable(cancel, storage.create_or_update_domain(domain)).await?;

    let services: usize = zone.services.values().map(Vec::len).sum();
    info!(zone = %domain.domain, id = %zone.id, records = records.len(), services, "imported zone");
    log(
        storage,
        domain,
        &domain.id_owner,
        LogLevel::Info,
        format!("Zone imported: {} records, {services} services", records.len()),
    )
    .await;
    Ok(zone)
}

/// Corrections that would bring the provider in line with zone `zone_id` of `domain`.
///
/// # Errors
///
/// Returns [`Error::ZoneNotFound`], the driver's error, or [`Error::Cancelled`].
pub async fn zone_corrections(
    storage: &Storage,
    driver: &Driver,
    domain: &Domain,
    zone_id: &Identifier,
    cancel: &CancellationToken,
) -> Result<Vec<Correction>, Error> {
    let zone = cancellable(cancel, storage.get_zone(zone_id)).await?;
    let live = live_records(driver, domain, cancel).await?;
    driver.build_corrections(&domain.domain, &zone, &live)
}

/// Push the corrections `selected` for `zone`, then freeze it and start its successor.
///
/// `zone` is the caller's copy: if the stored zone changed since it was loaded nothing is
/// applied. Returns the new editable head zone.
///
/// # Errors
///
/// Returns [`Error::Conflict`] for a stale `zone`, [`Error::Validation`] if `zone` isn't the
/// domain's editable head or a selected id is unknown, the driver's error, or
/// [`Error::Cancelled`]. Corrections applied before a failure stay applied and are logged.
#[allow(clippy::too_many_arguments)]
pub async fn apply_zone_corrections(
    storage: &Storage,
    driver: &Driver,
    domain: &mut Domain,
    zone: &Zone,
    user: &Identifier,
    selected: &[Identifier],
    message: &str,
    cancel: &CancellationToken,
) -> Result<Zone, Error> {
    if domain.current_zone() != Some(&zone.id) {
        return Err(Error::Validation(format!(
            "zone {} isn't the current zone of {}",
            zone.id, domain.domain
        )));
    }
    let stored = cancellable(cancel, storage.get_zone(&zone.id)).await?;
    if stored.published.is_some() {
        return Err(Error::Validation(format!("zone {} is already published", zone.id)));
    }
    if stored.last_modified > zone.last_modified {
        return Err(Error::Conflict(zone.id.clone()));
    }

    let corrections = zone_corrections(storage, driver, domain, &zone.id, cancel).await?;
    let applied = match apply_selected(driver, &domain.domain, &corrections, selected, cancel).await {
        Ok(applied) => applied,
        Err(err) => {
            log(
                storage,
                domain,
                user,
                LogLevel::Error,
                format!("Failed to apply corrections: {err}"),
            )
            .await;
            return Err(err);
        }
    };

    let now = OffsetDateTime::now_utc();
    let mut published = stored;
    let loaded_at = published.last_modified;
    published.published = Some(now);
    published.commit_date = Some(now);
    published.commit_message = Some(message.to_string());
    published.last_modified = now;
    cancellable(cancel, storage.update_zone_if_unchanged(&published, loaded_at)).await?;

    let mut successor = published.derive_new();
    successor.id_author = user.clone();
    cancellable(cancel, storage.create_zone(&mut successor)).await?;
    domain.zone_history.insert(0, successor.id.clone());
    cancellable(cancel, storage.create_or_update_domain(domain)).await?;

    info!(zone = %domain.domain, applied = applied.len(), published = %published.id, "published zone");
    let mut content = format!("Applied {} corrections", applied.len());
    if !message.is_empty() {
        content.push_str(": ");
        content.push_str(message);
    }
    log(storage, domain, user, LogLevel::Info, content).await;
    Ok(successor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::CorrectionKind;
    use crate::provider::InMemoryProvider;
    use crate::rr::{parse_zone, RrType};
    use crate::services::abstracts::Server;
    use crate::services::Service;

    const ORIGIN: &str = "example.com.";
    const LIVE: &str = "@ 3600 IN SOA ns1 hostmaster 1 7200 3600 1209600 3600
@ 3600 IN NS ns1
www 3600 IN A 192.0.2.1
@ 3600 IN DNSKEY 257 3 13 AAAA
";

    async fn setup() -> (Storage, InMemoryProvider, Domain) {
        let storage = Storage::in_memory();
        let driver = InMemoryProvider::new();
        driver.insert_zone(ORIGIN, parse_zone(LIVE, ORIGIN).unwrap()).await;
        let mut domain = Domain::new(Identifier::from_bytes(vec![5]), Identifier::from_bytes(vec![7]), ORIGIN);
        storage.create_or_update_domain(&mut domain).await.unwrap();
        (storage, driver, domain)
    }

    #[tokio::test]
    async fn imported_zones_have_no_pending_corrections() {
        let (storage, driver, mut domain) = setup().await;
        let cancel = CancellationToken::new();
        let zone = import_zone(&storage, &driver, &mut domain, &cancel).await.unwrap();

        assert_eq!(domain.zone_history, vec![zone.id.clone()]);
        assert_eq!(zone.id_domain, domain.id);
        assert!(zone.created_at.is_some());
        assert_eq!(zone.dnssec.len(), 1);
        assert_eq!(storage.get_domain(&domain.id).await.unwrap(), domain);
        assert!(zone.services.contains_key("www"));

        let corrections = zone_corrections(&storage, &driver, &domain, &zone.id, &cancel)
            .await
            .unwrap();
        assert!(corrections.is_empty(), "{corrections:?}");
        assert_eq!(storage.list_domain_logs(&domain.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn publishing_freezes_and_derives() {
        let (storage, driver, mut domain) = setup().await;
        let cancel = CancellationToken::new();
        let mut zone = import_zone(&storage, &driver, &mut domain, &cancel).await.unwrap();

        let server = Server {
            a: Some("192.0.2.9".parse().unwrap()),
            ..Server::default()
        };
        zone.append_service("mail", ORIGIN, Service::new(server)).unwrap();
        storage.update_zone(&zone).await.unwrap();

        let corrections = zone_corrections(&storage, &driver, &domain, &zone.id, &cancel)
            .await
            .unwrap();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].kind, CorrectionKind::Create);

        let user = domain.id_owner.clone();
        let ids = vec![corrections[0].id.clone()];
        let next = apply_zone_corrections(&storage, &driver, &mut domain, &zone, &user, &ids, "add mail", &cancel)
            .await
            .unwrap();

        let live = driver.get_zone_records(ORIGIN).await.unwrap();
        assert!(live.iter().any(|rr| rr.name == "mail.example.com." && rr.rr_type() == RrType::A));

        let frozen = storage.get_zone(&zone.id).await.unwrap();
        assert!(frozen.published.is_some());
        assert_eq!(frozen.commit_message.as_deref(), Some("add mail"));
        assert_eq!(domain.zone_history, vec![next.id.clone(), zone.id.clone()]);
        assert!(next.published.is_none());
        assert_eq!(next.services, frozen.services);

        let again = apply_zone_corrections(&storage, &driver, &mut domain, &zone, &user, &[], "", &cancel).await;
        assert!(matches!(again, Err(Error::Validation(_))));
        let logs = storage.list_domain_logs(&domain.id).await.unwrap();
        assert!(logs.iter().any(|l| l.content == "Applied 1 corrections: add mail"));
    }

    #[tokio::test]
    async fn stale_copies_conflict() {
        let (storage, driver, mut domain) = setup().await;
        let cancel = CancellationToken::new();
        let zone = import_zone(&storage, &driver, &mut domain, &cancel).await.unwrap();

        let mut newer = zone.clone();
        newer.last_modified += time::Duration::seconds(5);
        storage.update_zone(&newer).await.unwrap();

        let user = domain.id_owner.clone();
        let res = apply_zone_corrections(&storage, &driver, &mut domain, &zone, &user, &[], "", &cancel).await;
        assert!(matches!(res, Err(Error::Conflict(id)) if id == zone.id));
        assert_eq!(domain.zone_history.len(), 1);
    }

    /// Pushes a whole zone as one replacement, the way providers with a structured API do.
    struct WholeZoneProvider(InMemoryProvider);

    #[async_trait::async_trait]
    impl ProviderDriver for WholeZoneProvider {
        async fn get_zone_records(&self, fqdn: &str) -> Result<Vec<Record>, Error> {
            self.0.get_zone_records(fqdn).await
        }

        async fn get_nameservers(&self, fqdn: &str) -> Result<Vec<String>, Error> {
            self.0.get_nameservers(fqdn).await
        }

        fn build_corrections(&self, fqdn: &str, desired: &Zone, live: &[Record]) -> Result<Vec<Correction>, Error> {
            let desired = crate::services::generate_zone(&desired.services, fqdn, desired.default_ttl)?;
            let pending = crate::diff::diff_records(live, &desired, fqdn);
            if pending.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![Correction {
                id: Identifier::digest(b"whole zone"),
                kind: CorrectionKind::Change,
                msg: format!("Replace zone ({} changes)", pending.len()),
                rrs: desired,
                previous: live.to_vec(),
                service_id: None,
            }])
        }

        async fn apply_correction(&self, fqdn: &str, correction: &Correction) -> Result<(), Error> {
            self.0.insert_zone(fqdn, correction.rrs.clone()).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn drivers_build_their_own_corrections() {
        let (storage, memory, mut domain) = setup().await;
        let driver = WholeZoneProvider(memory);
        let cancel = CancellationToken::new();
        let mut zone = import_zone(&storage, &driver, &mut domain, &cancel).await.unwrap();
        assert!(zone_corrections(&storage, &driver, &domain, &zone.id, &cancel)
            .await
            .unwrap()
            .is_empty());

        let server = Server {
            a: Some("192.0.2.9".parse().unwrap()),
            ..Server::default()
        };
        zone.append_service("mail", ORIGIN, Service::new(server)).unwrap();
        storage.update_zone(&zone).await.unwrap();

        let corrections = zone_corrections(&storage, &driver, &domain, &zone.id, &cancel)
            .await
            .unwrap();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].msg, "Replace zone (1 changes)");

        let user = domain.id_owner.clone();
        let ids = vec![corrections[0].id.clone()];
        apply_zone_corrections(&storage, &driver, &mut domain, &zone, &user, &ids, "batch", &cancel)
            .await
            .unwrap();
        let live = driver.get_zone_records(ORIGIN).await.unwrap();
        assert!(live.iter().any(|rr| rr.name == "mail.example.com." && rr.rr_type() == RrType::A));
    }

    #[tokio::test]
    async fn cancelled_imports_store_nothing() {
        let (storage, driver, mut domain) = setup().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            import_zone(&storage, &driver, &mut domain, &cancel).await,
            Err(Error::Cancelled)
        ));
        assert!(storage.list_zone_ids().await.unwrap().is_empty());
    }
}
