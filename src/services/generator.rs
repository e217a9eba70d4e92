//! Expand services back into records.

use super::registry::{self, Registry};
use super::Service;
use crate::error::Error;
use crate::identifier::Identifier;
use crate::rr::{name, Record};
use std::collections::BTreeMap;

/// A generated record together with the service it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedRecord {
    pub record: Record,
    pub service_id: Identifier,
}

/// TTL a service's records are emitted with.
#[must_use]
pub fn effective_ttl(svc: &Service, default_ttl: u32) -> u32 {
    svc.meta.ttl.unwrap_or(default_ttl)
}

impl Service {
    /// Records of this service with absolute names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the body can't be expanded or misses a record type its
    /// kind requires.
    pub fn records(&self, default_ttl: u32, origin: &str) -> Result<Vec<Record>, Error> {
        service_records(registry::global(), self, default_ttl, origin)
    }
}

/// See [`Service::records`].
///
/// # Errors
///
/// Returns [`Error::Validation`] when the body can't be expanded or misses a required type.
pub fn service_records(
    registry: &Registry,
    svc: &Service,
    default_ttl: u32,
    origin: &str,
) -> Result<Vec<Record>, Error> {
    let origin = name::fqdn(origin);
    let ttl = effective_ttl(svc, default_ttl);
    let records = svc
        .body
        .get_records(&svc.meta.subdomain, ttl, &origin)?
        .into_iter()
        .map(|rr| {
            let mut rr = rr.fqdn(&origin);
            rr.ttl = ttl;
            rr
        })
        .collect::<Vec<_>>();

    if let Some(restrictions) = registry.restrictions(svc.kind()) {
        for needed in restrictions.need_types {
            if !records.iter().any(|rr| rr.rr_type() == *needed) {
                return Err(Error::Validation(format!(
                    "{} on {:?} must produce at least one {needed} record",
                    svc.kind(),
                    svc.meta.subdomain
                )));
            }
        }
    }
    Ok(records)
}

/// Every record of `services`, apex first then subdomains in canonical order.
///
/// # Errors
///
/// Fails on the first service that can't be expanded.
pub fn generate_with_provenance(
    services: &BTreeMap<String, Vec<Service>>,
    origin: &str,
    default_ttl: u32,
) -> Result<Vec<GeneratedRecord>, Error> {
    let registry = registry::global();
    let mut subdomains: Vec<&String> = services.keys().collect();
    subdomains.sort_by(|a, b| name::canonical_cmp(a, b));

    let mut out = Vec::new();
    for subdomain in subdomains {
        for svc in &services[subdomain] {
            for record in service_records(registry, svc, default_ttl, origin)? {
                out.push(GeneratedRecord {
                    record,
                    service_id: svc.meta.id.clone(),
                });
            }
        }
    }
    Ok(out)
}

/// Every record of `services`, with absolute names.
///
/// # Errors
///
/// Fails on the first service that can't be expanded.
pub fn generate_zone(
    services: &BTreeMap<String, Vec<Service>>,
    origin: &str,
    default_ttl: u32,
) -> Result<Vec<Record>, Error> {
    Ok(generate_with_provenance(services, origin, default_ttl)?
        .into_iter()
        .map(|generated| generated.record)
        .collect())
}
