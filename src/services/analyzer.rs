//! Fold a flat record set into services.
//!
//! Kind analyzers run in registry weight order over a shrinking working set of records. Each one
//! searches for records it recognises and claims them with [`Analyzer::use_rrs`], which only
//! succeeds when the proposed body regenerates exactly the claimed records. Whatever is left at
//! the end becomes one `svcs.Orphan` per record, so analysis never loses data.

use super::registry::{self, Registry, ServiceKind};
use super::svcs::orphan::Orphan;
use super::Service;
use crate::error::Error;
use crate::identifier::Identifier;
use crate::rr::{name, Record, RrType, DEFAULT_TTL};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Selects records from the working set. Unset criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub rr_type: Option<RrType>,
    /// Exact owner, relative to the origin. `""` and `@` both mean the apex.
    pub domain: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    /// Substring of the record's presentation form.
    pub contains: Option<String>,
    pub ttl: Option<u32>,
}

impl RecordFilter {
    #[must_use]
    pub fn of_type(rr_type: RrType) -> Self {
        RecordFilter {
            rr_type: Some(rr_type),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    #[must_use]
    pub fn contains(mut self, contains: impl Into<String>) -> Self {
        self.contains = Some(contains.into());
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn matches(&self, rr: &Record) -> bool {
        let owner = rr.name.to_ascii_lowercase();
        self.rr_type.map_or(true, |t| rr.rr_type() == t)
            && self.domain.as_ref().map_or(true, |d| {
                name::subdomain_of(&owner) == name::subdomain_of(&d.to_ascii_lowercase())
            })
            && self
                .prefix
                .as_ref()
                .map_or(true, |p| owner.starts_with(&p.to_ascii_lowercase()))
            && self
                .suffix
                .as_ref()
                .map_or(true, |s| owner.ends_with(&s.to_ascii_lowercase()))
            && self
                .contains
                .as_ref()
                .map_or(true, |c| rr.to_string().contains(c.as_str()))
            && self.ttl.map_or(true, |ttl| rr.ttl == ttl)
    }
}

/// Result of analyzing a zone.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub services: BTreeMap<String, Vec<Service>>,
    pub default_ttl: u32,
    /// DNSSEC material, kept aside with names relative to the origin.
    pub dnssec: Vec<Record>,
}

pub struct Analyzer<'r> {
    registry: &'r Registry,
    origin: String,
    zone: Vec<Record>,
    services: BTreeMap<String, Vec<Service>>,
    default_ttl: u32,
}

impl<'r> Analyzer<'r> {
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[must_use]
    pub fn default_ttl(&self) -> u32 {
        self.default_ttl
    }

    /// Records not claimed yet.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.zone
    }

    /// Unclaimed records matching any of `filters`.
    #[must_use]
    pub fn search_rr(&self, filters: &[RecordFilter]) -> Vec<Record> {
        self.zone
            .iter()
            .filter(|rr| filters.is_empty() || filters.iter().any(|f| f.matches(rr)))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn services_at(&self, subdomain: &str) -> &[Service] {
        self.services
            .get(subdomain)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Claim a single record for `body` on `subdomain`.
    ///
    /// # Errors
    ///
    /// See [`Analyzer::use_rrs`].
    pub fn use_rr<T: ServiceKind>(
        &mut self,
        rr: &Record,
        subdomain: &str,
        body: T,
    ) -> Result<(), Error> {
        self.use_rrs(std::slice::from_ref(rr), subdomain, body)
    }

    /// Claim `rrs` for `body` on `subdomain`, removing them from the working set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if a record isn't in the working set and
    /// [`Error::Validation`] if `body` wouldn't regenerate exactly `rrs` (modulo TTL). Nothing is
    /// claimed on error.
    pub fn use_rrs<T: ServiceKind>(
        &mut self,
        rrs: &[Record],
        subdomain: &str,
        body: T,
    ) -> Result<(), Error> {
        let subdomain = name::normalize_subdomain(subdomain, &self.origin);

        let mut positions: Vec<usize> = Vec::with_capacity(rrs.len());
        for rr in rrs {
            let pos = (0..self.zone.len())
                .find(|i| !positions.contains(i) && self.zone[*i] == *rr)
                .ok_or_else(|| Error::Internal(format!("record {rr} is already claimed")))?;
            positions.push(pos);
        }

        let ttl = rrs.first().map_or(self.default_ttl, |rr| rr.ttl);
        if rrs.iter().any(|rr| rr.ttl != ttl) {
            return Err(Error::Validation(format!(
                "{} on {:?} would merge records with different TTLs",
                T::KIND,
                subdomain
            )));
        }
        let mut generated = body
            .get_records(&subdomain, ttl, &self.origin)?
            .iter()
            .map(|rr| rr.fqdn(&self.origin).relative(&self.origin).canonical_key())
            .collect::<Vec<_>>();
        let mut claimed = rrs
            .iter()
            .map(|rr| rr.fqdn(&self.origin).relative(&self.origin).canonical_key())
            .collect::<Vec<_>>();
        generated.sort();
        claimed.sort();
        if generated != claimed {
            return Err(Error::Validation(format!(
                "{} on {:?} does not regenerate the records it claims",
                T::KIND,
                subdomain
            )));
        }

        positions.sort_unstable_by(|a, b| b.cmp(a));
        for pos in positions {
            self.zone.remove(pos);
        }

        let mut svc = Service::new(body);
        svc.meta.id = Identifier::new_random();
        svc.meta.subdomain = subdomain.clone();
        if ttl != self.default_ttl {
            svc.meta.ttl = Some(ttl);
        }
        svc.meta.warnings =
            self.registry
                .check_restrictions(T::KIND, &subdomain, &self.services, None);
        for warning in &svc.meta.warnings {
            debug!(kind = T::KIND, %subdomain, %warning, "restriction conflict");
        }
        self.services.entry(subdomain).or_default().push(svc);
        Ok(())
    }

    /// [`Analyzer::use_rrs`], logging instead of failing. Returns whether the records were
    /// claimed.
    pub fn try_use_rrs<T: ServiceKind>(&mut self, rrs: &[Record], subdomain: &str, body: T) -> bool {
        match self.use_rrs(rrs, subdomain, body) {
            Ok(()) => true,
            Err(err) => {
                debug!(kind = T::KIND, subdomain, %err, "records left unclaimed");
                false
            }
        }
    }
}

/// Partition `rrs` by owner (case-insensitively) and TTL, keeping first-appearance order.
#[must_use]
pub fn group_by_owner(rrs: Vec<Record>) -> Vec<Vec<Record>> {
    let mut groups: Vec<Vec<Record>> = Vec::new();
    for rr in rrs {
        match groups
            .iter_mut()
            .find(|g| g[0].ttl == rr.ttl && g[0].name.eq_ignore_ascii_case(&rr.name))
        {
            Some(group) => group.push(rr),
            None => groups.push(vec![rr]),
        }
    }
    groups
}

/// DNSSEC material, for a record named relative to the origin.
pub(crate) fn is_dnssec_record(rr: &Record) -> bool {
    if rr.rr_type().is_dnssec() {
        return true;
    }
    let owner = rr.name.to_ascii_lowercase();
    rr.rr_type() == RrType::TXT && (owner == "__dnssec" || owner.starts_with("__dnssec."))
}

/// The most frequent TTL, ties going to the one seen first.
#[must_use]
pub fn most_frequent_ttl(records: &[Record]) -> u32 {
    let mut counts: Vec<(u32, usize)> = Vec::new();
    for rr in records {
        match counts.iter_mut().find(|(ttl, _)| *ttl == rr.ttl) {
            Some((_, count)) => *count += 1,
            None => counts.push((rr.ttl, 1)),
        }
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(u32, usize)>, (ttl, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((ttl, count)),
        })
        .map_or(DEFAULT_TTL, |(ttl, _)| ttl)
}

/// Analyze `records` with the built-in service kinds.
///
/// # Errors
///
/// Only fails if a residual record can't be preserved as an orphan.
pub fn analyze_zone(origin: &str, records: &[Record]) -> Result<Analysis, Error> {
    analyze_with(registry::global(), origin, records)
}

/// Analyze `records` with the kinds of `registry`.
///
/// # Errors
///
/// Only fails if a residual record can't be preserved as an orphan.
pub fn analyze_with(
    registry: &Registry,
    origin: &str,
    records: &[Record],
) -> Result<Analysis, Error> {
    let origin = name::fqdn(origin);
    let (dnssec, zone): (Vec<_>, Vec<_>) = records
        .iter()
        .map(|rr| rr.relative(&origin))
        .partition(is_dnssec_record);

    let mut analyzer = Analyzer {
        registry,
        default_ttl: most_frequent_ttl(&zone),
        origin,
        zone,
        services: BTreeMap::new(),
    };

    for kind in registry.ordered_services() {
        let Some(analyze) = registry.find_service(kind).and_then(|entry| entry.analyzer) else {
            continue;
        };
        if let Err(err) = analyze(&mut analyzer) {
            warn!(kind, %err, "service analyzer failed, its records stay unclaimed");
        }
    }

    for rr in analyzer.zone.clone() {
        let subdomain = name::subdomain_of(&rr.name);
        analyzer.use_rr(
            &rr,
            &subdomain,
            Orphan {
                data: rr.data.clone(),
            },
        )?;
    }

    debug!(
        origin = %analyzer.origin,
        subdomains = analyzer.services.len(),
        dnssec = dnssec.len(),
        "zone analyzed"
    );
    Ok(Analysis {
        services: analyzer.services,
        default_ttl: analyzer.default_ttl,
        dnssec,
    })
}
