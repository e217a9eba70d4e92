//! Zones: metadata plus the services of every subdomain.

use crate::error::Error;
use crate::identifier::Identifier;
use crate::rr::{name, Record};
use crate::services::{generator, registry, Analysis, Service};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use time::OffsetDateTime;

/// One revision of a domain's zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: Identifier,
    #[serde(default)]
    pub id_domain: Identifier,
    #[serde(default)]
    pub id_author: Identifier,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub default_ttl: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub commit_date: Option<OffsetDateTime>,
    /// Set once the zone has been pushed to the provider; a published zone is frozen.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published: Option<OffsetDateTime>,
    #[serde(default)]
    pub services: BTreeMap<String, Vec<Service>>,
    /// DNSSEC material found at import, relative to the origin. Never analyzed, emitted as is.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dnssec: Vec<Record>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Zone {
    #[must_use]
    pub fn new(author: Identifier, default_ttl: u32) -> Self {
        let now = OffsetDateTime::now_utc();
        Zone {
            id: Identifier::new_random(),
            id_domain: Identifier::default(),
            id_author: author,
            created_at: Some(now),
            default_ttl,
            last_modified: now,
            commit_message: None,
            commit_date: None,
            published: None,
            services: BTreeMap::new(),
            dnssec: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Build a zone from an analysis.
    #[must_use]
    pub fn from_analysis(author: Identifier, analysis: Analysis) -> Self {
        let mut zone = Zone::new(author, analysis.default_ttl);
        zone.services = analysis.services;
        zone.dnssec = analysis.dnssec;
        zone
    }

    /// Unpublished copy of this zone to carry further edits, with a fresh id.
    #[must_use]
    pub fn derive_new(&self) -> Self {
        let now = OffsetDateTime::now_utc();
        Zone {
            id: Identifier::new_random(),
            created_at: Some(now),
            last_modified: now,
            commit_message: None,
            commit_date: None,
            published: None,
            ..self.clone()
        }
    }

    fn touch(&mut self) {
        self.last_modified = OffsetDateTime::now_utc();
    }

    /// Insert `svc` on `subdomain`, assigning it an identifier and storing its names relative to
    /// `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the placement breaks a restriction of the new service
    /// or of one already there.
    pub fn append_service(
        &mut self,
        subdomain: &str,
        origin: &str,
        mut svc: Service,
    ) -> Result<Identifier, Error> {
        let subdomain = name::normalize_subdomain(subdomain, origin);
        let violations =
            registry::global().check_restrictions(svc.kind(), &subdomain, &self.services, None);
        if !violations.is_empty() {
            return Err(Error::Validation(violations.join("; ")));
        }

        if svc.meta.id.is_empty() {
            svc.meta.id = Identifier::new_random();
        }
        let origin = name::fqdn(origin);
        svc.body.map_names(&|n| name::relative_name(n, &origin));
        svc.meta.subdomain = subdomain.clone();
        svc.meta.warnings.clear();
        svc.refresh_meta();

        let id = svc.meta.id.clone();
        self.services.entry(subdomain).or_default().push(svc);
        self.touch();
        Ok(id)
    }

    /// Remove the service `id` from `subdomain`, or swap it for `replacement` keeping its
    /// identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceNotFound`] if no such service exists and [`Error::Validation`]
    /// if the replacement breaks a restriction.
    pub fn erase_service(
        &mut self,
        subdomain: &str,
        origin: &str,
        id: &Identifier,
        replacement: Option<Service>,
    ) -> Result<(), Error> {
        let subdomain = name::normalize_subdomain(subdomain, origin);
        let (idx, _) = self
            .find_subdomain_service(&subdomain, id)
            .ok_or(Error::ServiceNotFound)?;

        match replacement {
            Some(mut svc) => {
                let violations = registry::global().check_restrictions(
                    svc.kind(),
                    &subdomain,
                    &self.services,
                    Some(id),
                );
                if !violations.is_empty() {
                    return Err(Error::Validation(violations.join("; ")));
                }
                let origin = name::fqdn(origin);
                svc.body.map_names(&|n| name::relative_name(n, &origin));
                svc.meta.id = id.clone();
                svc.meta.subdomain = subdomain.clone();
                svc.meta.warnings.clear();
                svc.refresh_meta();
                if let Some(list) = self.services.get_mut(&subdomain) {
                    list[idx] = svc;
                }
            }
            None => {
                if let Some(list) = self.services.get_mut(&subdomain) {
                    list.remove(idx);
                    if list.is_empty() {
                        self.services.remove(&subdomain);
                    }
                }
            }
        }
        self.touch();
        Ok(())
    }

    /// Position and value of service `id` on `subdomain`.
    #[must_use]
    pub fn find_subdomain_service(
        &self,
        subdomain: &str,
        id: &Identifier,
    ) -> Option<(usize, &Service)> {
        self.services
            .get(subdomain)?
            .iter()
            .enumerate()
            .find(|(_, svc)| svc.meta.id == *id)
    }

    /// Service `id` wherever it lives, with its subdomain.
    #[must_use]
    pub fn find_service(&self, id: &Identifier) -> Option<(&str, &Service)> {
        self.services.iter().find_map(|(subdomain, svcs)| {
            svcs.iter()
                .find(|svc| svc.meta.id == *id)
                .map(|svc| (subdomain.as_str(), svc))
        })
    }

    /// Every record of the zone with absolute names, the DNSSEC material last.
    ///
    /// # Errors
    ///
    /// Fails if a service can't be expanded.
    pub fn records(&self, origin: &str) -> Result<Vec<Record>, Error> {
        let origin = name::fqdn(origin);
        let mut records = generator::generate_zone(&self.services, &origin, self.default_ttl)?;
        records.extend(self.dnssec.iter().map(|rr| rr.fqdn(&origin)));
        Ok(records)
    }

    /// Master-file text of the zone: `$ORIGIN` first, then the apex and the subdomains in
    /// canonical order.
    ///
    /// # Errors
    ///
    /// Fails if a service can't be expanded.
    pub fn flatten_zone_file(&self, origin: &str) -> Result<String, Error> {
        let origin = name::fqdn(origin);
        let mut out = String::new();
        let _ = writeln!(out, "$ORIGIN {origin}");
        for rr in self.records(&origin)? {
            let _ = writeln!(out, "{rr}");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::parse_zone;
    use crate::services::abstracts::Server;
    use crate::services::analyze_zone;
    use crate::services::svcs::cname::Cname;
    use crate::services::svcs::txt::Txt;

    const ORIGIN: &str = "example.com.";

    fn txt(s: &str) -> Service {
        Service::new(Txt {
            txt: crate::rr::Txt::new(s),
        })
    }

    #[test]
    fn append_assigns_ids_and_relativizes_names() {
        let mut zone = Zone::new(Identifier::from_bytes(vec![5]), 3600);
        let id = zone
            .append_service(
                "alias.example.com.",
                ORIGIN,
                Service::new(Cname {
                    target: "www.example.com.".into(),
                }),
            )
            .unwrap();
        let (idx, svc) = zone.find_subdomain_service("alias", &id).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(svc.body_as::<Cname>().unwrap().target, "www");
        assert_eq!(svc.meta.subdomain, "alias");
    }

    #[test]
    fn append_enforces_restrictions() {
        let mut zone = Zone::new(Identifier::default(), 3600);
        zone.append_service(
            "alias",
            ORIGIN,
            Service::new(Cname {
                target: "www".into(),
            }),
        )
        .unwrap();
        assert!(matches!(
            zone.append_service("alias", ORIGIN, txt("hello")),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            zone.append_service(
                "alias",
                ORIGIN,
                Service::new(Cname {
                    target: "other".into()
                })
            ),
            Err(Error::Validation(_))
        ));
        assert_eq!(zone.services["alias"].len(), 1);
    }

    #[test]
    fn erase_keeps_the_id_on_replacement() {
        let mut zone = Zone::new(Identifier::default(), 3600);
        let first = zone.append_service("", ORIGIN, txt("one")).unwrap();
        let second = zone.append_service("", ORIGIN, txt("two")).unwrap();

        zone.erase_service("", ORIGIN, &first, Some(txt("uno")))
            .unwrap();
        let (idx, svc) = zone.find_subdomain_service("", &first).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(svc.meta.comment, "uno");

        zone.erase_service("@", ORIGIN, &second, None).unwrap();
        assert_eq!(zone.services[""].len(), 1);
        zone.erase_service("", ORIGIN, &first, None).unwrap();
        assert!(zone.services.is_empty());
        assert!(matches!(
            zone.erase_service("", ORIGIN, &first, None),
            Err(Error::ServiceNotFound)
        ));
    }

    #[test]
    fn zone_file_is_sorted_apex_first() {
        let mut zone = Zone::new(Identifier::default(), 300);
        zone.append_service("b", ORIGIN, txt("b")).unwrap();
        zone.append_service(
            "a",
            ORIGIN,
            Service::new(Server {
                a: Some("192.0.2.1".parse().unwrap()),
                ..Server::default()
            }),
        )
        .unwrap();
        zone.append_service("", ORIGIN, txt("apex")).unwrap();

        let text = zone.flatten_zone_file("example.com").unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "$ORIGIN example.com.");
        assert!(lines[1].starts_with("example.com.\t300\tIN\tTXT"));
        assert!(lines[2].starts_with("a.example.com.\t300\tIN\tA"));
        assert!(lines[3].starts_with("b.example.com."));
        assert!(!text.contains("$TTL"));

        let back = parse_zone(&text, ORIGIN).unwrap();
        assert_eq!(back, zone.records(ORIGIN).unwrap());
    }

    #[test]
    fn dnssec_material_passes_through() {
        let text = "www 300 A 192.0.2.1\n@ 300 DNSKEY 257 3 13 AAAA\n__dnssec 300 TXT \"keys\"\n";
        let records = parse_zone(text, ORIGIN).unwrap();
        let mut zone = Zone::from_analysis(Identifier::default(), analyze_zone(ORIGIN, &records).unwrap());
        zone.id_domain = Identifier::from_bytes(vec![9]);
        assert_eq!(zone.dnssec.len(), 2);
        assert_eq!(zone.services.len(), 1);

        let mut emitted = zone.records(ORIGIN).unwrap();
        let mut want = records.clone();
        emitted.sort_by_key(ToString::to_string);
        want.sort_by_key(ToString::to_string);
        assert_eq!(emitted, want);
        assert!(zone.flatten_zone_file(ORIGIN).unwrap().contains("\tDNSKEY\t"));

        let json = serde_json::to_value(&zone).unwrap();
        let back: Zone = serde_json::from_value(json).unwrap();
        assert_eq!(back.dnssec, zone.dnssec);
        assert_eq!(back.created_at, zone.created_at);

        let next = zone.derive_new();
        assert_eq!(next.id_domain, zone.id_domain);
        assert_eq!(next.dnssec, zone.dnssec);
        assert!(next.created_at >= zone.created_at);
        assert_ne!(next.id, zone.id);
    }

    #[test]
    fn zones_serialize_with_unknown_fields_preserved() {
        let analysis = analyze_zone(ORIGIN, &parse_zone("www 300 A 192.0.2.1", ORIGIN).unwrap())
            .unwrap();
        let zone = Zone::from_analysis(Identifier::from_bytes(vec![1]), analysis);
        let mut v = serde_json::to_value(&zone).unwrap();
        v["legacy_flag"] = serde_json::json!(true);
        let back: Zone = serde_json::from_value(v).unwrap();
        assert_eq!(back.extra["legacy_flag"], true);
        assert_eq!(back.services, zone.services);
        assert_eq!(back.default_ttl, 300);
    }
}
