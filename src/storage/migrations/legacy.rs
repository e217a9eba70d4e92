//! Service shapes written by early releases.
//!
//! Those releases stored a few bodies with capitalized field names and bundled every mail
//! setting of a subdomain into one `abstract.EMail` service. The bundle is expanded into records
//! and analyzed again, so each part becomes the service a fresh import would produce.

use super::{for_each_service, rewrite_values};
use crate::error::Error;
use crate::rr::{parse_rr, Record, DEFAULT_TTL};
use crate::services::analyze_zone;
use crate::services::providers::google::GSuite;
use crate::services::svcs::email::{DKIMRecord, DMARC, MTA_STS, SPF, TLS_RPT};
use crate::services::svcs::mx::{Mx, MXs};
use crate::services::{Service, ServiceBody};
use crate::storage::zones::ZONE_PREFIX;
use crate::storage::Storage;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Stand-in origin for analysis; stored names are relative so the real origin isn't needed.
const PLACEHOLDER_ORIGIN: &str = "zZzZ.";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyMx {
    #[serde(default)]
    preference: u16,
    mx: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacySpf {
    #[serde(default = "default_spf_version")]
    version: u8,
    #[serde(default)]
    directives: Vec<String>,
}

fn default_spf_version() -> u8 {
    1
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyDkim {
    version: Option<String>,
    #[serde(default)]
    acceptable_hash_algorithms: Vec<String>,
    key_type: Option<String>,
    notes: Option<String>,
    #[serde(default)]
    public_key: String,
    #[serde(default)]
    service_types: Vec<String>,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyDmarc {
    #[serde(default)]
    request: String,
    subdomain_request: Option<String>,
    #[serde(default)]
    aggregate_report: Vec<String>,
    #[serde(default)]
    forensic_report: Vec<String>,
    #[serde(rename = "DKIMAlignment")]
    dkim_alignment: Option<String>,
    #[serde(rename = "SPFAlignment")]
    spf_alignment: Option<String>,
    percent: Option<u8>,
    failure_options: Option<String>,
    report_format: Option<String>,
    report_interval: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyEmail {
    #[serde(rename = "MX", default)]
    mx: Vec<LegacyMx>,
    #[serde(rename = "SPF")]
    spf: Option<LegacySpf>,
    #[serde(rename = "DKIM", default)]
    dkim: BTreeMap<String, LegacyDkim>,
    #[serde(rename = "DMARC")]
    dmarc: Option<LegacyDmarc>,
    #[serde(rename = "MTA_STS")]
    mta_sts: Option<Map<String, Value>>,
    #[serde(rename = "TLS_RPT")]
    tls_rpt: Option<Map<String, Value>>,
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k))
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl LegacyEmail {
    /// The records the bundle stood for, owners relative to the zone.
    fn records(self, subdomain: &str, ttl: u32) -> Result<Vec<Record>, Error> {
        let mut bodies: Vec<Box<dyn ServiceBody>> = Vec::new();
        if !self.mx.is_empty() {
            bodies.push(Box::new(MXs {
                mxs: self
                    .mx
                    .into_iter()
                    .map(|mx| Mx {
                        preference: mx.preference,
                        target: mx.mx,
                    })
                    .collect(),
            }));
        }
        if let Some(spf) = self.spf {
            bodies.push(Box::new(SPF {
                version: spf.version,
                directives: spf.directives,
            }));
        }
        for (selector, dkim) in self.dkim {
            bodies.push(Box::new(DKIMRecord {
                selector,
                version: dkim.version,
                acceptable_hash_algorithms: dkim.acceptable_hash_algorithms,
                key_type: dkim.key_type,
                notes: dkim.notes,
                public_key: dkim.public_key,
                service_types: dkim.service_types,
                flags: dkim.flags,
            }));
        }
        if let Some(dmarc) = self.dmarc {
            bodies.push(Box::new(DMARC {
                request: dmarc.request,
                subdomain_request: dmarc.subdomain_request,
                aggregate_report: dmarc.aggregate_report,
                forensic_report: dmarc.forensic_report,
                dkim_alignment: dmarc.dkim_alignment,
                spf_alignment: dmarc.spf_alignment,
                percent: dmarc.percent,
                failure_options: dmarc.failure_options,
                report_format: dmarc.report_format,
                report_interval: dmarc.report_interval,
            }));
        }
        if let Some(id) = self.mta_sts.and_then(|m| string_field(&m, &["Id", "id"])) {
            bodies.push(Box::new(MTA_STS { id }));
        }
        if let Some(rpt) = self.tls_rpt {
            let rua = match rpt.get("rua").or_else(|| rpt.get("Rua")) {
                Some(Value::String(s)) => vec![s.clone()],
                Some(Value::Array(list)) => list
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            };
            if !rua.is_empty() {
                bodies.push(Box::new(TLS_RPT { rua }));
            }
        }

        let mut records = Vec::new();
        for body in bodies {
            records.extend(body.get_records(subdomain, ttl, PLACEHOLDER_ORIGIN)?);
        }
        Ok(records)
    }
}

/// Replace an `abstract.EMail` bundle with the services analyzing its records yields, keyed
/// by the subdomain each lands on. The first keeps the bundle's identifier.
fn explode_email(svc: &Map<String, Value>, subdomain: &str) -> Result<Vec<(String, Value)>, Error> {
    let body: LegacyEmail = match svc.get("Service") {
        None | Some(Value::Null) => LegacyEmail::default(),
        Some(body) => serde_json::from_value(body.clone()).map_err(|err| {
            Error::Internal(format!("undecodable e-mail service on {subdomain:?}: {err}"))
        })?,
    };
    let ttl = legacy_ttl(svc);
    let records: Vec<Record> = body
        .records(subdomain, ttl.unwrap_or(DEFAULT_TTL))?
        .iter()
        .map(|rr| rr.fqdn(PLACEHOLDER_ORIGIN))
        .collect();
    let analysis = analyze_zone(PLACEHOLDER_ORIGIN, &records)?;

    let mut out = Vec::new();
    let mut first = true;
    for (sub, services) in analysis.services {
        for mut service in services {
            service.meta.ttl = ttl;
            if first {
                if let Some(id) = svc.get("_id").and_then(Value::as_str).and_then(|id| id.parse().ok()) {
                    service.meta.id = id;
                }
                first = false;
            }
            out.push((sub.clone(), serde_json::to_value(&service)?));
        }
    }
    debug!(subdomain, services = out.len(), "expanded legacy e-mail service");
    Ok(out)
}

/// Early releases wrote `_ttl: 0` for "zone default".
fn legacy_ttl(svc: &Map<String, Value>) -> Option<u32> {
    svc.get("_ttl")
        .and_then(Value::as_u64)
        .and_then(|t| u32::try_from(t).ok())
        .filter(|t| *t > 0)
}

/// Rewrite a capitalized legacy body in place; `Ok(false)` if it already has the current shape.
fn modernize_body(svc: &mut Map<String, Value>) -> Result<bool, Error> {
    let kind = svc.get("_svctype").and_then(Value::as_str).unwrap_or_default().to_string();
    let Some(body) = svc.get("Service").and_then(Value::as_object) else {
        return Ok(false);
    };
    let modern = match kind.as_str() {
        "svcs.TXT" => match body.get("Content").and_then(Value::as_str) {
            Some(content) => json!({"txt": {"txt": content}}),
            None => return Ok(false),
        },
        "svcs.CNAME" | "svcs.PTR" => match body.get("Target").and_then(Value::as_str) {
            Some(target) => json!({"target": target}),
            None => return Ok(false),
        },
        "abstract.Server" if body.contains_key("A") || body.contains_key("AAAA") => {
            let mut server = Map::new();
            for (from, to) in [("A", "a"), ("AAAA", "aaaa")] {
                if let Some(addr) = body.get(from).filter(|v| v.is_string()) {
                    server.insert(to.into(), addr.clone());
                }
            }
            Value::Object(server)
        }
        "svcs.Orphan" => {
            let (Some(rrtype), Some(rdata)) = (
                body.get("Type").and_then(Value::as_str),
                body.get("Orphan").and_then(Value::as_str),
            ) else {
                return Ok(false);
            };
            let rr = parse_rr(&format!("@ 0 IN {rrtype} {rdata}"), PLACEHOLDER_ORIGIN)?;
            json!({"data": rr.relative(PLACEHOLDER_ORIGIN).data})
        }
        _ => return Ok(false),
    };
    svc.insert("Service".into(), modern);
    Ok(true)
}

pub(super) async fn rewrite_legacy_services(storage: &Storage) -> Result<(), Error> {
    rewrite_values(storage, ZONE_PREFIX, |_, zone| {
        let Some(services) = zone.get_mut("services").and_then(Value::as_object_mut) else {
            return Ok(false);
        };
        let mut changed = false;
        let mut rebuilt: Map<String, Value> = Map::new();
        for (subdomain, list) in std::mem::take(services) {
            for svc in list.as_array().cloned().unwrap_or_default() {
                let Value::Object(mut svc) = svc else {
                    continue;
                };
                let placed = if svc.get("_svctype").and_then(Value::as_str) == Some("abstract.EMail") {
                    changed = true;
                    explode_email(&svc, &subdomain)?
                } else {
                    if svc.get("_ttl").is_some() && legacy_ttl(&svc).is_none() {
                        svc.remove("_ttl");
                        changed = true;
                    }
                    changed |= modernize_body(&mut svc)?;
                    vec![(subdomain.clone(), Value::Object(svc))]
                };
                for (sub, mut value) in placed {
                    value["_domain"] = Value::String(sub.clone());
                    if let Some(list) = rebuilt
                        .entry(sub)
                        .or_insert_with(|| Value::Array(Vec::new()))
                        .as_array_mut()
                    {
                        list.push(value);
                    }
                }
            }
        }
        *services = rebuilt;
        Ok(changed)
    })
    .await?;
    Ok(())
}

pub(super) async fn gsuite_validation_code(storage: &Storage) -> Result<(), Error> {
    rewrite_values(storage, ZONE_PREFIX, |_, zone| {
        for_each_service(zone, |svc| {
            if svc.get("_svctype").and_then(Value::as_str) != Some("google.GSuite") {
                return Ok(false);
            }
            let Some(code) = svc
                .get("Service")
                .and_then(|body| body.get("validationCode"))
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                return Ok(false);
            };
            let mut upgraded = Service::new(GSuite::standard(Some(&code)));
            if let Some(id) = svc.get("_id").and_then(Value::as_str).and_then(|id| id.parse().ok()) {
                upgraded.meta.id = id;
            }
            upgraded.meta.subdomain = svc
                .get("_domain")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            upgraded.meta.ttl = svc
                .get("_ttl")
                .and_then(Value::as_u64)
                .and_then(|t| u32::try_from(t).ok());
            if let Value::Object(map) = serde_json::to_value(&upgraded)? {
                *svc = map;
            }
            Ok(true)
        })
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::zone::Zone;

    async fn zone_with(storage: &Storage, services: Value) {
        storage
            .put_json("domain.zone-aa", &json!({"id": "aa", "id_author": "05", "default_ttl": 3600,
                "last_modified": "2020-01-01T00:00:00Z", "services": services}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn email_bundles_become_separate_services() {
        let storage = Storage::in_memory();
        zone_with(
            &storage,
            json!({"": [{"_svctype": "abstract.EMail", "_id": "0102", "_domain": "", "_ttl": 600,
                "Service": {
                    "MX": [{"Preference": 10, "Mx": "mx.example.net."}],
                    "SPF": {"Version": 1, "Directives": ["mx", "-all"]},
                    "DKIM": {"s1": {"Version": "DKIM1", "KeyType": "rsa", "PublicKey": "MIGf"}},
                    "DMARC": {"Request": "reject"},
                }}]}),
        )
        .await;
        rewrite_legacy_services(&storage).await.unwrap();

        let zone: Zone = storage.get_json("domain.zone-aa").await.unwrap().unwrap();
        let apex = &zone.services[""];
        let mut kinds: Vec<&str> = apex.iter().map(Service::kind).collect();
        kinds.sort_unstable();
        assert_eq!(kinds, ["svcs.DKIMRecord", "svcs.DMARC", "svcs.MXs", "svcs.SPF"]);
        assert!(apex.iter().all(|s| s.meta.ttl == Some(600) && s.meta.subdomain.is_empty()));
        assert!(apex
            .iter()
            .any(|s| s.meta.id == Identifier::from_bytes(vec![1, 2])));
        let dmarc = apex.iter().find_map(|s| s.body_as::<DMARC>()).unwrap();
        assert_eq!(dmarc.request, "reject");
    }

    #[tokio::test]
    async fn partial_email_bundles_keep_what_they_have() {
        let storage = Storage::in_memory();
        zone_with(
            &storage,
            json!({"": [{"_svctype": "abstract.EMail", "_id": "07", "_ttl": 0,
                "Service": {
                    "MX": [{"Preference": 10, "Mx": "mx.example.net."}],
                    "DMARC": {"Percent": 100},
                }}]}),
        )
        .await;
        rewrite_legacy_services(&storage).await.unwrap();

        let zone: Zone = storage.get_json("domain.zone-aa").await.unwrap().unwrap();
        let records = zone.records("example.com.").unwrap();
        let lines: Vec<String> = records.iter().map(ToString::to_string).collect();
        assert!(
            lines.contains(&"example.com.\t3600\tIN\tMX\t10 mx.example.net.".to_string()),
            "{lines:?}"
        );
        assert!(lines.iter().any(|l| l.starts_with("_dmarc.example.com.\t3600\tIN\tTXT")));
        assert!(zone.services.values().flatten().all(|s| s.meta.ttl.is_none()));
    }

    #[tokio::test]
    async fn undecodable_email_bundles_stop_the_migration() {
        let storage = Storage::in_memory();
        zone_with(
            &storage,
            json!({"": [{"_svctype": "abstract.EMail", "_id": "07",
                "Service": {"MX": [{"Preference": "ten"}]}}]}),
        )
        .await;
        assert!(rewrite_legacy_services(&storage).await.is_err());
        let raw: Value = storage.get_json("domain.zone-aa").await.unwrap().unwrap();
        assert_eq!(raw["services"][""][0]["_svctype"], "abstract.EMail");
    }

    #[tokio::test]
    async fn capitalized_bodies_are_modernized() {
        let storage = Storage::in_memory();
        zone_with(
            &storage,
            json!({
                "www": [
                    {"_svctype": "svcs.TXT", "_id": "01", "Service": {"Content": "hello"}},
                    {"_svctype": "abstract.Server", "_id": "02", "Service": {"A": "192.0.2.1"}},
                ],
                "alias": [{"_svctype": "svcs.CNAME", "_id": "03", "Service": {"Target": "www"}}],
                "odd": [{"_svctype": "svcs.Orphan", "_id": "04",
                    "Service": {"Type": "HINFO", "Orphan": "\"PC\" \"Linux\""}}],
            }),
        )
        .await;
        rewrite_legacy_services(&storage).await.unwrap();

        let zone: Zone = storage.get_json("domain.zone-aa").await.unwrap().unwrap();
        let records = zone.records("example.com.").unwrap();
        let lines: Vec<String> = records.iter().map(ToString::to_string).collect();
        assert!(lines.contains(&"www.example.com.\t3600\tIN\tA\t192.0.2.1".to_string()));
        assert!(lines.contains(&"alias.example.com.\t3600\tIN\tCNAME\twww.example.com.".to_string()));
        assert!(lines.iter().any(|l| l.starts_with("www.example.com.\t3600\tIN\tTXT")));
        assert!(lines.iter().any(|l| l.starts_with("odd.example.com.\t3600\tIN\tHINFO")));
    }

    #[tokio::test]
    async fn gsuite_validation_codes_become_mx() {
        let storage = Storage::in_memory();
        zone_with(
            &storage,
            json!({"": [{"_svctype": "google.GSuite", "_id": "0a", "_ttl": 300,
                "Service": {"validationCode": "abcdef"}}]}),
        )
        .await;
        gsuite_validation_code(&storage).await.unwrap();

        let zone: Zone = storage.get_json("domain.zone-aa").await.unwrap().unwrap();
        let svc = &zone.services[""][0];
        assert_eq!(svc.meta.id, Identifier::from_bytes(vec![0x0a]));
        assert_eq!(svc.meta.ttl, Some(300));
        assert_eq!(svc.body_as::<GSuite>(), Some(&GSuite::standard(Some("abcdef"))));
    }
}
