//! Corrections turning one record set into another.
//!
//! Records are compared by their canonical key (lowercase owner, type, canonical data). Equal
//! keys with different TTLs become TTL changes; a removal and an addition on the same owner and
//! type pair up into a change; the rest are plain deletions and creations. Corrections come out
//! with deletions first, then changes, then creations, and apex SOA/NS adjustments last, so a
//! caller applying them in order never leaves the zone without its authority records.

use crate::error::Error;
use crate::identifier::Identifier;
use crate::rr::{name, RData, Record, RrType};
use crate::services::generator::{generate_with_provenance, GeneratedRecord};
use crate::zone::Zone;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrectionKind {
    Create,
    Delete,
    Change,
    /// Reported but left alone: the driver can't manage the records involved.
    Unmanaged,
}

impl fmt::Display for CorrectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CorrectionKind::Create => "Create",
            CorrectionKind::Delete => "Delete",
            CorrectionKind::Change => "Change",
            CorrectionKind::Unmanaged => "Unmanaged",
        })
    }
}

/// One independently applicable step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub id: Identifier,
    pub kind: CorrectionKind,
    pub msg: String,
    /// Records created, or deleted for a [`CorrectionKind::Delete`]. Names are absolute.
    #[serde(with = "rr_text")]
    pub rrs: Vec<Record>,
    /// Records replaced by a [`CorrectionKind::Change`].
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "rr_text")]
    pub previous: Vec<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<Identifier>,
}

impl Correction {
    fn removed(&self) -> &[Record] {
        match self.kind {
            CorrectionKind::Create | CorrectionKind::Unmanaged => &[],
            CorrectionKind::Delete => &self.rrs,
            CorrectionKind::Change => &self.previous,
        }
    }

    fn added(&self) -> &[Record] {
        match self.kind {
            CorrectionKind::Delete | CorrectionKind::Unmanaged => &[],
            CorrectionKind::Create | CorrectionKind::Change => &self.rrs,
        }
    }

    /// Apply to an in-memory record set with absolute names. Unmanaged corrections change
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] when a record to remove isn't there; `records` is left
    /// untouched in that case.
    pub fn apply_to(&self, records: &mut Vec<Record>) -> Result<(), Error> {
        let mut next = records.clone();
        for rr in self.removed() {
            let key = rr.canonical_key();
            let pos = next
                .iter()
                .position(|r| r.ttl == rr.ttl && r.canonical_key() == key)
                .ok_or_else(|| Error::Provider(format!("record not found: {rr}")))?;
            next.remove(pos);
        }
        next.extend(self.added().iter().cloned());
        *records = next;
        Ok(())
    }
}

mod rr_text {
    use crate::rr::{parse_rr, Record};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(rrs: &[Record], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(rrs.iter().map(ToString::to_string))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Record>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|text| parse_rr(text, ".").map_err(D::Error::custom))
            .collect()
    }
}

struct Tracked {
    record: Record,
    key: (String, RrType, String),
    service: Option<Identifier>,
}

impl Tracked {
    fn new(record: Record, origin: &str, service: Option<Identifier>) -> Self {
        let record = record.fqdn(origin);
        Tracked {
            key: record.canonical_key(),
            record,
            service,
        }
    }
}

struct Draft {
    kind: CorrectionKind,
    rrs: Vec<Record>,
    previous: Vec<Record>,
    msgs: Vec<String>,
    service: Option<Identifier>,
}

fn soa_changes(old: &RData, new: &RData) -> Vec<String> {
    let (
        RData::SOA {
            ns: ons,
            mbox: ombox,
            serial: oserial,
            refresh: orefresh,
            retry: oretry,
            expire: oexpire,
            minttl: ominttl,
        },
        RData::SOA {
            ns,
            mbox,
            serial,
            refresh,
            retry,
            expire,
            minttl,
        },
    ) = (old, new)
    else {
        return Vec::new();
    };
    let mut out = Vec::new();
    if !ons.eq_ignore_ascii_case(ns) {
        out.push(format!("ns {ons}→{ns}"));
    }
    if !ombox.eq_ignore_ascii_case(mbox) {
        out.push(format!("mbox {ombox}→{mbox}"));
    }
    for (label, o, n) in [
        ("serial", oserial, serial),
        ("refresh", orefresh, refresh),
        ("retry", oretry, retry),
        ("expire", oexpire, expire),
        ("minttl", ominttl, minttl),
    ] {
        if o != n {
            out.push(format!("{label} {o}→{n}"));
        }
    }
    out
}

fn change_msg(old: &Record, new: &Record) -> String {
    let what = if old.rr_type() == RrType::SOA {
        soa_changes(&old.data, &new.data).join(", ")
    } else {
        format!("{} → {}", old.rdata_text(), new.rdata_text())
    };
    let ttl = if old.ttl == new.ttl {
        String::new()
    } else {
        format!(", TTL {}→{}", old.ttl, new.ttl)
    };
    format!("Change {} {}: {what}{ttl}", new.name, new.rr_type())
}

pub(crate) fn correction_id(kind: CorrectionKind, rrs: &[Record], previous: &[Record]) -> Identifier {
    let mut content = kind.to_string();
    for (marker, list) in [("+", rrs), ("-", previous)] {
        let mut lines: Vec<String> = list.iter().map(ToString::to_string).collect();
        lines.sort();
        for line in lines {
            content.push('\n');
            content.push_str(marker);
            content.push_str(&line);
        }
    }
    Identifier::digest(content.as_bytes())
}

/// Describes services in merged correction messages, keyed by service id.
pub type ServiceLabels = HashMap<Identifier, String>;

fn diff_tracked(
    old: Vec<Tracked>,
    new: Vec<Tracked>,
    origin: &str,
    labels: &ServiceLabels,
) -> Vec<Correction> {
    let apex = name::fqdn(origin).to_ascii_lowercase();
    let mut old: Vec<Option<Tracked>> = old.into_iter().map(Some).collect();
    let mut drafts: Vec<Draft> = Vec::new();

    // Exact matches first so a TTL-only pairing never steals one.
    let mut unmatched: Vec<Tracked> = Vec::new();
    for n in new {
        let exact = old.iter().position(|o| {
            o.as_ref()
                .is_some_and(|o| o.key == n.key && o.record.ttl == n.record.ttl)
        });
        match exact {
            Some(pos) => old[pos] = None,
            None => unmatched.push(n),
        }
    }

    let mut added: Vec<Tracked> = Vec::new();
    for n in unmatched {
        let same_key = old
            .iter()
            .position(|o| o.as_ref().is_some_and(|o| o.key == n.key));
        match same_key.and_then(|pos| old[pos].take()) {
            Some(o) => drafts.push(Draft {
                kind: CorrectionKind::Change,
                msgs: vec![format!(
                    "Change {} {}: TTL {}→{}",
                    n.record.name,
                    n.record.rr_type(),
                    o.record.ttl,
                    n.record.ttl
                )],
                previous: vec![o.record],
                service: n.service.or(o.service),
                rrs: vec![n.record],
            }),
            None => added.push(n),
        }
    }

    let mut added: Vec<Option<Tracked>> = added.into_iter().map(Some).collect();
    for o in old.into_iter().flatten() {
        let partner = added.iter().position(|a| {
            a.as_ref()
                .is_some_and(|a| a.key.0 == o.key.0 && a.key.1 == o.key.1)
        });
        match partner.and_then(|pos| added[pos].take()) {
            Some(n) => drafts.push(Draft {
                kind: CorrectionKind::Change,
                msgs: vec![change_msg(&o.record, &n.record)],
                previous: vec![o.record],
                service: n.service.or(o.service),
                rrs: vec![n.record],
            }),
            None => drafts.push(Draft {
                kind: CorrectionKind::Delete,
                msgs: vec![format!("Delete {}", o.record)],
                rrs: vec![o.record],
                previous: Vec::new(),
                service: o.service,
            }),
        }
    }
    for n in added.into_iter().flatten() {
        drafts.push(Draft {
            kind: CorrectionKind::Create,
            msgs: vec![format!("Create {}", n.record)],
            rrs: vec![n.record],
            previous: Vec::new(),
            service: n.service,
        });
    }

    let kind_rank = |kind: CorrectionKind| match kind {
        CorrectionKind::Delete => 0,
        CorrectionKind::Change => 1,
        CorrectionKind::Create => 2,
        CorrectionKind::Unmanaged => 3,
    };
    let is_apex_authority = |d: &Draft| {
        d.rrs.iter().chain(&d.previous).any(|rr| {
            matches!(rr.rr_type(), RrType::SOA | RrType::NS)
                && rr.name.to_ascii_lowercase() == apex
        })
    };
    drafts.sort_by_key(|d| (is_apex_authority(d), kind_rank(d.kind)));

    let mut merged: Vec<Draft> = Vec::new();
    for d in drafts {
        match merged.last_mut() {
            Some(last)
                if last.kind == d.kind && last.service.is_some() && last.service == d.service =>
            {
                last.rrs.extend(d.rrs);
                last.previous.extend(d.previous);
                last.msgs.extend(d.msgs);
            }
            _ => merged.push(d),
        }
    }

    merged
        .into_iter()
        .map(|d| {
            let msg = match d.service.as_ref().and_then(|id| labels.get(id)) {
                Some(label) if d.msgs.len() > 1 => format!("{label}: {}", d.msgs.join("; ")),
                _ => d.msgs.join("; "),
            };
            Correction {
                id: correction_id(d.kind, &d.rrs, &d.previous),
                kind: d.kind,
                msg,
                rrs: d.rrs,
                previous: d.previous,
                service_id: d.service,
            }
        })
        .collect()
}

/// Corrections turning `old` into `new`.
#[must_use]
pub fn diff_records(old: &[Record], new: &[Record], origin: &str) -> Vec<Correction> {
    let track = |rrs: &[Record]| {
        rrs.iter()
            .map(|rr| Tracked::new(rr.clone(), origin, None))
            .collect::<Vec<_>>()
    };
    diff_tracked(track(old), track(new), origin, &ServiceLabels::new())
}

fn track_generated(generated: Vec<GeneratedRecord>, origin: &str) -> Vec<Tracked> {
    generated
        .into_iter()
        .map(|g| Tracked::new(g.record, origin, Some(g.service_id)))
        .collect()
}

fn labels_of(zone: &Zone, labels: &mut ServiceLabels) {
    for (subdomain, svcs) in &zone.services {
        for svc in svcs {
            let place = if subdomain.is_empty() { "@" } else { subdomain };
            labels.insert(
                svc.meta.id.clone(),
                format!("{} on {place}", svc.kind()),
            );
        }
    }
}

/// Corrections turning the records of zone `old` into those of `new`, grouped per service.
///
/// # Errors
///
/// Fails if a service of either zone can't be expanded.
pub fn diff_zones(old: &Zone, new: &Zone, origin: &str) -> Result<Vec<Correction>, Error> {
    let mut labels = ServiceLabels::new();
    labels_of(old, &mut labels);
    labels_of(new, &mut labels);
    let old = generate_with_provenance(&old.services, origin, old.default_ttl)?;
    let new = generate_with_provenance(&new.services, origin, new.default_ttl)?;
    Ok(diff_tracked(
        track_generated(old, origin),
        track_generated(new, origin),
        origin,
        &labels,
    ))
}

/// Corrections bringing a live record set in line with `zone`.
///
/// # Errors
///
/// Fails if a service of the zone can't be expanded.
pub fn diff_zone_against(
    live: &[Record],
    zone: &Zone,
    origin: &str,
) -> Result<Vec<Correction>, Error> {
    let mut labels = ServiceLabels::new();
    labels_of(zone, &mut labels);
    let old = live
        .iter()
        .map(|rr| Tracked::new(rr.clone(), origin, None))
        .collect();
    let new = generate_with_provenance(&zone.services, origin, zone.default_ttl)?;
    Ok(diff_tracked(
        old,
        track_generated(new, origin),
        origin,
        &labels,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::parse_zone;

    const ORIGIN: &str = "example.com.";

    const S1: &str = "example.com. 3600 IN SOA ns1.example.com. hostmaster.example.com. 1 7200 3600 1209600 3600
example.com. 3600 IN NS ns1.example.com.
example.com. 3600 IN NS ns2.example.com.
";

    fn records(text: &str) -> Vec<Record> {
        parse_zone(text, ORIGIN).unwrap()
    }

    fn canonical(mut rrs: Vec<Record>) -> Vec<(String, RrType, String, u32)> {
        let mut out: Vec<_> = rrs
            .drain(..)
            .map(|rr| {
                let (n, t, d) = rr.canonical_key();
                (n, t, d, rr.ttl)
            })
            .collect();
        out.sort();
        out
    }

    #[test]
    fn equal_sets_have_no_corrections() {
        let old = records(S1);
        assert!(diff_records(&old, &old, ORIGIN).is_empty());
    }

    #[test]
    fn serial_bump_and_new_host() {
        let old = records(S1);
        let new = records(&format!(
            "{}www 3600 IN A 192.0.2.1\n",
            S1.replace(" 1 7200", " 2 7200")
        ));
        let corrections = diff_records(&old, &new, ORIGIN);
        assert_eq!(corrections.len(), 2);
        assert_eq!(corrections[0].kind, CorrectionKind::Create);
        assert_eq!(corrections[0].rrs[0].rr_type(), RrType::A);
        assert_eq!(corrections[1].kind, CorrectionKind::Change);
        assert!(corrections[1].msg.contains("serial 1→2"), "{}", corrections[1].msg);

        let mut applied = old.clone();
        for c in &corrections {
            c.apply_to(&mut applied).unwrap();
        }
        assert_eq!(canonical(applied), canonical(new));
    }

    #[test]
    fn ttl_only_differences_are_changes() {
        let old = records("www 300 A 192.0.2.1");
        let new = records("WWW 600 A 192.0.2.1");
        let corrections = diff_records(&old, &new, ORIGIN);
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].kind, CorrectionKind::Change);
        assert!(corrections[0].msg.ends_with("TTL 300→600"));
    }

    #[test]
    fn deletions_come_first_and_apex_authority_last() {
        let old = records(&format!("{S1}old 300 TXT \"x\"\n"));
        let new = records(&format!(
            "{}new 300 TXT \"y\"\n",
            S1.replace("ns2.example.com.", "ns3.example.com.")
        ));
        let kinds: Vec<_> = diff_records(&old, &new, ORIGIN)
            .into_iter()
            .map(|c| (c.kind, c.rrs[0].name.clone()))
            .collect();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[0].0, CorrectionKind::Delete);
        assert_eq!(kinds[1].0, CorrectionKind::Create);
        assert_eq!(kinds[2], (CorrectionKind::Change, "example.com.".to_string()));
    }

    #[test]
    fn ids_are_deterministic_and_json_carries_text() {
        let old = records("www 300 A 192.0.2.1");
        let new = records("www 300 A 192.0.2.2");
        let a = diff_records(&old, &new, ORIGIN);
        let b = diff_records(&old, &new, ORIGIN);
        assert_eq!(a[0].id, b[0].id);
        assert!(!a[0].id.is_empty());

        let v = serde_json::to_value(&a[0]).unwrap();
        assert_eq!(v["kind"], "Change");
        assert_eq!(v["rrs"][0], "www.example.com.\t300\tIN\tA\t192.0.2.2");
        let back: Correction = serde_json::from_value(v).unwrap();
        assert_eq!(back, a[0]);
    }

    #[test]
    fn missing_records_fail_to_apply() {
        let c = &diff_records(&[], &records("www 300 A 192.0.2.1"), ORIGIN)[0];
        let delete = Correction {
            kind: CorrectionKind::Delete,
            ..c.clone()
        };
        let mut empty = Vec::new();
        assert!(matches!(delete.apply_to(&mut empty), Err(Error::Provider(_))));
    }
}
