use crate::error::Error;
use crate::rr::{name, RData, Record, RrType};
use crate::services::analyzer::{group_by_owner, Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

/// Start of authority timers and contacts. Timers are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Soa {
    pub ns: String,
    pub mbox: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minttl: u32,
}

impl Soa {
    #[must_use]
    pub fn from_rdata(data: &RData) -> Option<Self> {
        match data {
            RData::SOA {
                ns,
                mbox,
                serial,
                refresh,
                retry,
                expire,
                minttl,
            } => Some(Soa {
                ns: ns.clone(),
                mbox: mbox.clone(),
                serial: *serial,
                refresh: *refresh,
                retry: *retry,
                expire: *expire,
                minttl: *minttl,
            }),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_rdata(&self) -> RData {
        RData::SOA {
            ns: self.ns.clone(),
            mbox: self.mbox.clone(),
            serial: self.serial,
            refresh: self.refresh,
            retry: self.retry,
            expire: self.expire,
            minttl: self.minttl,
        }
    }
}

/// The zone apex: SOA plus the authoritative name servers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub soa: Soa,
    #[serde(default)]
    pub name_servers: Vec<String>,
}

fn ns_records(owner: &str, ttl: u32, name_servers: &[String]) -> Vec<Record> {
    name_servers
        .iter()
        .map(|ns| Record::new(owner, ttl, RData::NS { ns: ns.clone() }))
        .collect()
}

fn ns_targets(rrs: &[Record]) -> Vec<String> {
    rrs.iter()
        .filter_map(|rr| match &rr.data {
            RData::NS { ns } => Some(ns.clone()),
            _ => None,
        })
        .collect()
}

impl ServiceBody for Origin {
    fn get_nb_resources(&self) -> usize {
        1 + self.name_servers.len()
    }

    fn gen_comment(&self) -> String {
        if self.name_servers.is_empty() {
            format!("serial {}", self.soa.serial)
        } else {
            format!("serial {}, {}", self.soa.serial, self.name_servers.join(", "))
        }
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        let owner = name::join("", subdomain);
        let mut rrs = vec![Record::new(owner.clone(), ttl, self.soa.to_rdata())];
        rrs.extend(ns_records(&owner, ttl, &self.name_servers));
        Ok(rrs)
    }

    fn map_names(&mut self, f: &dyn Fn(&str) -> String) {
        self.soa.ns = f(&self.soa.ns);
        self.soa.mbox = f(&self.soa.mbox);
        for ns in &mut self.name_servers {
            *ns = f(ns);
        }
    }
}

fn analyze_origin(a: &mut Analyzer) -> Result<(), Error> {
    let Some(soa_rr) = a
        .search_rr(&[RecordFilter::of_type(RrType::SOA).domain("")])
        .into_iter()
        .next()
    else {
        return Ok(());
    };
    let soa = Soa::from_rdata(&soa_rr.data)
        .ok_or_else(|| Error::Internal("SOA record without SOA data".into()))?;

    let ns = a.search_rr(&[RecordFilter::of_type(RrType::NS)
        .domain("")
        .ttl(soa_rr.ttl)]);
    let body = Origin {
        soa,
        name_servers: ns_targets(&ns),
    };
    let mut rrs = vec![soa_rr];
    rrs.extend(ns);
    a.try_use_rrs(&rrs, "", body);
    Ok(())
}

impl ServiceKind for Origin {
    const KIND: &'static str = "abstract.Origin";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Origin",
            description: "Authoritative information about the zone: SOA and name servers.",
            family: "abstract",
            categories: &["internal"],
            weight: 0,
            restrictions: ServiceRestrictions {
                root_only: true,
                single: true,
                need_types: &[RrType::SOA],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_origin),
            fields: vec![
                Field::new("soa.ns", "Primary name server", FieldType::Domain).required(),
                Field::new("soa.mbox", "Contact address", FieldType::Domain)
                    .required()
                    .description("The responsible mailbox, with the @ written as a dot."),
                Field::new("soa.serial", "Serial", FieldType::Number).hidden(),
                Field::new("soa.refresh", "Refresh", FieldType::Duration).default_value(7200),
                Field::new("soa.retry", "Retry", FieldType::Duration).default_value(3600),
                Field::new("soa.expire", "Expire", FieldType::Duration).default_value(1_209_600),
                Field::new("soa.minttl", "Negative caching TTL", FieldType::Duration)
                    .default_value(3600),
                Field::new(
                    "name_servers",
                    "Name servers",
                    FieldType::List(Box::new(FieldType::Domain)),
                ),
            ],
            subservices: Vec::new(),
        }
    }
}

/// Name servers at the apex without an SOA, as some providers expose them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NSOnlyOrigin {
    pub name_servers: Vec<String>,
}

impl ServiceBody for NSOnlyOrigin {
    fn get_nb_resources(&self) -> usize {
        self.name_servers.len()
    }

    fn gen_comment(&self) -> String {
        self.name_servers.join(", ")
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        Ok(ns_records(&name::join("", subdomain), ttl, &self.name_servers))
    }

    fn map_names(&mut self, f: &dyn Fn(&str) -> String) {
        for ns in &mut self.name_servers {
            *ns = f(ns);
        }
    }
}

fn analyze_ns_only_origin(a: &mut Analyzer) -> Result<(), Error> {
    let ns = a.search_rr(&[RecordFilter::of_type(RrType::NS).domain("")]);
    for group in group_by_owner(ns) {
        let body = NSOnlyOrigin {
            name_servers: ns_targets(&group),
        };
        a.try_use_rrs(&group, "", body);
    }
    Ok(())
}

impl ServiceKind for NSOnlyOrigin {
    const KIND: &'static str = "abstract.NSOnlyOrigin";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Name servers",
            description: "Authoritative name servers of the zone.",
            family: "abstract",
            categories: &["internal"],
            weight: 1,
            restrictions: ServiceRestrictions {
                root_only: true,
                single: true,
                need_types: &[RrType::NS],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_ns_only_origin),
            fields: vec![Field::new(
                "name_servers",
                "Name servers",
                FieldType::List(Box::new(FieldType::Domain)),
            )
            .required()],
            subservices: Vec::new(),
        }
    }
}
