use crate::error::Error;
use crate::rr::{name, RData, Record, RrType};
use crate::services::analyzer::{Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sshfp {
    pub algorithm: u8,
    pub fp_type: u8,
    pub fingerprint: String,
}

/// A host: its addresses and SSH key fingerprints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aaaa: Option<Ipv6Addr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sshfp: Vec<Sshfp>,
}

impl ServiceBody for Server {
    fn get_nb_resources(&self) -> usize {
        usize::from(self.a.is_some()) + usize::from(self.aaaa.is_some()) + self.sshfp.len()
    }

    fn gen_comment(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(a) = self.a {
            parts.push(a.to_string());
        }
        if let Some(aaaa) = self.aaaa {
            parts.push(aaaa.to_string());
        }
        if !self.sshfp.is_empty() {
            parts.push(format!("{} SSH fingerprints", self.sshfp.len()));
        }
        parts.join(", ")
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        let owner = name::join("", subdomain);
        let mut rrs = Vec::new();
        if let Some(a) = self.a {
            rrs.push(Record::new(owner.clone(), ttl, RData::A { a }));
        }
        if let Some(aaaa) = self.aaaa {
            rrs.push(Record::new(owner.clone(), ttl, RData::AAAA { aaaa }));
        }
        for fp in &self.sshfp {
            rrs.push(Record::new(
                owner.clone(),
                ttl,
                RData::SSHFP {
                    algorithm: fp.algorithm,
                    fp_type: fp.fp_type,
                    fingerprint: fp.fingerprint.clone(),
                },
            ));
        }
        if rrs.is_empty() {
            return Err(Error::Validation("a server needs at least one address".into()));
        }
        Ok(rrs)
    }
}

fn analyze_server(a: &mut Analyzer) -> Result<(), Error> {
    let addresses = a.search_rr(&[
        RecordFilter::of_type(RrType::A),
        RecordFilter::of_type(RrType::AAAA),
    ]);
    let mut owners: Vec<String> = Vec::new();
    for rr in &addresses {
        if !owners.iter().any(|o| o.eq_ignore_ascii_case(&rr.name)) {
            owners.push(rr.name.clone());
        }
    }

    for owner in owners {
        let mut v4 = a.search_rr(&[RecordFilter::of_type(RrType::A).domain(owner.as_str())]);
        let mut v6 = a.search_rr(&[RecordFilter::of_type(RrType::AAAA).domain(owner.as_str())]);
        let mut sshfp = a.search_rr(&[RecordFilter::of_type(RrType::SSHFP).domain(owner.as_str())]);
        let subdomain = name::subdomain_of(&owner);

        while !v4.is_empty() || !v6.is_empty() {
            let first = v4.first().or(v6.first()).map(|rr| rr.ttl);
            let mut rrs = Vec::new();
            let mut body = Server::default();
            if let Some(pos) = v4.iter().position(|rr| Some(rr.ttl) == first) {
                let rr = v4.remove(pos);
                if let RData::A { a } = rr.data {
                    body.a = Some(a);
                }
                rrs.push(rr);
            }
            if let Some(pos) = v6.iter().position(|rr| Some(rr.ttl) == first) {
                let rr = v6.remove(pos);
                if let RData::AAAA { aaaa } = rr.data {
                    body.aaaa = Some(aaaa);
                }
                rrs.push(rr);
            }
            let fps: Vec<Record> = sshfp
                .iter()
                .filter(|rr| Some(rr.ttl) == first)
                .cloned()
                .collect();
            sshfp.retain(|rr| Some(rr.ttl) != first);
            for rr in &fps {
                if let RData::SSHFP {
                    algorithm,
                    fp_type,
                    fingerprint,
                } = &rr.data
                {
                    body.sshfp.push(Sshfp {
                        algorithm: *algorithm,
                        fp_type: *fp_type,
                        fingerprint: fingerprint.clone(),
                    });
                }
            }
            rrs.extend(fps);
            a.try_use_rrs(&rrs, &subdomain, body);
        }
    }
    Ok(())
}

impl ServiceKind for Server {
    const KIND: &'static str = "abstract.Server";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Server",
            description: "A host reachable at this name, with its SSH fingerprints.",
            family: "abstract",
            categories: &["server"],
            weight: 100,
            restrictions: ServiceRestrictions {
                glue: true,
                exclusive: &["svcs.CNAME"],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_server),
            fields: vec![
                Field::new("a", "IPv4 address", FieldType::IPv4).placeholder("192.0.2.1"),
                Field::new("aaaa", "IPv6 address", FieldType::IPv6).placeholder("2001:db8::1"),
                Field::new(
                    "sshfp",
                    "SSH fingerprints",
                    FieldType::List(Box::new(FieldType::String)),
                ),
            ],
            subservices: Vec::new(),
        }
    }
}
