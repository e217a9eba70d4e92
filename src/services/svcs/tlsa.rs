use crate::error::Error;
use crate::rr::{name, RData, Record, RrType};
use crate::services::analyzer::{Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType, SubService};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

/// One DANE association (RFC 6698) bound to a port and protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tlsa {
    pub port: u16,
    pub proto: String,
    pub usage: u8,
    pub selector: u8,
    pub matching_type: u8,
    pub certificate: String,
}

impl Default for Tlsa {
    fn default() -> Self {
        Tlsa {
            port: 443,
            proto: "tcp".into(),
            usage: 3,
            selector: 1,
            matching_type: 1,
            certificate: String::new(),
        }
    }
}

/// TLSA records of a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TLSAs {
    pub records: Vec<Tlsa>,
}

impl ServiceBody for TLSAs {
    fn get_nb_resources(&self) -> usize {
        self.records.len()
    }

    fn gen_comment(&self) -> String {
        let mut ports: Vec<String> = Vec::new();
        for r in &self.records {
            let p = format!("{}/{}", r.port, r.proto);
            if !ports.contains(&p) {
                ports.push(p);
            }
        }
        ports.join(", ")
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        Ok(self
            .records
            .iter()
            .map(|r| {
                Record::new(
                    name::join(&format!("_{}._{}", r.port, r.proto), subdomain),
                    ttl,
                    RData::TLSA {
                        usage: r.usage,
                        selector: r.selector,
                        matching_type: r.matching_type,
                        certificate: r.certificate.clone(),
                    },
                )
            })
            .collect())
    }
}

/// `_443._tcp.www` gives `(443, "tcp", "www")`.
fn split_tlsa_owner(owner: &str) -> Option<(u16, String, String)> {
    let mut labels = owner.splitn(3, '.');
    let port = labels.next()?.strip_prefix('_')?.parse().ok()?;
    let proto = labels.next()?.strip_prefix('_')?.to_string();
    Some((port, proto, labels.next().unwrap_or_default().to_string()))
}

fn analyze_tlsa(a: &mut Analyzer) -> Result<(), Error> {
    let found: Vec<(Record, u16, String, String)> = a
        .search_rr(&[RecordFilter::of_type(RrType::TLSA)])
        .into_iter()
        .filter_map(|rr| {
            let (port, proto, subdomain) = split_tlsa_owner(&rr.name)?;
            Some((rr, port, proto, subdomain))
        })
        .collect();

    // Group per host and TTL across ports.
    let mut hosts: Vec<(String, u32)> = Vec::new();
    for (rr, _, _, subdomain) in &found {
        if !hosts
            .iter()
            .any(|(s, ttl)| s.eq_ignore_ascii_case(subdomain) && *ttl == rr.ttl)
        {
            hosts.push((subdomain.clone(), rr.ttl));
        }
    }
    for (host, ttl) in hosts {
        let mine: Vec<&(Record, u16, String, String)> = found
            .iter()
            .filter(|(rr, _, _, s)| s.eq_ignore_ascii_case(&host) && rr.ttl == ttl)
            .collect();
        let body = TLSAs {
            records: mine
                .iter()
                .filter_map(|(rr, port, proto, _)| match &rr.data {
                    RData::TLSA {
                        usage,
                        selector,
                        matching_type,
                        certificate,
                    } => Some(Tlsa {
                        port: *port,
                        proto: proto.clone(),
                        usage: *usage,
                        selector: *selector,
                        matching_type: *matching_type,
                        certificate: certificate.clone(),
                    }),
                    _ => None,
                })
                .collect(),
        };
        let rrs: Vec<Record> = mine.iter().map(|(rr, ..)| rr.clone()).collect();
        a.try_use_rrs(&rrs, &host, body);
    }
    Ok(())
}

impl ServiceKind for TLSAs {
    const KIND: &'static str = "svcs.TLSAs";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "DANE",
            description: "Pin the TLS certificates of this host.",
            family: "",
            categories: &["security"],
            weight: 301,
            restrictions: ServiceRestrictions {
                single: true,
                need_types: &[RrType::TLSA],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_tlsa),
            fields: vec![Field::new(
                "records",
                "Associations",
                FieldType::List(Box::new(FieldType::SubService("svcs.TLSA"))),
            )
            .required()],
            subservices: vec![SubService {
                name: "svcs.TLSA",
                fields: vec![
                    Field::new("port", "Port", FieldType::Number).default_value(443),
                    Field::new("proto", "Protocol", FieldType::String)
                        .default_value("tcp")
                        .choices(&["tcp", "udp", "sctp"]),
                    Field::new("usage", "Certificate usage", FieldType::Number).default_value(3),
                    Field::new("selector", "Selector", FieldType::Number).default_value(1),
                    Field::new("matching_type", "Matching type", FieldType::Number)
                        .default_value(1),
                    Field::new("certificate", "Certificate association data", FieldType::Text)
                        .required(),
                ],
            }],
        }
    }
}
