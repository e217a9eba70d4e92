use crate::error::Error;
use crate::rr::{name, RData, Record, RrType};
use crate::services::analyzer::{group_by_owner, Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType, SubService};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

/// Delegation signer, published at the parent side of a delegation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ds {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: String,
}

/// A subzone handed over to other name servers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub name_servers: Vec<String>,
    #[serde(default)]
    pub ds: Vec<Ds>,
}

impl ServiceBody for Delegation {
    fn get_nb_resources(&self) -> usize {
        self.name_servers.len() + self.ds.len()
    }

    fn gen_comment(&self) -> String {
        let mut comment = self.name_servers.join(", ");
        if !self.ds.is_empty() {
            comment.push_str(&format!(" (DNSSEC: {} DS)", self.ds.len()));
        }
        comment
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        if subdomain.is_empty() {
            return Err(Error::Validation("the zone apex can't be delegated".into()));
        }
        let owner = name::join("", subdomain);
        let mut rrs: Vec<Record> = self
            .name_servers
            .iter()
            .map(|ns| Record::new(owner.clone(), ttl, RData::NS { ns: ns.clone() }))
            .collect();
        rrs.extend(self.ds.iter().map(|ds| {
            Record::new(
                owner.clone(),
                ttl,
                RData::DS {
                    key_tag: ds.key_tag,
                    algorithm: ds.algorithm,
                    digest_type: ds.digest_type,
                    digest: ds.digest.clone(),
                },
            )
        }));
        Ok(rrs)
    }

    fn map_names(&mut self, f: &dyn Fn(&str) -> String) {
        for ns in &mut self.name_servers {
            *ns = f(ns);
        }
    }
}

fn analyze_delegation(a: &mut Analyzer) -> Result<(), Error> {
    let ns = a
        .search_rr(&[RecordFilter::of_type(RrType::NS)])
        .into_iter()
        .filter(|rr| rr.name != "@")
        .collect();
    for group in group_by_owner(ns) {
        let owner = group[0].name.clone();
        let ds = a.search_rr(&[RecordFilter::of_type(RrType::DS)
            .domain(owner.as_str())
            .ttl(group[0].ttl)]);
        let body = Delegation {
            name_servers: group
                .iter()
                .filter_map(|rr| match &rr.data {
                    RData::NS { ns } => Some(ns.clone()),
                    _ => None,
                })
                .collect(),
            ds: ds
                .iter()
                .filter_map(|rr| match &rr.data {
                    RData::DS {
                        key_tag,
                        algorithm,
                        digest_type,
                        digest,
                    } => Some(Ds {
                        key_tag: *key_tag,
                        algorithm: *algorithm,
                        digest_type: *digest_type,
                        digest: digest.clone(),
                    }),
                    _ => None,
                })
                .collect(),
        };
        let mut rrs = group;
        rrs.extend(ds);
        a.try_use_rrs(&rrs, &owner, body);
    }
    Ok(())
}

impl ServiceKind for Delegation {
    const KIND: &'static str = "abstract.Delegation";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Delegation",
            description: "Delegate this subdomain to other name servers.",
            family: "abstract",
            categories: &["internal"],
            weight: 2,
            restrictions: ServiceRestrictions {
                leaf: true,
                single: true,
                near_alone: true,
                need_types: &[RrType::NS],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_delegation),
            fields: vec![
                Field::new(
                    "name_servers",
                    "Name servers",
                    FieldType::List(Box::new(FieldType::Domain)),
                )
                .required(),
                Field::new(
                    "ds",
                    "Delegation signers",
                    FieldType::List(Box::new(FieldType::SubService("svcs.DS"))),
                ),
            ],
            subservices: vec![SubService {
                name: "svcs.DS",
                fields: vec![
                    Field::new("key_tag", "Key tag", FieldType::Number).required(),
                    Field::new("algorithm", "Algorithm", FieldType::Number)
                        .required()
                        .default_value(13),
                    Field::new("digest_type", "Digest type", FieldType::Number)
                        .required()
                        .default_value(2),
                    Field::new("digest", "Digest", FieldType::String).required(),
                ],
            }],
        }
    }
}
