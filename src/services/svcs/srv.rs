use crate::error::Error;
use crate::rr::{name, RData, Record, RrType};
use crate::services::analyzer::{group_by_owner, Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType, SubService};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrvTarget {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

impl SrvTarget {
    #[must_use]
    pub fn to_record(&self, owner: &str, ttl: u32) -> Record {
        Record::new(
            owner,
            ttl,
            RData::SRV {
                priority: self.priority,
                weight: self.weight,
                port: self.port,
                target: self.target.clone(),
            },
        )
    }
}

pub(crate) fn srv_targets(rrs: &[Record]) -> Vec<SrvTarget> {
    rrs.iter()
        .filter_map(|rr| match &rr.data {
            RData::SRV {
                priority,
                weight,
                port,
                target,
            } => Some(SrvTarget {
                priority: *priority,
                weight: *weight,
                port: *port,
                target: target.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// SRV records for a service without a dedicated kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnknownSRV {
    /// Service label, such as `_sip`.
    pub service: String,
    /// Protocol label, such as `_tcp`.
    pub proto: String,
    pub records: Vec<SrvTarget>,
}

impl ServiceBody for UnknownSRV {
    fn get_nb_resources(&self) -> usize {
        self.records.len()
    }

    fn gen_comment(&self) -> String {
        format!(
            "{}/{}: {}",
            self.service.trim_start_matches('_'),
            self.proto.trim_start_matches('_'),
            self.records
                .iter()
                .map(|r| format!("{}:{}", r.target, r.port))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        if !self.service.starts_with('_') || !self.proto.starts_with('_') {
            return Err(Error::Validation(
                "SRV service and protocol labels must start with an underscore".into(),
            ));
        }
        let owner = name::join(&format!("{}.{}", self.service, self.proto), subdomain);
        Ok(self.records.iter().map(|r| r.to_record(&owner, ttl)).collect())
    }

    fn map_names(&mut self, f: &dyn Fn(&str) -> String) {
        for r in &mut self.records {
            r.target = f(&r.target);
        }
    }
}

fn split_srv_owner(owner: &str) -> Option<(String, String, String)> {
    let mut labels = owner.splitn(3, '.');
    let service = labels.next()?;
    let proto = labels.next()?;
    if !service.starts_with('_') || !proto.starts_with('_') {
        return None;
    }
    Some((
        service.to_string(),
        proto.to_string(),
        labels.next().unwrap_or_default().to_string(),
    ))
}

fn analyze_srv(a: &mut Analyzer) -> Result<(), Error> {
    let found = a
        .search_rr(&[RecordFilter::of_type(RrType::SRV).prefix("_")])
        .into_iter()
        .filter(|rr| split_srv_owner(&rr.name).is_some())
        .collect();
    for group in group_by_owner(found) {
        let Some((service, proto, subdomain)) = split_srv_owner(&group[0].name) else {
            continue;
        };
        let body = UnknownSRV {
            service,
            proto,
            records: srv_targets(&group),
        };
        a.try_use_rrs(&group, &subdomain, body);
    }
    Ok(())
}

pub(crate) fn srv_subservice() -> SubService {
    SubService {
        name: "svcs.SRVRecord",
        fields: vec![
            Field::new("priority", "Priority", FieldType::Number).default_value(10),
            Field::new("weight", "Weight", FieldType::Number).default_value(0),
            Field::new("port", "Port", FieldType::Number).required(),
            Field::new("target", "Target", FieldType::Domain).required(),
        ],
    }
}

impl ServiceKind for UnknownSRV {
    const KIND: &'static str = "svcs.UnknownSRV";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Service location",
            description: "SRV records announcing where a protocol is served.",
            family: "",
            categories: &["service"],
            weight: 300,
            restrictions: ServiceRestrictions {
                need_types: &[RrType::SRV],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_srv),
            fields: vec![
                Field::new("service", "Service", FieldType::String)
                    .required()
                    .placeholder("_sip"),
                Field::new("proto", "Protocol", FieldType::String)
                    .required()
                    .choices(&["_tcp", "_udp", "_tls"]),
                Field::new(
                    "records",
                    "Targets",
                    FieldType::List(Box::new(FieldType::SubService("svcs.SRVRecord"))),
                )
                .required(),
            ],
            subservices: vec![srv_subservice()],
        }
    }
}
