use crate::error::Error;
use crate::rr::{name, Record, RrType};
use crate::services::analyzer::{group_by_owner, Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType};
use crate::services::svcs::srv::{srv_targets, SrvTarget};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

const MATRIX_PREFIX: &str = "_matrix._tcp";

/// Matrix homeserver discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixIM {
    pub records: Vec<SrvTarget>,
}

impl ServiceBody for MatrixIM {
    fn get_nb_resources(&self) -> usize {
        self.records.len()
    }

    fn gen_comment(&self) -> String {
        self.records
            .iter()
            .map(|r| format!("{}:{}", r.target, r.port))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        let owner = name::join(MATRIX_PREFIX, subdomain);
        Ok(self.records.iter().map(|r| r.to_record(&owner, ttl)).collect())
    }

    fn map_names(&mut self, f: &dyn Fn(&str) -> String) {
        for r in &mut self.records {
            r.target = f(&r.target);
        }
    }
}

fn analyze_matrix(a: &mut Analyzer) -> Result<(), Error> {
    let found = a
        .search_rr(&[RecordFilter::of_type(RrType::SRV).prefix(MATRIX_PREFIX)])
        .into_iter()
        .filter(|rr| name::strip_prefix_labels(&rr.name, MATRIX_PREFIX).is_some())
        .collect();
    for group in group_by_owner(found) {
        let Some(subdomain) = name::strip_prefix_labels(&group[0].name, MATRIX_PREFIX) else {
            continue;
        };
        let body = MatrixIM {
            records: srv_targets(&group),
        };
        a.try_use_rrs(&group, &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for MatrixIM {
    const KIND: &'static str = "abstract.MatrixIM";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Matrix IM",
            description: "Locate the Matrix homeserver of this domain.",
            family: "abstract",
            categories: &["communication"],
            weight: 60,
            restrictions: ServiceRestrictions {
                single: true,
                need_types: &[RrType::SRV],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_matrix),
            fields: vec![Field::new(
                "records",
                "Homeservers",
                FieldType::List(Box::new(FieldType::SubService("svcs.SRVRecord"))),
            )
            .required()],
            subservices: Vec::new(),
        }
    }
}
