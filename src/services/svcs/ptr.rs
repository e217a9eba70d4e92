use crate::error::Error;
use crate::rr::{name, RData, Record, RrType};
use crate::services::analyzer::{Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

/// Reverse mapping to a host name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ptr {
    pub target: String,
}

impl ServiceBody for Ptr {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        self.target.clone()
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        Ok(vec![Record::new(
            name::join("", subdomain),
            ttl,
            RData::PTR {
                ptr: self.target.clone(),
            },
        )])
    }

    fn map_names(&mut self, f: &dyn Fn(&str) -> String) {
        self.target = f(&self.target);
    }
}

fn analyze_ptr(a: &mut Analyzer) -> Result<(), Error> {
    for rr in a.search_rr(&[RecordFilter::of_type(RrType::PTR)]) {
        let RData::PTR { ptr } = &rr.data else {
            continue;
        };
        let body = Ptr {
            target: ptr.clone(),
        };
        let subdomain = name::subdomain_of(&rr.name);
        a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for Ptr {
    const KIND: &'static str = "svcs.PTR";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Reverse pointer",
            description: "Name of the host owning this address.",
            family: "",
            categories: &["reverse"],
            weight: 311,
            restrictions: ServiceRestrictions {
                single: true,
                need_types: &[RrType::PTR],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_ptr),
            fields: vec![Field::new("target", "Host name", FieldType::Domain).required()],
            subservices: Vec::new(),
        }
    }
}
