use crate::error::Error;
use crate::rr::{name, RData, Record, Txt};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

/// A record no other kind recognised, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orphan {
    pub data: RData,
}

impl Default for Orphan {
    fn default() -> Self {
        Orphan {
            data: RData::TXT(Txt::default()),
        }
    }
}

impl ServiceBody for Orphan {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        format!("{} {}", self.data.rr_type(), self.data)
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        Ok(vec![Record::new(
            name::join("", subdomain),
            ttl,
            self.data.clone(),
        )])
    }

    fn map_names(&mut self, f: &dyn Fn(&str) -> String) {
        self.data.map_names(&|n: &str| f(n));
    }
}

impl ServiceKind for Orphan {
    const KIND: &'static str = "svcs.Orphan";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Record",
            description: "A record without a more specific service.",
            family: "",
            categories: &["other"],
            weight: u32::MAX,
            restrictions: ServiceRestrictions::default(),
            analyzer: None,
            fields: vec![Field::new("data", "Record", FieldType::Text).required()],
            subservices: Vec::new(),
        }
    }
}
