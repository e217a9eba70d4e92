use crate::error::Error;
use crate::rr::{self, name, RData, Record, RrType};
use crate::services::analyzer::{Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

/// Free-form text, one record per service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Txt {
    pub txt: rr::Txt,
}

impl ServiceBody for Txt {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        const MAX: usize = 40;
        let text = self.txt.text();
        match text.char_indices().nth(MAX) {
            Some((idx, _)) => format!("{}…", &text[..idx]),
            None => text.into_owned(),
        }
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        Ok(vec![Record::new(
            name::join("", subdomain),
            ttl,
            RData::TXT(self.txt.clone()),
        )])
    }
}

fn analyze_txt(a: &mut Analyzer) -> Result<(), Error> {
    for rr in a.search_rr(&[RecordFilter::of_type(RrType::TXT)]) {
        let RData::TXT(txt) = &rr.data else {
            continue;
        };
        let body = Txt { txt: txt.clone() };
        let subdomain = name::subdomain_of(&rr.name);
        a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for Txt {
    const KIND: &'static str = "svcs.TXT";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Text record",
            description: "Arbitrary text attached to this subdomain.",
            family: "",
            categories: &["other"],
            weight: 400,
            restrictions: ServiceRestrictions {
                need_types: &[RrType::TXT],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_txt),
            fields: vec![Field::new("txt.txt", "Content", FieldType::Text).required()],
            subservices: Vec::new(),
        }
    }
}
