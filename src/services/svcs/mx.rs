use crate::error::Error;
use crate::rr::{name, RData, Record, RrType};
use crate::services::analyzer::{group_by_owner, Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType, SubService};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mx {
    pub preference: u16,
    pub target: String,
}

impl Mx {
    #[must_use]
    pub fn to_record(&self, owner: &str, ttl: u32) -> Record {
        Record::new(
            owner,
            ttl,
            RData::MX {
                preference: self.preference,
                mx: self.target.clone(),
            },
        )
    }
}

pub(crate) fn mx_list(rrs: &[Record]) -> Vec<Mx> {
    rrs.iter()
        .filter_map(|rr| match &rr.data {
            RData::MX { preference, mx } => Some(Mx {
                preference: *preference,
                target: mx.clone(),
            }),
            _ => None,
        })
        .collect()
}

pub(crate) fn mx_subservice() -> SubService {
    SubService {
        name: "svcs.MX",
        fields: vec![
            Field::new("preference", "Preference", FieldType::Number)
                .required()
                .default_value(10),
            Field::new("target", "Mail server", FieldType::Domain)
                .required()
                .placeholder("mail.example.com."),
        ],
    }
}

/// Incoming mail servers of a subdomain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MXs {
    pub mxs: Vec<Mx>,
}

impl ServiceBody for MXs {
    fn get_nb_resources(&self) -> usize {
        self.mxs.len()
    }

    fn gen_comment(&self) -> String {
        self.mxs
            .iter()
            .map(|mx| mx.target.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        let owner = name::join("", subdomain);
        Ok(self.mxs.iter().map(|mx| mx.to_record(&owner, ttl)).collect())
    }

    fn map_names(&mut self, f: &dyn Fn(&str) -> String) {
        for mx in &mut self.mxs {
            mx.target = f(&mx.target);
        }
    }
}

fn analyze_mxs(a: &mut Analyzer) -> Result<(), Error> {
    for group in group_by_owner(a.search_rr(&[RecordFilter::of_type(RrType::MX)])) {
        let subdomain = name::subdomain_of(&group[0].name);
        let body = MXs {
            mxs: mx_list(&group),
        };
        a.try_use_rrs(&group, &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for MXs {
    const KIND: &'static str = "svcs.MXs";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "E-Mail servers",
            description: "Servers receiving mail for this domain.",
            family: "",
            categories: &["email"],
            weight: 200,
            restrictions: ServiceRestrictions {
                single: true,
                exclusive: &["google.GSuite"],
                need_types: &[RrType::MX],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_mxs),
            fields: vec![Field::new(
                "mxs",
                "Mail servers",
                FieldType::List(Box::new(FieldType::SubService("svcs.MX"))),
            )
            .required()],
            subservices: vec![mx_subservice()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::parse_zone;
    use crate::services::analyze_zone;

    #[test]
    fn mx_sets_group_per_subdomain() {
        let rrs = parse_zone(
            "@ 3600 MX 10 mx1\n@ 3600 MX 20 mx2.example.net.\nsub 3600 MX 5 mx1",
            "example.com.",
        )
        .unwrap();
        let analysis = analyze_zone("example.com.", &rrs).unwrap();
        let apex = analysis.services[""][0].body_as::<MXs>().unwrap();
        assert_eq!(apex.mxs.len(), 2);
        assert_eq!(apex.mxs[1].target, "mx2.example.net.");
        assert_eq!(analysis.services["sub"][0].meta.nb_resources, 1);
        assert_eq!(analysis.services[""][0].meta.comment, "mx1, mx2.example.net.");
    }
}
