use crate::error::Error;
use crate::rr::{name, RData, Record, RrType};
use crate::services::analyzer::{Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

fn cname(owner: String, ttl: u32, target: &str) -> Record {
    Record::new(
        owner,
        ttl,
        RData::CNAME {
            target: target.to_string(),
        },
    )
}

/// An alias of the whole subdomain to another name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cname {
    pub target: String,
}

impl ServiceBody for Cname {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        format!("→ {}", self.target)
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        if subdomain.is_empty() {
            return Err(Error::Validation("the zone apex can't be an alias".into()));
        }
        Ok(vec![cname(name::join("", subdomain), ttl, &self.target)])
    }

    fn map_names(&mut self, f: &dyn Fn(&str) -> String) {
        self.target = f(&self.target);
    }
}

fn analyze_cname(a: &mut Analyzer) -> Result<(), Error> {
    for rr in a.search_rr(&[RecordFilter::of_type(RrType::CNAME)]) {
        let RData::CNAME { target } = &rr.data else {
            continue;
        };
        let body = Cname {
            target: target.clone(),
        };
        let subdomain = name::subdomain_of(&rr.name);
        a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for Cname {
    const KIND: &'static str = "svcs.CNAME";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Alias",
            description: "Make this subdomain an alias of another name.",
            family: "",
            categories: &["alias"],
            weight: 310,
            restrictions: ServiceRestrictions {
                alone: true,
                single: true,
                need_types: &[RrType::CNAME],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_cname),
            fields: vec![Field::new("target", "Target", FieldType::Domain).required()],
            subservices: Vec::new(),
        }
    }
}

/// An alias living on an underscore label, such as a delegated `_dmarc` policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialCNAME {
    /// The underscore label(s) in front of the subdomain.
    pub subdomain_prefix: String,
    pub target: String,
}

impl ServiceBody for SpecialCNAME {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        format!("{} → {}", self.subdomain_prefix, self.target)
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        if !self.subdomain_prefix.starts_with('_') {
            return Err(Error::Validation(
                "the alias prefix must start with an underscore".into(),
            ));
        }
        Ok(vec![cname(
            name::join(&self.subdomain_prefix, subdomain),
            ttl,
            &self.target,
        )])
    }

    fn map_names(&mut self, f: &dyn Fn(&str) -> String) {
        self.target = f(&self.target);
    }
}

fn analyze_special_cname(a: &mut Analyzer) -> Result<(), Error> {
    for rr in a.search_rr(&[RecordFilter::of_type(RrType::CNAME).prefix("_")]) {
        let RData::CNAME { target } = &rr.data else {
            continue;
        };
        let Some((prefix, subdomain)) = name::split_prefixed(&rr.name, "_") else {
            continue;
        };
        let body = SpecialCNAME {
            subdomain_prefix: prefix.to_string(),
            target: target.clone(),
        };
        a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for SpecialCNAME {
    const KIND: &'static str = "svcs.SpecialCNAME";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Service alias",
            description: "Alias an underscore label, such as _dmarc, to another name.",
            family: "",
            categories: &["alias"],
            weight: 309,
            restrictions: ServiceRestrictions::default(),
            analyzer: Some(analyze_special_cname),
            fields: vec![
                Field::new("subdomain_prefix", "Label", FieldType::String)
                    .required()
                    .placeholder("_dmarc"),
                Field::new("target", "Target", FieldType::Domain).required(),
            ],
            subservices: Vec::new(),
        }
    }
}
