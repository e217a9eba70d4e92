use crate::error::Error;
use crate::rr::{name, RData, Record, RrType};
use crate::services::analyzer::{group_by_owner, Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType, SubService};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaaParameter {
    pub tag: String,
    pub value: String,
}

/// A certificate authority allowed to issue. An empty authority forbids issuance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaaIssuer {
    pub authority: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<CaaParameter>,
}

impl CaaIssuer {
    #[must_use]
    pub fn value(&self) -> String {
        if self.authority.is_empty() && self.parameters.is_empty() {
            return ";".to_string();
        }
        let mut value = self.authority.clone();
        for p in &self.parameters {
            value.push_str(&format!("; {}={}", p.tag, p.value));
        }
        value
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(';');
        let authority = parts.next()?.trim().to_string();
        let mut parameters = Vec::new();
        for part in parts.map(str::trim).filter(|p| !p.is_empty()) {
            let (tag, value) = part.split_once('=')?;
            parameters.push(CaaParameter {
                tag: tag.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
        Some(CaaIssuer {
            authority,
            parameters,
        })
    }
}

/// Certification Authority Authorization (RFC 8659) for a subdomain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CAAPolicy {
    #[serde(default)]
    pub issue: Vec<CaaIssuer>,
    #[serde(default)]
    pub issuewild: Vec<CaaIssuer>,
    #[serde(default)]
    pub issuemail: Vec<CaaIssuer>,
    #[serde(default)]
    pub iodef: Vec<String>,
}

impl CAAPolicy {
    fn entries(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        for (tag, issuers) in [
            ("issue", &self.issue),
            ("issuewild", &self.issuewild),
            ("issuemail", &self.issuemail),
        ] {
            out.extend(issuers.iter().map(|i| (tag, i.value())));
        }
        out.extend(self.iodef.iter().map(|url| ("iodef", url.clone())));
        out
    }
}

impl ServiceBody for CAAPolicy {
    fn get_nb_resources(&self) -> usize {
        self.issue.len() + self.issuewild.len() + self.issuemail.len() + self.iodef.len()
    }

    fn gen_comment(&self) -> String {
        self.entries()
            .into_iter()
            .map(|(tag, value)| format!("{tag} {value}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        let owner = name::join("", subdomain);
        Ok(self
            .entries()
            .into_iter()
            .map(|(tag, value)| {
                Record::new(
                    owner.clone(),
                    ttl,
                    RData::CAA {
                        flag: 0,
                        tag: tag.to_string(),
                        value,
                    },
                )
            })
            .collect())
    }
}

fn analyze_caa(a: &mut Analyzer) -> Result<(), Error> {
    let candidates = a
        .search_rr(&[RecordFilter::of_type(RrType::CAA)])
        .into_iter()
        .filter(|rr| {
            matches!(&rr.data, RData::CAA { flag: 0, tag, .. }
                if ["issue", "issuewild", "issuemail", "iodef"].contains(&tag.as_str()))
        })
        .collect();
    for group in group_by_owner(candidates) {
        let mut body = CAAPolicy::default();
        let mut claimed = Vec::new();
        for rr in group {
            let RData::CAA { tag, value, .. } = &rr.data else {
                continue;
            };
            let list = match tag.as_str() {
                "issue" => &mut body.issue,
                "issuewild" => &mut body.issuewild,
                "issuemail" => &mut body.issuemail,
                _ => {
                    body.iodef.push(value.clone());
                    claimed.push(rr);
                    continue;
                }
            };
            if let Some(issuer) = CaaIssuer::parse(value) {
                list.push(issuer);
                claimed.push(rr);
            }
        }
        if claimed.is_empty() {
            continue;
        }
        let subdomain = name::subdomain_of(&claimed[0].name);
        a.try_use_rrs(&claimed, &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for CAAPolicy {
    const KIND: &'static str = "svcs.CAAPolicy";

    fn spec() -> ServiceSpec {
        let issuers = |id, label| {
            Field::new(
                id,
                label,
                FieldType::List(Box::new(FieldType::SubService("svcs.CAAIssuer"))),
            )
        };
        ServiceSpec {
            name: "Certification authorities",
            description: "Which certificate authorities may issue certificates for this name.",
            family: "",
            categories: &["security"],
            weight: 210,
            restrictions: ServiceRestrictions {
                single: true,
                need_types: &[RrType::CAA],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_caa),
            fields: vec![
                issuers("issue", "Authorized issuers"),
                issuers("issuewild", "Authorized wildcard issuers"),
                issuers("issuemail", "Authorized S/MIME issuers"),
                Field::new("iodef", "Report violations to", FieldType::List(Box::new(FieldType::String)))
                    .placeholder("mailto:security@example.com"),
            ],
            subservices: vec![SubService {
                name: "svcs.CAAIssuer",
                fields: vec![
                    Field::new("authority", "Certificate authority", FieldType::Domain)
                        .placeholder("letsencrypt.org")
                        .description("Leave empty to forbid any issuance."),
                    Field::new("parameters", "Parameters", FieldType::List(Box::new(FieldType::String))),
                ],
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuer_values() {
        let issuer = CaaIssuer::parse("letsencrypt.org; validationmethods=dns-01").unwrap();
        assert_eq!(issuer.authority, "letsencrypt.org");
        assert_eq!(issuer.parameters[0].tag, "validationmethods");
        assert_eq!(issuer.value(), "letsencrypt.org; validationmethods=dns-01");
        assert_eq!(CaaIssuer::parse(";").unwrap().value(), ";");
        assert!(CaaIssuer::parse("ca.example; broken").is_none());
    }
}
