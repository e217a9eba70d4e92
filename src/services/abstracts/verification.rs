//! Ownership proofs published as TXT records.

use crate::error::Error;
use crate::rr::{name, RData, Record, RrType, Txt};
use crate::services::analyzer::{group_by_owner, Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

fn txt(owner: &str, ttl: u32, value: &str) -> Record {
    Record::new(owner, ttl, RData::TXT(Txt::new(value)))
}

/// ACME DNS-01 challenge tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ACMEChallenge {
    pub challenges: Vec<String>,
}

impl ServiceBody for ACMEChallenge {
    fn get_nb_resources(&self) -> usize {
        self.challenges.len()
    }

    fn gen_comment(&self) -> String {
        format!("{} pending challenges", self.challenges.len())
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        let owner = name::join("_acme-challenge", subdomain);
        Ok(self
            .challenges
            .iter()
            .map(|c| txt(&owner, ttl, c))
            .collect())
    }
}

fn analyze_acme(a: &mut Analyzer) -> Result<(), Error> {
    let found = a
        .search_rr(&[RecordFilter::of_type(RrType::TXT).prefix("_acme-challenge")])
        .into_iter()
        .filter(|rr| {
            name::split_prefixed(&rr.name, "_acme-challenge")
                .is_some_and(|(label, _)| label.eq_ignore_ascii_case("_acme-challenge"))
        })
        .collect();
    for group in group_by_owner(found) {
        let Some((_, subdomain)) = name::split_prefixed(&group[0].name, "_acme-challenge") else {
            continue;
        };
        let body = ACMEChallenge {
            challenges: group
                .iter()
                .filter_map(|rr| rr.txt().map(str::to_string))
                .collect(),
        };
        a.try_use_rrs(&group, &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for ACMEChallenge {
    const KIND: &'static str = "abstract.ACMEChallenge";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "ACME challenge",
            description: "DNS-01 tokens proving control of the domain to a certificate authority.",
            family: "abstract",
            categories: &["verification"],
            weight: 70,
            restrictions: ServiceRestrictions {
                single: true,
                need_types: &[RrType::TXT],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_acme),
            fields: vec![Field::new(
                "challenges",
                "Challenges",
                FieldType::List(Box::new(FieldType::String)),
            )
            .required()],
            subservices: Vec::new(),
        }
    }
}

/// GitHub organization domain verification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GithubOrgVerif {
    pub organization: String,
    pub code: String,
}

const GITHUB_PREFIX: &str = "_github-challenge-";

impl ServiceBody for GithubOrgVerif {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        self.organization.clone()
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        if self.organization.is_empty() {
            return Err(Error::Validation("missing GitHub organization".into()));
        }
        let owner = name::join(&format!("{GITHUB_PREFIX}{}", self.organization), subdomain);
        Ok(vec![txt(&owner, ttl, &self.code)])
    }
}

fn analyze_github(a: &mut Analyzer) -> Result<(), Error> {
    for rr in a.search_rr(&[RecordFilter::of_type(RrType::TXT).prefix(GITHUB_PREFIX)]) {
        let Some((label, subdomain)) = name::split_prefixed(&rr.name, GITHUB_PREFIX) else {
            continue;
        };
        let body = GithubOrgVerif {
            organization: label[GITHUB_PREFIX.len()..].to_string(),
            code: rr.txt().unwrap_or_default().to_string(),
        };
        a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for GithubOrgVerif {
    const KIND: &'static str = "abstract.GithubOrgVerif";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "GitHub verification",
            description: "Verify the domain for a GitHub organization.",
            family: "abstract",
            categories: &["verification"],
            weight: 71,
            restrictions: ServiceRestrictions {
                need_types: &[RrType::TXT],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_github),
            fields: vec![
                Field::new("organization", "Organization", FieldType::String).required(),
                Field::new("code", "Verification code", FieldType::String).required(),
            ],
            subservices: Vec::new(),
        }
    }
}

/// Site verification token with a well-known `<service>-site-verification=` prefix.
macro_rules! site_verification {
    ($ty:ident, $kind:literal, $name:literal, $prefix:literal, $weight:literal, $analyze:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $ty {
            pub site_verification: String,
        }

        impl ServiceBody for $ty {
            fn get_nb_resources(&self) -> usize {
                1
            }

            fn gen_comment(&self) -> String {
                self.site_verification.clone()
            }

            fn get_records(
                &self,
                subdomain: &str,
                ttl: u32,
                _origin: &str,
            ) -> Result<Vec<Record>, Error> {
                let value = format!("{}{}", $prefix, self.site_verification);
                Ok(vec![txt(&name::join("", subdomain), ttl, &value)])
            }
        }

        fn $analyze(a: &mut Analyzer) -> Result<(), Error> {
            for rr in a.search_rr(&[RecordFilter::of_type(RrType::TXT).contains($prefix)]) {
                let Some(code) = rr.txt().and_then(|t| t.strip_prefix($prefix)) else {
                    continue;
                };
                let body = $ty {
                    site_verification: code.to_string(),
                };
                let subdomain = name::subdomain_of(&rr.name);
                a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
            }
            Ok(())
        }

        impl ServiceKind for $ty {
            const KIND: &'static str = $kind;

            fn spec() -> ServiceSpec {
                ServiceSpec {
                    name: $name,
                    description: concat!("Site ownership token for ", $name, "."),
                    family: "abstract",
                    categories: &["verification"],
                    weight: $weight,
                    restrictions: ServiceRestrictions {
                        single: true,
                        need_types: &[RrType::TXT],
                        ..ServiceRestrictions::default()
                    },
                    analyzer: Some($analyze),
                    fields: vec![Field::new(
                        "site_verification",
                        "Verification code",
                        FieldType::String,
                    )
                    .required()],
                    subservices: Vec::new(),
                }
            }
        }
    };
}

site_verification!(
    GoogleVerif,
    "abstract.GoogleVerif",
    "Google verification",
    "google-site-verification=",
    72,
    analyze_google
);
site_verification!(
    KeybaseVerif,
    "abstract.KeybaseVerif",
    "Keybase verification",
    "keybase-site-verification=",
    73,
    analyze_keybase
);
