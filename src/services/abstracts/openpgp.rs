use crate::error::Error;
use crate::rr::{name, RData, Record, RrType};
use crate::services::analyzer::{Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

const OPENPGP_LABEL: &str = "_openpgpkey";

/// An OpenPGP public key published for a mailbox (RFC 7929).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenPGP {
    /// Hashed local part, the label in front of `_openpgpkey`.
    pub identifier: String,
    /// Base64 key material.
    pub pubkey: String,
}

impl ServiceBody for OpenPGP {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        self.identifier.clone()
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        if self.identifier.is_empty() || self.pubkey.is_empty() {
            return Err(Error::Validation("an OpenPGP key needs an identifier and a key".into()));
        }
        let owner = name::join(&format!("{}.{OPENPGP_LABEL}", self.identifier), subdomain);
        Ok(vec![Record::new(
            owner,
            ttl,
            RData::Other {
                rrtype: RrType::OPENPGPKEY,
                fields: vec![self.pubkey.clone()],
            },
        )])
    }
}

fn analyze_openpgp(a: &mut Analyzer) -> Result<(), Error> {
    for rr in a.search_rr(&[RecordFilter::of_type(RrType::OPENPGPKEY)]) {
        let Some((identifier, subdomain)) = name::split_around_label(&rr.name, OPENPGP_LABEL)
        else {
            continue;
        };
        let RData::Other { fields, .. } = &rr.data else {
            continue;
        };
        let body = OpenPGP {
            identifier,
            pubkey: fields.concat(),
        };
        a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for OpenPGP {
    const KIND: &'static str = "abstract.OpenPGP";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "OpenPGP key",
            description: "Publish an OpenPGP public key for a mailbox of this domain.",
            family: "abstract",
            categories: &["email", "security"],
            weight: 74,
            restrictions: ServiceRestrictions {
                need_types: &[RrType::OPENPGPKEY],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_openpgp),
            fields: vec![
                Field::new("identifier", "Hashed local part", FieldType::String).required(),
                Field::new("pubkey", "Public key", FieldType::Text).required(),
            ],
            subservices: Vec::new(),
        }
    }
}
