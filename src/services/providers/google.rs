use crate::error::Error;
use crate::rr::{name, Record, RrType};
use crate::services::analyzer::{group_by_owner, Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType};
use crate::services::svcs::mx::{mx_list, Mx};
use crate::services::ServiceBody;
use serde::{Deserialize, Serialize};

/// The mail exchangers Google Workspace asks customers to publish.
pub const GOOGLE_MXS: &[(u16, &str)] = &[
    (1, "aspmx.l.google.com."),
    (5, "alt1.aspmx.l.google.com."),
    (5, "alt2.aspmx.l.google.com."),
    (10, "alt3.aspmx.l.google.com."),
    (10, "alt4.aspmx.l.google.com."),
];

/// Preference given to the `<code>.mx-verification.google.com.` ownership proof.
pub const VERIFICATION_PREFERENCE: u16 = 15;

/// Google Workspace mail routing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GSuite {
    pub mxs: Vec<Mx>,
}

impl GSuite {
    /// The standard Google MX set, plus the verification MX when a code is given.
    #[must_use]
    pub fn standard(validation_code: Option<&str>) -> Self {
        let mut mxs: Vec<Mx> = GOOGLE_MXS
            .iter()
            .map(|(preference, target)| Mx {
                preference: *preference,
                target: (*target).to_string(),
            })
            .collect();
        if let Some(code) = validation_code.filter(|c| !c.is_empty()) {
            mxs.push(Mx {
                preference: VERIFICATION_PREFERENCE,
                target: format!("{code}.mx-verification.google.com."),
            });
        }
        GSuite { mxs }
    }
}

impl ServiceBody for GSuite {
    fn get_nb_resources(&self) -> usize {
        self.mxs.len()
    }

    fn gen_comment(&self) -> String {
        format!("Google Workspace ({} MX)", self.mxs.len())
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        let owner = name::join("", subdomain);
        Ok(self.mxs.iter().map(|mx| mx.to_record(&owner, ttl)).collect())
    }
}

fn is_google_set(mxs: &[Mx]) -> bool {
    let targets: Vec<String> = mxs.iter().map(|mx| mx.target.to_ascii_lowercase()).collect();
    targets.iter().any(|t| t == GOOGLE_MXS[0].1) && targets.iter().all(|t| t.ends_with(".google.com."))
}

fn analyze_gsuite(a: &mut Analyzer) -> Result<(), Error> {
    for group in group_by_owner(a.search_rr(&[RecordFilter::of_type(RrType::MX)])) {
        let mxs = mx_list(&group);
        if !is_google_set(&mxs) {
            continue;
        }
        let subdomain = name::subdomain_of(&group[0].name);
        a.try_use_rrs(&group, &subdomain, GSuite { mxs });
    }
    Ok(())
}

impl ServiceKind for GSuite {
    const KIND: &'static str = "google.GSuite";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "Google Workspace",
            description: "Receive this domain's mail with Google Workspace.",
            family: "provider",
            categories: &["email"],
            weight: 50,
            restrictions: ServiceRestrictions {
                single: true,
                exclusive: &["svcs.MXs"],
                need_types: &[RrType::MX],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_gsuite),
            fields: vec![Field::new(
                "mxs",
                "Mail servers",
                FieldType::List(Box::new(FieldType::SubService("svcs.MX"))),
            )
            .required()],
            subservices: Vec::new(),
        }
    }
}
