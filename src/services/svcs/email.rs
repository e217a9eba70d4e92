//! Mail authentication policies: SPF, DKIM, DMARC, MTA-STS and TLS reporting.

use crate::error::Error;
use crate::rr::{name, RData, Record, RrType, Txt};
use crate::services::analyzer::{Analyzer, RecordFilter};
use crate::services::registry::{ServiceKind, ServiceRestrictions, ServiceSpec};
use crate::services::schema::{Field, FieldType};
use crate::services::{tags, ServiceBody};
use serde::{Deserialize, Serialize};

fn txt(owner: &str, ttl: u32, value: String) -> Record {
    Record::new(owner, ttl, RData::TXT(Txt::new(value)))
}

const EMAIL: &[&str] = &["email"];

/// Sender Policy Framework (RFC 7208).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SPF {
    pub version: u8,
    #[serde(default)]
    pub directives: Vec<String>,
}

impl Default for SPF {
    fn default() -> Self {
        SPF {
            version: 1,
            directives: Vec::new(),
        }
    }
}

impl SPF {
    #[must_use]
    pub fn text(&self) -> String {
        let mut text = format!("v=spf{}", self.version);
        for directive in &self.directives {
            text.push(' ');
            text.push_str(directive);
        }
        text
    }

    /// Parse an SPF policy; `None` if `s` isn't one.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut words = s.split(' ');
        let version = words
            .next()?
            .to_ascii_lowercase()
            .strip_prefix("v=spf")?
            .parse()
            .ok()?;
        Some(SPF {
            version,
            directives: words.map(str::to_string).collect(),
        })
    }
}

impl ServiceBody for SPF {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        self.directives.join(" ")
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        Ok(vec![txt(&name::join("", subdomain), ttl, self.text())])
    }
}

fn analyze_spf(a: &mut Analyzer) -> Result<(), Error> {
    for rr in a.search_rr(&[RecordFilter::of_type(RrType::TXT)]) {
        let Some(body) = rr.txt().and_then(SPF::parse) else {
            continue;
        };
        let subdomain = name::subdomain_of(&rr.name);
        if a.services_at(&subdomain).iter().any(|s| s.kind() == SPF::KIND) {
            continue;
        }
        a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for SPF {
    const KIND: &'static str = "svcs.SPF";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "SPF",
            description: "Hosts allowed to send mail on behalf of this domain.",
            family: "",
            categories: EMAIL,
            weight: 201,
            restrictions: ServiceRestrictions {
                single: true,
                need_types: &[RrType::TXT],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_spf),
            fields: vec![
                Field::new("version", "Version", FieldType::Number)
                    .default_value(1)
                    .hidden(),
                Field::new(
                    "directives",
                    "Directives",
                    FieldType::List(Box::new(FieldType::String)),
                )
                .placeholder("include:_spf.example.com"),
            ],
            subservices: Vec::new(),
        }
    }
}

/// A DKIM public key (RFC 6376) for one selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DKIMRecord {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptable_hash_algorithms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Empty when the key is revoked.
    #[serde(default)]
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl DKIMRecord {
    #[must_use]
    pub fn text(&self) -> String {
        let mut out: Vec<(&str, String)> = Vec::new();
        if let Some(v) = &self.version {
            out.push(("v", v.clone()));
        }
        if !self.acceptable_hash_algorithms.is_empty() {
            out.push(("h", self.acceptable_hash_algorithms.join(":")));
        }
        if let Some(k) = &self.key_type {
            out.push(("k", k.clone()));
        }
        if let Some(n) = &self.notes {
            out.push(("n", n.clone()));
        }
        out.push(("p", self.public_key.clone()));
        if !self.service_types.is_empty() {
            out.push(("s", self.service_types.join(":")));
        }
        if !self.flags.is_empty() {
            out.push(("t", self.flags.join(":")));
        }
        tags::render(&out)
    }

    /// Parse the TXT content of a DKIM key. Unknown tags make the record unrecognised.
    #[must_use]
    pub fn parse(selector: &str, s: &str) -> Option<Self> {
        let parsed = tags::parse(s);
        let mut body = DKIMRecord {
            selector: selector.to_string(),
            ..Self::default()
        };
        let mut has_key = false;
        for (k, v) in &parsed {
            match k.as_str() {
                "v" => body.version = Some(v.clone()),
                "h" => body.acceptable_hash_algorithms = tags::list(v, ':'),
                "k" => body.key_type = Some(v.clone()),
                "n" => body.notes = Some(v.clone()),
                "p" => {
                    body.public_key = v.clone();
                    has_key = true;
                }
                "s" => body.service_types = tags::list(v, ':'),
                "t" => body.flags = tags::list(v, ':'),
                _ => return None,
            }
        }
        (has_key || body.version.as_deref() == Some("DKIM1")).then_some(body)
    }
}

impl ServiceBody for DKIMRecord {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        match &self.key_type {
            Some(k) => format!("{} ({k})", self.selector),
            None => self.selector.clone(),
        }
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        if self.selector.is_empty() {
            return Err(Error::Validation("a DKIM key needs a selector".into()));
        }
        let owner = name::join(&format!("{}._domainkey", self.selector), subdomain);
        Ok(vec![txt(&owner, ttl, self.text())])
    }
}

fn analyze_dkim(a: &mut Analyzer) -> Result<(), Error> {
    for rr in a.search_rr(&[RecordFilter::of_type(RrType::TXT).contains("_domainkey")]) {
        let Some((selector, subdomain)) = name::split_around_label(&rr.name, "_domainkey") else {
            continue;
        };
        if selector.is_empty() {
            continue;
        }
        let Some(body) = rr.txt().and_then(|t| DKIMRecord::parse(&selector, t)) else {
            continue;
        };
        a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for DKIMRecord {
    const KIND: &'static str = "svcs.DKIMRecord";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "DKIM",
            description: "Public key used to verify signatures of outgoing mail.",
            family: "",
            categories: EMAIL,
            weight: 202,
            restrictions: ServiceRestrictions {
                need_types: &[RrType::TXT],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_dkim),
            fields: vec![
                Field::new("selector", "Selector", FieldType::String)
                    .required()
                    .placeholder("default"),
                Field::new("version", "Version", FieldType::String).default_value("DKIM1"),
                Field::new(
                    "acceptable_hash_algorithms",
                    "Hash algorithms",
                    FieldType::List(Box::new(FieldType::String)),
                )
                .choices(&["sha1", "sha256"]),
                Field::new("key_type", "Key type", FieldType::String).choices(&["rsa", "ed25519"]),
                Field::new("notes", "Notes", FieldType::String),
                Field::new("public_key", "Public key", FieldType::Text).required(),
                Field::new(
                    "service_types",
                    "Service types",
                    FieldType::List(Box::new(FieldType::String)),
                ),
                Field::new("flags", "Flags", FieldType::List(Box::new(FieldType::String)))
                    .choices(&["y", "s"]),
            ],
            subservices: Vec::new(),
        }
    }
}

/// DMARC policy (RFC 7489).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DMARC {
    pub request: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain_request: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregate_report: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forensic_report: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dkim_alignment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spf_alignment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_options: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_interval: Option<u32>,
}

impl DMARC {
    #[must_use]
    pub fn text(&self) -> String {
        let mut out: Vec<(&str, String)> = vec![("v", "DMARC1".into()), ("p", self.request.clone())];
        if let Some(sp) = &self.subdomain_request {
            out.push(("sp", sp.clone()));
        }
        if !self.aggregate_report.is_empty() {
            out.push(("rua", self.aggregate_report.join(",")));
        }
        if !self.forensic_report.is_empty() {
            out.push(("ruf", self.forensic_report.join(",")));
        }
        if let Some(v) = &self.dkim_alignment {
            out.push(("adkim", v.clone()));
        }
        if let Some(v) = &self.spf_alignment {
            out.push(("aspf", v.clone()));
        }
        if let Some(v) = self.percent {
            out.push(("pct", v.to_string()));
        }
        if let Some(v) = &self.failure_options {
            out.push(("fo", v.clone()));
        }
        if let Some(v) = &self.report_format {
            out.push(("rf", v.clone()));
        }
        if let Some(v) = self.report_interval {
            out.push(("ri", v.to_string()));
        }
        tags::render(&out)
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let parsed = tags::parse(s);
        let (first, rest) = parsed.split_first()?;
        if first.0 != "v" || first.1 != "DMARC1" {
            return None;
        }
        let mut body = DMARC::default();
        for (k, v) in rest {
            match k.as_str() {
                "p" => body.request = v.clone(),
                "sp" => body.subdomain_request = Some(v.clone()),
                "rua" => body.aggregate_report = tags::list(v, ','),
                "ruf" => body.forensic_report = tags::list(v, ','),
                "adkim" => body.dkim_alignment = Some(v.clone()),
                "aspf" => body.spf_alignment = Some(v.clone()),
                "pct" => body.percent = Some(v.parse().ok()?),
                "fo" => body.failure_options = Some(v.clone()),
                "rf" => body.report_format = Some(v.clone()),
                "ri" => body.report_interval = Some(v.parse().ok()?),
                _ => return None,
            }
        }
        Some(body)
    }
}

impl ServiceBody for DMARC {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        match self.percent {
            Some(pct) => format!("{} ({pct}%)", self.request),
            None => self.request.clone(),
        }
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        Ok(vec![txt(&name::join("_dmarc", subdomain), ttl, self.text())])
    }
}

fn analyze_dmarc(a: &mut Analyzer) -> Result<(), Error> {
    for rr in a.search_rr(&[RecordFilter::of_type(RrType::TXT).prefix("_dmarc")]) {
        let Some(subdomain) = name::strip_prefix_labels(&rr.name, "_dmarc") else {
            continue;
        };
        let Some(body) = rr.txt().and_then(DMARC::parse) else {
            continue;
        };
        a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for DMARC {
    const KIND: &'static str = "svcs.DMARC";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "DMARC",
            description: "What receivers should do with mail failing SPF and DKIM checks.",
            family: "",
            categories: EMAIL,
            weight: 203,
            restrictions: ServiceRestrictions {
                single: true,
                need_types: &[RrType::TXT],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_dmarc),
            fields: vec![
                Field::new("request", "Policy", FieldType::String)
                    .required()
                    .choices(&["none", "quarantine", "reject"]),
                Field::new("subdomain_request", "Subdomain policy", FieldType::String)
                    .choices(&["none", "quarantine", "reject"]),
                Field::new(
                    "aggregate_report",
                    "Aggregate reports to",
                    FieldType::List(Box::new(FieldType::String)),
                )
                .placeholder("mailto:dmarc@example.com"),
                Field::new(
                    "forensic_report",
                    "Forensic reports to",
                    FieldType::List(Box::new(FieldType::String)),
                ),
                Field::new("dkim_alignment", "DKIM alignment", FieldType::String)
                    .choices(&["r", "s"]),
                Field::new("spf_alignment", "SPF alignment", FieldType::String)
                    .choices(&["r", "s"]),
                Field::new("percent", "Percentage", FieldType::Number).default_value(100),
                Field::new("failure_options", "Failure reporting", FieldType::String),
                Field::new("report_format", "Report format", FieldType::String),
                Field::new("report_interval", "Report interval", FieldType::Duration),
            ],
            subservices: Vec::new(),
        }
    }
}

/// MTA-STS policy announcement (RFC 8461).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub struct MTA_STS {
    pub id: String,
}

impl ServiceBody for MTA_STS {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        self.id.clone()
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        let text = tags::render(&[("v", "STSv1".into()), ("id", self.id.clone())]);
        Ok(vec![txt(&name::join("_mta-sts", subdomain), ttl, text)])
    }
}

fn analyze_mta_sts(a: &mut Analyzer) -> Result<(), Error> {
    for rr in a.search_rr(&[RecordFilter::of_type(RrType::TXT).prefix("_mta-sts")]) {
        let Some(subdomain) = name::strip_prefix_labels(&rr.name, "_mta-sts") else {
            continue;
        };
        let parsed = tags::parse(rr.txt().unwrap_or_default());
        if parsed.len() != 2 || tags::get(&parsed, "v") != Some("STSv1") {
            continue;
        }
        let Some(id) = tags::get(&parsed, "id") else {
            continue;
        };
        let body = MTA_STS { id: id.to_string() };
        a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for MTA_STS {
    const KIND: &'static str = "svcs.MTA_STS";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "MTA-STS",
            description: "Announce that receiving servers require TLS.",
            family: "",
            categories: EMAIL,
            weight: 204,
            restrictions: ServiceRestrictions {
                single: true,
                need_types: &[RrType::TXT],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_mta_sts),
            fields: vec![Field::new("id", "Policy identifier", FieldType::String).required()],
            subservices: Vec::new(),
        }
    }
}

/// SMTP TLS reporting (RFC 8460).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub struct TLS_RPT {
    pub rua: Vec<String>,
}

impl ServiceBody for TLS_RPT {
    fn get_nb_resources(&self) -> usize {
        1
    }

    fn gen_comment(&self) -> String {
        self.rua.join(", ")
    }

    fn get_records(&self, subdomain: &str, ttl: u32, _origin: &str) -> Result<Vec<Record>, Error> {
        let text = tags::render(&[("v", "TLSRPTv1".into()), ("rua", self.rua.join(","))]);
        Ok(vec![txt(&name::join("_smtp._tls", subdomain), ttl, text)])
    }
}

fn analyze_tls_rpt(a: &mut Analyzer) -> Result<(), Error> {
    for rr in a.search_rr(&[RecordFilter::of_type(RrType::TXT).prefix("_smtp._tls")]) {
        let Some(subdomain) = name::strip_prefix_labels(&rr.name, "_smtp._tls") else {
            continue;
        };
        let parsed = tags::parse(rr.txt().unwrap_or_default());
        if parsed.len() != 2 || tags::get(&parsed, "v") != Some("TLSRPTv1") {
            continue;
        }
        let Some(rua) = tags::get(&parsed, "rua") else {
            continue;
        };
        let body = TLS_RPT {
            rua: tags::list(rua, ','),
        };
        a.try_use_rrs(std::slice::from_ref(&rr), &subdomain, body);
    }
    Ok(())
}

impl ServiceKind for TLS_RPT {
    const KIND: &'static str = "svcs.TLS_RPT";

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "TLS reporting",
            description: "Where to send reports about TLS failures when delivering mail.",
            family: "",
            categories: EMAIL,
            weight: 205,
            restrictions: ServiceRestrictions {
                single: true,
                need_types: &[RrType::TXT],
                ..ServiceRestrictions::default()
            },
            analyzer: Some(analyze_tls_rpt),
            fields: vec![Field::new(
                "rua",
                "Reports to",
                FieldType::List(Box::new(FieldType::String)),
            )
            .required()
            .placeholder("mailto:tlsrpt@example.com")],
            subservices: Vec::new(),
        }
    }
}
