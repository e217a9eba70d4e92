//! Resource records.
//!
//! [`Record`] is the canonical in-memory form of a resource record. Inside the zone model its
//! names are relative to the zone origin (`@` for the apex); at external interfaces they are
//! absolute. [`Record::relative`] and [`Record::fqdn`] convert between the two, rewriting the
//! owner and every name carried in the record data.
//!
//! Records are parsed from RFC 1035 master-file text with [`parse_zone`] / [`parse_rr`] and
//! presented back through [`Display`][std::fmt::Display] or [`emit_rr`]. Types without a
//! structured representation keep their presentation tokens verbatim, and unknown types
//! round-trip through the RFC 3597 generic form.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

pub mod name;
mod parse;
mod present;
pub mod wire;

pub use parse::{parse_rr, parse_ttl, parse_zone};

/// Longest character-string a single TXT segment can hold on the wire.
pub const MAX_TXT_SEGMENT: usize = 255;

/// TTL applied when neither the service, the zone nor the zone file specifies one.
pub const DEFAULT_TTL: u32 = 3600;

/// An IANA resource record type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RrType(pub u16);

const MNEMONICS: &[(&str, u16)] = &[
    ("A", 1),
    ("NS", 2),
    ("CNAME", 5),
    ("SOA", 6),
    ("PTR", 12),
    ("HINFO", 13),
    ("MX", 15),
    ("TXT", 16),
    ("RP", 17),
    ("AFSDB", 18),
    ("AAAA", 28),
    ("LOC", 29),
    ("SRV", 33),
    ("NAPTR", 35),
    ("CERT", 37),
    ("DNAME", 39),
    ("DS", 43),
    ("SSHFP", 44),
    ("RRSIG", 46),
    ("NSEC", 47),
    ("DNSKEY", 48),
    ("NSEC3", 50),
    ("NSEC3PARAM", 51),
    ("TLSA", 52),
    ("SMIMEA", 53),
    ("CDS", 59),
    ("CDNSKEY", 60),
    ("OPENPGPKEY", 61),
    ("CSYNC", 62),
    ("SVCB", 64),
    ("HTTPS", 65),
    ("URI", 256),
    ("CAA", 257),
];

impl RrType {
    pub const A: RrType = RrType(1);
    pub const NS: RrType = RrType(2);
    pub const CNAME: RrType = RrType(5);
    pub const SOA: RrType = RrType(6);
    pub const PTR: RrType = RrType(12);
    pub const MX: RrType = RrType(15);
    pub const TXT: RrType = RrType(16);
    pub const AAAA: RrType = RrType(28);
    pub const SRV: RrType = RrType(33);
    pub const NAPTR: RrType = RrType(35);
    pub const DNAME: RrType = RrType(39);
    pub const DS: RrType = RrType(43);
    pub const SSHFP: RrType = RrType(44);
    pub const RRSIG: RrType = RrType(46);
    pub const NSEC: RrType = RrType(47);
    pub const DNSKEY: RrType = RrType(48);
    pub const NSEC3: RrType = RrType(50);
    pub const NSEC3PARAM: RrType = RrType(51);
    pub const TLSA: RrType = RrType(52);
    pub const OPENPGPKEY: RrType = RrType(61);
    pub const CAA: RrType = RrType(257);

    /// Look up a type by mnemonic (case-insensitive) or by its `TYPEnnn` generic name.
    #[must_use]
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        let upper = s.to_ascii_uppercase();
        if let Some((_, code)) = MNEMONICS.iter().find(|(m, _)| *m == upper) {
            return Some(RrType(*code));
        }
        upper
            .strip_prefix("TYPE")
            .and_then(|n| n.parse::<u16>().ok())
            .map(RrType)
    }

    #[must_use]
    pub fn mnemonic(self) -> Option<&'static str> {
        MNEMONICS
            .iter()
            .find(|(_, code)| *code == self.0)
            .map(|(m, _)| *m)
    }

    /// DNSSEC records are preserved but never fed to the analyzer.
    #[must_use]
    pub fn is_dnssec(self) -> bool {
        matches!(
            self,
            RrType::NSEC | RrType::NSEC3 | RrType::NSEC3PARAM | RrType::DNSKEY | RrType::RRSIG
        )
    }
}

impl fmt::Display for RrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mnemonic() {
            Some(m) => f.write_str(m),
            None => write!(f, "TYPE{}", self.0),
        }
    }
}

impl Serialize for RrType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RrType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RrType::from_mnemonic(&s).ok_or_else(|| D::Error::custom(format!("unknown RR type {s}")))
    }
}

/// Record class. Only `IN` is supported; other classes are rejected at parse time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Class {
    #[default]
    IN,
}

impl Class {
    pub const CODE_IN: u16 = 1;
}

/// TXT content: the logical octets plus the segmentation they were read with.
///
/// Character-strings are arbitrary octets, so nothing here assumes UTF-8. Equality only
/// looks at the logical octets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "TxtRepr", into = "TxtRepr")]
pub struct Txt {
    bytes: Vec<u8>,
    segments: Vec<Vec<u8>>,
}

impl Txt {
    pub fn new(txt: impl Into<String>) -> Self {
        Txt {
            bytes: txt.into().into_bytes(),
            segments: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_segments(segments: Vec<Vec<u8>>) -> Self {
        Txt {
            bytes: segments.concat(),
            segments,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The logical string, or `None` when the octets aren't UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    /// The logical string with invalid sequences replaced, for display only.
    #[must_use]
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    #[must_use]
    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    /// The segments to present: the recorded ones when they still match the logical octets,
    /// otherwise the logical octets split at [`MAX_TXT_SEGMENT`].
    #[must_use]
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        if !self.segments.is_empty() && self.segments.concat() == self.bytes {
            return self.segments.clone();
        }
        split_segments(&self.bytes)
    }
}

impl PartialEq for Txt {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Txt {}

/// Stored form of [`Txt`]. UTF-8 content is kept readable; anything else goes to `raw` as
/// base64 segments.
#[derive(Serialize, Deserialize)]
struct TxtRepr {
    #[serde(default)]
    txt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    segments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    raw: Vec<String>,
}

impl From<Txt> for TxtRepr {
    fn from(txt: Txt) -> Self {
        let segments: Option<Vec<String>> = txt
            .segments
            .iter()
            .map(|s| String::from_utf8(s.clone()).ok())
            .collect();
        match (String::from_utf8(txt.bytes.clone()), segments) {
            (Ok(text), Some(segments)) => TxtRepr {
                txt: text,
                segments,
                raw: Vec::new(),
            },
            _ => TxtRepr {
                txt: txt.text().into_owned(),
                segments: Vec::new(),
                raw: txt.chunks().iter().map(|c| STANDARD.encode(c)).collect(),
            },
        }
    }
}

impl TryFrom<TxtRepr> for Txt {
    type Error = base64::DecodeError;

    fn try_from(repr: TxtRepr) -> Result<Self, Self::Error> {
        if !repr.raw.is_empty() {
            let segments = repr
                .raw
                .iter()
                .map(|s| STANDARD.decode(s))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Txt::from_segments(segments));
        }
        Ok(Txt {
            bytes: repr.txt.into_bytes(),
            segments: repr.segments.into_iter().map(String::into_bytes).collect(),
        })
    }
}

fn split_segments(bytes: &[u8]) -> Vec<Vec<u8>> {
    if bytes.is_empty() {
        return vec![Vec::new()];
    }
    let Ok(s) = std::str::from_utf8(bytes) else {
        return bytes.chunks(MAX_TXT_SEGMENT).map(<[u8]>::to_vec).collect();
    };
    // Keep multi-byte characters whole.
    let mut out = Vec::new();
    let mut current = Vec::new();
    for c in s.chars() {
        if current.len() + c.len_utf8() > MAX_TXT_SEGMENT {
            out.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(c.encode_utf8(&mut [0; 4]).as_bytes());
    }
    out.push(current);
    out
}

/// Typed record data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RData {
    A {
        a: Ipv4Addr,
    },
    AAAA {
        aaaa: Ipv6Addr,
    },
    NS {
        ns: String,
    },
    CNAME {
        target: String,
    },
    PTR {
        ptr: String,
    },
    DNAME {
        target: String,
    },
    MX {
        preference: u16,
        mx: String,
    },
    SOA {
        ns: String,
        mbox: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minttl: u32,
    },
    TXT(Txt),
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    CAA {
        flag: u8,
        tag: String,
        value: String,
    },
    TLSA {
        usage: u8,
        selector: u8,
        matching_type: u8,
        certificate: String,
    },
    SSHFP {
        algorithm: u8,
        fp_type: u8,
        fingerprint: String,
    },
    DS {
        key_tag: u16,
        algorithm: u8,
        digest_type: u8,
        digest: String,
    },
    NAPTR {
        order: u16,
        preference: u16,
        flags: String,
        service: String,
        regexp: String,
        replacement: String,
    },
    /// A known type kept as its presentation tokens.
    #[serde(rename = "OTHER")]
    Other { rrtype: RrType, fields: Vec<String> },
    /// RFC 3597 opaque data.
    #[serde(rename = "UNKNOWN")]
    Unknown {
        rrtype: u16,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
}

impl RData {
    #[must_use]
    pub fn rr_type(&self) -> RrType {
        match self {
            RData::A { .. } => RrType::A,
            RData::AAAA { .. } => RrType::AAAA,
            RData::NS { .. } => RrType::NS,
            RData::CNAME { .. } => RrType::CNAME,
            RData::PTR { .. } => RrType::PTR,
            RData::DNAME { .. } => RrType::DNAME,
            RData::MX { .. } => RrType::MX,
            RData::SOA { .. } => RrType::SOA,
            RData::TXT(_) => RrType::TXT,
            RData::SRV { .. } => RrType::SRV,
            RData::CAA { .. } => RrType::CAA,
            RData::TLSA { .. } => RrType::TLSA,
            RData::SSHFP { .. } => RrType::SSHFP,
            RData::DS { .. } => RrType::DS,
            RData::NAPTR { .. } => RrType::NAPTR,
            RData::Other { rrtype, .. } => *rrtype,
            RData::Unknown { rrtype, .. } => RrType(*rrtype),
        }
    }

    /// Apply `f` to every domain name carried in the record data.
    pub fn map_names(&mut self, f: &impl Fn(&str) -> String) {
        match self {
            RData::NS { ns: name }
            | RData::CNAME { target: name }
            | RData::PTR { ptr: name }
            | RData::DNAME { target: name }
            | RData::MX { mx: name, .. }
            | RData::SRV { target: name, .. }
            | RData::NAPTR {
                replacement: name, ..
            } => *name = f(name),
            RData::SOA { ns, mbox, .. } => {
                *ns = f(ns);
                *mbox = f(mbox);
            }
            _ => {}
        }
    }
}

/// A resource record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RecordRepr", from = "RecordRepr")]
pub struct Record {
    pub name: String,
    pub class: Class,
    pub ttl: u32,
    pub data: RData,
}

#[derive(Serialize, Deserialize)]
struct Header {
    name: String,
    #[serde(default)]
    class: Class,
    ttl: u32,
}

#[derive(Serialize, Deserialize)]
struct RecordRepr {
    header: Header,
    #[serde(flatten)]
    data: RData,
}

impl From<Record> for RecordRepr {
    fn from(rr: Record) -> Self {
        RecordRepr {
            header: Header {
                name: rr.name,
                class: rr.class,
                ttl: rr.ttl,
            },
            data: rr.data,
        }
    }
}

impl From<RecordRepr> for Record {
    fn from(repr: RecordRepr) -> Self {
        Record {
            name: repr.header.name,
            class: repr.header.class,
            ttl: repr.header.ttl,
            data: repr.data,
        }
    }
}

impl Record {
    pub fn new(name: impl Into<String>, ttl: u32, data: RData) -> Self {
        Record {
            name: name.into(),
            class: Class::IN,
            ttl,
            data,
        }
    }

    #[must_use]
    pub fn rr_type(&self) -> RrType {
        self.data.rr_type()
    }

    /// Apply `f` to the owner name and every name in the record data.
    pub fn map_names(&mut self, f: &impl Fn(&str) -> String) {
        self.name = f(&self.name);
        self.data.map_names(f);
    }

    /// Rewrite names relative to `origin`, stripping exactly one trailing origin.
    #[must_use]
    pub fn relative(&self, origin: &str) -> Record {
        let mut rr = self.clone();
        rr.map_names(&|n| name::relative_name(n, origin));
        rr
    }

    /// Inverse of [`Record::relative`]; names that are already absolute are left untouched.
    #[must_use]
    pub fn fqdn(&self, origin: &str) -> Record {
        let mut rr = self.clone();
        rr.map_names(&|n| name::absolute_name(n, origin));
        rr
    }

    /// The logical TXT string, if this is a TXT record holding UTF-8.
    #[must_use]
    pub fn txt(&self) -> Option<&str> {
        match &self.data {
            RData::TXT(txt) => txt.as_str(),
            _ => None,
        }
    }

    /// Presentation form of the record data alone.
    #[must_use]
    pub fn rdata_text(&self) -> String {
        self.data.to_string()
    }

    /// Record data in a form where equivalent data compares equal: names lowercased, TXT by its
    /// logical string, hex lowercased, and opaque tokens concatenated.
    #[must_use]
    pub fn canonical_rdata(&self) -> String {
        let mut data = self.data.clone();
        data.map_names(&|n| n.to_ascii_lowercase());
        match &mut data {
            RData::TXT(txt) => txt.segments.clear(),
            RData::TLSA {
                certificate: hex, ..
            }
            | RData::SSHFP {
                fingerprint: hex, ..
            }
            | RData::DS { digest: hex, .. } => *hex = hex.to_ascii_lowercase(),
            RData::Other { fields, .. } => *fields = vec![fields.concat()],
            _ => {}
        }
        data.to_string()
    }

    /// Identity of the record modulo TTL: lowercase owner, type and canonical data.
    #[must_use]
    pub fn canonical_key(&self) -> (String, RrType, String) {
        (
            self.name.to_ascii_lowercase(),
            self.rr_type(),
            self.canonical_rdata(),
        )
    }
}

/// Present `rr` with absolute names under `origin`.
#[must_use]
pub fn emit_rr(rr: &Record, origin: &str) -> String {
    rr.fqdn(origin).to_string()
}

mod hex_bytes {
    use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(D::Error::custom)
    }
}
