//! Semantic services.
//!
//! A [`Service`] groups the records of one subdomain behind a user-facing abstraction ("these
//! MX records", "this DMARC policy", "this delegation"). Each kind of service is a body type
//! implementing [`ServiceBody`] and registered in the [`registry`]; the [`analyzer`] folds a flat
//! record set into services and the [`generator`] expands services back into records.
//!
//! Services serialize as their metadata plus the kind-specific body under `Service`:
//!
//! ```json
//! { "_svctype": "svcs.MXs", "_id": "…", "_domain": "", "_ttl": 0, "_comment": "mail",
//!   "_tmp_hint_nb": 1, "Service": { "mxs": [ { "preference": 10, "target": "mail" } ] } }
//! ```

use crate::error::Error;
use crate::identifier::Identifier;
use crate::rr::Record;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::Any;
use std::fmt;

pub mod abstracts;
pub mod analyzer;
pub mod generator;
pub mod providers;
pub mod registry;
pub mod schema;
pub mod svcs;

pub use analyzer::{analyze_zone, Analysis, Analyzer, RecordFilter};
pub use generator::{generate_zone, GeneratedRecord};
pub use registry::{Registry, ServiceKind, ServiceRestrictions, ServiceSpec};

/// Behaviour every service body provides.
pub trait ServiceBody: fmt::Debug + Send + Sync + 'static {
    /// Number of records this body expands to.
    fn get_nb_resources(&self) -> usize;

    /// Short human-readable summary.
    fn gen_comment(&self) -> String;

    /// Expand to records. Owner names are relative to the origin (`@` for the apex); names in
    /// the record data keep whatever form the body stores.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the body holds data that can't form a record.
    fn get_records(&self, subdomain: &str, ttl: u32, origin: &str) -> Result<Vec<Record>, Error>;

    /// Apply `f` to every domain name held by the body.
    fn map_names(&mut self, _f: &dyn Fn(&str) -> String) {}
}

/// Object-safe extension of [`ServiceBody`] implemented for every serializable body type.
pub trait AnyServiceBody: ServiceBody {
    /// Serialize the body.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`].
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
    fn clone_box(&self) -> Box<dyn AnyServiceBody>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> AnyServiceBody for T
where
    T: ServiceBody + Clone + Serialize,
{
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn clone_box(&self) -> Box<dyn AnyServiceBody> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Metadata shared by every service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMeta {
    #[serde(rename = "_svctype")]
    pub kind: String,
    #[serde(rename = "_id", default)]
    pub id: Identifier,
    #[serde(rename = "_domain", default)]
    pub subdomain: String,
    /// `None` means "use the zone default".
    #[serde(rename = "_ttl", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(rename = "_comment", default)]
    pub comment: String,
    #[serde(rename = "_tmp_hint_nb", default)]
    pub nb_resources: usize,
    /// Restriction conflicts noticed while analyzing; never fatal.
    #[serde(rename = "_warnings", default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct Service {
    pub meta: ServiceMeta,
    pub body: Box<dyn AnyServiceBody>,
}

impl Service {
    /// Wrap a body. The identifier stays empty until the service is inserted into a zone.
    pub fn new<T: ServiceKind>(body: T) -> Self {
        let mut svc = Service {
            meta: ServiceMeta {
                kind: T::KIND.to_string(),
                ..ServiceMeta::default()
            },
            body: Box::new(body),
        };
        svc.refresh_meta();
        svc
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.meta.kind
    }

    /// Recompute the comment and resource count from the body.
    pub fn refresh_meta(&mut self) {
        self.meta.comment = self.body.gen_comment();
        self.meta.nb_resources = self.body.get_nb_resources();
    }

    #[must_use]
    pub fn body_as<T: 'static>(&self) -> Option<&T> {
        self.body.as_any().downcast_ref()
    }

    pub fn body_as_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.body.as_any_mut().downcast_mut()
    }
}

impl Clone for Service {
    fn clone(&self) -> Self {
        Service {
            meta: self.meta.clone(),
            body: self.body.clone_box(),
        }
    }
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta && self.body.to_json().ok() == other.body.to_json().ok()
    }
}

#[derive(Serialize, Deserialize)]
struct ServiceRepr {
    #[serde(flatten)]
    meta: ServiceMeta,
    #[serde(rename = "Service", default)]
    body: serde_json::Value,
}

impl Serialize for Service {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error as _;
        let body = self.body.to_json().map_err(S::Error::custom)?;
        ServiceRepr {
            meta: self.meta.clone(),
            body,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Service {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut repr = ServiceRepr::deserialize(deserializer)?;
        let registry = registry::global();
        let entry = registry
            .find_service(&repr.meta.kind)
            .ok_or_else(|| D::Error::custom(format!("unknown service kind {}", repr.meta.kind)))?;
        repr.meta.kind = entry.kind.to_string();
        let body = (entry.decode)(repr.body).map_err(D::Error::custom)?;
        Ok(Service {
            meta: repr.meta,
            body,
        })
    }
}

/// Shared helpers for the tag-list TXT formats (`k=v; k=v`) of DKIM, DMARC and friends.
pub(crate) mod tags {
    pub fn parse(s: &str) -> Vec<(String, String)> {
        s.split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
                None => (part.to_string(), String::new()),
            })
            .collect()
    }

    pub fn get<'a>(tags: &'a [(String, String)], key: &str) -> Option<&'a str> {
        tags.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn render(tags: &[(&str, String)]) -> String {
        tags.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn list(v: &str, sep: char) -> Vec<String> {
        v.split(sep)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::svcs::mx::{Mx, MXs};
    use super::*;

    #[test]
    fn service_json_carries_kind_and_body() {
        let mut svc = Service::new(MXs {
            mxs: vec![Mx {
                preference: 10,
                target: "mail".into(),
            }],
        });
        svc.meta.id = Identifier::from_bytes(vec![1, 2]);
        let v = serde_json::to_value(&svc).unwrap();
        assert_eq!(v["_svctype"], "svcs.MXs");
        assert_eq!(v["_id"], "0102");
        assert_eq!(v["_tmp_hint_nb"], 1);
        assert_eq!(v["Service"]["mxs"][0]["target"], "mail");

        let back: Service = serde_json::from_value(v).unwrap();
        assert_eq!(back, svc);
        assert_eq!(back.body_as::<MXs>().unwrap().mxs.len(), 1);
    }

    #[test]
    fn unknown_kinds_fail_to_decode() {
        let v = serde_json::json!({"_svctype": "svcs.Nope", "Service": {}});
        assert!(serde_json::from_value::<Service>(v).is_err());
    }

    #[test]
    fn tag_lists() {
        let parsed = tags::parse("v=DMARC1; p=reject ;pct=100;");
        assert_eq!(tags::get(&parsed, "P"), Some("reject"));
        assert_eq!(parsed.len(), 3);
        assert_eq!(
            tags::render(&[("v", "DKIM1".into()), ("p", "ABC".into())]),
            "v=DKIM1; p=ABC"
        );
    }
}
