//! Service kind registry.
//!
//! Every kind of service registers its body type together with its descriptive infos, analyzer
//! weight, placement restrictions and form schema. The process-wide registry is built once with
//! the built-in kinds; additional registries can be assembled for tests.

use super::analyzer::Analyzer;
use super::schema::{Field, SubService};
use super::{AnyServiceBody, Service, ServiceBody};
use crate::error::Error;
use crate::rr::{name, RrType};
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use tracing::debug;

pub type AnalyzerFn = fn(&mut Analyzer) -> Result<(), Error>;
pub type Factory = fn() -> Box<dyn AnyServiceBody>;
pub type Decoder = fn(serde_json::Value) -> Result<Box<dyn AnyServiceBody>, serde_json::Error>;

/// Constraints on where a service may live relative to its neighbours.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceRestrictions {
    /// Must be the only service on its subdomain.
    pub alone: bool,
    /// May only share its subdomain with other near-alone or alone services.
    pub near_alone: bool,
    /// At most one of this kind per subdomain.
    pub single: bool,
    /// Nothing but glue below this subdomain.
    pub leaf: bool,
    pub root_only: bool,
    /// May sit below a leaf service.
    pub glue: bool,
    /// Record types that must appear in the generated output.
    pub need_types: &'static [RrType],
    /// Kinds that can't share a subdomain with this one.
    pub exclusive: &'static [&'static str],
}

/// Static description of a service kind.
pub struct ServiceSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub family: &'static str,
    pub categories: &'static [&'static str],
    pub weight: u32,
    pub restrictions: ServiceRestrictions,
    pub analyzer: Option<AnalyzerFn>,
    pub fields: Vec<Field>,
    pub subservices: Vec<SubService>,
}

/// A service body type that can be registered.
pub trait ServiceKind: ServiceBody + Clone + Serialize + DeserializeOwned + Default {
    const KIND: &'static str;

    fn spec() -> ServiceSpec;
}

/// What the API exposes about a kind.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfos {
    pub name: &'static str,
    #[serde(rename = "_svctype")]
    pub kind: &'static str,
    pub description: &'static str,
    pub family: &'static str,
    pub categories: &'static [&'static str],
    pub restrictions: ServiceRestrictions,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSchema {
    pub fields: Vec<Field>,
}

pub struct ServiceEntry {
    pub kind: &'static str,
    pub infos: ServiceInfos,
    pub weight: u32,
    pub analyzer: Option<AnalyzerFn>,
    pub fields: Vec<Field>,
    pub factory: Factory,
    pub decode: Decoder,
}

fn factory<T: ServiceKind>() -> Box<dyn AnyServiceBody> {
    Box::new(T::default())
}

fn decode<T: ServiceKind>(
    value: serde_json::Value,
) -> Result<Box<dyn AnyServiceBody>, serde_json::Error> {
    Ok(Box::new(serde_json::from_value::<T>(value)?))
}

/// Legacy kind names resolved on lookup.
const ALIASES: &[(&str, &str)] = &[
    ("svcs.TLSA", "svcs.TLSAs"),
    ("svcs.SRV", "svcs.UnknownSRV"),
];

#[derive(Default)]
pub struct Registry {
    services: HashMap<&'static str, ServiceEntry>,
    subservices: HashMap<&'static str, SubService>,
    ordered: OnceLock<Vec<&'static str>>,
}

lazy_static! {
    static ref GLOBAL: Registry = Registry::with_builtin_services();
}

/// The process-wide registry holding every built-in kind.
#[must_use]
pub fn global() -> &'static Registry {
    &GLOBAL
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_builtin_services() -> Self {
        let mut registry = Self::new();
        super::abstracts::register(&mut registry);
        super::svcs::register(&mut registry);
        super::providers::register(&mut registry);
        registry
    }

    /// Register `T`, replacing any previous registration of the same kind.
    pub fn register<T: ServiceKind>(&mut self) {
        let spec = T::spec();
        debug!(kind = T::KIND, weight = spec.weight, "registering service");
        for sub in spec.subservices {
            self.subservices.insert(sub.name, sub);
        }
        self.services.insert(
            T::KIND,
            ServiceEntry {
                kind: T::KIND,
                infos: ServiceInfos {
                    name: spec.name,
                    kind: T::KIND,
                    description: spec.description,
                    family: spec.family,
                    categories: spec.categories,
                    restrictions: spec.restrictions,
                },
                weight: spec.weight,
                analyzer: spec.analyzer,
                fields: spec.fields,
                factory: factory::<T>,
                decode: decode::<T>,
            },
        );
        self.ordered = OnceLock::new();
    }

    /// Look a kind up, following legacy aliases.
    #[must_use]
    pub fn find_service(&self, kind: &str) -> Option<&ServiceEntry> {
        self.services.get(kind).or_else(|| {
            ALIASES
                .iter()
                .find(|(alias, _)| *alias == kind)
                .and_then(|(_, target)| self.services.get(target))
        })
    }

    /// A fresh default body of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownServiceKind`] for unregistered kinds.
    pub fn new_body(&self, kind: &str) -> Result<Box<dyn AnyServiceBody>, Error> {
        self.find_service(kind)
            .map(|entry| (entry.factory)())
            .ok_or_else(|| Error::UnknownServiceKind(kind.to_string()))
    }

    /// Decode a body of `kind` from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownServiceKind`] for unregistered kinds and [`Error::InvalidJSON`] when
    /// the value doesn't fit the body type.
    pub fn decode_body(
        &self,
        kind: &str,
        value: serde_json::Value,
    ) -> Result<Box<dyn AnyServiceBody>, Error> {
        let entry = self
            .find_service(kind)
            .ok_or_else(|| Error::UnknownServiceKind(kind.to_string()))?;
        Ok((entry.decode)(value)?)
    }

    /// Kinds sorted by analyzer weight, ties broken by name.
    pub fn ordered_services(&self) -> &[&'static str] {
        self.ordered.get_or_init(|| {
            let mut kinds: Vec<_> = self.services.values().collect();
            kinds.sort_by(|a, b| a.weight.cmp(&b.weight).then(a.kind.cmp(b.kind)));
            kinds.into_iter().map(|entry| entry.kind).collect()
        })
    }

    #[must_use]
    pub fn infos(&self) -> BTreeMap<&'static str, &ServiceInfos> {
        self.services
            .iter()
            .map(|(kind, entry)| (*kind, &entry.infos))
            .collect()
    }

    /// Form schema of a kind or a subservice.
    #[must_use]
    pub fn schema(&self, kind: &str) -> Option<ServiceSchema> {
        if let Some(entry) = self.find_service(kind) {
            return Some(ServiceSchema {
                fields: entry.fields.clone(),
            });
        }
        self.subservices.get(kind).map(|sub| ServiceSchema {
            fields: sub.fields.clone(),
        })
    }

    #[must_use]
    pub fn restrictions(&self, kind: &str) -> Option<&ServiceRestrictions> {
        self.find_service(kind).map(|entry| &entry.infos.restrictions)
    }

    /// Every way placing a `kind` service on `subdomain` would break a restriction, given the
    /// services already present. An empty result means the placement is allowed.
    #[must_use]
    pub fn check_restrictions(
        &self,
        kind: &str,
        subdomain: &str,
        existing: &BTreeMap<String, Vec<Service>>,
        ignore: Option<&crate::identifier::Identifier>,
    ) -> Vec<String> {
        let mut violations = Vec::new();
        let Some(mine) = self.restrictions(kind) else {
            violations.push(format!("unknown service kind {kind}"));
            return violations;
        };
        let others = |sub: &str| {
            existing
                .get(sub)
                .into_iter()
                .flatten()
                .filter(|svc| Some(&svc.meta.id) != ignore)
                .collect::<Vec<_>>()
        };
        let neighbours = others(subdomain);

        if mine.root_only && !subdomain.is_empty() {
            violations.push(format!("{kind} can only be placed at the zone apex"));
        }
        if mine.single && neighbours.iter().any(|svc| svc.kind() == kind) {
            violations.push(format!("only one {kind} is allowed per subdomain"));
        }
        if mine.alone && !neighbours.is_empty() {
            violations.push(format!("{kind} must be alone on its subdomain"));
        }
        for svc in &neighbours {
            let Some(theirs) = self.restrictions(svc.kind()) else {
                continue;
            };
            if theirs.alone {
                violations.push(format!("{} must be alone on its subdomain", svc.kind()));
            }
            if mine.near_alone && !(theirs.near_alone || theirs.alone) {
                violations.push(format!("{kind} can't share its subdomain with {}", svc.kind()));
            }
            if theirs.near_alone && !(mine.near_alone || mine.alone) {
                violations.push(format!("{} can't share its subdomain with {kind}", svc.kind()));
            }
            if mine.exclusive.iter().any(|k| *k == svc.kind())
                || theirs.exclusive.iter().any(|k| *k == kind)
            {
                violations.push(format!("{kind} and {} are mutually exclusive", svc.kind()));
            }
        }

        if !mine.glue {
            for (sub, svcs) in existing {
                if !name::is_strict_subdomain(subdomain, sub) {
                    continue;
                }
                if let Some(leaf) = svcs
                    .iter()
                    .filter(|svc| Some(&svc.meta.id) != ignore)
                    .find(|svc| self.restrictions(svc.kind()).is_some_and(|r| r.leaf))
                {
                    violations.push(format!("{} on {sub} allows only glue below it", leaf.kind()));
                }
            }
        }
        if mine.leaf {
            for (sub, svcs) in existing {
                if !name::is_strict_subdomain(sub, subdomain) {
                    continue;
                }
                let non_glue = svcs
                    .iter()
                    .filter(|svc| Some(&svc.meta.id) != ignore)
                    .any(|svc| !self.restrictions(svc.kind()).is_some_and(|r| r.glue));
                if non_glue {
                    violations.push(format!("{kind} allows only glue below it, found {sub}"));
                }
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_order_follows_weights() {
        let registry = global();
        let ordered = registry.ordered_services();
        let pos = |k: &str| ordered.iter().position(|x| *x == k).unwrap();
        assert_eq!(ordered[0], "abstract.Origin");
        assert!(pos("abstract.Delegation") < pos("abstract.Server"));
        assert!(pos("google.GSuite") < pos("svcs.MXs"));
        assert!(pos("svcs.MXs") < pos("svcs.SPF"));
        assert!(pos("svcs.SPF") < pos("svcs.DKIMRecord"));
        assert!(pos("svcs.DKIMRecord") < pos("svcs.DMARC"));
        assert!(pos("svcs.SpecialCNAME") < pos("svcs.CNAME"));
        assert!(pos("svcs.CNAME") < pos("svcs.TXT"));
        assert_eq!(*ordered.last().unwrap(), "svcs.Orphan");
    }

    #[test]
    fn aliases_resolve() {
        let registry = global();
        assert_eq!(registry.find_service("svcs.TLSA").unwrap().kind, "svcs.TLSAs");
        assert_eq!(registry.find_service("svcs.SRV").unwrap().kind, "svcs.UnknownSRV");
        assert!(registry.find_service("svcs.Nope").is_none());
        assert!(matches!(
            registry.new_body("svcs.Nope"),
            Err(Error::UnknownServiceKind(_))
        ));
    }

    #[test]
    fn subservice_schemas_are_served() {
        let registry = global();
        for sub in ["svcs.MX", "svcs.CAAIssuer", "svcs.TLSA", "svcs.SRVRecord", "svcs.DS"] {
            assert!(registry.schema(sub).is_some(), "{sub}");
        }
        let mxs = registry.schema("svcs.MXs").unwrap();
        assert!(!mxs.fields.is_empty());
    }

    #[test]
    fn restrictions_are_checked_against_neighbours() {
        let registry = global();
        let mut existing = BTreeMap::new();
        let mut cname = Service::new(crate::services::svcs::cname::Cname {
            target: "www".into(),
        });
        cname.meta.id = crate::identifier::Identifier::from_bytes(vec![1]);
        existing.insert("alias".to_string(), vec![cname]);

        assert!(!registry
            .check_restrictions("svcs.TXT", "alias", &existing, None)
            .is_empty());
        assert!(registry
            .check_restrictions("svcs.TXT", "other", &existing, None)
            .is_empty());
        assert!(!registry
            .check_restrictions("abstract.Origin", "www", &BTreeMap::new(), None)
            .is_empty());
        let id = crate::identifier::Identifier::from_bytes(vec![1]);
        assert!(registry
            .check_restrictions("svcs.CNAME", "alias", &existing, Some(&id))
            .is_empty());
    }

    #[test]
    fn leaves_only_accept_glue_below() {
        let registry = global();
        let mut existing = BTreeMap::new();
        let mut delegation = Service::new(crate::services::abstracts::Delegation {
            name_servers: vec!["ns.sub".into()],
            ds: Vec::new(),
        });
        delegation.meta.id = crate::identifier::Identifier::from_bytes(vec![2]);
        existing.insert("sub".to_string(), vec![delegation]);

        assert!(registry
            .check_restrictions("abstract.Server", "ns.sub", &existing, None)
            .is_empty());
        assert!(!registry
            .check_restrictions("svcs.TXT", "www.sub", &existing, None)
            .is_empty());
    }
}
