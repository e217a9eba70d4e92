use crate::provider::ProviderSpec;
use crate::services::registry::ServiceInfos;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub(super) struct HealthCheck {
    pub ok: &'static str,
    pub schema_version: Option<u64>,
}

/// Every registered service kind with its descriptive infos.
#[derive(Serialize, Debug)]
#[serde(transparent)]
pub(super) struct ServiceSpecs(pub BTreeMap<&'static str, &'static ServiceInfos>);

/// Provider driver types keyed by type name.
#[derive(Serialize, Debug)]
#[serde(transparent)]
pub(super) struct ProviderSpecs(pub BTreeMap<&'static str, ProviderSpec>);
