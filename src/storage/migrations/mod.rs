//! Versioned upgrades of the stored format.
//!
//! Migration `n` upgrades a store from schema version `n` to `n + 1`; [`SCHEMA_VERSION`] is the
//! number of migrations. At startup [`migrate`] walks the store through
//! `NeedsInit → Current` or `Migrating(v) → … → Current`, persisting the version after each
//! step, so a failed step leaves the store at the version it failed on and the run can be
//! retried after a fix.
//!
//! Migrations read stored values as loosely typed JSON: the shapes they repair no longer decode
//! into the current types.

use crate::error::Error;
use crate::identifier::Identifier;
use crate::rr::name;
use crate::services::registry;
use crate::storage::domain_log::LOG_PREFIX;
use crate::storage::domains::DOMAIN_PREFIX;
use crate::storage::providers::PROVIDER_PREFIX;
use crate::storage::sessions::SESSION_PREFIX;
use crate::storage::zones::ZONE_PREFIX;
use crate::storage::{decode_data, encode_data, Storage, UserSettings};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod legacy;

/// What each migration does, indexed by the version it upgrades from.
pub const MIGRATIONS: &[&str] = &[
    "initial schema marker",
    "numeric user identifiers to binary identifiers",
    "normalize service map subdomain keys",
    "SOA timers stored as nanoseconds",
    "renamed service kinds",
    "domain log key layout",
    "user settings defaults",
    "legacy service shapes and e-mail explosion",
    "GSuite validation code",
    "session content encoding",
];

#[allow(clippy::cast_possible_truncation)]
pub const SCHEMA_VERSION: u64 = MIGRATIONS.len() as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    NeedsInit,
    Current,
    /// Stored at this older version.
    Migrating(u64),
}

/// Where the store stands relative to this release.
///
/// # Errors
///
/// Returns [`Error::IncompatibleSchema`] when the store is newer than [`SCHEMA_VERSION`].
pub async fn state(storage: &Storage) -> Result<MigrationState, Error> {
    match storage.schema_version().await? {
        None => Ok(MigrationState::NeedsInit),
        Some(found) if found > SCHEMA_VERSION => Err(Error::IncompatibleSchema {
            found,
            supported: SCHEMA_VERSION,
        }),
        Some(found) if found == SCHEMA_VERSION => Ok(MigrationState::Current),
        Some(found) => Ok(MigrationState::Migrating(found)),
    }
}

/// Bring the store to [`SCHEMA_VERSION`]. Running it on a current store does nothing.
///
/// # Errors
///
/// Returns [`Error::Migration`] carrying the failing version, [`Error::IncompatibleSchema`] for
/// a store from a newer release, or [`Error::Cancelled`] if `cancel` fires between steps.
pub async fn migrate(storage: &Storage, cancel: &CancellationToken) -> Result<u64, Error> {
    loop {
        match state(storage).await? {
            MigrationState::NeedsInit => {
                info!(version = SCHEMA_VERSION, "initializing storage schema");
                storage.set_schema_version(SCHEMA_VERSION).await?;
            }
            MigrationState::Current => return Ok(SCHEMA_VERSION),
            MigrationState::Migrating(version) => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let what = usize::try_from(version)
                    .ok()
                    .and_then(|v| MIGRATIONS.get(v))
                    .copied()
                    .unwrap_or_default();
                info!(from = version, to = version + 1, what, "migrating storage");
                run(storage, version)
                    .await
                    .map_err(|source| Error::Migration {
                        version,
                        source: Box::new(source),
                    })?;
                storage.set_schema_version(version + 1).await?;
            }
        }
    }
}

async fn run(storage: &Storage, from: u64) -> Result<(), Error> {
    match from {
        0 => Ok(()),
        1 => numeric_user_ids(storage).await,
        2 => normalize_subdomains(storage).await,
        3 => soa_timer_nanoseconds(storage).await,
        4 => renamed_service_kinds(storage).await,
        5 => domain_log_keys(storage).await,
        6 => user_settings_defaults(storage).await,
        7 => legacy::rewrite_legacy_services(storage).await,
        8 => legacy::gsuite_validation_code(storage).await,
        9 => session_content(storage).await,
        other => Err(Error::Internal(format!("no migration from version {other}"))),
    }
}

/// Apply `f` to every value under `prefix`, writing back those it reports changed.
pub(super) async fn rewrite_values<F>(storage: &Storage, prefix: &str, mut f: F) -> Result<usize, Error>
where
    F: FnMut(&str, &mut Value) -> Result<bool, Error> + Send,
{
    let mut changed = 0;
    for (key, data) in storage.kv().search(prefix).await? {
        let mut value: Value = decode_data(&data)?;
        if f(&key, &mut value)? {
            storage.kv().put(&key, encode_data(&value)?).await?;
            changed += 1;
        }
    }
    debug!(prefix, changed, "rewrote stored values");
    Ok(changed)
}

/// Apply `f` to every service object of a stored zone.
pub(super) fn for_each_service<F>(zone: &mut Value, mut f: F) -> Result<bool, Error>
where
    F: FnMut(&mut Map<String, Value>) -> Result<bool, Error>,
{
    let mut changed = false;
    let Some(services) = zone.get_mut("services").and_then(Value::as_object_mut) else {
        return Ok(false);
    };
    for list in services.values_mut() {
        for svc in list.as_array_mut().into_iter().flatten() {
            if let Some(svc) = svc.as_object_mut() {
                changed |= f(svc)?;
            }
        }
    }
    Ok(changed)
}

fn rewrite_numeric_id(value: &mut Value, field: &str) -> Option<Identifier> {
    let n = value.get(field)?.as_u64()?;
    let id = Identifier::from_legacy_u64(n);
    value[field] = Value::String(id.to_hex());
    Some(id)
}

async fn numeric_user_ids(storage: &Storage) -> Result<(), Error> {
    for prefix in ["user-", "auth-"] {
        for (key, data) in storage.kv().search(prefix).await? {
            let mut value: Value = decode_data(&data)?;
            let field = if value.get("Id").is_some() { "Id" } else { "id" };
            let Some(id) = rewrite_numeric_id(&mut value, field) else {
                continue;
            };
            let new_key = format!("{prefix}{id}");
            storage.kv().put(&new_key, encode_data(&value)?).await?;
            if new_key != key {
                storage.kv().delete(&key).await?;
            }
            info!(from = %key, to = %new_key, "rekeyed user");
        }
    }

    let owned = [
        (DOMAIN_PREFIX, "id_owner"),
        (PROVIDER_PREFIX, "id_owner"),
        (ZONE_PREFIX, "id_author"),
        (SESSION_PREFIX, "id_user"),
        (LOG_PREFIX, "id_user"),
        (OLD_LOG_PREFIX, "id_user"),
    ];
    for (prefix, field) in owned {
        rewrite_values(storage, prefix, |_, value| {
            Ok(rewrite_numeric_id(value, field).is_some())
        })
        .await?;
    }
    Ok(())
}

async fn normalize_subdomains(storage: &Storage) -> Result<(), Error> {
    let mut origins: HashMap<String, String> = HashMap::new();
    for (_, domain) in storage.search_json::<Value>(DOMAIN_PREFIX).await? {
        let Some(origin) = domain.get("domain").and_then(Value::as_str) else {
            continue;
        };
        for zone in domain
            .get("zone_history")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
        {
            origins.insert(format!("{ZONE_PREFIX}{zone}"), name::fqdn(origin));
        }
    }

    rewrite_values(storage, ZONE_PREFIX, |key, zone| {
        let origin = origins.get(key).map_or(".", String::as_str);
        let Some(services) = zone.get_mut("services").and_then(Value::as_object_mut) else {
            return Ok(false);
        };
        let mut normalized: Map<String, Value> = Map::new();
        let mut changed = false;
        for (subdomain, list) in std::mem::take(services) {
            let norm = name::normalize_subdomain(&subdomain, origin);
            changed |= norm != subdomain;
            let mut list = match list {
                Value::Array(list) => list,
                other => vec![other],
            };
            for svc in &mut list {
                if let Some(svc) = svc.as_object_mut() {
                    svc.insert("_domain".into(), Value::String(norm.clone()));
                }
            }
            match normalized.get_mut(&norm).and_then(Value::as_array_mut) {
                Some(existing) => existing.extend(list),
                None => {
                    normalized.insert(norm, Value::Array(list));
                }
            }
        }
        *services = normalized;
        Ok(changed)
    })
    .await?;
    Ok(())
}

const NANOS_PER_SECOND: u64 = 1_000_000_000;

async fn soa_timer_nanoseconds(storage: &Storage) -> Result<(), Error> {
    rewrite_values(storage, ZONE_PREFIX, |_, zone| {
        for_each_service(zone, |svc| {
            if svc.get("_svctype").and_then(Value::as_str) != Some("abstract.Origin") {
                return Ok(false);
            }
            let Some(soa) = svc
                .get_mut("Service")
                .and_then(|body| body.get_mut("soa"))
                .and_then(Value::as_object_mut)
            else {
                return Ok(false);
            };
            let mut changed = false;
            for timer in ["refresh", "retry", "expire", "minttl"] {
                if let Some(n) = soa.get(timer).and_then(Value::as_u64) {
                    if n >= NANOS_PER_SECOND && n % NANOS_PER_SECOND == 0 {
                        soa.insert(timer.into(), Value::from(n / NANOS_PER_SECOND));
                        changed = true;
                    }
                }
            }
            Ok(changed)
        })
    })
    .await?;
    Ok(())
}

async fn renamed_service_kinds(storage: &Storage) -> Result<(), Error> {
    let registry = registry::global();
    rewrite_values(storage, ZONE_PREFIX, |_, zone| {
        for_each_service(zone, |svc| {
            let Some(kind) = svc.get("_svctype").and_then(Value::as_str) else {
                return Ok(false);
            };
            match registry.find_service(kind) {
                Some(entry) if entry.kind != kind => {
                    svc.insert("_svctype".into(), Value::String(entry.kind.to_string()));
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    })
    .await?;
    Ok(())
}

/// Layout of domain log keys before version 6: `domain.log-<domain>-<log>`.
const OLD_LOG_PREFIX: &str = "domain.log-";

async fn domain_log_keys(storage: &Storage) -> Result<(), Error> {
    for (key, data) in storage.kv().search(OLD_LOG_PREFIX).await? {
        let Some((domain, log)) = key[OLD_LOG_PREFIX.len()..].split_once('-') else {
            return Err(Error::Internal(format!("malformed log key {key}")));
        };
        storage
            .kv()
            .put(&format!("{LOG_PREFIX}{domain}|{log}"), data)
            .await?;
        storage.kv().delete(&key).await?;
    }
    Ok(())
}

async fn user_settings_defaults(storage: &Storage) -> Result<(), Error> {
    rewrite_values(storage, "user-", |_, user| {
        let Some(user) = user.as_object_mut() else {
            return Ok(false);
        };
        let current = user.get("settings").cloned().unwrap_or(Value::Null);
        let settings: UserSettings = if current.is_object() {
            serde_json::from_value(current.clone())?
        } else {
            UserSettings::default()
        };
        let settings = serde_json::to_value(settings)?;
        if settings == current {
            return Ok(false);
        }
        user.insert("settings".into(), settings);
        Ok(true)
    })
    .await?;
    Ok(())
}

/// Only ever runs on schema 9 stores, where `content` is raw session data: a string holds the
/// text itself, whatever it looks like, and anything else is JSON.
async fn session_content(storage: &Storage) -> Result<(), Error> {
    rewrite_values(storage, SESSION_PREFIX, |_, session| {
        let Some(session) = session.as_object_mut() else {
            return Ok(false);
        };
        let encoded = match session.get("content") {
            Some(Value::String(s)) => STANDARD.encode(s.as_bytes()),
            Some(Value::Null) | None => String::new(),
            Some(other) => STANDARD.encode(serde_json::to_vec(other)?),
        };
        session.insert("content".into(), Value::String(encoded));
        Ok(true)
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Session, User};
    use serde_json::json;

    async fn put(storage: &Storage, key: &str, value: Value) {
        storage.put_json(key, &value).await.unwrap();
    }

    async fn get(storage: &Storage, key: &str) -> Option<Value> {
        storage.get_json(key).await.unwrap()
    }

    #[tokio::test]
    async fn fresh_stores_start_current() {
        let storage = Storage::in_memory();
        assert_eq!(state(&storage).await.unwrap(), MigrationState::NeedsInit);
        assert_eq!(migrate(&storage, &CancellationToken::new()).await.unwrap(), SCHEMA_VERSION);
        assert_eq!(state(&storage).await.unwrap(), MigrationState::Current);
        assert_eq!(SCHEMA_VERSION, 10);
    }

    #[tokio::test]
    async fn newer_stores_are_refused() {
        let storage = Storage::in_memory();
        storage.set_schema_version(SCHEMA_VERSION + 1).await.unwrap();
        assert!(matches!(
            migrate(&storage, &CancellationToken::new()).await,
            Err(Error::IncompatibleSchema { found: 11, supported: 10 })
        ));
    }

    #[tokio::test]
    async fn failures_leave_the_failing_version() {
        let storage = Storage::in_memory();
        storage.set_schema_version(5).await.unwrap();
        put(&storage, "domain.log-nodash", json!({})).await;
        let err = migrate(&storage, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Migration { version: 5, .. }));
        assert_eq!(storage.schema_version().await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn cancellation_stops_between_steps() {
        let storage = Storage::in_memory();
        storage.set_schema_version(3).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(migrate(&storage, &cancel).await, Err(Error::Cancelled)));
        assert_eq!(storage.schema_version().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn subdomain_keys_are_normalized_and_merged() {
        let storage = Storage::in_memory();
        put(
            &storage,
            "domain-01",
            json!({"id": "01", "id_owner": "05", "id_provider": "07", "domain": "example.com.",
                   "zone_history": ["aa"]}),
        )
        .await;
        put(
            &storage,
            "domain.zone-aa",
            json!({"services": {
                "www.example.com.": [{"_svctype": "svcs.TXT", "_domain": "www.example.com."}],
                "www": [{"_svctype": "svcs.TXT", "_domain": "www"}],
                "@": [{"_svctype": "svcs.TXT", "_domain": "@"}],
            }}),
        )
        .await;
        normalize_subdomains(&storage).await.unwrap();

        let zone = get(&storage, "domain.zone-aa").await.unwrap();
        let services = zone["services"].as_object().unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services["www"].as_array().unwrap().len(), 2);
        assert_eq!(services[""][0]["_domain"], "");
    }

    #[tokio::test]
    async fn soa_timers_and_kind_aliases() {
        let storage = Storage::in_memory();
        put(
            &storage,
            "domain.zone-aa",
            json!({"services": {
                "": [{"_svctype": "abstract.Origin", "Service": {"soa": {
                    "ns": "ns1", "mbox": "hostmaster", "serial": 1,
                    "refresh": 7_200_000_000_000_u64, "retry": 3600, "expire": 1_209_600_000_000_000_u64,
                    "minttl": 300}}}],
                "_443._tcp.www": [{"_svctype": "svcs.TLSA", "Service": {}}],
            }}),
        )
        .await;
        soa_timer_nanoseconds(&storage).await.unwrap();
        renamed_service_kinds(&storage).await.unwrap();

        let zone = get(&storage, "domain.zone-aa").await.unwrap();
        let soa = &zone["services"][""][0]["Service"]["soa"];
        assert_eq!(soa["refresh"], 7200);
        assert_eq!(soa["retry"], 3600);
        assert_eq!(soa["expire"], 1_209_600);
        assert_eq!(zone["services"]["_443._tcp.www"][0]["_svctype"], "svcs.TLSAs");
    }

    #[tokio::test]
    async fn log_keys_settings_and_sessions() {
        let storage = Storage::in_memory();
        put(&storage, "domain.log-0a-0b", json!({"id": "0b"})).await;
        put(
            &storage,
            "user-05",
            json!({"id": "05", "email": "a@b", "created_at": "2020-01-01T00:00:00Z",
                   "settings": {"language": "fr"}}),
        )
        .await;
        put(
            &storage,
            "user.session-s1",
            json!({"id": "s1", "id_user": "05", "issued_at": "2020-01-01T00:00:00Z",
                   "expires_at": "2030-01-01T00:00:00Z", "modified_at": "2020-01-01T00:00:00Z",
                   "content": {"oidc-state": "xyz"}}),
        )
        .await;

        domain_log_keys(&storage).await.unwrap();
        user_settings_defaults(&storage).await.unwrap();
        session_content(&storage).await.unwrap();

        assert!(get(&storage, "domain.log-0a-0b").await.is_none());
        assert!(get(&storage, "domain.log|0a|0b").await.is_some());

        let user: User = storage.get_json("user-05").await.unwrap().unwrap();
        assert_eq!(user.settings.language, "fr");
        assert_eq!(user.settings.field_hint, 2);

        let session: Session = storage.get_json("user.session-s1").await.unwrap().unwrap();
        assert_eq!(session.content, br#"{"oidc-state":"xyz"}"#.to_vec());
        assert_eq!(session_content_changes(&storage).await, 0);
    }

    #[tokio::test]
    async fn string_session_content_is_taken_literally() {
        let storage = Storage::in_memory();
        for (id, content) in [("s1", json!("test")), ("s2", json!("")), ("s3", Value::Null)] {
            put(
                &storage,
                &format!("user.session-{id}"),
                json!({"id": id, "id_user": "05", "issued_at": "2020-01-01T00:00:00Z",
                       "expires_at": "2030-01-01T00:00:00Z", "modified_at": "2020-01-01T00:00:00Z",
                       "content": content}),
            )
            .await;
        }
        session_content(&storage).await.unwrap();

        let session: Session = storage.get_json("user.session-s1").await.unwrap().unwrap();
        assert_eq!(session.content, b"test".to_vec());
        assert_eq!(get(&storage, "user.session-s1").await.unwrap()["content"], "dGVzdA==");
        for id in ["s2", "s3"] {
            let session: Session = storage.get_json(&format!("user.session-{id}")).await.unwrap().unwrap();
            assert!(session.content.is_empty());
        }
    }

    async fn session_content_changes(storage: &Storage) -> usize {
        rewrite_values(storage, SESSION_PREFIX, |_, session| {
            Ok(!session["content"].is_string())
        })
        .await
        .unwrap()
    }
}
