use crate::error::Error;
use crate::storage::{FileStorage, Storage};
use ipnetwork::IpNetwork;
use lazy_static::lazy_static;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub type SharedConfig = Arc<Config>;

/// Where the key-value store lives.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Lost on exit.
    #[default]
    Memory,
    /// A JSON state file rewritten after each change.
    File { path: String },
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    pub api_bind_addr: SocketAddr,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_api_timeout")]
    pub api_timeout: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_resolver_timeout")]
    pub resolver_timeout: Duration,
    /// TTL given to zones created from scratch.
    #[serde(default = "default_ttl")]
    pub default_ttl: u32,
    /// Results kept per checker and target.
    #[serde(default = "default_check_results_keep")]
    pub check_results_keep: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_log_retention")]
    pub log_retention: Duration,
    #[serde(default)]
    pub allow_public_api: bool,
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_resolver_timeout() -> Duration {
    crate::resolver::DEFAULT_TIMEOUT
}

fn default_ttl() -> u32 {
    3600
}

fn default_check_results_keep() -> usize {
    10
}

fn default_log_retention() -> Duration {
    Duration::from_secs(90 * 24 * 3600)
}

lazy_static! {
    // NOTE: Ipv6Addr::is_unique_local is still unstable, see RFC 4193 for the range.
    static ref IPV6_UNIQUE_LOCAL_NETWORK: IpNetwork = IpNetwork::from_str("fc00::/7").unwrap();
}

impl Config {
    /// # Errors
    ///
    /// Returns [`Error::IO`] or [`Error::InvalidJSON`] for an unreadable file, and
    /// [`Error::InsecureAPIBind`] when the API would listen on a public address without
    /// `allow_public_api`.
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        let reader = BufReader::new(f);
        let conf: Config = serde_json::from_reader(reader)?;
        conf.bind_addr_is_secure()?;
        Ok(conf)
    }

    /// Open the configured storage backend.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when the state file can't be loaded.
    pub async fn open_storage(&self) -> Result<Storage, Error> {
        match &self.storage {
            StorageConfig::Memory => Ok(Storage::in_memory()),
            StorageConfig::File { path } => {
                Ok(Storage::new(Arc::new(FileStorage::try_from_file(path).await?)))
            }
        }
    }

    /// The log retention as a [`time::Duration`] for date arithmetic.
    #[must_use]
    pub fn log_retention(&self) -> time::Duration {
        time::Duration::try_from(self.log_retention).unwrap_or(time::Duration::MAX)
    }

    fn bind_addr_is_secure(&self) -> Result<(), Error> {
        if self.allow_public_api {
            return Ok(());
        }
        match self.api_bind_addr {
            SocketAddr::V4(v4_addr) => {
                let ip = v4_addr.ip();
                if !ip.is_loopback() && !ip.is_private() {
                    return Err(Error::InsecureAPIBind(IpAddr::V4(*ip)));
                }
                Ok(())
            }
            SocketAddr::V6(v6_addr) => {
                let ip = v6_addr.ip();
                if !ip.is_loopback() && !IPV6_UNIQUE_LOCAL_NETWORK.contains(IpAddr::V6(*ip)) {
                    return Err(Error::InsecureAPIBind(IpAddr::V6(*ip)));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load(json: &str) -> Result<Config, Error> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        Config::try_from_file(file.path())
    }

    #[test]
    fn defaults() {
        let conf = load(r#"{"api_bind_addr": "127.0.0.1:8081"}"#).unwrap();
        assert_eq!(conf.storage, StorageConfig::Memory);
        assert_eq!(conf.resolver_timeout, Duration::from_secs(5));
        assert_eq!(conf.default_ttl, 3600);
        assert_eq!(conf.check_results_keep, 10);
        assert_eq!(conf.log_retention(), time::Duration::days(90));
        assert!(!conf.allow_public_api);
    }

    #[test]
    fn storage_backends_and_durations() {
        let conf = load(
            r#"{"api_bind_addr": "[fd00::1]:8081", "api_timeout": 10, "log_retention": 86400,
                "storage": {"backend": "file", "path": "/var/lib/happyzone/state.json"}}"#,
        )
        .unwrap();
        assert_eq!(
            conf.storage,
            StorageConfig::File {
                path: "/var/lib/happyzone/state.json".into()
            }
        );
        assert_eq!(conf.api_timeout, Duration::from_secs(10));
        assert_eq!(conf.log_retention(), time::Duration::days(1));
    }

    #[test]
    fn public_binds_need_opting_in() {
        assert!(matches!(
            load(r#"{"api_bind_addr": "192.0.2.1:8081"}"#),
            Err(Error::InsecureAPIBind(_))
        ));
        assert!(matches!(
            load(r#"{"api_bind_addr": "[2001:db8::1]:8081"}"#),
            Err(Error::InsecureAPIBind(_))
        ));
        assert!(load(r#"{"api_bind_addr": "192.0.2.1:8081", "allow_public_api": true}"#).is_ok());
        assert!(load(r#"{"api_bind_addr": "10.1.2.3:8081"}"#).is_ok());
    }

    #[tokio::test]
    async fn file_storage_is_opened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let conf = Config {
            storage: StorageConfig::File {
                path: path.to_string_lossy().into_owned(),
            },
            ..load(r#"{"api_bind_addr": "127.0.0.1:8081"}"#).unwrap()
        };
        let storage = conf.open_storage().await.unwrap();
        assert_eq!(storage.schema_version().await.unwrap(), None);
        assert!(path.exists());
    }
}
