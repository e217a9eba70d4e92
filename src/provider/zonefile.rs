//! A provider serving master files from a directory.
//!
//! Zone `example.com.` lives in `<directory>/example.com.zone`. Each applied correction rewrites
//! the whole file with absolute names, `$ORIGIN` first.

use crate::diff::Correction;
use crate::error::Error;
use crate::provider::{ProviderDriver, ProviderSpec};
use crate::rr::{name, parse_zone, RData, Record};
use crate::services::schema::{Field, FieldType};
use serde::Deserialize;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const TYPE: &str = "ZoneFile";

const EXTENSION: &str = "zone";

#[derive(Deserialize)]
struct Settings {
    directory: PathBuf,
}

/// A file-backed provider. Writes go through a lock so concurrent corrections don't interleave
/// their read-modify-write of a zone file.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct ZoneFileProvider {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

fn provider_error(path: &Path, err: &std::io::Error) -> Error {
    Error::Provider(format!("{}: {err}", path.display()))
}

impl ZoneFileProvider {
    /// Serve the zone files found in `directory`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Build from stored settings: `{"directory": "<path>"}`. The directory must exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for malformed settings or a missing directory.
    pub async fn from_settings(settings: &serde_json::Value) -> Result<Self, Error> {
        let settings: Settings = serde_json::from_value(settings.clone())
            .map_err(|err| Error::Validation(format!("invalid settings: {err}")))?;
        match fs::metadata(&settings.directory).await {
            Ok(meta) if meta.is_dir() => Ok(Self::new(settings.directory)),
            _ => Err(Error::Validation(format!(
                "{} is not a directory",
                settings.directory.display()
            ))),
        }
    }

    fn zone_path(&self, fqdn: &str) -> PathBuf {
        let origin = name::fqdn(fqdn).to_ascii_lowercase();
        self.directory.join(format!("{origin}{EXTENSION}"))
    }

    /// Write `records` as zone `fqdn`, creating or replacing its file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if the file can't be written.
    pub async fn write_zone(&self, fqdn: &str, records: &[Record]) -> Result<(), Error> {
        let origin = name::fqdn(fqdn);
        let mut text = String::new();
        let _ = writeln!(text, "$ORIGIN {origin}");
        for rr in records {
            let _ = writeln!(text, "{}", rr.fqdn(&origin));
        }

        let path = self.zone_path(fqdn);
        let mut file = fs::File::create(&path)
            .await
            .map_err(|err| provider_error(&path, &err))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|err| provider_error(&path, &err))?;
        file.flush().await.map_err(|err| provider_error(&path, &err))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProviderDriver for ZoneFileProvider {
    async fn list_zones(&self) -> Result<Vec<String>, Error> {
        let mut entries = fs::read_dir(&self.directory)
            .await
            .map_err(|err| provider_error(&self.directory, &err))?;
        let mut zones = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| provider_error(&self.directory, &err))?
        {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(origin) = file_name.strip_suffix(EXTENSION) {
                if origin.ends_with('.') && origin.len() > 1 {
                    zones.push(origin.to_string());
                }
            }
        }
        zones.sort();
        Ok(zones)
    }

    async fn get_zone_records(&self, fqdn: &str) -> Result<Vec<Record>, Error> {
        let path = self.zone_path(fqdn);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::Provider(format!("zone {fqdn} is not hosted here")))
            }
            Err(err) => return Err(provider_error(&path, &err)),
        };
        parse_zone(&text, fqdn).map_err(|err| Error::Provider(format!("{}: {err}", path.display())))
    }

    async fn get_nameservers(&self, fqdn: &str) -> Result<Vec<String>, Error> {
        let apex = name::fqdn(fqdn).to_ascii_lowercase();
        Ok(self
            .get_zone_records(fqdn)
            .await?
            .into_iter()
            .filter(|rr| rr.name.to_ascii_lowercase() == apex)
            .filter_map(|rr| match rr.data {
                RData::NS { ns } => Some(ns),
                _ => None,
            })
            .collect())
    }

    async fn apply_correction(&self, fqdn: &str, correction: &Correction) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.get_zone_records(fqdn).await?;
        correction.apply_to(&mut records)?;
        self.write_zone(fqdn, &records).await
    }
}

pub(super) fn spec() -> ProviderSpec {
    ProviderSpec {
        provider_type: TYPE,
        name: "Zone files",
        description: "Master files in a local directory, one <origin>zone file per zone.",
        list_zones: true,
        fields: vec![Field::new("directory", "Directory", FieldType::String)
            .placeholder("/var/lib/happyzone/zones")
            .required()],
    }
}
