//! Error types.

use crate::identifier::Identifier;
use trust_dns_proto::error::ProtoError;

/// ErrorKind is the coarse classification of an [`Error`], carried separately from its message
/// so callers can map it to a status code or translate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Syntax,
    Validation,
    Unauthorized,
    Forbidden,
    Conflict,
    Unsupported,
    Provider,
    Internal,
    Cancelled,
}

/// Error enumerates the possible zone management error states.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a user can't be found in storage.
    #[error("user not found")]
    UserNotFound,

    /// Returned when local authentication credentials can't be found in storage.
    #[error("authentication credentials not found")]
    AuthUserNotFound,

    /// Returned when a session can't be found in storage.
    #[error("session not found")]
    SessionNotFound,

    /// Returned when a domain can't be found in storage.
    #[error("domain not found")]
    DomainNotFound,

    /// Returned when a zone can't be found in storage.
    #[error("zone not found")]
    ZoneNotFound,

    /// Returned when a provider can't be found in storage.
    #[error("provider not found")]
    ProviderNotFound,

    /// Returned when no service with the requested identifier exists in a zone.
    #[error("service not found")]
    ServiceNotFound,

    /// Returned when a service kind isn't known to the [service registry][crate::services::registry].
    #[error("unknown service kind \"{0}\"")]
    UnknownServiceKind(String),

    /// Returned when a domain log entry can't be found in storage.
    #[error("domain log not found")]
    DomainLogNotFound,

    /// Returned when a check result, schedule or execution can't be found in storage.
    #[error("{0} not found")]
    CheckNotFound(&'static str),

    /// Returned when zone text can't be parsed.
    #[error("syntax error on line {line}: {msg}")]
    Syntax { line: usize, msg: String },

    /// Returned when a record uses a class other than `IN`.
    #[error("unsupported class {0}")]
    UnsupportedClass(String),

    /// Returned when client-provided data is well-formed but semantically invalid.
    #[error("{0}")]
    Validation(String),

    #[error("not logged in")]
    Unauthorized,

    #[error("you are not allowed to do this")]
    Forbidden,

    /// Returned when a zone changed in storage since it was loaded.
    #[error("zone {0} was modified concurrently, reload and retry")]
    Conflict(Identifier),

    /// Returned when a feature is asked of a provider driver that doesn't expose it.
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),

    /// Returned when a provider driver fails; carries the driver's own message.
    #[error("provider error: {0}")]
    Provider(String),

    /// Returned when the stored schema is newer than this release understands.
    #[error("stored schema version {found} is newer than supported version {supported}")]
    IncompatibleSchema { found: u64, supported: u64 },

    /// Returned when a migration step fails. The store stays at `version`.
    #[error("migration from schema version {version} failed: {source}")]
    Migration {
        version: u64,
        #[source]
        source: Box<Error>,
    },

    /// Returned when an operation observes its cancellation token at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// Returned when the admin API bind address is neither a loopback nor a private address.
    #[error("API bind address ({0}) must be a loopback or private IP")]
    InsecureAPIBind(std::net::IpAddr),

    /// Returned when a DNS query answers with anything but `NOERROR`.
    #[error("DNS query failed: {0}")]
    Resolver(String),

    /// Returned for storage failures and programmer errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    IO(#[from] std::io::Error),

    /// Returned when a stored value or a configuration file isn't valid JSON.
    #[error("invalid JSON")]
    InvalidJSON(#[from] serde_json::Error),

    /// Returned when an API request body can't be extracted as JSON.
    #[error(transparent)]
    JsonExtractorRejection(#[from] axum::extract::rejection::JsonRejection),

    /// Returned when the DNS client encounters a protocol error.
    #[error("DNS error")]
    DNSError(#[from] ProtoError),
}

impl Error {
    /// Shorthand for building an [`Error::Syntax`].
    pub fn syntax(line: usize, msg: impl Into<String>) -> Self {
        Error::Syntax {
            line,
            msg: msg.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UserNotFound
            | Error::AuthUserNotFound
            | Error::SessionNotFound
            | Error::DomainNotFound
            | Error::ZoneNotFound
            | Error::ProviderNotFound
            | Error::ServiceNotFound
            | Error::DomainLogNotFound
            | Error::CheckNotFound(_) => ErrorKind::NotFound,
            Error::Syntax { .. }
            | Error::UnsupportedClass(_)
            | Error::InvalidJSON(_)
            | Error::JsonExtractorRejection(_) => ErrorKind::Syntax,
            Error::Validation(_) | Error::UnknownServiceKind(_) | Error::InsecureAPIBind(_) => {
                ErrorKind::Validation
            }
            Error::Unauthorized => ErrorKind::Unauthorized,
            Error::Forbidden => ErrorKind::Forbidden,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Provider(_) | Error::Resolver(_) | Error::DNSError(_) => ErrorKind::Provider,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::IncompatibleSchema { .. }
            | Error::Migration { .. }
            | Error::Internal(_)
            | Error::IO(_) => ErrorKind::Internal,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
