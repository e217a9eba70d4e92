//! Opaque binary identifiers.
//!
//! Every stored entity is keyed by an [`Identifier`]: a short byte string that prints and
//! serializes as lowercase hexadecimal. Fresh identifiers come from the thread-local
//! cryptographic RNG; user identifiers can instead be derived from an email address so the same
//! account always maps to the same key.

use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Width of freshly generated identifiers, in bytes.
pub const IDENTIFIER_LEN: usize = 16;

#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(Vec<u8>);

impl Identifier {
    #[must_use]
    pub fn new_random() -> Self {
        let mut buf = vec![0u8; IDENTIFIER_LEN];
        rand::thread_rng().fill_bytes(&mut buf);
        Identifier(buf)
    }

    /// Derive a deterministic identifier from an email address.
    #[must_use]
    pub fn from_email(email: &str) -> Self {
        let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
        Identifier(digest[..IDENTIFIER_LEN].to_vec())
    }

    /// Convert a legacy numeric identifier to its minimal big-endian byte form.
    #[must_use]
    pub fn from_legacy_u64(n: u64) -> Self {
        let bytes = n.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        Identifier(bytes[first..].to_vec())
    }

    /// Derive a stable identifier from arbitrary content (used for correction ids).
    #[must_use]
    pub fn digest(content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        Identifier(digest[..IDENTIFIER_LEN].to_vec())
    }

    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Identifier(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The empty identifier is reserved and matches no entity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.to_hex())
    }
}

impl FromStr for Identifier {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Identifier(hex::decode(s)?))
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Identifier::from_str(&s).map_err(D::Error::custom)
    }
}
