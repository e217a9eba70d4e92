//! happyzone
//!
//! The core of a DNS zone manager. Flat resource records read from a hosting provider are
//! folded into typed [services][services::Service] ("mail servers", "a DMARC policy", "a
//! delegation") that users edit, then expanded back into records and reconciled with the
//! provider as a reviewable list of [corrections][diff::Correction].
//!
//! Zones, domains, users and their satellites live in a key-value [store][storage::Storage]
//! whose layout is upgraded at startup by [versioned migrations][storage::migrations].
//!
#![warn(clippy::pedantic)]

pub mod api;
pub mod config;
pub mod diff;
pub mod error;
pub mod identifier;
pub mod provider;
pub mod resolver;
pub mod rr;
pub mod services;
pub mod storage;
pub mod workflow;
pub mod zone;

pub use api::new as new_http;
pub use config::{Config, SharedConfig};
pub use identifier::Identifier;
pub use storage::{FileStorage, InMemoryStorage, Storage};
pub use zone::Zone;
