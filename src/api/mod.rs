//! Operational HTTP API.
//!
//! # API Endpoints
//!
//! ## `/healthcheck` (GET)
//!
//!   Returns HTTP 200 (OK) and a JSON body of the form `{"ok":"healthy","schema_version":10}`
//!   when the service and its storage are operational.
//!
//! ## `/service_specs` (GET)
//!
//!   Returns the descriptive infos of every registered service kind, keyed by kind:
//!
//!   ```json
//!   { "svcs.MXs": { "name": "E-Mail servers", "_svctype": "svcs.MXs", "description": "…",
//!                   "family": "", "categories": ["email"], "restrictions": { … } } }
//!   ```
//!
//! ## `/service_specs/{kind}` (GET)
//!
//!   Returns the form schema (`{"fields": [...]}`) of a service kind or subservice. Legacy kind
//!   names are accepted. Unknown kinds give HTTP 404.
//!
//! ## `/provider_specs` (GET)
//!
//!   Returns every provider driver type with the settings form it expects.
//!
//! ## `/resolver` (POST)
//!
//!   Expects a JSON request body of the form:
//!
//!   ```json
//!   { "resolver": "192.0.2.53", "domain": "example.com.", "type": "MX" }
//!   ```
//!
//!   and sends the query over UDP, waiting at most the configured `resolver_timeout`. Answers
//!   come back as master-file lines:
//!
//!   ```json
//!   { "rcode": "No Error", "answers": ["example.com.\t300\tIN\tMX\t10 mx.example.com."],
//!     "authority": [] }
//!   ```
//!
//!   Any response code but NOERROR, or no answer in time, gives HTTP 500.

mod api_error;
mod model;
mod routes;
pub mod server;

pub use server::new;
