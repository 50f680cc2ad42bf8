//! Wire contract and HTTP transport for a script-launcher server.
//!
//! A launcher server exposes a small HTTP surface: a catalog of runnable
//! scripts under `/scripts/` and per-job records under `/running/`. This
//! crate holds the serde types for that surface, the [`ScriptHub`] trait
//! the sync engine consumes, and the reqwest implementation of it.

pub mod hub;
pub mod http;
pub mod types;

pub use hub::{ClientError, ScriptHub, SubmitField, SubmitForm};
pub use http::{HttpScriptHub, HttpScriptHubConfig};
pub use types::{ArgKind, ArgSpec, JobId, JobRecord, Progress, ScriptInfo};
