//! Client-side sync engine for a scriptdeck launcher server.
//!
//! The engine mirrors the server's running-job state into an in-process
//! [`store::JobStore`] and keeps it fresh with a [`sync::SyncService`]
//! poller. Consumers read snapshots or take per-field watch subscriptions;
//! [`mutations::Mutations`] and [`submit::Submission`] write through the
//! store optimistically and reconcile against the server. [`router`] maps
//! URL fragments onto the application's pane state.
//!
//! Everything talks to the server through the
//! [`scriptdeck_client::ScriptHub`] trait, so the whole engine runs
//! against a scripted fake in tests.

pub mod catalog;
pub mod config;
pub mod mutations;
pub mod router;
pub mod store;
pub mod submit;
pub mod sync;

pub use catalog::ScriptCatalog;
pub use config::SyncConfig;
pub use mutations::{MutationError, Mutations};
pub use router::{Mode, Route, RouterState};
pub use store::{
    JobSeed, JobStore, JobUpdate, JobsSnapshot, LoadState, OutputSubscription, RunningJob,
};
pub use submit::{FieldValue, PickedFile, SubmitError, SubmitState, Submission};
pub use sync::{SyncPoker, SyncService};
