use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::types::{JobId, JobRecord, ScriptInfo};

/// Transport failure surface shared by every hub implementation.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("hub_base_url_missing")]
    BaseUrlMissing,
    #[error("hub_request_failed:{message}")]
    Request { message: String },
    #[error("hub_request_timeout")]
    Timeout,
    #[error("hub_read_failed:{message}")]
    Read { message: String },
    #[error("hub_http_{status}:{body}")]
    Http { status: u16, body: String },
    #[error("hub_json_decode_failed:{message}")]
    Decode { message: String },
}

impl ClientError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }

    /// Long-poll timeouts are part of the protocol, not failures worth
    /// surfacing to callers.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Captured values for one submission, in declared-argument order.
///
/// Field `N` travels as the multipart part named `argN`; file fields carry
/// a filename so the server stores them and passes the path through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitForm {
    pub script: String,
    pub fields: Vec<SubmitField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitField {
    Text(String),
    File { file_name: String, bytes: Vec<u8> },
}

impl SubmitField {
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Text(value) => value.len(),
            Self::File { bytes, .. } => bytes.len(),
        }
    }
}

/// Remote operations the sync engine needs from a launcher server.
///
/// [`crate::HttpScriptHub`] is the production implementation; tests swap
/// in scripted fakes.
#[async_trait]
pub trait ScriptHub: Send + Sync {
    /// Every launchable script with its argument declarations.
    async fn scripts(&self) -> Result<Vec<ScriptInfo>, ClientError>;

    /// Every job the server still remembers, in start order.
    async fn running(&self) -> Result<Vec<JobRecord>, ClientError>;

    /// One job's current record.
    async fn run_detail(&self, id: &JobId) -> Result<JobRecord, ClientError>;

    /// Output text past the `from` character offset. The server holds the
    /// request open until something past `from` exists or the job exits;
    /// once exited it answers the remainder (possibly empty) immediately.
    async fn output(&self, id: &JobId, from: usize) -> Result<String, ClientError>;

    /// Start a script. `progress` receives the upload fraction in
    /// `[0, 1]`. Resolves to the id of the newly created job.
    async fn submit(
        &self,
        form: SubmitForm,
        progress: watch::Sender<f64>,
    ) -> Result<JobId, ClientError>;

    /// Ask the server to terminate a job. The record stays visible until
    /// deleted or expired.
    async fn kill(&self, id: &JobId) -> Result<(), ClientError>;

    /// Kill if still running, then erase the record.
    async fn delete(&self, id: &JobId) -> Result<(), ClientError>;
}
