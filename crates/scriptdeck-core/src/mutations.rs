use std::sync::Arc;

use scriptdeck_client::{ClientError, JobId, ScriptHub};
use thiserror::Error;
use tracing::warn;

use crate::store::{JobStore, KillArm};

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("unknown job {0}")]
    NotFound(JobId),
    #[error("job {0} has already finished")]
    AlreadyFinished(JobId),
    #[error("job {0} is still running")]
    StillRunning(JobId),
    #[error(transparent)]
    Transport(#[from] ClientError),
}

/// Kill and delete, written through the store so views update before the
/// server confirms.
pub struct Mutations {
    store: Arc<JobStore>,
    hub: Arc<dyn ScriptHub>,
}

impl Mutations {
    #[must_use]
    pub fn new(store: Arc<JobStore>, hub: Arc<dyn ScriptHub>) -> Self {
        Self { store, hub }
    }

    /// Request a kill. The job's `kill_requested` flag latches immediately
    /// so the affordance can disable; the terminal fields are left to the
    /// poller, which will observe the server's negative return code. A
    /// repeat request while one is latched is a no-op.
    pub async fn kill(&self, id: &JobId) -> Result<(), MutationError> {
        match self.store.arm_kill(id) {
            KillArm::NotFound => Err(MutationError::NotFound(id.clone())),
            KillArm::Finished => Err(MutationError::AlreadyFinished(id.clone())),
            KillArm::AlreadyRequested => Ok(()),
            KillArm::Armed => match self.hub.kill(id).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    self.store.disarm_kill(id);
                    warn!(job = %id, %error, "kill request failed");
                    Err(error.into())
                }
            },
        }
    }

    /// Delete a finished job. The entry disappears from the list
    /// immediately and is restored, subscriptions intact, if the server
    /// rejects the request.
    pub async fn delete(&self, id: &JobId) -> Result<(), MutationError> {
        let Some(job) = self.store.job(id) else {
            return Err(MutationError::NotFound(id.clone()));
        };
        if !job.is_finished() {
            return Err(MutationError::StillRunning(id.clone()));
        }
        if !self.store.begin_delete(id) {
            return Err(MutationError::NotFound(id.clone()));
        }
        match self.hub.delete(id).await {
            Ok(()) => {
                self.store.finish_delete(id);
                Ok(())
            }
            Err(error) => {
                self.store.undo_delete(id);
                warn!(job = %id, %error, "delete request failed, job restored");
                Err(error.into())
            }
        }
    }
}
