use std::pin::pin;
use std::sync::{Arc, Mutex, Weak};

use chrono::Local;
use scriptdeck_client::{
    ClientError, JobId, ScriptHub, ScriptInfo, SubmitField, SubmitForm,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::store::{JobSeed, JobStore};
use crate::sync::SyncPoker;

/// Lifecycle of one run-script dialogue.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitState {
    Editing,
    Uploading { progress: f64 },
    Created { job_id: JobId },
    Failed { message: String },
}

/// Current value of one form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    File(Option<PickedFile>),
}

/// A file the user picked for a file-typed argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("no argument at index {0}")]
    FieldIndex(usize),
    #[error("argument {0} takes a different kind of value")]
    FieldKind(usize),
    #[error("argument {0} requires a file")]
    MissingFile(usize),
    #[error("an upload is in flight")]
    UploadInFlight,
}

/// One script's run dialogue: owned field values, a watch-published
/// [`SubmitState`], and the upload task.
///
/// Values survive every transition except a successful creation going out
/// of scope. Cancelling an upload aborts the request and returns to
/// `Editing` with the values untouched; a repeat submit while one is in
/// flight is ignored.
pub struct Submission {
    script: ScriptInfo,
    values: Mutex<Vec<FieldValue>>,
    state: watch::Sender<SubmitState>,
    task: Mutex<Option<JoinHandle<()>>>,
    store: Arc<JobStore>,
    hub: Arc<dyn ScriptHub>,
    poker: SyncPoker,
}

impl Submission {
    #[must_use]
    pub fn new(
        script: ScriptInfo,
        store: Arc<JobStore>,
        hub: Arc<dyn ScriptHub>,
        poker: SyncPoker,
    ) -> Arc<Self> {
        let values = script
            .args
            .iter()
            .map(|arg| {
                if arg.kind.is_file() {
                    FieldValue::File(None)
                } else {
                    FieldValue::Text(arg.kind.default_value())
                }
            })
            .collect();
        let (state, _rx) = watch::channel(SubmitState::Editing);
        Arc::new(Self {
            script,
            values: Mutex::new(values),
            state,
            task: Mutex::new(None),
            store,
            hub,
            poker,
        })
    }

    #[must_use]
    pub fn script(&self) -> &ScriptInfo {
        &self.script
    }

    #[must_use]
    pub fn state(&self) -> SubmitState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SubmitState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn values(&self) -> Vec<FieldValue> {
        self.lock_values().clone()
    }

    /// Fill text fields positionally from a "run again" argument list.
    /// File fields keep their position but cannot be restored from a
    /// string, so they stay unpicked.
    pub fn prefill(&self, args: &[String]) {
        if self.uploading() {
            return;
        }
        let mut values = self.lock_values();
        for (value, arg) in values.iter_mut().zip(args) {
            if let FieldValue::Text(text) = value {
                text.clone_from(arg);
            }
        }
    }

    pub fn set_text(&self, index: usize, value: impl Into<String>) -> Result<(), SubmitError> {
        if self.uploading() {
            return Err(SubmitError::UploadInFlight);
        }
        let mut values = self.lock_values();
        match values.get_mut(index) {
            Some(FieldValue::Text(text)) => {
                *text = value.into();
                Ok(())
            }
            Some(FieldValue::File(_)) => Err(SubmitError::FieldKind(index)),
            None => Err(SubmitError::FieldIndex(index)),
        }
    }

    pub fn set_file(&self, index: usize, file: Option<PickedFile>) -> Result<(), SubmitError> {
        if self.uploading() {
            return Err(SubmitError::UploadInFlight);
        }
        let mut values = self.lock_values();
        match values.get_mut(index) {
            Some(FieldValue::File(slot)) => {
                *slot = file;
                Ok(())
            }
            Some(FieldValue::Text(_)) => Err(SubmitError::FieldKind(index)),
            None => Err(SubmitError::FieldIndex(index)),
        }
    }

    /// Start the upload. Returns `Ok(false)` when a submission is already
    /// in flight or has already succeeded, so repeat submit events are
    /// harmless. Validation failures surface before any state change.
    pub fn submit(self: &Arc<Self>) -> Result<bool, SubmitError> {
        let mut task_slot = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let busy = matches!(
            &*self.state.borrow(),
            SubmitState::Uploading { .. } | SubmitState::Created { .. }
        );
        if busy {
            return Ok(false);
        }

        let form = self.build_form()?;
        self.state
            .send_replace(SubmitState::Uploading { progress: 0.0 });

        let (progress_tx, progress_rx) = watch::channel(0.0f64);
        let submission = Arc::downgrade(self);
        let hub = Arc::clone(&self.hub);
        *task_slot = Some(tokio::spawn(run_upload(
            submission,
            hub,
            form,
            progress_tx,
            progress_rx,
        )));
        Ok(true)
    }

    /// Abort an in-flight upload or leave the `Failed` state, returning to
    /// `Editing` either way. Field values are untouched.
    pub fn cancel(&self) {
        let mut task_slot = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = self.state.borrow().clone();
        match state {
            SubmitState::Uploading { .. } => {
                if let Some(task) = task_slot.take() {
                    task.abort();
                }
                self.state.send_replace(SubmitState::Editing);
            }
            SubmitState::Failed { .. } => {
                self.state.send_replace(SubmitState::Editing);
            }
            SubmitState::Editing | SubmitState::Created { .. } => {}
        }
    }

    fn uploading(&self) -> bool {
        matches!(&*self.state.borrow(), SubmitState::Uploading { .. })
    }

    fn lock_values(&self) -> std::sync::MutexGuard<'_, Vec<FieldValue>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn build_form(&self) -> Result<SubmitForm, SubmitError> {
        let values = self.lock_values();
        let mut fields = Vec::with_capacity(values.len());
        for (index, value) in values.iter().enumerate() {
            match value {
                FieldValue::Text(text) => fields.push(SubmitField::Text(text.clone())),
                FieldValue::File(Some(picked)) => fields.push(SubmitField::File {
                    file_name: picked.file_name.clone(),
                    bytes: picked.bytes.clone(),
                }),
                FieldValue::File(None) => return Err(SubmitError::MissingFile(index)),
            }
        }
        Ok(SubmitForm {
            script: self.script.script.clone(),
            fields,
        })
    }

    fn apply_upload_progress(&self, fraction: f64) {
        self.state.send_if_modified(|state| {
            if let SubmitState::Uploading { progress } = state {
                if fraction > *progress {
                    *progress = fraction;
                    return true;
                }
            }
            false
        });
    }

    fn finish_submit(&self, result: Result<JobId, ClientError>) {
        match result {
            Ok(job_id) => {
                self.store.seed_local_job(JobSeed {
                    id: job_id.clone(),
                    script: self.script.script.clone(),
                    name: Some(self.script.name.clone()),
                    args: self.current_args(),
                    start_time: Local::now().naive_local(),
                });
                self.poker.poke();
                self.state.send_replace(SubmitState::Created { job_id });
            }
            Err(error) => {
                warn!(script = %self.script.script, %error, "script submission failed");
                self.state.send_replace(SubmitState::Failed {
                    message: error.to_string(),
                });
            }
        }
    }

    fn current_args(&self) -> Vec<String> {
        self.lock_values()
            .iter()
            .map(|value| match value {
                FieldValue::Text(text) => text.clone(),
                FieldValue::File(Some(picked)) => picked.file_name.clone(),
                FieldValue::File(None) => String::new(),
            })
            .collect()
    }
}

impl Drop for Submission {
    fn drop(&mut self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// The upload task holds only a weak reference, so dropping the dialogue
/// both aborts it and lets the `Submission` free.
async fn run_upload(
    submission: Weak<Submission>,
    hub: Arc<dyn ScriptHub>,
    form: SubmitForm,
    progress_tx: watch::Sender<f64>,
    mut progress_rx: watch::Receiver<f64>,
) {
    let mut submit = pin!(hub.submit(form, progress_tx));
    let mut progress_open = true;
    loop {
        tokio::select! {
            result = submit.as_mut() => {
                if let Some(submission) = submission.upgrade() {
                    submission.finish_submit(result);
                }
                return;
            }
            changed = progress_rx.changed(), if progress_open => {
                match changed {
                    Ok(()) => {
                        let fraction = *progress_rx.borrow_and_update();
                        match submission.upgrade() {
                            Some(submission) => submission.apply_upload_progress(fraction),
                            None => return,
                        }
                    }
                    Err(_) => progress_open = false,
                }
            }
        }
    }
}
