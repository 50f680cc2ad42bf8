#![allow(dead_code)]

use std::collections::HashMap;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use scriptdeck_client::{
    ArgKind, ArgSpec, ClientError, JobId, JobRecord, Progress, ScriptHub, ScriptInfo, SubmitField,
    SubmitForm,
};
use tokio::sync::{Notify, watch};

/// One recorded hub invocation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Scripts,
    Running,
    Detail(JobId),
    Output(JobId, usize),
    Submit(String),
    Kill(JobId),
    Delete(JobId),
}

#[derive(Default)]
struct HubState {
    scripts: Vec<ScriptInfo>,
    jobs: Vec<JobRecord>,
    outputs: HashMap<JobId, String>,
    fail_scripts: bool,
    fail_running: bool,
    fail_submit: bool,
    fail_kill: bool,
    fail_delete: bool,
    hold_submit: bool,
    created: u64,
}

/// Scripted in-memory hub. Mutators wake any blocked long-poll or held
/// submission, mirroring how the real server answers once something
/// changes.
pub struct FakeHub {
    state: Mutex<HubState>,
    signal: Notify,
    calls: Mutex<Vec<Call>>,
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            signal: Notify::new(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_scripts(&self, scripts: Vec<ScriptInfo>) {
        self.lock_state().scripts = scripts;
        self.signal.notify_waiters();
    }

    pub fn push_job(&self, record: JobRecord) {
        self.lock_state().jobs.push(record);
        self.signal.notify_waiters();
    }

    pub fn remove_job(&self, id: &JobId) {
        let mut state = self.lock_state();
        state.jobs.retain(|job| job.id != *id);
        state.outputs.remove(id);
        drop(state);
        self.signal.notify_waiters();
    }

    /// Mark a job exited, the way the server's monitor would.
    pub fn set_job_terminal(&self, id: &JobId, code: i32) {
        {
            let mut state = self.lock_state();
            if let Some(job) = state.jobs.iter_mut().find(|job| job.id == *id) {
                job.return_code = Some(code);
                job.end_time = Some(job.start_time + chrono::Duration::seconds(5));
            }
        }
        self.signal.notify_waiters();
    }

    pub fn push_output(&self, id: &JobId, chunk: &str) {
        self.lock_state()
            .outputs
            .entry(id.clone())
            .or_default()
            .push_str(chunk);
        self.signal.notify_waiters();
    }

    pub fn set_fail_scripts(&self, fail: bool) {
        self.lock_state().fail_scripts = fail;
    }

    pub fn set_fail_running(&self, fail: bool) {
        self.lock_state().fail_running = fail;
        self.signal.notify_waiters();
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.lock_state().fail_submit = fail;
    }

    pub fn set_fail_kill(&self, fail: bool) {
        self.lock_state().fail_kill = fail;
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.lock_state().fail_delete = fail;
    }

    /// Park submissions after their progress reports until released.
    pub fn hold_submissions(&self) {
        self.lock_state().hold_submit = true;
    }

    pub fn release_submissions(&self) {
        self.lock_state().hold_submit = false;
        self.signal.notify_waiters();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count_calls(&self, matching: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matching(call)).count()
    }

    fn lock_state(&self) -> MutexGuard<'_, HubState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_call(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}

#[async_trait]
impl ScriptHub for FakeHub {
    async fn scripts(&self) -> Result<Vec<ScriptInfo>, ClientError> {
        self.record_call(Call::Scripts);
        let state = self.lock_state();
        if state.fail_scripts {
            return Err(ClientError::Request {
                message: "connection refused".to_string(),
            });
        }
        Ok(state.scripts.clone())
    }

    async fn running(&self) -> Result<Vec<JobRecord>, ClientError> {
        self.record_call(Call::Running);
        let state = self.lock_state();
        if state.fail_running {
            return Err(ClientError::Request {
                message: "connection refused".to_string(),
            });
        }
        Ok(state.jobs.clone())
    }

    async fn run_detail(&self, id: &JobId) -> Result<JobRecord, ClientError> {
        self.record_call(Call::Detail(id.clone()));
        self.lock_state()
            .jobs
            .iter()
            .find(|job| job.id == *id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn output(&self, id: &JobId, from: usize) -> Result<String, ClientError> {
        self.record_call(Call::Output(id.clone(), from));
        loop {
            let mut notified = pin!(self.signal.notified());
            notified.as_mut().enable();
            {
                let state = self.lock_state();
                let Some(job) = state.jobs.iter().find(|job| job.id == *id) else {
                    return Err(not_found());
                };
                let text = state.outputs.get(id).cloned().unwrap_or_default();
                let chars: Vec<char> = text.chars().collect();
                if chars.len() > from {
                    return Ok(chars[from..].iter().collect());
                }
                if job.return_code.is_some() {
                    return Ok(String::new());
                }
            }
            notified.await;
        }
    }

    async fn submit(
        &self,
        form: SubmitForm,
        progress: watch::Sender<f64>,
    ) -> Result<JobId, ClientError> {
        self.record_call(Call::Submit(form.script.clone()));
        let _ = progress.send(0.5);
        let _ = progress.send(1.0);

        loop {
            let mut notified = pin!(self.signal.notified());
            notified.as_mut().enable();
            if !self.lock_state().hold_submit {
                break;
            }
            notified.await;
        }

        let mut state = self.lock_state();
        if state.fail_submit {
            return Err(ClientError::Http {
                status: 500,
                body: "launch failed".to_string(),
            });
        }
        state.created += 1;
        let created = state.created;
        let id = JobId::new(format!("job-{}", created));
        let args = form
            .fields
            .iter()
            .map(|field| match field {
                SubmitField::Text(value) => value.clone(),
                SubmitField::File { file_name, .. } => file_name.clone(),
            })
            .collect();
        state.jobs.push(JobRecord {
            id: id.clone(),
            script: form.script,
            args,
            start_time: ts(1_000 + i64::try_from(created).unwrap_or_default()),
            end_time: None,
            progress: Progress::NONE,
            status: String::new(),
            return_code: None,
        });
        drop(state);
        self.signal.notify_waiters();
        Ok(id)
    }

    async fn kill(&self, id: &JobId) -> Result<(), ClientError> {
        self.record_call(Call::Kill(id.clone()));
        let state = self.lock_state();
        if state.fail_kill {
            return Err(ClientError::Request {
                message: "connection refused".to_string(),
            });
        }
        if state.jobs.iter().any(|job| job.id == *id) {
            Ok(())
        } else {
            Err(not_found())
        }
    }

    async fn delete(&self, id: &JobId) -> Result<(), ClientError> {
        self.record_call(Call::Delete(id.clone()));
        let mut state = self.lock_state();
        if state.fail_delete {
            return Err(ClientError::Request {
                message: "connection refused".to_string(),
            });
        }
        if !state.jobs.iter().any(|job| job.id == *id) {
            return Err(not_found());
        }
        state.jobs.retain(|job| job.id != *id);
        state.outputs.remove(id);
        drop(state);
        self.signal.notify_waiters();
        Ok(())
    }
}

fn not_found() -> ClientError {
    ClientError::Http {
        status: 404,
        body: "Not Found".to_string(),
    }
}

pub fn ts(offset_secs: i64) -> NaiveDateTime {
    chrono::DateTime::from_timestamp(1_770_000_000 + offset_secs, 0)
        .map(|stamped| stamped.naive_utc())
        .unwrap_or_default()
}

pub fn record(id: &str, script: &str, start: i64) -> JobRecord {
    JobRecord {
        id: JobId::new(id),
        script: script.to_string(),
        args: Vec::new(),
        start_time: ts(start),
        end_time: None,
        progress: Progress::NONE,
        status: String::new(),
        return_code: None,
    }
}

pub fn finished_record(id: &str, script: &str, start: i64, code: i32) -> JobRecord {
    let mut record = record(id, script, start);
    record.return_code = Some(code);
    record.end_time = Some(ts(start + 5));
    record
}

pub fn script_info(script: &str, name: &str, arg_tags: &[&str]) -> ScriptInfo {
    ScriptInfo {
        script: script.to_string(),
        name: name.to_string(),
        description: None,
        args: arg_tags
            .iter()
            .map(|tag| ArgSpec {
                kind: ArgKind::parse(tag),
                description: None,
            })
            .collect(),
    }
}

/// Poll `predicate` until it holds or five seconds pass.
pub async fn wait_until(what: &str, predicate: impl Fn() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}
