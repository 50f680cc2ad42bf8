use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::NaiveDateTime;
use scriptdeck_client::{ClientError, JobId, JobRecord, Progress, ScriptInfo};
use tokio::sync::watch;
use tracing::debug;

/// Load state of the job list, kept alongside whatever (possibly stale)
/// data the last successful refresh produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Loading,
    Ready,
    Failed {
        message: String,
    },
}

impl LoadState {
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { message } => Some(message),
            _ => None,
        }
    }
}

/// One job as the cache holds it: the server record plus client-side
/// bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningJob {
    pub id: JobId,
    /// Executable name of the launching script.
    pub script: String,
    /// Display name of the launching script, when known. The server's job
    /// records do not carry it; it comes from the submission that created
    /// the job or from a catalog backfill.
    pub name: Option<String>,
    pub args: Vec<String>,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub progress: Progress,
    pub status: String,
    pub return_code: Option<i32>,
    /// Accumulated output text. Grows only while an output subscription is
    /// held; empty otherwise.
    pub output: Arc<str>,
    /// Latched once a kill has been requested, so the affordance can be
    /// disabled without touching `return_code`.
    pub kill_requested: bool,
}

impl RunningJob {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.return_code.is_some()
    }

    fn from_record(record: JobRecord) -> Self {
        Self {
            id: record.id,
            script: record.script,
            name: None,
            args: record.args,
            start_time: record.start_time,
            end_time: record.end_time,
            progress: record.progress,
            status: record.status,
            return_code: record.return_code,
            output: Arc::from(""),
            kill_requested: false,
        }
    }
}

/// Partial record used to install a job before its first fetch, either
/// from another view's data or from a fresh submission.
#[derive(Debug, Clone)]
pub struct JobSeed {
    pub id: JobId,
    pub script: String,
    pub name: Option<String>,
    pub args: Vec<String>,
    pub start_time: NaiveDateTime,
}

impl JobSeed {
    fn into_job(self) -> RunningJob {
        RunningJob {
            id: self.id,
            script: self.script,
            name: self.name,
            args: self.args,
            start_time: self.start_time,
            end_time: None,
            progress: Progress::NONE,
            status: String::new(),
            return_code: None,
            output: Arc::from(""),
            kill_requested: false,
        }
    }
}

/// Field-level partial applied by [`JobStore::upsert`]. Absent fields are
/// left untouched; present fields replace.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub id: JobId,
    pub script: Option<String>,
    pub name: Option<String>,
    pub args: Option<Vec<String>>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<Option<NaiveDateTime>>,
    pub progress: Option<Progress>,
    pub status: Option<String>,
    pub return_code: Option<Option<i32>>,
}

impl JobUpdate {
    #[must_use]
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            script: None,
            name: None,
            args: None,
            start_time: None,
            end_time: None,
            progress: None,
            status: None,
            return_code: None,
        }
    }

    #[must_use]
    pub fn from_record(record: JobRecord) -> Self {
        Self {
            id: record.id,
            script: Some(record.script),
            name: None,
            args: Some(record.args),
            start_time: Some(record.start_time),
            end_time: Some(record.end_time),
            progress: Some(record.progress),
            status: Some(record.status),
            return_code: Some(record.return_code),
        }
    }

    #[must_use]
    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    #[must_use]
    pub fn finished(mut self, return_code: i32, end_time: NaiveDateTime) -> Self {
        self.return_code = Some(Some(return_code));
        self.end_time = Some(Some(end_time));
        self
    }

    fn into_job(self) -> Option<RunningJob> {
        let script = self.script?;
        let start_time = self.start_time?;
        Some(RunningJob {
            id: self.id,
            script,
            name: self.name,
            args: self.args.unwrap_or_default(),
            start_time,
            end_time: self.end_time.flatten(),
            progress: self.progress.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            return_code: self.return_code.flatten(),
            output: Arc::from(""),
            kill_requested: false,
        })
    }
}

/// Snapshot of the whole list, newest job first.
#[derive(Debug, Clone)]
pub struct JobsSnapshot {
    pub state: LoadState,
    pub jobs: Vec<RunningJob>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KillArm {
    NotFound,
    Finished,
    AlreadyRequested,
    Armed,
}

struct FieldWatches {
    progress: watch::Sender<Progress>,
    status: watch::Sender<String>,
    return_code: watch::Sender<Option<i32>>,
    end_time: watch::Sender<Option<NaiveDateTime>>,
    output: watch::Sender<Arc<str>>,
    output_demand: watch::Sender<usize>,
}

struct JobEntry {
    job: RunningJob,
    /// When the job was synthesized locally, the instant of creation.
    /// Cleared once any list response has confirmed the id.
    provisional: Option<Instant>,
    ticket_issued: u64,
    ticket_applied: u64,
    output_chars: usize,
    output_complete: bool,
    watches: FieldWatches,
}

impl JobEntry {
    fn new(job: RunningJob) -> Self {
        let watches = FieldWatches {
            progress: new_sender(job.progress),
            status: new_sender(job.status.clone()),
            return_code: new_sender(job.return_code),
            end_time: new_sender(job.end_time),
            output: new_sender(Arc::clone(&job.output)),
            output_demand: new_sender(0),
        };
        Self {
            job,
            provisional: None,
            ticket_issued: 0,
            ticket_applied: 0,
            output_chars: 0,
            output_complete: false,
            watches,
        }
    }
}

fn new_sender<T>(initial: T) -> watch::Sender<T> {
    let (sender, _receiver) = watch::channel(initial);
    sender
}

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<JobId, JobEntry>,
    /// Entries removed optimistically by an in-flight delete. Their watch
    /// channels stay alive so a rollback reattaches subscribers intact.
    detached: HashMap<JobId, JobEntry>,
}

impl StoreInner {
    fn entry_mut(&mut self, id: &JobId) -> Option<&mut JobEntry> {
        if self.jobs.contains_key(id) {
            self.jobs.get_mut(id)
        } else {
            self.detached.get_mut(id)
        }
    }
}

/// In-memory cache of running-job records, the single point every
/// subscriber reads from and every poll result or optimistic mutation
/// writes through.
///
/// Each field of each job has its own watch channel, published only when
/// the value actually changes, so a subscriber bound to `progress` is
/// never woken by a `status` update. A separate revision channel fires on
/// membership changes (insert or remove), never on field changes.
pub struct JobStore {
    inner: Mutex<StoreInner>,
    jobs_rev: watch::Sender<u64>,
    list_state: watch::Sender<LoadState>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            jobs_rev: new_sender(0),
            list_state: new_sender(LoadState::Loading),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of every known job, newest start time first.
    #[must_use]
    pub fn jobs(&self) -> JobsSnapshot {
        let inner = self.lock_inner();
        let mut jobs: Vec<RunningJob> = inner.jobs.values().map(|entry| entry.job.clone()).collect();
        jobs.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.id.cmp(&b.id)));
        JobsSnapshot {
            state: self.list_state.borrow().clone(),
            jobs,
        }
    }

    #[must_use]
    pub fn job(&self, id: &JobId) -> Option<RunningJob> {
        let inner = self.lock_inner();
        inner.jobs.get(id).map(|entry| entry.job.clone())
    }

    /// The cached record for the seed's id, installing the seed first when
    /// the job is unknown. A caller arriving with partial data, such as a
    /// focused view opened from a list row, never observes a gap before the
    /// next fetch fills the record in.
    pub fn job_with_seed(&self, seed: JobSeed) -> RunningJob {
        let (job, inserted) = {
            let mut inner = self.lock_inner();
            let existing = inner
                .jobs
                .get(&seed.id)
                .or_else(|| inner.detached.get(&seed.id))
                .map(|entry| entry.job.clone());
            match existing {
                Some(job) => (job, false),
                None => {
                    let entry = JobEntry::new(seed.into_job());
                    let job = entry.job.clone();
                    inner.jobs.insert(job.id.clone(), entry);
                    (job, true)
                }
            }
        };
        if inserted {
            self.bump_jobs_rev();
        }
        job
    }

    #[must_use]
    pub fn list_state(&self) -> LoadState {
        self.list_state.borrow().clone()
    }

    /// Fires on membership changes only (a job inserted or removed).
    #[must_use]
    pub fn watch_jobs(&self) -> watch::Receiver<u64> {
        self.jobs_rev.subscribe()
    }

    #[must_use]
    pub fn watch_list_state(&self) -> watch::Receiver<LoadState> {
        self.list_state.subscribe()
    }

    /// Install a partial record so subscribers observe the job before its
    /// first fetch. No-op when the id is already known.
    pub fn seed_job(&self, seed: JobSeed) {
        self.seed_with(seed, None);
    }

    /// Like [`JobStore::seed_job`], for jobs synthesized locally by a
    /// submission. These are exempt from list pruning until a list fetch
    /// that started after this call has been applied, so a just-created
    /// job does not flash out of existence.
    pub fn seed_local_job(&self, seed: JobSeed) {
        self.seed_with(seed, Some(Instant::now()));
    }

    fn seed_with(&self, seed: JobSeed, provisional: Option<Instant>) {
        let inserted = {
            let mut inner = self.lock_inner();
            if inner.jobs.contains_key(&seed.id) || inner.detached.contains_key(&seed.id) {
                false
            } else {
                let mut entry = JobEntry::new(seed.into_job());
                entry.provisional = provisional;
                inner.jobs.insert(entry.job.id.clone(), entry);
                true
            }
        };
        if inserted {
            self.bump_jobs_rev();
        }
    }

    /// Merge fields into a job, creating it when absent and the update
    /// carries at least `script` and `start_time`.
    pub fn upsert(&self, update: JobUpdate) {
        let changed = {
            let mut inner = self.lock_inner();
            Self::upsert_locked(&mut inner, update)
        };
        if changed {
            self.bump_jobs_rev();
        }
    }

    /// Evict a job. Used for confirmed out-of-band deletions.
    pub fn remove(&self, id: &JobId) -> bool {
        let removed = {
            let mut inner = self.lock_inner();
            inner.jobs.remove(id).is_some()
        };
        if removed {
            self.bump_jobs_rev();
        }
        removed
    }

    /// Apply a full list response. `started` is when the fetch was issued;
    /// locally-seeded jobs created after that instant are exempt from
    /// pruning, since the response could not have included them yet.
    pub fn apply_list(&self, started: Instant, records: Vec<JobRecord>) {
        let mut membership_changed = false;
        {
            let mut inner = self.lock_inner();
            let mut present: HashSet<JobId> = HashSet::with_capacity(records.len());
            for record in records {
                present.insert(record.id.clone());
                membership_changed |= Self::upsert_locked(&mut inner, JobUpdate::from_record(record));
            }

            let stale: Vec<JobId> = inner
                .jobs
                .keys()
                .filter(|id| !present.contains(*id))
                .cloned()
                .collect();
            for id in stale {
                let exempt = inner
                    .jobs
                    .get(&id)
                    .and_then(|entry| entry.provisional)
                    .is_some_and(|created| started <= created);
                if exempt {
                    continue;
                }
                inner.jobs.remove(&id);
                membership_changed = true;
                debug!(job = %id, "pruned job absent from list response");
            }

            for id in &present {
                if let Some(entry) = inner.jobs.get_mut(id) {
                    entry.provisional = None;
                }
            }
        }
        if membership_changed {
            self.bump_jobs_rev();
        }
        self.set_list_state(LoadState::Ready);
    }

    /// Record a failed list refresh. Previously fetched jobs stay visible.
    pub fn fail_list(&self, error: &ClientError) {
        self.set_list_state(LoadState::Failed {
            message: error.to_string(),
        });
    }

    /// Hand out a fetch ticket for a detail request. Replies are applied
    /// through [`JobStore::apply_detail`], which drops any reply older
    /// than the newest one already applied for that job.
    #[must_use]
    pub fn issue_ticket(&self, id: &JobId) -> Option<u64> {
        let mut inner = self.lock_inner();
        let entry = inner.jobs.get_mut(id)?;
        entry.ticket_issued += 1;
        Some(entry.ticket_issued)
    }

    /// Apply a detail response fetched under `ticket`. Returns false when
    /// the reply was stale or the job is gone.
    pub fn apply_detail(&self, ticket: u64, record: JobRecord) -> bool {
        let mut inner = self.lock_inner();
        let Some(entry) = inner.jobs.get_mut(&record.id) else {
            return false;
        };
        if entry.ticket_applied >= ticket {
            debug!(job = %record.id, ticket, "dropped stale detail reply");
            return false;
        }
        entry.ticket_applied = ticket;
        Self::apply_fields(entry, JobUpdate::from_record(record));
        true
    }

    /// Append an output chunk and return the new total character count,
    /// which is the `from` offset for the next fetch.
    pub fn append_output(&self, id: &JobId, chunk: &str) -> Option<usize> {
        let mut inner = self.lock_inner();
        let entry = inner.entry_mut(id)?;
        if !chunk.is_empty() {
            let mut combined = String::with_capacity(entry.job.output.len() + chunk.len());
            combined.push_str(&entry.job.output);
            combined.push_str(chunk);
            let combined: Arc<str> = combined.into();
            entry.job.output = Arc::clone(&combined);
            entry.output_chars += chunk.chars().count();
            entry.watches.output.send_replace(combined);
        }
        Some(entry.output_chars)
    }

    /// Character count of the accumulated output.
    #[must_use]
    pub fn output_chars(&self, id: &JobId) -> Option<usize> {
        let mut inner = self.lock_inner();
        inner.entry_mut(id).map(|entry| entry.output_chars)
    }

    /// True once the final output tail after termination has been fetched.
    #[must_use]
    pub fn output_finished(&self, id: &JobId) -> bool {
        let mut inner = self.lock_inner();
        inner
            .entry_mut(id)
            .is_some_and(|entry| entry.output_complete)
    }

    pub(crate) fn set_output_complete(&self, id: &JobId) {
        let mut inner = self.lock_inner();
        if let Some(entry) = inner.entry_mut(id) {
            entry.output_complete = true;
            // Wake output subscribers so anyone waiting on changed() can
            // observe completion; the text itself is unchanged.
            entry.watches.output.send_modify(|_| {});
        }
    }

    #[must_use]
    pub fn watch_progress(&self, id: &JobId) -> Option<watch::Receiver<Progress>> {
        let mut inner = self.lock_inner();
        inner
            .entry_mut(id)
            .map(|entry| entry.watches.progress.subscribe())
    }

    #[must_use]
    pub fn watch_status(&self, id: &JobId) -> Option<watch::Receiver<String>> {
        let mut inner = self.lock_inner();
        inner
            .entry_mut(id)
            .map(|entry| entry.watches.status.subscribe())
    }

    #[must_use]
    pub fn watch_return_code(&self, id: &JobId) -> Option<watch::Receiver<Option<i32>>> {
        let mut inner = self.lock_inner();
        inner
            .entry_mut(id)
            .map(|entry| entry.watches.return_code.subscribe())
    }

    #[must_use]
    pub fn watch_end_time(&self, id: &JobId) -> Option<watch::Receiver<Option<NaiveDateTime>>> {
        let mut inner = self.lock_inner();
        inner
            .entry_mut(id)
            .map(|entry| entry.watches.end_time.subscribe())
    }

    /// Take a live handle on a job's output. Holding at least one
    /// subscription keeps the output poller running for that job;
    /// dropping the last one stops it.
    #[must_use]
    pub fn subscribe_output(self: &Arc<Self>, id: &JobId) -> Option<OutputSubscription> {
        let receiver = {
            let mut inner = self.lock_inner();
            let entry = inner.entry_mut(id)?;
            entry.watches.output_demand.send_modify(|count| *count += 1);
            entry.watches.output.subscribe()
        };
        Some(OutputSubscription {
            store: Arc::clone(self),
            id: id.clone(),
            receiver,
        })
    }

    /// Like [`JobStore::subscribe_output`], installing `seed` first when
    /// the job is unknown so attaching never fails. For views that learn
    /// about a job out of band, before any fetch has landed.
    #[must_use]
    pub fn subscribe_output_with_seed(self: &Arc<Self>, seed: JobSeed) -> OutputSubscription {
        let id = seed.id.clone();
        let (receiver, inserted) = {
            let mut inner = self.lock_inner();
            match inner.entry_mut(&id) {
                Some(entry) => {
                    entry.watches.output_demand.send_modify(|count| *count += 1);
                    (entry.watches.output.subscribe(), false)
                }
                None => {
                    let entry = inner
                        .jobs
                        .entry(id.clone())
                        .or_insert_with(|| JobEntry::new(seed.into_job()));
                    entry.watches.output_demand.send_modify(|count| *count += 1);
                    (entry.watches.output.subscribe(), true)
                }
            }
        };
        if inserted {
            self.bump_jobs_rev();
        }
        OutputSubscription {
            store: Arc::clone(self),
            id,
            receiver,
        }
    }

    fn release_output(&self, id: &JobId) {
        let mut inner = self.lock_inner();
        if let Some(entry) = inner.entry_mut(id) {
            entry
                .watches
                .output_demand
                .send_modify(|count| *count = count.saturating_sub(1));
        }
    }

    pub(crate) fn watch_output_demand(&self, id: &JobId) -> Option<watch::Receiver<usize>> {
        let mut inner = self.lock_inner();
        inner
            .entry_mut(id)
            .map(|entry| entry.watches.output_demand.subscribe())
    }

    /// Jobs the detail sweep should refresh: not yet terminal, with at
    /// least one live field subscriber.
    pub(crate) fn detail_candidates(&self) -> Vec<JobId> {
        let inner = self.lock_inner();
        inner
            .jobs
            .values()
            .filter(|entry| !entry.job.is_finished())
            .filter(|entry| {
                let watches = &entry.watches;
                watches.progress.receiver_count() > 0
                    || watches.status.receiver_count() > 0
                    || watches.return_code.receiver_count() > 0
                    || watches.end_time.receiver_count() > 0
            })
            .map(|entry| entry.job.id.clone())
            .collect()
    }

    /// Jobs whose output poller should be running: live output demand and
    /// the final tail not yet fetched.
    pub(crate) fn output_candidates(&self) -> Vec<JobId> {
        let inner = self.lock_inner();
        inner
            .jobs
            .values()
            .filter(|entry| !entry.output_complete)
            .filter(|entry| *entry.watches.output_demand.borrow() > 0)
            .map(|entry| entry.job.id.clone())
            .collect()
    }

    /// Detach a job ahead of a delete request. List views stop showing it
    /// immediately; its watch channels stay alive for a possible rollback.
    pub fn begin_delete(&self, id: &JobId) -> bool {
        let detached = {
            let mut inner = self.lock_inner();
            match inner.jobs.remove(id) {
                Some(entry) => {
                    inner.detached.insert(id.clone(), entry);
                    true
                }
                None => false,
            }
        };
        if detached {
            self.bump_jobs_rev();
        }
        detached
    }

    /// Drop a detached job for good after the server confirmed the delete.
    pub fn finish_delete(&self, id: &JobId) {
        let mut inner = self.lock_inner();
        inner.detached.remove(id);
    }

    /// Reattach a detached job after a failed delete, with all fields and
    /// subscriptions as they were.
    pub fn undo_delete(&self, id: &JobId) -> bool {
        let restored = {
            let mut inner = self.lock_inner();
            match inner.detached.remove(id) {
                Some(entry) => {
                    inner.jobs.insert(id.clone(), entry);
                    true
                }
                None => false,
            }
        };
        if restored {
            self.bump_jobs_rev();
        }
        restored
    }

    pub(crate) fn arm_kill(&self, id: &JobId) -> KillArm {
        let mut inner = self.lock_inner();
        let Some(entry) = inner.jobs.get_mut(id) else {
            return KillArm::NotFound;
        };
        if entry.job.is_finished() {
            return KillArm::Finished;
        }
        if entry.job.kill_requested {
            return KillArm::AlreadyRequested;
        }
        entry.job.kill_requested = true;
        KillArm::Armed
    }

    pub(crate) fn disarm_kill(&self, id: &JobId) {
        let mut inner = self.lock_inner();
        if let Some(entry) = inner.jobs.get_mut(id) {
            entry.job.kill_requested = false;
        }
    }

    /// Fill in display names from a script catalog for jobs that lack one.
    pub fn adopt_script_names<'a>(&self, scripts: impl IntoIterator<Item = &'a ScriptInfo>) {
        let by_script: HashMap<&str, &str> = scripts
            .into_iter()
            .map(|info| (info.script.as_str(), info.name.as_str()))
            .collect();
        let mut inner = self.lock_inner();
        for entry in inner.jobs.values_mut() {
            if entry.job.name.is_none() {
                if let Some(name) = by_script.get(entry.job.script.as_str()) {
                    entry.job.name = Some((*name).to_string());
                }
            }
        }
    }

    fn upsert_locked(inner: &mut StoreInner, update: JobUpdate) -> bool {
        let id = update.id.clone();
        if inner.detached.contains_key(&id) {
            if let Some(entry) = inner.detached.get_mut(&id) {
                Self::apply_fields(entry, update);
            }
            return false;
        }
        if inner.jobs.contains_key(&id) {
            if let Some(entry) = inner.jobs.get_mut(&id) {
                Self::apply_fields(entry, update);
            }
            return false;
        }
        match update.into_job() {
            Some(job) => {
                inner.jobs.insert(id, JobEntry::new(job));
                true
            }
            None => {
                debug!(job = %id, "ignored partial update for unknown job");
                false
            }
        }
    }

    /// Field-level merge with the terminal guard: once `return_code` is
    /// set, progress/status/return_code/end_time never change again (a
    /// missing end time may still fill in once). Every publication is
    /// equality-gated, so subscribers only wake for real changes.
    fn apply_fields(entry: &mut JobEntry, update: JobUpdate) {
        let finished = entry.job.is_finished();

        if let Some(script) = update.script {
            entry.job.script = script;
        }
        if let Some(name) = update.name {
            entry.job.name = Some(name);
        }
        if let Some(args) = update.args {
            entry.job.args = args;
        }
        if let Some(start_time) = update.start_time {
            entry.job.start_time = start_time;
        }

        if finished {
            if entry.job.end_time.is_none() {
                if let Some(Some(end_time)) = update.end_time {
                    entry.job.end_time = Some(end_time);
                    entry.watches.end_time.send_replace(Some(end_time));
                }
            }
            return;
        }

        if let Some(progress) = update.progress {
            if entry.job.progress != progress {
                entry.job.progress = progress;
                entry.watches.progress.send_replace(progress);
            }
        }
        if let Some(status) = update.status {
            if entry.job.status != status {
                entry.job.status.clone_from(&status);
                entry.watches.status.send_replace(status);
            }
        }
        if let Some(end_time) = update.end_time {
            let regression = entry.job.end_time.is_some() && end_time.is_none();
            if !regression && entry.job.end_time != end_time {
                entry.job.end_time = end_time;
                entry.watches.end_time.send_replace(end_time);
            }
        }
        if let Some(return_code) = update.return_code {
            if entry.job.return_code != return_code {
                entry.job.return_code = return_code;
                entry.watches.return_code.send_replace(return_code);
            }
        }
    }

    fn bump_jobs_rev(&self) {
        self.jobs_rev.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    fn set_list_state(&self, state: LoadState) {
        self.list_state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// Live handle on one job's accumulated output.
///
/// The handle counts as output demand: the sync service polls a job's
/// output only while at least one subscription exists, and parks the
/// poller when the last one is dropped.
pub struct OutputSubscription {
    store: Arc<JobStore>,
    id: JobId,
    receiver: watch::Receiver<Arc<str>>,
}

impl OutputSubscription {
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.id
    }

    /// The full output accumulated so far.
    #[must_use]
    pub fn current(&self) -> Arc<str> {
        self.receiver.borrow().clone()
    }

    /// Completes when the output grows or finishes.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.receiver.changed().await
    }
}

impl Drop for OutputSubscription {
    fn drop(&mut self) {
        self.store.release_output(&self.id);
    }
}
