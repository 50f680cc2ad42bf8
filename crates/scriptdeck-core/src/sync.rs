use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use scriptdeck_client::{JobId, ScriptHub};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use crate::config::SyncConfig;
use crate::store::JobStore;

const OUTPUT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Handle for nudging the list poller ahead of its next tick, e.g. right
/// after a submission seeds a job.
#[derive(Clone)]
pub struct SyncPoker(Arc<Notify>);

impl SyncPoker {
    /// A poker wired to nothing, for driving components without a running
    /// sync service.
    #[must_use]
    pub fn detached() -> Self {
        Self(Arc::new(Notify::new()))
    }

    pub fn poke(&self) {
        self.0.notify_one();
    }
}

/// Background polling against one hub: a list refresh loop, a detail
/// sweep over subscribed non-terminal jobs, and one output pump per job
/// with live output demand.
///
/// All tasks stop on [`SyncService::shutdown`] or drop.
pub struct SyncService {
    poke: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncService {
    /// Spawn the polling tasks. The first list refresh happens
    /// immediately; later ones follow `config.list_interval()`.
    #[must_use]
    pub fn spawn(store: Arc<JobStore>, hub: Arc<dyn ScriptHub>, config: SyncConfig) -> Self {
        let poke = Arc::new(Notify::new());
        let (shutdown, _rx) = watch::channel(false);

        // interval() panics on zero
        let list_every = config.list_interval().max(Duration::from_millis(1));
        let detail_every = config.detail_interval().max(Duration::from_millis(1));

        let tasks = vec![
            tokio::spawn(list_loop(
                Arc::clone(&store),
                Arc::clone(&hub),
                list_every,
                Arc::clone(&poke),
                shutdown.subscribe(),
            )),
            tokio::spawn(detail_loop(
                Arc::clone(&store),
                Arc::clone(&hub),
                detail_every,
                shutdown.subscribe(),
            )),
            tokio::spawn(output_supervisor(
                store,
                hub,
                detail_every,
                shutdown.subscribe(),
            )),
        ];

        Self {
            poke,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    #[must_use]
    pub fn poker(&self) -> SyncPoker {
        SyncPoker(Arc::clone(&self.poke))
    }

    /// Refresh the job list now instead of waiting for the next tick.
    pub fn poke(&self) {
        self.poke.notify_one();
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let tasks = {
            let mut tasks = self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn list_loop(
    store: Arc<JobStore>,
    hub: Arc<dyn ScriptHub>,
    every: Duration,
    poke: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = poke.notified() => ticker.reset(),
            _ = shutdown.changed() => return,
        }
        if *shutdown.borrow() {
            return;
        }
        let started = Instant::now();
        match hub.running().await {
            Ok(records) => store.apply_list(started, records),
            Err(error) => {
                debug!(%error, "job list refresh failed");
                store.fail_list(&error);
            }
        }
    }
}

async fn detail_loop(
    store: Arc<JobStore>,
    hub: Arc<dyn ScriptHub>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }
        if *shutdown.borrow() {
            return;
        }
        for id in store.detail_candidates() {
            let Some(ticket) = store.issue_ticket(&id) else {
                continue;
            };
            match hub.run_detail(&id).await {
                Ok(record) => {
                    store.apply_detail(ticket, record);
                }
                Err(error) if error.is_not_found() => {
                    debug!(job = %id, "job vanished before detail fetch");
                }
                Err(error) => {
                    debug!(job = %id, %error, "job detail refresh failed");
                }
            }
        }
    }
}

/// Keeps one output pump alive per job that currently has subscribers.
async fn output_supervisor(
    store: Arc<JobStore>,
    hub: Arc<dyn ScriptHub>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pumps: HashMap<JobId, JoinHandle<()>> = HashMap::new();
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        pumps.retain(|_, pump| !pump.is_finished());
        for id in store.output_candidates() {
            if pumps.contains_key(&id) {
                continue;
            }
            let pump = tokio::spawn(output_pump(
                Arc::clone(&store),
                Arc::clone(&hub),
                id.clone(),
                shutdown.clone(),
            ));
            pumps.insert(id, pump);
        }
    }
    for pump in pumps.into_values() {
        pump.abort();
    }
}

/// Long-polls one job's output. The server holds each request open until
/// text past `from` exists or the job exits, so an empty reply means the
/// job is done and fully drained. Exits when the last subscriber leaves.
async fn output_pump(
    store: Arc<JobStore>,
    hub: Arc<dyn ScriptHub>,
    id: JobId,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(mut demand) = store.watch_output_demand(&id) else {
        return;
    };
    loop {
        if *shutdown.borrow() || *demand.borrow() == 0 {
            return;
        }
        let Some(from) = store.output_chars(&id) else {
            return;
        };
        tokio::select! {
            result = hub.output(&id, from) => match result {
                Ok(chunk) => {
                    if chunk.is_empty() {
                        store.set_output_complete(&id);
                        return;
                    }
                    store.append_output(&id, &chunk);
                }
                Err(error) if error.is_timeout() => {}
                Err(error) if error.is_not_found() => {
                    store.set_output_complete(&id);
                    return;
                }
                Err(error) => {
                    debug!(job = %id, %error, "output poll failed");
                    tokio::time::sleep(OUTPUT_RETRY_BACKOFF).await;
                }
            },
            // Discard the non-Send watch::Ref inside the branch so the
            // select output stays Send across the retry-backoff await.
            () = async { let _ = demand.wait_for(|subscribers| *subscribers == 0).await; } => return,
            _ = shutdown.changed() => return,
        }
    }
}
