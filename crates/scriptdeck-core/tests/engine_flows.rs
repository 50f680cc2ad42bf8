mod support;

use std::sync::Arc;
use std::time::Duration;

use scriptdeck_client::{JobId, ScriptHub};
use scriptdeck_core::{
    JobStore, LoadState, MutationError, Mutations, ScriptCatalog, SyncConfig, SyncService,
};

use support::{Call, FakeHub, finished_record, record, script_info, wait_until};

fn fast_config() -> SyncConfig {
    SyncConfig {
        list_interval_ms: 25,
        detail_interval_ms: 25,
    }
}

fn engine(hub: &Arc<FakeHub>) -> (Arc<JobStore>, SyncService, Arc<dyn ScriptHub>) {
    let hub_dyn: Arc<dyn ScriptHub> = Arc::<FakeHub>::clone(hub);
    let store = Arc::new(JobStore::new());
    let service = SyncService::spawn(Arc::clone(&store), Arc::clone(&hub_dyn), fast_config());
    (store, service, hub_dyn)
}

async fn wait_ready(store: &Arc<JobStore>) -> anyhow::Result<()> {
    let store = Arc::clone(store);
    wait_until("first list refresh", move || {
        store.list_state() == LoadState::Ready
    })
    .await
}

#[tokio::test]
async fn list_refresh_populates_and_prunes() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    hub.push_job(record("a", "backup.sh", 0));
    hub.push_job(record("b", "backup.sh", 10));

    let (store, service, _) = engine(&hub);
    {
        let store = Arc::clone(&store);
        wait_until("both jobs to appear", move || store.jobs().jobs.len() == 2).await?;
    }

    // Newest first.
    let ids: Vec<String> = store
        .jobs()
        .jobs
        .iter()
        .map(|job| job.id.to_string())
        .collect();
    assert_eq!(ids, vec!["b", "a"]);

    hub.remove_job(&JobId::new("a"));
    {
        let store = Arc::clone(&store);
        wait_until("the removed job to prune", move || {
            store.jobs().jobs.len() == 1
        })
        .await?;
    }
    assert!(store.job(&JobId::new("b")).is_some());

    service.shutdown();
    Ok(())
}

#[tokio::test]
async fn failed_refresh_keeps_stale_jobs_until_recovery() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    hub.push_job(record("a", "backup.sh", 0));

    let (store, service, _) = engine(&hub);
    wait_ready(&store).await?;

    hub.set_fail_running(true);
    {
        let store = Arc::clone(&store);
        wait_until("the refresh failure to surface", move || {
            matches!(store.list_state(), LoadState::Failed { .. })
        })
        .await?;
    }
    let snapshot = store.jobs();
    assert_eq!(snapshot.jobs.len(), 1);
    assert!(
        snapshot
            .state
            .error()
            .is_some_and(|message| message.contains("connection refused"))
    );

    hub.set_fail_running(false);
    wait_ready(&store).await?;

    service.shutdown();
    Ok(())
}

#[tokio::test]
async fn detail_fetches_require_a_field_subscription() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    hub.push_job(record("a", "backup.sh", 0));

    let (store, service, _) = engine(&hub);
    wait_ready(&store).await?;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        hub.count_calls(|call| matches!(call, Call::Detail(_))),
        0,
        "no detail traffic without a subscriber"
    );

    let status = store.watch_status(&JobId::new("a"));
    anyhow::ensure!(status.is_some(), "job is in the store");
    {
        let hub = Arc::clone(&hub);
        wait_until("detail fetches to start", move || {
            hub.count_calls(|call| matches!(call, Call::Detail(_))) >= 2
        })
        .await?;
    }

    drop(status);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = hub.count_calls(|call| matches!(call, Call::Detail(_)));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        hub.count_calls(|call| matches!(call, Call::Detail(_))),
        settled,
        "detail traffic stops when the last subscriber leaves"
    );

    service.shutdown();
    Ok(())
}

#[tokio::test]
async fn detail_fetches_stop_for_good_once_terminal() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    hub.push_job(record("a", "backup.sh", 0));

    let (store, service, _) = engine(&hub);
    wait_ready(&store).await?;

    let id = JobId::new("a");
    let _status = store.watch_status(&id);
    {
        let hub = Arc::clone(&hub);
        wait_until("detail fetches to start", move || {
            hub.count_calls(|call| matches!(call, Call::Detail(_))) >= 1
        })
        .await?;
    }

    hub.set_job_terminal(&id, 0);
    {
        let store = Arc::clone(&store);
        let id = id.clone();
        wait_until("the exit to reach the store", move || {
            store.job(&id).is_some_and(|job| job.is_finished())
        })
        .await?;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = hub.count_calls(|call| matches!(call, Call::Detail(_)));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        hub.count_calls(|call| matches!(call, Call::Detail(_))),
        settled,
        "a finished job is never re-fetched, subscriber or not"
    );

    service.shutdown();
    Ok(())
}

#[tokio::test]
async fn output_pumps_run_only_while_demanded() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    hub.push_job(record("a", "backup.sh", 0));
    hub.push_output(&JobId::new("a"), "hello\n");

    let (store, service, _) = engine(&hub);
    wait_ready(&store).await?;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        hub.count_calls(|call| matches!(call, Call::Output(_, _))),
        0,
        "no output traffic without a subscriber"
    );

    let id = JobId::new("a");
    let Some(mut subscription) = store.subscribe_output(&id) else {
        anyhow::bail!("job is in the store");
    };
    {
        let store = Arc::clone(&store);
        let id = id.clone();
        wait_until("the backlog to arrive", move || {
            store
                .job(&id)
                .is_some_and(|job| job.output.contains("hello"))
        })
        .await?;
    }
    assert!(subscription.current().contains("hello"));

    hub.push_output(&id, "world\n");
    tokio::time::timeout(Duration::from_secs(5), subscription.changed()).await??;
    assert_eq!(subscription.current().as_ref(), "hello\nworld\n");

    drop(subscription);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = hub.count_calls(|call| matches!(call, Call::Output(_, _)));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        hub.count_calls(|call| matches!(call, Call::Output(_, _))),
        settled,
        "output polling stops when the last subscriber leaves"
    );

    service.shutdown();
    Ok(())
}

#[tokio::test]
async fn output_completes_after_the_job_exits() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    hub.push_job(record("a", "backup.sh", 0));
    hub.push_output(&JobId::new("a"), "step one\n");

    let (store, service, _) = engine(&hub);
    wait_ready(&store).await?;

    let id = JobId::new("a");
    let Some(subscription) = store.subscribe_output(&id) else {
        anyhow::bail!("job is in the store");
    };
    {
        let store = Arc::clone(&store);
        let id = id.clone();
        wait_until("the backlog to arrive", move || {
            store.output_chars(&id).unwrap_or_default() > 0
        })
        .await?;
    }

    hub.set_job_terminal(&id, 0);
    {
        let store = Arc::clone(&store);
        let id = id.clone();
        wait_until("the output to drain", move || store.output_finished(&id)).await?;
    }
    assert_eq!(subscription.current().as_ref(), "step one\n");

    // Complete means complete: no more polling even while subscribed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = hub.count_calls(|call| matches!(call, Call::Output(_, _)));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        hub.count_calls(|call| matches!(call, Call::Output(_, _))),
        settled
    );

    service.shutdown();
    Ok(())
}

#[tokio::test]
async fn kill_is_latched_and_rolls_back_on_failure() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    hub.push_job(record("a", "backup.sh", 0));

    let (store, service, hub_dyn) = engine(&hub);
    wait_ready(&store).await?;

    let id = JobId::new("a");
    let mutations = Mutations::new(Arc::clone(&store), hub_dyn);

    hub.set_fail_kill(true);
    let refused = mutations.kill(&id).await;
    assert!(matches!(refused, Err(MutationError::Transport(_))));
    assert_eq!(
        store.job(&id).map(|job| job.kill_requested),
        Some(false),
        "a failed request releases the latch so the user can retry"
    );

    hub.set_fail_kill(false);
    mutations.kill(&id).await?;
    assert_eq!(store.job(&id).map(|job| job.kill_requested), Some(true));
    assert_eq!(
        store.job(&id).and_then(|job| job.return_code),
        None,
        "no made-up exit code; the poller will deliver the real one"
    );

    // Latched: the repeat is a no-op, not another request.
    mutations.kill(&id).await?;
    assert_eq!(hub.count_calls(|call| matches!(call, Call::Kill(_))), 2);

    hub.set_job_terminal(&id, -9);
    {
        let store = Arc::clone(&store);
        let id = id.clone();
        wait_until("the kill to land", move || {
            store.job(&id).is_some_and(|job| job.is_finished())
        })
        .await?;
    }
    assert_eq!(store.job(&id).and_then(|job| job.return_code), Some(-9));

    let done = mutations.kill(&id).await;
    assert!(matches!(done, Err(MutationError::AlreadyFinished(_))));

    service.shutdown();
    Ok(())
}

#[tokio::test]
async fn delete_is_optimistic_and_rolls_back_on_refusal() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    hub.push_job(finished_record("a", "backup.sh", 0, 0));

    let (store, service, hub_dyn) = engine(&hub);
    wait_ready(&store).await?;

    let id = JobId::new("a");
    let mutations = Mutations::new(Arc::clone(&store), hub_dyn);
    let status = store.watch_status(&id);
    anyhow::ensure!(status.is_some(), "job is in the store");

    hub.set_fail_delete(true);
    let refused = mutations.delete(&id).await;
    assert!(matches!(refused, Err(MutationError::Transport(_))));
    assert!(
        store.job(&id).is_some(),
        "refused delete restores the entry"
    );
    assert!(
        status.as_ref().is_some_and(|rx| rx.has_changed().is_ok()),
        "the pre-delete subscription survives the round trip"
    );

    hub.set_fail_delete(false);
    mutations.delete(&id).await?;
    assert!(store.job(&id).is_none());

    // The server no longer lists it either, so it stays gone.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.job(&id).is_none());
    assert!(
        status.is_some_and(|rx| rx.has_changed().is_err()),
        "subscriptions close once the entry is really gone"
    );

    service.shutdown();
    Ok(())
}

#[tokio::test]
async fn delete_requires_a_finished_job() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    hub.push_job(record("a", "backup.sh", 0));

    let (store, service, hub_dyn) = engine(&hub);
    wait_ready(&store).await?;

    let mutations = Mutations::new(Arc::clone(&store), hub_dyn);
    let running = mutations.delete(&JobId::new("a")).await;
    assert!(matches!(running, Err(MutationError::StillRunning(_))));
    assert!(store.job(&JobId::new("a")).is_some());
    assert_eq!(hub.count_calls(|call| matches!(call, Call::Delete(_))), 0);

    let missing = mutations.delete(&JobId::new("ghost")).await;
    assert!(matches!(missing, Err(MutationError::NotFound(_))));

    service.shutdown();
    Ok(())
}

#[tokio::test]
async fn poke_forces_a_refresh_ahead_of_the_cadence() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    let store = Arc::new(JobStore::new());
    let hub_dyn: Arc<dyn ScriptHub> = Arc::<FakeHub>::clone(&hub);
    let service = SyncService::spawn(
        Arc::clone(&store),
        hub_dyn,
        SyncConfig {
            list_interval_ms: 60_000,
            detail_interval_ms: 60_000,
        },
    );
    wait_ready(&store).await?;

    hub.push_job(record("late", "backup.sh", 0));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        store.jobs().jobs.is_empty(),
        "the next scheduled tick is a minute away"
    );

    service.poke();
    {
        let store = Arc::clone(&store);
        wait_until("the poked refresh", move || store.jobs().jobs.len() == 1).await?;
    }

    service.shutdown();
    Ok(())
}

#[tokio::test]
async fn catalog_backfills_display_names() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    hub.set_scripts(vec![script_info("backup.sh", "Nightly backup", &["str"])]);
    hub.push_job(record("a", "backup.sh", 0));

    let (store, service, hub_dyn) = engine(&hub);
    wait_ready(&store).await?;

    let catalog = ScriptCatalog::new(hub_dyn);
    catalog.refresh().await?;
    assert_eq!(catalog.state(), LoadState::Ready);
    assert!(catalog.get("backup.sh").is_some());
    assert!(catalog.get("missing.sh").is_none());

    store.adopt_script_names(&catalog.all());
    assert_eq!(
        store.job(&JobId::new("a")).and_then(|job| job.name),
        Some("Nightly backup".to_string())
    );

    service.shutdown();
    Ok(())
}

#[tokio::test]
async fn catalog_failure_keeps_the_previous_listing() -> anyhow::Result<()> {
    let hub = FakeHub::new();
    hub.set_scripts(vec![script_info("backup.sh", "Nightly backup", &[])]);

    let hub_dyn: Arc<dyn ScriptHub> = Arc::<FakeHub>::clone(&hub);
    let catalog = ScriptCatalog::new(hub_dyn);
    let mut state_rx = catalog.watch_state();
    assert_eq!(*state_rx.borrow_and_update(), LoadState::Loading);

    catalog.refresh().await?;
    assert_eq!(*state_rx.borrow_and_update(), LoadState::Ready);

    hub.set_fail_scripts(true);
    let refused = catalog.refresh().await;
    assert!(refused.is_err());
    assert!(matches!(*state_rx.borrow_and_update(), LoadState::Failed { .. }));
    assert_eq!(catalog.all().len(), 1, "stale listing stays usable");
    Ok(())
}
