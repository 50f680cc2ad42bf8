#![allow(clippy::print_stdout)]

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use scriptdeck_client::{HttpScriptHub, JobId, ScriptHub};
use scriptdeck_core::config::{self, ENV_SERVER_URL};
use scriptdeck_core::{
    JobStore, LoadState, Mutations, PickedFile, Route, RunningJob, ScriptCatalog, SubmitState,
    Submission, SyncConfig, SyncService,
};

const READY_TIMEOUT: Duration = Duration::from_secs(15);
const EXIT_CODE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "scriptdeck")]
#[command(about = "Terminal client for a scriptdeck launcher server")]
pub struct ScriptdeckCli {
    /// Server base URL; defaults to $SCRIPTDECK_SERVER
    #[arg(long, global = true)]
    pub server: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// List launchable scripts and their declared arguments
    Scripts,
    /// List the jobs the server remembers, newest first
    Jobs,
    /// Launch a script; file-typed arguments take local paths
    Run {
        script: String,
        /// Argument values in declaration order
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Stream output and wait for the exit code
        #[arg(long)]
        follow: bool,
    },
    /// Print a job's status changes until it finishes
    Watch { job: String },
    /// Stream a job's output
    Tail { job: String },
    /// Ask the server to terminate a job
    Kill { job: String },
    /// Delete a finished job's record
    Delete { job: String },
    /// Re-run a copied `#/scripts/...` link, or watch a `#/running/...` one
    Replay { fragment: String },
}

pub async fn run(cli: ScriptdeckCli) -> anyhow::Result<()> {
    let server = config::resolve_server_url(cli.server.as_deref())
        .with_context(|| format!("no server URL; pass --server or set {ENV_SERVER_URL}"))?;
    let hub: Arc<dyn ScriptHub> = Arc::new(HttpScriptHub::from_base_url(&server)?);

    match cli.command {
        Commands::Scripts => scripts(&hub).await,
        Commands::Jobs => {
            let engine = Engine::start(&hub);
            engine.ready().await?;
            jobs(&engine);
            Ok(())
        }
        Commands::Run {
            script,
            args,
            follow,
        } => {
            let engine = Engine::start(&hub);
            run_script(&hub, &engine, &script, &args, follow).await
        }
        Commands::Watch { job } => {
            let engine = Engine::start(&hub);
            engine.ready().await?;
            watch_job(&engine, &JobId::new(job)).await
        }
        Commands::Tail { job } => {
            let engine = Engine::start(&hub);
            engine.ready().await?;
            tail_job(&engine, &JobId::new(job)).await
        }
        Commands::Kill { job } => {
            let engine = Engine::start(&hub);
            engine.ready().await?;
            Mutations::new(Arc::clone(&engine.store), Arc::clone(&hub))
                .kill(&JobId::new(job))
                .await?;
            println!("kill requested");
            Ok(())
        }
        Commands::Delete { job } => {
            let engine = Engine::start(&hub);
            engine.ready().await?;
            Mutations::new(Arc::clone(&engine.store), Arc::clone(&hub))
                .delete(&JobId::new(job))
                .await?;
            println!("deleted");
            Ok(())
        }
        Commands::Replay { fragment } => match Route::parse(&fragment) {
            Route::ScriptForm { script, args } => {
                let engine = Engine::start(&hub);
                run_script(&hub, &engine, &script, &args.unwrap_or_default(), true).await
            }
            Route::RunningJob { job } => {
                let engine = Engine::start(&hub);
                engine.ready().await?;
                watch_job(&engine, &job).await
            }
            Route::None | Route::ScriptsIndex => {
                anyhow::bail!("fragment does not name a script form or a running job")
            }
        },
    }
}

/// Store plus its polling service, torn down when dropped.
struct Engine {
    store: Arc<JobStore>,
    service: SyncService,
}

impl Engine {
    fn start(hub: &Arc<dyn ScriptHub>) -> Self {
        let store = Arc::new(JobStore::new());
        let service = SyncService::spawn(
            Arc::clone(&store),
            Arc::clone(hub),
            SyncConfig::from_env(),
        );
        Self { store, service }
    }

    /// Wait for the first job-list refresh to land.
    async fn ready(&self) -> anyhow::Result<()> {
        let mut state = self.store.watch_list_state();
        let state = tokio::time::timeout(
            READY_TIMEOUT,
            state.wait_for(|state| !matches!(state, LoadState::Loading)),
        )
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for the server"))?
        .map(|state| state.clone())
        .map_err(|_| anyhow::anyhow!("sync service stopped"))?;

        if let LoadState::Failed { message } = state {
            anyhow::bail!("job list refresh failed: {message}");
        }
        Ok(())
    }
}

async fn scripts(hub: &Arc<dyn ScriptHub>) -> anyhow::Result<()> {
    let catalog = ScriptCatalog::new(Arc::clone(hub));
    catalog.refresh().await.context("fetch script list")?;
    for info in catalog.all() {
        println!("{}  ({})", info.name, info.script);
        if let Some(description) = &info.description {
            println!("    {description}");
        }
        for (index, arg) in info.args.iter().enumerate() {
            let description = arg.description.as_deref().unwrap_or("");
            println!("    arg{index} [{}] {description}", arg.kind.tag());
        }
    }
    Ok(())
}

fn jobs(engine: &Engine) {
    for job in engine.store.jobs().jobs {
        println!(
            "{}  {}  started {}  {}",
            job.id,
            job.script,
            job.start_time.format("%Y-%m-%d %H:%M:%S"),
            describe_state(&job),
        );
    }
}

fn describe_state(job: &RunningJob) -> String {
    match job.return_code {
        Some(code) if code < 0 => format!("killed ({code})"),
        Some(code) => format!("exit {code}"),
        None if job.status.is_empty() => "running".to_string(),
        None => format!("running: {}", job.status),
    }
}

async fn run_script(
    hub: &Arc<dyn ScriptHub>,
    engine: &Engine,
    script: &str,
    args: &[String],
    follow: bool,
) -> anyhow::Result<()> {
    let catalog = ScriptCatalog::new(Arc::clone(hub));
    catalog.refresh().await.context("fetch script list")?;
    let Some(info) = catalog.get(script) else {
        anyhow::bail!("unknown script {script}");
    };
    anyhow::ensure!(
        args.len() <= info.args.len(),
        "{script} declares {} arguments, got {}",
        info.args.len(),
        args.len()
    );

    let submission = Submission::new(
        info,
        Arc::clone(&engine.store),
        Arc::clone(hub),
        engine.service.poker(),
    );
    submission.prefill(args);
    for (index, spec) in submission.script().args.iter().enumerate() {
        if spec.kind.is_file() {
            let Some(path) = args.get(index) else {
                anyhow::bail!("argument {index} of {script} is a file; pass a path");
            };
            submission.set_file(index, Some(picked_file(path)?))?;
        }
    }

    anyhow::ensure!(submission.submit()?, "a submission is already in flight");
    let mut state = submission.watch_state();
    let outcome = state
        .wait_for(|state| {
            matches!(
                state,
                SubmitState::Created { .. } | SubmitState::Failed { .. }
            )
        })
        .await
        .map(|state| state.clone())
        .map_err(|_| anyhow::anyhow!("submission task stopped"))?;

    let job_id = match outcome {
        SubmitState::Created { job_id } => job_id,
        SubmitState::Failed { message } => anyhow::bail!("submission failed: {message}"),
        SubmitState::Editing | SubmitState::Uploading { .. } => {
            anyhow::bail!("submission ended unexpectedly")
        }
    };
    println!("{job_id}");

    if follow {
        tail_job(engine, &job_id).await?;
        let code = wait_exit_code(engine, &job_id).await?;
        println!("exit: {code}");
        anyhow::ensure!(code == 0, "job exited with {code}");
    }
    Ok(())
}

async fn watch_job(engine: &Engine, id: &JobId) -> anyhow::Result<()> {
    let Some(job) = engine.store.job(id) else {
        anyhow::bail!("unknown job {id}");
    };
    println!(
        "{}  {}  started {}  {}",
        job.id,
        job.script,
        job.start_time.format("%Y-%m-%d %H:%M:%S"),
        describe_state(&job),
    );
    if job.is_finished() {
        return Ok(());
    }

    let (Some(mut status), Some(mut progress), Some(mut code)) = (
        engine.store.watch_status(id),
        engine.store.watch_progress(id),
        engine.store.watch_return_code(id),
    ) else {
        anyhow::bail!("job {id} disappeared");
    };
    // The job may have finished between the snapshot above and the
    // subscriptions; a terminal job gets no further publications.
    if let Some(value) = *code.borrow() {
        println!("exit: {value}");
        return Ok(());
    }

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let value = status.borrow_and_update().clone();
                if !value.is_empty() {
                    println!("status: {value}");
                }
            }
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let value = *progress.borrow_and_update();
                match value.fraction() {
                    Some(fraction) => println!("progress: {:.0}%", fraction * 100.0),
                    None if value.numerator() > 0.0 => println!("progress: {}", value.numerator()),
                    None => {}
                }
            }
            changed = code.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(value) = *code.borrow_and_update() {
                    println!("exit: {value}");
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn tail_job(engine: &Engine, id: &JobId) -> anyhow::Result<()> {
    let Some(mut output) = engine.store.subscribe_output(id) else {
        anyhow::bail!("unknown job {id}");
    };
    let mut printed = 0;
    loop {
        let text = output.current();
        if text.len() > printed {
            print!("{}", &text[printed..]);
            std::io::stdout().flush().ok();
            printed = text.len();
        }
        if engine.store.output_finished(id) {
            break;
        }
        if output.changed().await.is_err() {
            break;
        }
    }
    if printed > 0 && !output.current().ends_with('\n') {
        println!();
    }
    Ok(())
}

async fn wait_exit_code(engine: &Engine, id: &JobId) -> anyhow::Result<i32> {
    if let Some(code) = engine.store.job(id).and_then(|job| job.return_code) {
        return Ok(code);
    }
    let Some(mut rx) = engine.store.watch_return_code(id) else {
        anyhow::bail!("job {id} disappeared");
    };
    let code = tokio::time::timeout(EXIT_CODE_TIMEOUT, rx.wait_for(|code| code.is_some()))
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for the exit status"))?
        .map(|code| *code)
        .map_err(|_| anyhow::anyhow!("job {id} disappeared"))?;
    Ok(code.unwrap_or_default())
}

fn picked_file(path: &str) -> anyhow::Result<PickedFile> {
    let bytes = std::fs::read(path).with_context(|| format!("read {path}"))?;
    Ok(PickedFile {
        file_name: file_name_of(path),
        bytes,
    })
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
