use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use cascade_jobs::{
    db, logging, Config, DeletionJob, JobController, JobId, JobStatus, PlanFile, SurrealDocuments, TokenBucketLimiter,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "cascade-jobs", version, about = "Run cascading deletes in small, resumable chunks")]
struct Cli {
    /// Config file (default: <config dir>/cascade-jobs/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Dry-run plan file produced by the cascade planner
    #[arg(long, global = true, default_value = "plan.json")]
    plan: PathBuf,

    /// Session id used for rate limiting
    #[arg(long, global = true, default_value = "cli")]
    session: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan and start deleting `<table>:<id>`, following progress until done.
    /// Ctrl-C cancels the job.
    Start {
        table: String,
        id: String,
        #[arg(long)]
        chunk_size: Option<u64>,
    },
    /// Cancel a job that is still deleting
    Cancel { job_id: String },
    /// List all jobs, newest first
    List,
    /// Show the most relevant job
    Current,
    /// Remove every job record
    Clear,
    /// Continue every job left deleting by an earlier run
    Resume,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db_path) = cli.db {
        config.db_path = db_path;
    }
    logging::init(config.log_file.as_deref()).context("failed to initialise logging")?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }
    let handle = db::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    let controller = JobController::new(
        handle.clone(),
        PlanFile::new(cli.plan),
        TokenBucketLimiter::new(&config.rate_limit),
        Arc::new(SurrealDocuments::new(handle)),
        config.engine(),
    );

    match cli.command {
        Command::Start { table, id, chunk_size } => {
            let job_id = controller.start_scheduled_delete(&table, &id, chunk_size, &cli.session).await?;
            println!("started job {job_id}");
            follow(&controller, &job_id, &cli.session).await?;
        }
        Command::Cancel { job_id } => {
            let job_id: JobId = job_id.parse()?;
            controller.cancel_scheduled_delete(&job_id, &cli.session).await?;
            match controller.get_job(&job_id).await? {
                Some(job) => print_job(&job),
                None => println!("no job {job_id}"),
            }
        }
        Command::List => {
            let jobs = controller.list_scheduled_jobs().await?;
            if jobs.is_empty() {
                println!("no jobs");
            }
            for job in &jobs {
                print_job(job);
            }
        }
        Command::Current => match controller.current_job().await? {
            Some(job) => print_job(&job),
            None => println!("no jobs"),
        },
        Command::Clear => {
            let removed = controller.clear_scheduled_jobs(&cli.session).await?;
            println!("removed {removed} job(s)");
        }
        Command::Resume => {
            let resumed = controller.resume_jobs().await?;
            println!("resumed {resumed} job(s)");
            let active: Vec<JobId> = controller
                .list_scheduled_jobs()
                .await?
                .into_iter()
                .filter(|job| job.is_active())
                .map(|job| job.id)
                .collect();
            for job_id in active {
                follow(&controller, &job_id, &cli.session).await?;
            }
        }
    }

    controller.shutdown();
    Ok(())
}

/// Show a progress bar until the job is terminal. Ctrl-C cancels it.
async fn follow<P, R>(controller: &JobController<P, R>, job_id: &JobId, session: &str) -> Result<()>
where
    P: cascade_jobs::Planner,
    R: cascade_jobs::RateLimiter + 'static,
{
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")?.progress_chars("=> "),
    );
    bar.set_message(job_id.to_string());

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    let mut cancelling = false;
    loop {
        let Some(job) = controller.get_job(job_id).await? else {
            bar.abandon_with_message("job was cleared");
            return Ok(());
        };
        bar.set_length(job.total_to_delete);
        bar.set_position(job.deleted_so_far);

        if job.status.is_terminal() {
            bar.finish_with_message(job.status.to_string());
            print_job(&job);
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = &mut ctrl_c, if !cancelling => {
                cancelling = true;
                bar.set_message("cancelling");
                controller.cancel_scheduled_delete(job_id, session).await?;
            }
        }
    }
}

fn print_job(job: &DeletionJob) {
    let mut line = format!(
        "{}  {:<9}  {}/{}  root={}:{}  chunk={}  removed={}  created={}",
        job.id,
        job.status.as_str(),
        job.deleted_so_far,
        job.total_to_delete,
        job.root_table,
        job.root_id,
        job.chunk_size,
        job.documents_removed,
        job.created_at.format("%Y-%m-%d %H:%M:%S"),
    );
    if job.status == JobStatus::Failed {
        if let Some(error) = &job.error {
            line.push_str(&format!("  error={error}"));
        }
    }
    println!("{line}");
}
