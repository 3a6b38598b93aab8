//! `chime` — run the scheduler, or inspect and toggle its jobs.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use chime_core::{ChimeConfig, JobDefinition};
use chime_scheduler::{Job, RedisStore, SchedulerContext, SchedulerEngine};

mod command;

#[derive(Parser)]
#[command(name = "chime")]
#[command(about = "Distributed recurring-job scheduler")]
#[command(version)]
struct Cli {
    /// Configuration file path (default: $CHIME_CONFIG or ~/.chime/chime.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler in the foreground until Ctrl-C / SIGTERM
    Run,
    /// Print every configured job's status as JSON lines
    List,
    /// Suppress runs of a job across the fleet
    Disable { id: String },
    /// Re-enable a disabled job
    Enable { id: String },
    /// Forget a job's last run so it is due on the next eligible tick
    Clear { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chime_daemon=info,chime_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = ChimeConfig::load(cli.config.as_deref())?;

    let store = Arc::new(RedisStore::connect(&config.redis.url).await?);
    let ctx = SchedulerContext::from_config(&config.scheduler, store.clone(), store)?;

    match cli.command {
        Commands::Run => run(&config, ctx).await,
        Commands::List => {
            let now = Utc::now();
            for def in &config.jobs {
                match build_job(def, &ctx).await {
                    Ok(job) => println!("{}", serde_json::to_string(&job.status(now).await?)?),
                    Err(e) => warn!(job = %def.id(), error = %e, "invalid job definition"),
                }
            }
            Ok(())
        }
        Commands::Disable { id } => {
            lookup(&config, &ctx, &id).await?.disable().await?;
            info!(job = %id, "disabled");
            Ok(())
        }
        Commands::Enable { id } => {
            lookup(&config, &ctx, &id).await?.enable().await?;
            info!(job = %id, "enabled");
            Ok(())
        }
        Commands::Clear { id } => {
            lookup(&config, &ctx, &id).await?.clear().await?;
            info!(job = %id, "last run cleared");
            Ok(())
        }
    }
}

async fn run(config: &ChimeConfig, ctx: SchedulerContext) -> anyhow::Result<()> {
    let mut engine = SchedulerEngine::new(ctx.clone())
        .with_tick(config.scheduler.tick())
        .with_heartbeat(config.scheduler.heartbeat);

    // A bad definition only takes out that one job.
    for def in &config.jobs {
        match build_job(def, &ctx).await {
            Ok(job) => {
                if let Err(e) = engine.register(job) {
                    error!(job = %def.id(), error = %e, "job not registered");
                }
            }
            Err(e) => error!(job = %def.id(), error = %e, "job not registered"),
        }
    }
    if engine.jobs().is_empty() {
        warn!("no jobs registered");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    shutdown_signal().await;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    engine_task.await.context("scheduler engine task failed")?;
    Ok(())
}

async fn build_job(def: &JobDefinition, ctx: &SchedulerContext) -> chime_scheduler::Result<Job> {
    let mut builder = Job::builder(def.name.clone())
        .stop_timeout(std::time::Duration::from_secs(def.timeout_secs));
    if let Some(category) = &def.category {
        builder = builder.category(category.clone());
    }
    if let Some(every) = &def.every {
        builder = builder.every(every.clone());
    }
    if let Some(at) = &def.at {
        builder = builder.at(at.clone());
    }

    let id = def.id();
    let shell = def.command.clone();
    builder
        .body(move |cancel| command::run_shell(id.clone(), shell.clone(), cancel))
        .build(ctx)
        .await
}

async fn lookup(config: &ChimeConfig, ctx: &SchedulerContext, id: &str) -> anyhow::Result<Job> {
    let def = config.job(id)?;
    Ok(build_job(def, ctx).await?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
