//! Headless scheduler host for stdin/stdout JSON communication.
//!
//! Loads configuration, opens the run timeline, starts the adaptive
//! scheduler and serves `CommandEnvelope` lines from stdin until EOF,
//! `runtime.stop`, or Ctrl-C.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use yume::host::{CommandHandler, run_stdio_bridge};
use yume::logging;
use yume::scheduler::{
    ActionInvoker, ActionOutput, AdaptiveScheduler, FixedDelayGateway, ScheduledRun,
    SqliteRunTimeline,
};
use yume::YumeConfig;

/// Stand-in action: records the run in the log and acknowledges it.
struct LoggingInvoker;

#[async_trait]
impl ActionInvoker for LoggingInvoker {
    async fn execute(&self, run: &ScheduledRun) -> anyhow::Result<ActionOutput> {
        tracing::info!(run_id = %run.id, topic = %run.topic, reason = %run.reason, "assistant action");
        Ok(ActionOutput::new(format!("acknowledged {}", run.topic)))
    }
}

/// `YUME_CONFIG` wins over the default path; a missing file means defaults.
fn load_config() -> anyhow::Result<(YumeConfig, Option<PathBuf>)> {
    let path = std::env::var_os("YUME_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(YumeConfig::default_config_path);
    if path.exists() {
        let config = YumeConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))?;
        Ok((config, Some(path)))
    } else {
        Ok((YumeConfig::default(), None))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_path) = load_config()?;
    let _log_guard = logging::init_tracing(&config.logging)?;

    match &config_path {
        Some(path) => tracing::info!("yume-scheduler starting with {}", path.display()),
        None => tracing::info!("yume-scheduler starting with default config"),
    }

    let db_path = config.store.database_path();
    let store = Arc::new(
        SqliteRunTimeline::open(&db_path)
            .with_context(|| format!("opening run timeline at {}", db_path.display()))?,
    );

    let mut builder = AdaptiveScheduler::new(
        config.scheduler.clone(),
        store,
        Arc::new(FixedDelayGateway::hourly()),
        Arc::new(LoggingInvoker),
    );
    if let Some(days) = config.store.history_retention_days {
        builder = builder.with_retention(days, config.store.janitor_interval());
    }
    let scheduler = builder.start().await?;

    let handler = CommandHandler::new(scheduler.clone());
    let result = tokio::select! {
        exit = run_stdio_bridge(handler) => exit.map(Some),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
            Ok(None)
        }
    };

    scheduler.shutdown().await;

    match result {
        Ok(exit) => {
            tracing::info!(?exit, "yume-scheduler shut down cleanly");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "yume-scheduler exited with error");
            Err(anyhow::anyhow!("yume-scheduler failed: {e}"))
        }
    }
}
