use anyhow::{Context, Result};
use clap::Parser;
use fleetops_core::domain::Kind;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod executor;
pub mod reconcile;
pub mod service;
pub mod store;

#[cfg(test)]
mod testing;

use config::Config;
use engine::{EngineSettings, Heartbeat, PipelineRunOrchestrator, TaskRunEngine};
use executor::{Dispatcher, NodeExecutor, SshExecutor};
use reconcile::{
    CronRegistry, HeartbeatReconciler, Manager, PipelineReconciler, PipelineRunReconciler,
    TaskReconciler, TaskRunReconciler,
};
use service::RunService;
use store::{MemoryStore, ObjectStore, PgStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("Invalid configuration")?;

    tracing::info!("Starting fleetops controller...");

    let store: Arc<dyn ObjectStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("No DATABASE_URL set, objects are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let settings = EngineSettings {
        default_runtime_image: config.default_runtime_image.clone(),
        env_variables: config.env_variables,
        poll_interval: config.poll_interval(),
        ..Default::default()
    };

    let nodes = Arc::new(NodeExecutor::new(&config.kubectl, &config.runtime_namespace));
    let executor = Arc::new(Dispatcher::new(
        SshExecutor::new(&config.ssh_bin, &config.scp_bin),
        nodes.clone(),
    ));

    let heartbeat = Arc::new(Heartbeat::new(
        store.clone(),
        executor.clone(),
        nodes.clone(),
        settings.clone(),
    ));
    let engine = Arc::new(TaskRunEngine::new(
        store.clone(),
        executor,
        nodes,
        settings.clone(),
    ));
    let orchestrator = Arc::new(PipelineRunOrchestrator::new(store.clone(), settings.clone()));
    let runs = RunService::new(store.clone(), config.poll_interval(), config.wait_timeout());

    let shutdown = CancellationToken::new();
    let cron = Arc::new(CronRegistry::new(&shutdown));

    let mut manager = Manager::new(
        store.clone(),
        config.active_namespace.clone(),
        config.resync_interval(),
    );
    manager.register(
        Arc::new(TaskRunReconciler::new(
            store.clone(),
            engine,
            settings,
            config.taskrun_history_limit,
        )),
        config.taskrun_concurrency,
    );
    manager.register(
        Arc::new(PipelineRunReconciler::new(
            store.clone(),
            orchestrator,
            config.pipelinerun_history_limit,
        )),
        config.pipelinerun_concurrency,
    );
    manager.register(
        Arc::new(TaskReconciler::new(store.clone(), cron.clone(), runs.clone())),
        config.resource_concurrency,
    );
    manager.register(
        Arc::new(PipelineReconciler::new(store.clone(), cron.clone(), runs.clone())),
        config.resource_concurrency,
    );
    for kind in [Kind::Host, Kind::Cluster] {
        manager.register(
            Arc::new(HeartbeatReconciler::new(
                kind,
                store.clone(),
                cron.clone(),
                heartbeat.clone(),
                config.heartbeat_crontab.clone(),
            )),
            config.resource_concurrency,
        );
    }
    let manager = tokio::spawn(manager.run(shutdown.clone()));

    // Build router with all API endpoints
    let app = api::create_router(api::AppState { store, runs });

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down...");
            token.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    manager.await.context("Reconciliation manager panicked")?;

    Ok(())
}
