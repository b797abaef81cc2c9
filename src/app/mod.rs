use crate::api::{ApiServer, AppState};
use crate::artifacts::FsArtifactStore;
use crate::config::Config;
use crate::db::SqliteMetadataStore;
use crate::engine::{
    EnginePorts, EngineRuntime, ReconciliationEngine, Scope, SubscriptionRenewalCoordinator,
};
use crate::summarizer::OpenAISummarizer;
use crate::upstream::GraphClient;
use anyhow::{Context, Result};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Engine and renewal coordinator wired to the production adapters.
pub struct Services {
    pub engine: ReconciliationEngine,
    pub renewal: SubscriptionRenewalCoordinator,
}

pub fn build_services(config: &Config) -> Result<Services> {
    config.validate()?;

    let db_path = config.store.database_path()?;
    let store = SqliteMetadataStore::open(&db_path)
        .with_context(|| format!("Failed to open metadata store at {:?}", db_path))?;
    let artifacts = FsArtifactStore::new(config.store.artifacts_root()?);
    let upstream = GraphClient::new(&config.upstream)?;
    let summarizer = OpenAISummarizer::new(
        &config.summarizer,
        Duration::from_secs(config.upstream.request_timeout_seconds),
    )?;

    let ports = EnginePorts {
        store: Arc::new(store),
        artifacts: Arc::new(artifacts),
        upstream: Arc::new(upstream),
        summarizer: Arc::new(summarizer),
    };
    let engine = ReconciliationEngine::new(ports, EngineRuntime::default(), config.engine_settings());
    let renewal = engine.renewal_coordinator(config.renewal_settings());
    Ok(Services { engine, renewal })
}

pub async fn run_service(config: Config) -> Result<()> {
    info!("Starting scribeline service");

    let Services { engine, renewal } = build_services(&config)?;
    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    let schedule = &config.schedule;
    {
        let engine = engine.clone();
        let lookback = engine.settings().discovery_lookback;
        tasks.push(spawn_timer(
            "discovery",
            Duration::from_secs(schedule.discovery_interval_seconds),
            shutdown.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    match engine.discover_upstream(lookback).await {
                        Ok(summary) => info!(
                            "Discovery tick: {} new, {} known",
                            summary.created, summary.already_known
                        ),
                        Err(e) => error!("Discovery tick failed: {}", e),
                    }
                }
            },
        ));
    }
    {
        let engine = engine.clone();
        tasks.push(spawn_timer(
            "advance",
            Duration::from_secs(schedule.advance_interval_seconds),
            shutdown.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    if let Err(e) = engine.advance(Scope::All).await {
                        error!("Advance tick failed: {}", e);
                    }
                }
            },
        ));
    }
    {
        let renewal = renewal.clone();
        tasks.push(spawn_timer(
            "renewal",
            Duration::from_secs(config.subscriptions.renewal_interval_minutes.saturating_mul(60)),
            shutdown.clone(),
            move || {
                let renewal = renewal.clone();
                async move {
                    if let Err(e) = renewal.sync_hosts().await {
                        error!("Host sync failed: {}", e);
                    }
                    if let Err(e) = renewal.ensure_fresh(Utc::now()).await {
                        error!("Renewal tick failed: {}", e);
                    }
                }
            },
        ));
    }

    if config.api.enabled {
        let server = ApiServer::new(
            AppState {
                engine: engine.clone(),
                renewal: renewal.clone(),
                client_state: config.upstream.client_state.clone(),
            },
            config.api.bind_address.clone(),
        );
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.start(token).await {
                error!("API server failed: {}", e);
            }
        }));
    } else {
        info!("API server disabled");
    }

    info!("scribeline is ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, waiting for running ticks to finish");
    shutdown.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    info!("scribeline stopped");
    Ok(())
}

/// Run `tick` every `period`, starting immediately. A tick in progress is
/// allowed to finish after shutdown is requested.
fn spawn_timer<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    tick: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("{} timer running every {:?}", name, period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
    })
}
