mod config;
mod engine;
mod engine_tests;
mod executor;

use arbiter_common::config::JudgeSettings;
use arbiter_common::redis;
use arbiter_core::judge::Services;
use config::LanguageConfigManager;
use engine::DockerEngine;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, instrument, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Arbiter Worker booting...");

    let settings = JudgeSettings::load_default().map_err(|e| {
        error!("Failed to load judge settings: {}", e);
        anyhow::anyhow!(e)
    })?;

    let languages = LanguageConfigManager::load(&settings.languages_path).map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        error!("Make sure {} exists", settings.languages_path.display());
        e
    })?;
    info!("Loaded language configurations for: {:?}", languages.list_languages());

    let engine = Arc::new(DockerEngine::new_with_config(&languages)?);
    let services = Services {
        sandbox: engine.clone(),
        compiler: engine,
        languages: Arc::new(languages),
    };
    tokio::fs::create_dir_all(&settings.tmp_dir).await?;
    info!(
        tmp_dir = %settings.tmp_dir.display(),
        parallelism = settings.parallelism,
        "Judge settings loaded"
    );

    let client = ::redis::Client::open(settings.redis_url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", settings.redis_url);

    // Dropping an in-flight run spawns its pending cleanups
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, stopping...");
    };

    tokio::select! {
        _ = worker_loop(redis_conn, &services, &settings) => {},
        _ = shutdown => {},
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip_all)]
async fn worker_loop(
    mut redis_conn: ::redis::aio::ConnectionManager,
    services: &Services,
    settings: &JudgeSettings,
) -> anyhow::Result<()> {
    loop {
        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_request(&mut redis_conn, 5.0).await {
            Ok(Some(request)) => {
                info!(
                    request_id = %request.id,
                    lang = %request.lang,
                    source_size = request.code.len(),
                    self_submission = request.self_submission,
                    "Received request"
                );

                let start = std::time::Instant::now();
                match executor::execute(&request, services, settings, &redis_conn).await {
                    Ok(record) => info!(
                        request_id = %request.id,
                        status = %record.verdict.status,
                        score = record.verdict.score,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Result persisted to Redis"
                    ),
                    // Non-fatal - worker continues
                    Err(e) => error!(request_id = %request.id, error = %e, "Failed to persist result"),
                }
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}
