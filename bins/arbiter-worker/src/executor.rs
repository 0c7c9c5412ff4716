/// Request Executor - Queue-Side Orchestration
///
/// **Responsibility:**
/// Judge one popped request and publish what happened:
/// 1. Open a reporter channel and forward every event to Redis as it arrives
/// 2. Run `arbiter_core::judge::run` against the Docker-backed services
/// 3. Store the final record once the event stream has drained
///
/// This module is the glue layer. It knows nothing about how cases are
/// normalized, executed or scored.

use anyhow::Result;
use arbiter_common::config::JudgeSettings;
use arbiter_common::redis;
use arbiter_common::types::{JudgeEvent, JudgeRecord, JudgeRequest};
use arbiter_core::judge::{self, Services};
use arbiter_core::report;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Judge `request`, streaming its events to `arbiter:events:<id>`
pub async fn execute(
    request: &JudgeRequest,
    services: &Services,
    settings: &JudgeSettings,
    redis_conn: &::redis::aio::ConnectionManager,
) -> Result<JudgeRecord> {
    let started_at = Utc::now();
    let (reporter, rx) = report::channel();
    let forwarder = tokio::spawn(forward_events(request.id, rx, redis_conn.clone()));

    let verdict = judge::run(request, services, settings, reporter).await;

    // The reporter is consumed by `run`, so the forwarder ends once it drains
    let forwarded = forwarder.await?;
    debug!(request_id = %request.id, events = forwarded, "Events forwarded");

    let record = JudgeRecord {
        request_id: request.id,
        verdict,
        started_at,
        finished_at: Utc::now(),
    };
    let mut conn = redis_conn.clone();
    redis::store_record(&mut conn, &record).await?;
    Ok(record)
}

async fn forward_events(
    request_id: uuid::Uuid,
    mut rx: mpsc::UnboundedReceiver<JudgeEvent>,
    mut conn: ::redis::aio::ConnectionManager,
) -> usize {
    let mut forwarded = 0;
    while let Some(event) = rx.recv().await {
        match redis::push_event(&mut conn, &request_id, &event).await {
            Ok(()) => forwarded += 1,
            // Non-fatal - the final record still lands
            Err(e) => error!(request_id = %request_id, error = %e, "Failed to push event"),
        }
    }
    forwarded
}
