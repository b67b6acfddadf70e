//! Job handler (C8, spec.md §4.8).
//!
//! Consumes one `background_jobs` row, drives it through
//! `pending -> processing -> completed|failed`, and invokes the orchestrator.
//! Refreshes `last_heartbeat` on an interval via a sibling task for the
//! duration of the run (spec.md §5 "Heartbeat").

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::llm::LlmClient;
use crate::models::{DetectionJobInput, JobStatus};
use crate::orchestrator::{self, OrchestratorConfig};

/// Runs the job handler for one existing `background_jobs` row end-to-end.
///
/// `cancellation` is observed between suspension points; on cancellation the
/// job is marked `failed` with `last_error = "cancelled"` and whatever
/// connections were already produced are still persisted (spec.md §7, §4.8).
pub async fn process_job(
    pool: &PgPool,
    config: &Config,
    job_id: Uuid,
    cancellation: CancellationToken,
) -> Result<()> {
    let input = load_job_input(pool, job_id).await?;

    // Configuration errors fail fast, before any engine runs (spec.md §7).
    let orchestrator_config = match OrchestratorConfig::from_app_config(config) {
        Ok(cfg) => cfg,
        Err(e) => {
            fail_job(pool, job_id, &input.document_id, &e.to_string()).await?;
            return Err(e).context("configuration error before any engine ran");
        }
    };
    let needs_llm = orchestrator_config
        .enabled_engines
        .contains(&crate::models::ConnectionType::ThematicBridge);
    let llm_client = if needs_llm {
        match LlmClient::new(&config.llm) {
            Ok(client) => Some(client),
            Err(e) => {
                fail_job(pool, job_id, &input.document_id, &e.to_string()).await?;
                return Err(e).context("configuration error before any engine ran");
            }
        }
    } else {
        None
    };

    mark_processing(pool, job_id).await?;

    let heartbeat_handle = spawn_heartbeat(
        pool.clone(),
        job_id,
        Duration::from_secs(config.worker.heartbeat_interval_secs),
    );

    let orchestrator_config = match input.chunk_ids.clone() {
        Some(ids) if !ids.is_empty() => orchestrator_config.with_source_chunk_ids(ids),
        _ => orchestrator_config,
    };
    let orchestrator_config = match input.target_document_ids.clone() {
        Some(ids) if !ids.is_empty() => orchestrator_config.with_target_document_ids(ids),
        _ => orchestrator_config,
    };

    let progress_pool = pool.clone();
    let on_progress: Arc<dyn Fn(u32, &str) + Send + Sync> = Arc::new(move |percent, message| {
        let pool = progress_pool.clone();
        let message = message.to_string();
        tokio::spawn(async move {
            if let Err(e) = update_progress(&pool, job_id, percent, &message).await {
                tracing::warn!(error = %e, job_id = %job_id, "progress update failed");
            }
        });
    });

    let result = tokio::select! {
        biased;
        _ = cancellation.cancelled() => {
            heartbeat_handle.abort();
            mark_failed(pool, job_id, &input.document_id, "cancelled").await?;
            return Ok(());
        }
        result = orchestrator::process_document(
            pool,
            llm_client.as_ref(),
            input.document_id,
            &orchestrator_config,
            Some(on_progress),
        ) => result,
    };

    heartbeat_handle.abort();

    match result {
        Ok(summary) => {
            let output = serde_json::json!({
                "success": true,
                "document_id": input.document_id,
                "totalConnections": summary.total_connections,
                "byEngine": summary
                    .by_engine
                    .iter()
                    .map(|(k, v)| (k.as_str(), v))
                    .collect::<std::collections::HashMap<_, _>>(),
                "executionTime": summary.execution_time_ms,
            });
            mark_completed(pool, job_id, &output).await?;
            Ok(())
        }
        Err(e) => {
            fail_job(pool, job_id, &input.document_id, &e.to_string()).await?;
            Err(e)
        }
    }
}

async fn load_job_input(pool: &PgPool, job_id: Uuid) -> Result<DetectionJobInput> {
    let row: (serde_json::Value,) =
        sqlx::query_as("SELECT input_data FROM background_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_one(pool)
            .await
            .context("failed to load job input_data")?;

    serde_json::from_value(row.0).context("malformed input_data for detection job")
}

async fn mark_processing(pool: &PgPool, job_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE background_jobs SET status = $1, updated_at = now(), last_heartbeat = now() WHERE id = $2",
    )
    .bind(JobStatus::Processing.as_str())
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Refreshes `progress_percent`/`progress_stage` with the current engine name
/// and `progress_message` (spec.md §3, §4.7's coarse percentage bands).
async fn update_progress(pool: &PgPool, job_id: Uuid, percent: u32, message: &str) -> Result<()> {
    sqlx::query(
        "UPDATE background_jobs SET progress_percent = $1, progress_stage = $2, \
         progress_message = $3, updated_at = now() WHERE id = $4",
    )
    .bind(percent as i32)
    .bind(stage_for_message(message))
    .bind(message)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

fn stage_for_message(message: &str) -> &'static str {
    if message.contains("semantic_similarity") {
        "semantic_similarity"
    } else if message.contains("contradiction_detection") {
        "contradiction_detection"
    } else if message.contains("thematic_bridge") || message.contains("source") {
        "thematic_bridge"
    } else {
        "processing"
    }
}

/// Marks the job `completed`, per spec.md §4.8 point 3: `output_data =
/// {success:true, document_id, totalConnections, byEngine, executionTime}`.
async fn mark_completed(pool: &PgPool, job_id: Uuid, output_data: &serde_json::Value) -> Result<()> {
    sqlx::query(
        "UPDATE background_jobs SET status = $1, progress_percent = 100, output_data = $2, \
         completed_at = now(), updated_at = now() WHERE id = $3",
    )
    .bind(JobStatus::Completed.as_str())
    .bind(output_data)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Marks the job `failed`, per spec.md §4.8 point 4: `output_data =
/// {success:false, document_id, error}`.
async fn mark_failed(pool: &PgPool, job_id: Uuid, document_id: &Uuid, error: &str) -> Result<()> {
    let output_data = serde_json::json!({
        "success": false,
        "document_id": document_id,
        "error": error,
    });
    sqlx::query(
        "UPDATE background_jobs SET status = $1, last_error = $2, output_data = $3, \
         completed_at = now(), updated_at = now() WHERE id = $4",
    )
    .bind(JobStatus::Failed.as_str())
    .bind(error)
    .bind(&output_data)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn fail_job(pool: &PgPool, job_id: Uuid, document_id: &Uuid, error: &str) -> Result<()> {
    mark_failed(pool, job_id, document_id, error).await
}

fn spawn_heartbeat(pool: PgPool, job_id: Uuid, interval: Duration) -> tokio::task::JoinHandle<()> {
    let pool = Arc::new(pool);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the immediate first tick
        loop {
            ticker.tick().await;
            if let Err(e) = sqlx::query("UPDATE background_jobs SET last_heartbeat = now() WHERE id = $1")
                .bind(job_id)
                .execute(pool.as_ref())
                .await
            {
                tracing::warn!(error = %e, job_id = %job_id, "heartbeat update failed");
            }
        }
    })
}
