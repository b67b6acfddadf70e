//! Worker loop (ambient, SPEC_FULL.md §5).
//!
//! spec.md scopes the job queue itself out; this is the minimal scaffolding
//! needed to exercise the job handler end-to-end without inventing queue
//! semantics the spec excludes: poll for pending jobs, claim one
//! optimistically, run it, repeat. No retry policy, no dead-lettering, no
//! priority.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::job;

/// Runs the polling loop until `shutdown` is cancelled (e.g. by `Ctrl-C`).
pub async fn run(pool: PgPool, config: Arc<Config>, shutdown: CancellationToken) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(config.worker.concurrency));
    let poll_interval = Duration::from_secs(config.worker.poll_interval_secs);

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => continue,
                    _ = shutdown.cancelled() => break,
                }
            }
        };

        match claim_next_job(&pool).await? {
            Some(job_id) => {
                let pool = pool.clone();
                let config = config.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = job::process_job(&pool, &config, job_id, shutdown).await {
                        tracing::error!(error = %e, job_id = %job_id, "job failed");
                    }
                });
            }
            None => {
                drop(permit);
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }
    }

    Ok(())
}

/// Optimistic claim: only succeeds if the row was still `pending` when the
/// update ran, so two workers racing on the same job never both win
/// (spec.md §5, SPEC_FULL.md §5).
async fn claim_next_job(pool: &PgPool) -> Result<Option<Uuid>> {
    let claimed: Option<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE background_jobs
        SET status = 'processing', updated_at = now(), last_heartbeat = now()
        WHERE id = (
            SELECT id FROM background_jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id
        "#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(claimed.map(|(id,)| id))
}
