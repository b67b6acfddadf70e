//! Database schema migrations.
//!
//! Creates the tables the connection engine reads and writes (`documents`,
//! `chunks`, `chunk_connections`, `background_jobs`), plus the ANN index over
//! `chunks.embedding` (spec.md §6). Idempotent, run via `conn-engine init`.
//! `documents` and `chunks` are owned by the external ingestion pipeline in
//! production; this migration creates a schema compatible with what that
//! pipeline writes so the crate is runnable standalone.

use anyhow::Result;
use sqlx::postgres::PgPool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn run_migrations_on(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;
    sqlx::query("CREATE EXTENSION IF NOT EXISTS pgcrypto")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            user_id UUID NOT NULL,
            title TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            document_id UUID NOT NULL REFERENCES documents(id),
            chunk_index BIGINT NOT NULL,
            content TEXT NOT NULL,
            summary TEXT,
            embedding VECTOR(768),
            importance_score DOUBLE PRECISION,
            conceptual_metadata JSONB,
            emotional_metadata JSONB,
            domain_metadata JSONB,
            content_layer TEXT,
            content_label TEXT,
            is_current BOOLEAN NOT NULL DEFAULT true,
            reprocessing_batch TEXT,
            UNIQUE(document_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_connections (
            source_chunk_id UUID NOT NULL REFERENCES chunks(id),
            target_chunk_id UUID NOT NULL REFERENCES chunks(id),
            connection_type TEXT NOT NULL,
            strength DOUBLE PRECISION NOT NULL,
            auto_detected BOOLEAN NOT NULL DEFAULT true,
            discovered_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            PRIMARY KEY (source_chunk_id, target_chunk_id, connection_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS background_jobs (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            job_type TEXT NOT NULL DEFAULT 'detect-connections',
            status TEXT NOT NULL DEFAULT 'pending',
            input_data JSONB NOT NULL,
            output_data JSONB,
            last_error TEXT,
            progress_percent INTEGER NOT NULL DEFAULT 0,
            progress_stage TEXT,
            progress_message TEXT,
            last_heartbeat TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_is_current ON chunks(is_current) WHERE is_current",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_connections_source ON chunk_connections(source_chunk_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_background_jobs_status ON background_jobs(status)",
    )
    .execute(pool)
    .await?;

    // ANN index (spec.md §6): IVFFlat over cosine distance. Skipped until the
    // table holds enough rows for IVFFlat's clustering to be meaningful is a
    // production concern; for a fresh schema we create it unconditionally, as
    // pgvector allows building it eagerly.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_embedding_ann ON chunks \
         USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
