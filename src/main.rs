//! `conn-engine` — CLI entry point over the connection-engine library.

mod ann;
mod config;
mod db;
mod engine_bridge;
mod engine_contradiction;
mod engine_semantic;
mod job;
mod json_repair;
mod llm;
mod metadata;
mod migrate;
mod models;
mod orchestrator;
mod store;
mod worker;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use orchestrator::OrchestratorConfig;

#[derive(Parser)]
#[command(
    name = "conn-engine",
    about = "Cross-document connection-detection engine for a personal knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/conn-engine.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Run detection for one document directly, bypassing the job table
    Detect {
        /// Document UUID
        document_id: String,
    },

    /// Run the job handler for one existing background_jobs row
    ProcessJob {
        /// Job UUID
        job_id: String,
    },

    /// Poll for pending jobs and process them until Ctrl-C
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Detect { document_id } => {
            let document_id = Uuid::parse_str(&document_id)?;
            let pool = db::connect(&cfg).await?;
            let orchestrator_config = OrchestratorConfig::from_app_config(&cfg)?;

            let llm_client = if orchestrator_config
                .enabled_engines
                .contains(&models::ConnectionType::ThematicBridge)
            {
                Some(llm::LlmClient::new(&cfg.llm)?)
            } else {
                None
            };

            let summary = orchestrator::process_document(
                &pool,
                llm_client.as_ref(),
                document_id,
                &orchestrator_config,
                None,
            )
            .await?;

            println!("document: {document_id}");
            println!("total connections: {}", summary.total_connections);
            for (engine, count) in &summary.by_engine {
                println!("  {}: {}", engine.as_str(), count);
            }
            for (engine, error) in &summary.engine_errors {
                println!("  {} failed: {}", engine.as_str(), error);
            }
            println!("execution time: {}ms", summary.execution_time_ms);
        }
        Commands::ProcessJob { job_id } => {
            let job_id = Uuid::parse_str(&job_id)?;
            let pool = db::connect(&cfg).await?;
            job::process_job(&pool, &cfg, job_id, CancellationToken::new()).await?;
            println!("job {job_id} processed.");
        }
        Commands::Worker => {
            let pool = db::connect(&cfg).await?;
            let shutdown = CancellationToken::new();
            let shutdown_signal = shutdown.clone();

            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                shutdown_signal.cancel();
            });

            println!("worker started, concurrency={}", cfg.worker.concurrency);
            worker::run(pool, Arc::new(cfg), shutdown).await?;
            println!("worker shut down.");
        }
    }

    Ok(())
}
