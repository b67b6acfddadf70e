//! # Connection Engine
//!
//! A cross-document connection-detection engine for a personal knowledge
//! base. Given a document whose chunks have already been embedded and
//! enriched with semantic metadata, it discovers typed, scored relationships
//! between those chunks and chunks of every other document owned by the same
//! user, and persists them for later retrieval.
//!
//! ## Architecture
//!
//! ```text
//! (external ingestion) -> chunks + embeddings + metadata -> store/ann -> engines -> orchestrator -> chunk_connections
//! ```
//!
//! Three independent engines propose connections:
//! - [`engine_semantic`] — embedding-based cross-document neighbor finding.
//! - [`engine_contradiction`] — metadata-only same-topic/opposite-polarity detector.
//! - [`engine_bridge`] — LLM-backed cross-domain bridge finder.
//!
//! [`orchestrator`] sequences them, deduplicates, and commits; [`job`] drives
//! one background job through its lifecycle; [`worker`] polls for jobs.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `Document`, `Chunk`, `Connection`, `DetectionJob` |
//! | [`metadata`] | Typed chunk metadata sub-records and Jaccard overlap |
//! | [`db`] | Postgres connection pool management |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`store`] | Chunk store adapter (C1) |
//! | [`ann`] | Embedding ANN query (C2) |
//! | [`llm`] | LLM adapter (C3) |
//! | [`json_repair`] | Tolerant JSON parsing with repair |
//! | [`engine_semantic`] | Semantic similarity engine (C4, E-SEM) |
//! | [`engine_contradiction`] | Contradiction engine (C5, E-CON) |
//! | [`engine_bridge`] | Thematic-bridge engine (C6, E-BRI) |
//! | [`orchestrator`] | Orchestrator (C7) |
//! | [`job`] | Job handler (C8) |
//! | [`worker`] | Polling worker loop |
//!
//! ## Configuration
//!
//! The connection engine is configured via a TOML file (default:
//! `config/conn-engine.toml`). See [`config`] for all available options and
//! [`config::load_config`] for validation rules.

pub mod ann;
pub mod config;
pub mod db;
pub mod engine_bridge;
pub mod engine_contradiction;
pub mod engine_semantic;
pub mod job;
pub mod json_repair;
pub mod llm;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod worker;
