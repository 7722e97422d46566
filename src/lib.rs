//! # Silo Engine
//!
//! **A local, multi-silo document-indexing and hybrid-search engine.**
//!
//! Each **silo** is an isolated collection of watched directories whose
//! textual contents are parsed, chunked, embedded into dense vectors, and
//! persisted in a dedicated SQLite database alongside multiple inverted
//! indices. Queries fuse five retrieval signals (semantic vector
//! similarity, BM25, substring trigrams, filepath matching, tag/metadata
//! matching) via Reciprocal Rank Fusion and return a ranked list of files
//! with per-chunk evidence.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌──────────┐
//! │ Watcher   │──▶│  Chunker   │──▶│ Embedding │──▶│  SQLite   │
//! │ Reconciler│   │ Extractors │   │  service  │   │ FTS5+Vec  │
//! └──────────┘   └────────────┘   └───────────┘   └────┬─────┘
//!                                                      │
//!                          ┌───────────────────────────┤
//!                          ▼                           ▼
//!                     ┌──────────┐               ┌──────────┐
//!                     │   CLI    │               │ HTTP/MCP │
//!                     │(siloctl) │               │  server  │
//!                     └──────────┘               └──────────┘
//! ```
//!
//! ## Data flow
//!
//! Files on disk → the reconciler (startup catch-up) or watcher (live
//! changes) detect a change → the chunker extracts and splits the file →
//! the embedding service embeds every chunk in one batch → the storage
//! layer flushes the prepared file in one transaction. Queries arrive at
//! the HTTP/MCP server → the embedding service embeds the query → the
//! query engine issues five sub-queries per silo → results are fused by
//! RRF, calibrated across silos, and returned.
//!
//! ## Control flow
//!
//! The silo manager owns a process-wide indexing token; the reconciler
//! and every silo's watcher both contend for it, so at most one silo
//! indexes at a time. Progress and per-file outcomes are reported through
//! a bounded activity feed any client can subscribe to or poll.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `StoredKey`, `Chunk`, `SearchResult`, `ActivityEvent` |
//! | [`error`] | Typed error enums per subsystem |
//! | [`chunk`] | Extractor/chunker traits and the markdown/code/plaintext processors |
//! | [`embedding`] | Embedding provider trait, bundled/HTTP implementations, vector utilities |
//! | [`db`] | Per-silo SQLite connection management (WAL) |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`storage`] | Upsert protocol, batched flush, per-signal query helpers |
//! | [`search`] | Five-signal RRF fusion, heading-depth boost, cross-silo calibration |
//! | [`reconciler`] | Disk/database diff and batched catch-up indexing |
//! | [`watcher`] | Debounced filesystem events and the per-silo drain queue |
//! | [`silo_manager`] | Silo lifecycle, the global indexing token, the activity feed |
//! | [`server`] | HTTP JSON API (Axum) |
//! | [`mcp`] | MCP tool bridge exposing search/status to external agents |
//!
//! ## Configuration
//!
//! The engine is configured via a TOML file (default:
//! `~/.local/share/silo-engine/config.toml` or platform equivalent). See
//! [`config`] for all available options and [`config::load_config`] for
//! validation rules.
//!
//! ## Non-goals
//!
//! Distributed operation, cross-silo deduplication, incremental
//! re-embedding on model change (a full rebuild is required), exact-match
//! tokenization equivalence across embedding model families, and user
//! authentication are all out of scope.

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod reconciler;
pub mod search;
pub mod server;
pub mod silo_manager;
pub mod storage;
pub mod watcher;
