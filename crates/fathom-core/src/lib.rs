//! # fathom-core
//!
//! Core indexing and hybrid retrieval engine for Fathom, a local-first
//! semantic file index.
//!
//! This crate turns a set of user-nominated directory roots into isolated,
//! searchable indices ("containers"). It is designed as a library with clear
//! module boundaries so that each subsystem can be developed, tested, and
//! debugged independently.
//!
//! ## Architecture
//!
//! The engine is split into decoupled subsystems:
//!
//! - **`config`** -- Configuration loading and validation
//! - **`extract`** -- Per-file text extraction (source, PDF, OCR, EXIF, git log)
//! - **`chunker`** -- Language-aware splitting of extracted bodies into fragments
//! - **`provider`** -- Embedding providers (local ONNX inference or remote HTTP)
//! - **`reranker`** -- Optional cross-encoder reranking
//! - **`store`** -- SQLite persistence: fragment rows, vectors, FTS5 full-text index
//! - **`container`** -- Lifecycle of isolated indices and their bound provider identity
//! - **`indexer`** -- Orchestrates walk -> extract -> chunk -> embed -> write
//! - **`watcher`** -- File system watcher with debouncing and busy backoff
//! - **`search`** -- Hybrid retrieval (RRF fusion, annotation overlay, reranking)
//! - **`engine`** -- The command surface consumed by the CLI and MCP adapters
//!
//! Each module exposes a public trait or struct that the engine wires together.
//! Modules communicate via well-defined types in the `types` module.

// Workspace lints are inherited from Cargo.toml

pub mod config;
pub mod error;
pub mod types;

// Core subsystems
pub mod extract;
pub mod chunker;
pub mod provider;
pub mod reranker;
pub mod store;
pub mod container;
pub mod indexer;
pub mod watcher;
pub mod search;
pub mod engine;

/// Re-export the primary engine interface.
pub use engine::Engine;
pub use config::Config;
pub use error::FathomError;
