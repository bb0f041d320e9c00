//! Lifestream Core Library
//!
//! This crate provides the core functionality for Lifestream, a personal
//! activity aggregator. Records fetched from many external providers
//! (bookmarks, photos, tracks, commits, messages, videos, searches) are
//! stored as typed domain records and projected into one time-ordered
//! timeline.
//!
//! # Architecture
//!
//! - **Records**: typed domain records, stored as JSON bodies in SQLite
//! - **Timeline**: one item per followed record, ordered by timestamp
//! - **Checkpoints**: last-synced timestamp per provider and record type
//! - **Providers**: pluggable fetch + normalize units registered by id
//! - **Orchestrator**: two-phase update run with per-record transactions
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = Store::open(&config)?;
//! let shutdown = Shutdown::new();
//! let registry = ProviderRegistry::from_config(&config, &shutdown)?;
//!
//! let mut orchestrator = Orchestrator::new(store, registry).with_shutdown(shutdown);
//! let report = orchestrator.run(&[])?;
//! ```
//!
//! # Modules
//!
//! - `store`: Unified storage interface (main entry point)
//! - `models`: Record types, domain records, timeline items, checkpoints
//! - `candidate`: Normalized provider output awaiting persistence
//! - `identity`: Intrinsic-key and source-id upsert
//! - `provider`: Provider contract, registry and built-in providers
//! - `sync`: Update orchestrator and run reports
//! - `storage`: SQLite schema and table-level stores
//! - `config`: Application configuration

pub mod candidate;
pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod provider;
pub mod storage;
pub mod store;
pub mod sync;

pub use candidate::Candidate;
pub use config::Config;
pub use error::{ErrorScope, SyncError, SyncResult};
pub use identity::Resolved;
pub use models::{Checkpoint, DomainRecord, Item, RecordRef, RecordType};
pub use provider::{Provider, ProviderRegistry};
pub use storage::{StorageError, StorageResult};
pub use store::Store;
pub use sync::{Orchestrator, ProviderReport, ProviderState, RunReport, Shutdown};
