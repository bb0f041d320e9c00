//! Update pipeline
//!
//! Runs providers through the two-phase update:
//!
//! 1. **Update**: for each enabled provider, fetch and normalize every
//!    registered type in priority order. Nothing is written.
//! 2. **Handle**: for each type in the same order, persist every candidate
//!    in its own transaction (upsert, post-persist hook, timeline
//!    projection), then advance the type's checkpoints.
//!
//! ## Usage
//!
//! ```ignore
//! let shutdown = Shutdown::new();
//! let registry = ProviderRegistry::from_config(&config, &shutdown)?;
//! let mut orchestrator = Orchestrator::new(store, registry).with_shutdown(shutdown);
//! let report = orchestrator.run(&[])?;
//! ```

mod orchestrator;
mod report;
mod shutdown;

pub use orchestrator::Orchestrator;
pub use report::{ProviderReport, ProviderState, RunReport};
pub use shutdown::Shutdown;
