//! Update orchestrator
//!
//! Isolation layers, innermost first:
//!
//! - a record-scoped error rolls back that record's transaction, is logged
//!   with the candidate payload and the run moves to the next candidate;
//! - a provider-scoped error ends the provider's run, keeping everything it
//!   already committed, and the run moves to the next provider;
//! - `Interrupted` is never caught.
//!
//! Checkpoints advance per (type, filter) once a type's batch is handled,
//! to the latest committed timestamp that is earlier than every failed or
//! unprocessed candidate of the same group.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::candidate::Candidate;
use crate::error::{ErrorScope, SyncResult};
use crate::identity::{self, Resolved};
use crate::models::{Item, RecordType};
use crate::provider::{FetchContext, HookContext, Provider, ProviderRegistry};
use crate::storage::{ItemProjection, Records, Timeline};
use crate::store::Store;
use crate::sync::report::{ProviderReport, ProviderState, RunReport};
use crate::sync::Shutdown;

/// Drives registered providers through update runs
pub struct Orchestrator {
    store: Store,
    registry: ProviderRegistry,
    shutdown: Shutdown,
}

impl Orchestrator {
    pub fn new(store: Store, registry: ProviderRegistry) -> Self {
        Self {
            store,
            registry,
            shutdown: Shutdown::new(),
        }
    }

    /// Use a flag shared with a signal handler
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn into_store(self) -> Store {
        self.store
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Run the selected providers, all registered ones when empty
    ///
    /// Only `Interrupted` is returned as an error; every other failure is
    /// contained and reported.
    pub fn run(&mut self, selection: &[String]) -> SyncResult<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let names = self.select(selection);
        info!(%run_id, providers = names.len(), "Starting update run");

        let Self {
            store,
            registry,
            shutdown,
        } = self;

        let mut providers = Vec::with_capacity(names.len());
        for name in names {
            shutdown.check()?;
            let Some(provider) = registry.get(&name) else {
                continue;
            };
            providers.push(run_provider(store, provider, shutdown)?);
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            providers,
        };
        info!(
            run_id = %report.run_id,
            created = report.created(),
            updated = report.updated(),
            failed = report.failed_records(),
            "Update run finished"
        );
        Ok(report)
    }

    /// Checkpoint of a provider and type, the epoch when never synced
    pub fn last_updated(
        &self,
        provider: &str,
        record_type: RecordType,
        filter: Option<&str>,
    ) -> SyncResult<DateTime<Utc>> {
        Ok(self
            .store
            .checkpoints()
            .last_updated(provider, record_type, filter)?)
    }

    /// The item a candidate would be saved onto, if any
    pub fn find(
        &self,
        provider: &str,
        record_type: RecordType,
        candidate: &Candidate,
    ) -> SyncResult<Option<Item>> {
        let source_id = self
            .registry
            .get(provider)
            .and_then(|p| p.source_id(record_type, candidate));
        identity::find_item(
            self.store.connection(),
            provider,
            record_type,
            candidate,
            source_id,
        )
    }

    fn select(&self, selection: &[String]) -> Vec<String> {
        if selection.is_empty() {
            return self.registry.names();
        }

        let mut names: Vec<String> = Vec::with_capacity(selection.len());
        for name in selection {
            if self.registry.get(name).is_none() {
                warn!(provider = %name, "Unknown provider, skipping");
            } else if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

/// One provider's full cycle, contained at the provider boundary
fn run_provider(
    store: &mut Store,
    provider: &dyn Provider,
    shutdown: &Shutdown,
) -> SyncResult<ProviderReport> {
    let name = provider.name();
    let mut report = ProviderReport::new(name);

    if !provider.enabled() {
        debug!(provider = name, "Provider disabled, skipping");
        return Ok(report);
    }

    info!(provider = name, "Updating provider");
    match update_and_handle(store, provider, shutdown, &mut report) {
        Ok(()) => {
            report.state = ProviderState::Done;
            info!(
                provider = name,
                fetched = report.fetched,
                created = report.created,
                updated = report.updated,
                failed = report.failed,
                "Provider finished"
            );
        }
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            error!(provider = name, state = %report.state, error = %e, "Provider failed");
            report.fail(e);
        }
    }
    Ok(report)
}

fn update_and_handle(
    store: &mut Store,
    provider: &dyn Provider,
    shutdown: &Shutdown,
    report: &mut ProviderReport,
) -> SyncResult<()> {
    let name = provider.name();

    // Phase 1: fetch and normalize every type, nothing is written
    let mut batches: Vec<(RecordType, Vec<Candidate>)> = Vec::new();
    for registration in provider.ordered_registrations() {
        shutdown.check()?;
        let record_type = registration.record_type;
        let checkpoint = store.checkpoints().get(name, record_type, None)?;

        report.state = ProviderState::Fetching;
        debug!(provider = name, %record_type, since = %checkpoint.timestamp, "Fetching");
        let payload = {
            let ctx = FetchContext::new(store.connection(), &checkpoint, shutdown);
            provider.fetch(record_type, &ctx)?
        };

        report.state = ProviderState::Normalizing;
        let candidates = provider.normalize(record_type, payload, &checkpoint)?;
        debug!(provider = name, %record_type, candidates = candidates.len(), "Normalized");
        report.fetched += candidates.len();
        batches.push((record_type, candidates));
    }

    // Phase 2: persist each record in its own transaction
    for (record_type, candidates) in batches {
        let mut progress = CheckpointProgress::default();
        let result = handle_batch(
            store,
            provider,
            shutdown,
            record_type,
            &candidates,
            report,
            &mut progress,
        );
        for (filter, timestamp) in progress.advances() {
            let checkpoint =
                store
                    .checkpoints()
                    .advance(name, record_type, filter.as_deref(), timestamp)?;
            debug!(
                provider = name,
                %record_type,
                filter = filter.as_deref().unwrap_or(""),
                checkpoint = %checkpoint.timestamp,
                "Advanced checkpoint"
            );
        }
        result?;
    }

    Ok(())
}

fn handle_batch(
    store: &mut Store,
    provider: &dyn Provider,
    shutdown: &Shutdown,
    record_type: RecordType,
    candidates: &[Candidate],
    report: &mut ProviderReport,
    progress: &mut CheckpointProgress,
) -> SyncResult<()> {
    for (index, candidate) in candidates.iter().enumerate() {
        let outcome = shutdown
            .check()
            .and_then(|()| persist(store, provider, shutdown, record_type, candidate, report));

        match outcome {
            Ok(resolved) => {
                if resolved.created {
                    report.created += 1;
                } else {
                    report.updated += 1;
                }
                progress.committed(candidate);
            }
            Err(e) if e.scope() == ErrorScope::Record => {
                error!(
                    provider = provider.name(),
                    %record_type,
                    payload = %candidate.payload(),
                    error = %e,
                    "Failed to process record"
                );
                report.failed += 1;
                progress.held_back(candidate);
            }
            Err(e) => {
                for pending in &candidates[index..] {
                    progress.held_back(pending);
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Upsert, hook and projection for one candidate, committed together
fn persist(
    store: &mut Store,
    provider: &dyn Provider,
    shutdown: &Shutdown,
    record_type: RecordType,
    candidate: &Candidate,
    report: &mut ProviderReport,
) -> SyncResult<Resolved> {
    let name = provider.name();
    let followed = store.follows(record_type);
    let following = store.following().clone();
    let source_id = provider.source_id(record_type, candidate);

    report.state = ProviderState::Persisting;
    let tx = store.transaction()?;
    let mut resolved = identity::upsert(&tx, name, record_type, followed, candidate, source_id)?;

    let stored = resolved.record.clone();
    {
        let ctx = HookContext::new(&tx, name, &following, shutdown);
        provider.post_persist(&ctx, &mut resolved.record, candidate, resolved.created)?;
    }
    if resolved.record != stored {
        Records::new(&tx).write(&resolved.reference, &resolved.record)?;
    }

    if followed {
        report.state = ProviderState::Projecting;
        Timeline::new(&tx).project(
            &resolved.reference,
            &resolved.record,
            &ItemProjection {
                timestamp: candidate.timestamp,
                tags: &candidate.tags,
                url: candidate.url.as_deref(),
                source: name,
                source_id: &resolved.source_id,
            },
        )?;
    }

    tx.commit()?;
    Ok(resolved)
}

/// Committed and held-back timestamps per checkpoint filter
#[derive(Debug, Default)]
struct CheckpointProgress {
    groups: HashMap<Option<String>, Group>,
}

#[derive(Debug, Default)]
struct Group {
    committed: Vec<DateTime<Utc>>,
    /// Earliest candidate that failed or was never processed
    bound: Option<DateTime<Utc>>,
}

impl CheckpointProgress {
    fn committed(&mut self, candidate: &Candidate) {
        let group = self.groups.entry(candidate.filter.clone()).or_default();
        if let Some(timestamp) = candidate.timestamp {
            group.committed.push(timestamp);
        }
    }

    fn held_back(&mut self, candidate: &Candidate) {
        let group = self.groups.entry(candidate.filter.clone()).or_default();
        if let Some(timestamp) = candidate.timestamp {
            group.bound = Some(group.bound.map_or(timestamp, |b| b.min(timestamp)));
        }
    }

    /// Timestamp each filter may advance to
    fn advances(&self) -> Vec<(Option<String>, DateTime<Utc>)> {
        let mut advances: Vec<_> = self
            .groups
            .iter()
            .filter_map(|(filter, group)| {
                group
                    .committed
                    .iter()
                    .filter(|t| group.bound.map_or(true, |bound| **t < bound))
                    .max()
                    .map(|t| (filter.clone(), *t))
            })
            .collect();
        advances.sort();
        advances
    }
}
