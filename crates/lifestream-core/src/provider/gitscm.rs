//! Commits from local git clones
//!
//! Each configured repository is read with `git log` under its own
//! checkpoint, filtered by repository name, so adding a repository later
//! backfills it without refetching the others. Only commits authored with
//! the configured email are kept.

use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::candidate::Candidate;
use crate::config::{Config, GitscmConfig, RepositoryConfig};
use crate::error::{SyncError, SyncResult};
use crate::models::{Checkpoint, RecordType};
use crate::provider::{unsupported, Batch, FetchContext, Provider, RawPayload, Registration};

const NAME: &str = "gitscm";
const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';
const LOG_FORMAT: &str = "--format=%H%x1f%ae%x1f%ct%x1f%B%x1e";

/// One commit as reported by `git log`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub revision: String,
    pub author_email: String,
    pub committed: DateTime<Utc>,
    pub message: String,
}

pub struct GitScmProvider {
    config: GitscmConfig,
}

impl GitScmProvider {
    pub fn new(config: GitscmConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.gitscm.clone().unwrap_or_default())
    }

    fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.config.repositories.iter().find(|r| r.name == name)
    }

    fn is_author(&self, email: &str) -> bool {
        self.config
            .author_email
            .as_deref()
            .is_some_and(|author| author.eq_ignore_ascii_case(email.trim()))
    }

    fn commit_candidate(&self, repository: &RepositoryConfig, entry: LogEntry) -> Candidate {
        let mut candidate = Candidate::new()
            .field("repository", repository.name.as_str())
            .field("revision", entry.revision)
            .field("message", entry.message)
            .at(entry.committed)
            .with_filter(repository.name.as_str());
        if let Some(template) = &repository.changeset_template {
            candidate = candidate.field("changeset_template", template.as_str());
        }
        candidate
    }
}

impl Provider for GitScmProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.config
            .author_email
            .as_deref()
            .is_some_and(|e| !e.is_empty())
            && !self.config.repositories.is_empty()
    }

    fn registrations(&self) -> Vec<Registration> {
        vec![Registration::new(RecordType::Commit, 0)]
    }

    fn fetch(&self, record_type: RecordType, ctx: &FetchContext<'_>) -> SyncResult<RawPayload> {
        if record_type != RecordType::Commit {
            return Err(unsupported(NAME, record_type));
        }

        let mut batches = Vec::with_capacity(self.config.repositories.len());
        for repository in &self.config.repositories {
            ctx.check_shutdown()?;
            let checkpoint = ctx.checkpoint_for(&repository.name)?;
            debug!(
                repository = %repository.name,
                since = %checkpoint.timestamp,
                "Reading commits"
            );
            let log = git_log(&repository.path, &checkpoint)?;
            batches.push(Batch {
                filter: repository.name.clone(),
                checkpoint,
                payload: RawPayload::Text(log),
            });
        }
        Ok(RawPayload::Batches(batches))
    }

    fn normalize(
        &self,
        record_type: RecordType,
        payload: RawPayload,
        _checkpoint: &Checkpoint,
    ) -> SyncResult<Vec<Candidate>> {
        let batches = match (record_type, payload) {
            (_, RawPayload::Empty) => return Ok(Vec::new()),
            (RecordType::Commit, RawPayload::Batches(batches)) => batches,
            _ => return Err(unsupported(NAME, record_type)),
        };

        let mut candidates = Vec::new();
        for batch in batches {
            let Some(repository) = self.repository(&batch.filter) else {
                continue;
            };
            let RawPayload::Text(log) = batch.payload else {
                return Err(unsupported(NAME, record_type));
            };

            // git lists newest first
            let mut entries = parse_log(&log);
            entries.reverse();
            for entry in entries {
                if self.is_author(&entry.author_email) && batch.checkpoint.admits(entry.committed) {
                    candidates.push(self.commit_candidate(repository, entry));
                }
            }
        }
        Ok(candidates)
    }

    fn source_id(&self, _record_type: RecordType, candidate: &Candidate) -> Option<String> {
        Some(format!(
            "{}:r{}",
            candidate.get_str("repository")?,
            candidate.get_str("revision")?
        ))
    }
}

/// Run `git log` in a clone, limited to commits since the checkpoint
fn git_log(path: &Path, checkpoint: &Checkpoint) -> SyncResult<String> {
    let mut cmd = Command::new("git");
    cmd.args(["log", "--no-color", LOG_FORMAT]);
    // git rejects the epoch itself as a --since date
    if !checkpoint.is_epoch() {
        cmd.arg(format!("--since={}", checkpoint.timestamp.to_rfc3339()));
    }

    let output = cmd.current_dir(path).output().map_err(|e| {
        SyncError::fetch(
            NAME,
            format!("failed to execute 'git log' in {}: {}", path.display(), e),
        )
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SyncError::fetch(
            NAME,
            format!("git log failed in {}: {}", path.display(), stderr.trim()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse the output of `git log` run with the provider's format
pub fn parse_log(log: &str) -> Vec<LogEntry> {
    log.split(RECORD_SEP)
        .filter_map(|record| {
            let mut fields = record.trim_start_matches('\n').splitn(4, FIELD_SEP);
            let revision = fields.next()?.trim();
            let author_email = fields.next()?.trim();
            let committed = fields.next()?.trim().parse::<i64>().ok()?;
            let message = fields.next().unwrap_or_default().trim();
            if revision.is_empty() {
                return None;
            }

            Some(LogEntry {
                revision: revision.to_string(),
                author_email: author_email.to_string(),
                committed: DateTime::from_timestamp(committed, 0)?,
                message: message.to_string(),
            })
        })
        .collect()
}
