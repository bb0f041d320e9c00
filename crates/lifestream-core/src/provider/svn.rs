//! Commits from Subversion repositories
//!
//! Mirrors the git provider: one `svn log --xml` per repository under a
//! checkpoint filtered by repository name, keeping only revisions by the
//! configured user.

use std::process::Command;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::candidate::Candidate;
use crate::config::{Config, RepositoryConfig, SvnConfig};
use crate::error::{SyncError, SyncResult};
use crate::models::{Checkpoint, RecordType};
use crate::provider::xml::XmlElement;
use crate::provider::{unsupported, Batch, FetchContext, Provider, RawPayload, Registration};

const NAME: &str = "svn";

/// One revision as reported by `svn log --xml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub revision: String,
    pub author: String,
    pub committed: DateTime<Utc>,
    pub message: String,
}

pub struct SvnProvider {
    config: SvnConfig,
}

impl SvnProvider {
    pub fn new(config: SvnConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.svn.clone().unwrap_or_default())
    }

    fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.config.repositories.iter().find(|r| r.name == name)
    }

    fn is_author(&self, author: &str) -> bool {
        self.config.username.as_deref() == Some(author.trim())
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

impl Provider for SvnProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.config.username.as_deref().is_some_and(|u| !u.is_empty())
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
                "Reading revisions"
            );
            let log = svn_log(&target(repository), &checkpoint)?;
            let document = XmlElement::parse(&log).map_err(|e| {
                SyncError::fetch(NAME, format!("invalid log for {}: {}", repository.name, e))
            })?;
            batches.push(Batch {
                filter: repository.name.clone(),
                checkpoint,
                payload: RawPayload::Xml(document),
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
            let RawPayload::Xml(document) = batch.payload else {
                return Err(unsupported(NAME, record_type));
            };

            for entry in parse_log(&document) {
                if self.is_author(&entry.author) && batch.checkpoint.admits(entry.committed) {
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

/// Remote URL when configured, else the working copy
fn target(repository: &RepositoryConfig) -> String {
    repository
        .url
        .clone()
        .unwrap_or_else(|| repository.path.display().to_string())
}

/// Run `svn log --xml`, limited to revisions since the checkpoint
fn svn_log(target: &str, checkpoint: &Checkpoint) -> SyncResult<String> {
    let mut cmd = Command::new("svn");
    cmd.args(["log", "--xml", "--non-interactive"]);
    if !checkpoint.is_epoch() {
        let since = checkpoint
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        cmd.arg(format!("--revision={{{}}}:HEAD", since));
    }
    cmd.arg(target);

    let output = cmd.output().map_err(|e| {
        SyncError::fetch(NAME, format!("failed to execute 'svn log' for {}: {}", target, e))
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SyncError::fetch(
            NAME,
            format!("svn log failed for {}: {}", target, stderr.trim()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Log entries of an `svn log --xml` document, oldest first
pub fn parse_log(document: &XmlElement) -> Vec<LogEntry> {
    let mut entries: Vec<LogEntry> = document
        .children_named("logentry")
        .filter_map(|entry| {
            let revision = entry.attr("revision")?;
            let committed = DateTime::parse_from_rfc3339(entry.child_text("date")?.trim())
                .ok()?
                .with_timezone(&Utc);
            Some(LogEntry {
                revision: revision.to_string(),
                author: entry.child_text("author").unwrap_or_default().to_string(),
                committed,
                message: entry.child_text("msg").unwrap_or_default().trim().to_string(),
            })
        })
        .collect();
    entries.sort_by_key(|e| e.committed);
    entries
}
