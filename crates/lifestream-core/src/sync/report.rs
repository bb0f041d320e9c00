//! Run reports

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where a provider stands in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderState {
    /// Gate failed; nothing was attempted
    Disabled,
    Fetching,
    Normalizing,
    Persisting,
    Projecting,
    Done,
    Failed,
}

impl ProviderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderState::Disabled => "disabled",
            ProviderState::Fetching => "fetching",
            ProviderState::Normalizing => "normalizing",
            ProviderState::Persisting => "persisting",
            ProviderState::Projecting => "projecting",
            ProviderState::Done => "done",
            ProviderState::Failed => "failed",
        }
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of one provider in a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderReport {
    pub provider: String,
    pub state: ProviderState,
    /// Candidates produced by normalization
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    /// Records skipped after a record-level failure
    pub failed: usize,
    /// Error that aborted the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// State the provider was in when it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_during: Option<ProviderState>,
}

impl ProviderReport {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            state: ProviderState::Disabled,
            fetched: 0,
            created: 0,
            updated: 0,
            failed: 0,
            error: None,
            failed_during: None,
        }
    }

    pub(crate) fn fail(&mut self, error: impl ToString) {
        self.failed_during = Some(self.state);
        self.state = ProviderState::Failed;
        self.error = Some(error.to_string());
    }

    /// Records committed, created or updated
    pub fn processed(&self) -> usize {
        self.created + self.updated
    }

    pub fn succeeded(&self) -> bool {
        self.state == ProviderState::Done
    }
}

/// Outcome of one update run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub providers: Vec<ProviderReport>,
}

impl RunReport {
    pub fn provider(&self, name: &str) -> Option<&ProviderReport> {
        self.providers.iter().find(|p| p.provider == name)
    }

    pub fn created(&self) -> usize {
        self.providers.iter().map(|p| p.created).sum()
    }

    pub fn updated(&self) -> usize {
        self.providers.iter().map(|p| p.updated).sum()
    }

    pub fn failed_records(&self) -> usize {
        self.providers.iter().map(|p| p.failed).sum()
    }

    /// Providers that were aborted
    pub fn failed_providers(&self) -> impl Iterator<Item = &ProviderReport> {
        self.providers
            .iter()
            .filter(|p| p.state == ProviderState::Failed)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_remembers_state() {
        let mut report = ProviderReport::new("flickr");
        report.state = ProviderState::Persisting;
        report.fail("HTTP 503");

        assert_eq!(report.state, ProviderState::Failed);
        assert_eq!(report.failed_during, Some(ProviderState::Persisting));
        assert_eq!(report.error.as_deref(), Some("HTTP 503"));
        assert!(!report.succeeded());
    }

    #[test]
    fn test_totals_and_json() {
        let mut lastfm = ProviderReport::new("lastfm");
        lastfm.state = ProviderState::Done;
        lastfm.created = 3;
        lastfm.updated = 1;
        let mut twitter = ProviderReport::new("twitter");
        twitter.fail("timed out");
        twitter.failed = 2;

        let now = Utc::now();
        let report = RunReport {
            run_id: "run".into(),
            started_at: now,
            finished_at: now,
            providers: vec![lastfm, twitter],
        };

        assert_eq!(report.created(), 3);
        assert_eq!(report.failed_records(), 2);
        assert_eq!(report.failed_providers().count(), 1);
        assert_eq!(report.provider("lastfm").map(|p| p.processed()), Some(4));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["providers"][0]["state"], "done");
        assert_eq!(json["providers"][1]["failed_during"], "disabled");
        assert!(json["providers"][0].get("error").is_none());
    }
}
