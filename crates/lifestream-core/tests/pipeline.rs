//! End-to-end update runs against in-process providers

use chrono::{DateTime, TimeZone, Utc};

use lifestream_core::models::{epoch, Photo};
use lifestream_core::provider::{
    source_digest, FetchContext, HookContext, Provider, RawPayload, Registration,
};
use lifestream_core::storage::FeedQuery;
use lifestream_core::{
    Candidate, Checkpoint, DomainRecord, Orchestrator, ProviderRegistry, ProviderState,
    RecordType, Shutdown, Store, SyncError, SyncResult,
};

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
}

/// A provider replaying a fixed list of candidates
///
/// A candidate carrying a `fault` field makes the post-persist hook fail:
/// `record` with a processing error, `fetch` with a fetch error and
/// `interrupt` by tripping the shutdown flag after the record is saved.
struct Scripted {
    name: &'static str,
    record_type: RecordType,
    candidates: Vec<Candidate>,
    enabled: bool,
    /// Replay everything, ignoring the checkpoint
    replay_all: bool,
    fail_fetch: bool,
    shutdown: Shutdown,
}

impl Scripted {
    fn new(name: &'static str, record_type: RecordType, candidates: Vec<Candidate>) -> Self {
        Self {
            name,
            record_type,
            candidates,
            enabled: true,
            replay_all: false,
            fail_fetch: false,
            shutdown: Shutdown::new(),
        }
    }
}

impl Provider for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn registrations(&self) -> Vec<Registration> {
        vec![Registration::new(self.record_type, 0)]
    }

    fn fetch(&self, _record_type: RecordType, ctx: &FetchContext<'_>) -> SyncResult<RawPayload> {
        ctx.check_shutdown()?;
        if self.fail_fetch {
            return Err(SyncError::fetch(self.name, "connection refused"));
        }
        Ok(RawPayload::Empty)
    }

    fn normalize(
        &self,
        _record_type: RecordType,
        _payload: RawPayload,
        checkpoint: &Checkpoint,
    ) -> SyncResult<Vec<Candidate>> {
        Ok(self
            .candidates
            .iter()
            .filter(|c| self.replay_all || c.timestamp.map_or(true, |t| checkpoint.admits(t)))
            .cloned()
            .collect())
    }

    fn source_id(&self, record_type: RecordType, candidate: &Candidate) -> Option<String> {
        let timestamp = candidate.timestamp?.timestamp().to_string();
        match record_type {
            RecordType::Message => Some(source_digest(&[
                candidate.get_str("message")?,
                candidate.url.as_deref().unwrap_or_default(),
                &timestamp,
            ])),
            RecordType::Track => Some(source_digest(&[
                candidate.get_str("artist_name")?,
                candidate.get_str("track_name")?,
                &timestamp,
            ])),
            RecordType::Commit => Some(format!(
                "{}:r{}",
                candidate.get_str("repository")?,
                candidate.get_str("revision")?
            )),
            _ => None,
        }
    }

    fn post_persist(
        &self,
        _ctx: &HookContext<'_>,
        record: &mut DomainRecord,
        candidate: &Candidate,
        created: bool,
    ) -> SyncResult<()> {
        match candidate.get_str("fault") {
            Some("record") => return Err(SyncError::processing(self.record_type, "bad data")),
            Some("fetch") => return Err(SyncError::fetch(self.name, "auxiliary fetch failed")),
            Some("interrupt") => self.shutdown.trigger(),
            _ => {}
        }
        if let (DomainRecord::Photo(photo), true) = (record, created) {
            photo.exif.insert("Model".into(), "Test camera".into());
        }
        Ok(())
    }
}

fn photo(id: &str, hour: u32) -> Candidate {
    Candidate::new()
        .field("photo_id", id)
        .field("title", format!("Photo {id}"))
        .field("taken_by", "someone")
        .at(at(hour))
        .with_tags(["holiday"])
}

fn track(n: u32, hour: u32) -> Candidate {
    Candidate::new()
        .field("artist_name", "Boards of Canada")
        .field("track_name", format!("Track {n}"))
        .field("url", format!("https://www.last.fm/music/boc/track-{n}"))
        .at(at(hour))
}

fn message(text: &str, hour: u32) -> Candidate {
    Candidate::new()
        .field("message", text)
        .at(at(hour))
        .with_url("https://twitter.com/someone/statuses/1")
}

fn orchestrator(providers: Vec<Scripted>) -> Orchestrator {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(Box::new(provider)).unwrap();
    }
    Orchestrator::new(Store::open_in_memory().unwrap(), registry)
}

fn item_count(orchestrator: &Orchestrator, record_type: RecordType) -> i64 {
    orchestrator
        .store()
        .timeline()
        .count(Some(record_type))
        .unwrap()
}

#[test]
fn test_photos_feed_newest_first() {
    let mut orchestrator = orchestrator(vec![Scripted::new(
        "photos",
        RecordType::Photo,
        vec![photo("P1", 1), photo("P2", 2)],
    )]);

    let report = orchestrator.run(&[]).unwrap();
    assert_eq!(report.created(), 2);
    assert_eq!(item_count(&orchestrator, RecordType::Photo), 2);

    let feed = orchestrator
        .store()
        .timeline()
        .feed(&FeedQuery::of_type(RecordType::Photo))
        .unwrap();
    let ids: Vec<_> = feed.iter().map(|i| i.record.record_id.as_str()).collect();
    assert_eq!(ids, vec!["P2", "P1"]);
    assert_eq!(feed[0].tags, vec!["holiday"]);
    assert_eq!(feed[0].source, "photos");
    assert_eq!(feed[0].timestamp, at(2));
}

#[test]
fn test_rerun_with_identical_data_is_idempotent() {
    let mut provider = Scripted::new(
        "photos",
        RecordType::Photo,
        vec![photo("P1", 1), photo("P2", 2)],
    );
    provider.replay_all = true;
    let mut orchestrator = orchestrator(vec![provider]);

    orchestrator.run(&[]).unwrap();
    let second = orchestrator.run(&[]).unwrap();

    let photos = second.provider("photos").unwrap();
    assert_eq!(photos.created, 0);
    assert_eq!(photos.updated, 2);
    assert_eq!(item_count(&orchestrator, RecordType::Photo), 2);
    assert_eq!(
        orchestrator
            .store()
            .records()
            .count(Some(RecordType::Photo))
            .unwrap(),
        2
    );
}

#[test]
fn test_identical_messages_share_one_record() {
    let mut orchestrator = orchestrator(vec![Scripted::new(
        "messages",
        RecordType::Message,
        vec![message("hello world", 3), message("hello world", 3)],
    )]);

    let report = orchestrator.run(&[]).unwrap();
    let messages = report.provider("messages").unwrap();
    assert_eq!(messages.created, 1);
    assert_eq!(messages.updated, 1);
    assert_eq!(item_count(&orchestrator, RecordType::Message), 1);
    assert_eq!(
        orchestrator
            .store()
            .records()
            .count(Some(RecordType::Message))
            .unwrap(),
        1
    );
}

#[test]
fn test_provider_failure_keeps_commits_and_continues() {
    let tracks = (1..=5)
        .map(|n| {
            let candidate = track(n, n);
            if n == 4 {
                candidate.field("fault", "fetch")
            } else {
                candidate
            }
        })
        .collect();
    let mut orchestrator = orchestrator(vec![
        Scripted::new("scrobbles", RecordType::Track, tracks),
        Scripted::new(
            "messages",
            RecordType::Message,
            vec![message("still running", 9)],
        ),
    ]);

    let report = orchestrator.run(&[]).unwrap();

    let scrobbles = report.provider("scrobbles").unwrap();
    assert_eq!(scrobbles.state, ProviderState::Failed);
    assert_eq!(scrobbles.failed_during, Some(ProviderState::Persisting));
    assert_eq!(scrobbles.created, 3);
    assert!(scrobbles
        .error
        .as_deref()
        .is_some_and(|e| e.contains("auxiliary fetch failed")));
    assert_eq!(item_count(&orchestrator, RecordType::Track), 3);
    assert_eq!(
        orchestrator
            .last_updated("scrobbles", RecordType::Track, None)
            .unwrap(),
        at(3)
    );

    let messages = report.provider("messages").unwrap();
    assert_eq!(messages.state, ProviderState::Done);
    assert_eq!(item_count(&orchestrator, RecordType::Message), 1);
}

#[test]
fn test_fetch_failure_commits_nothing() {
    let mut provider = Scripted::new("photos", RecordType::Photo, vec![photo("P1", 1)]);
    provider.fail_fetch = true;
    let mut orchestrator = orchestrator(vec![provider]);

    let report = orchestrator.run(&[]).unwrap();
    let photos = report.provider("photos").unwrap();
    assert_eq!(photos.state, ProviderState::Failed);
    assert_eq!(photos.failed_during, Some(ProviderState::Fetching));
    assert_eq!(item_count(&orchestrator, RecordType::Photo), 0);
    assert_eq!(
        orchestrator
            .last_updated("photos", RecordType::Photo, None)
            .unwrap(),
        epoch()
    );
}

#[test]
fn test_checkpoint_advances_and_bounds_next_run() {
    let mut orchestrator = orchestrator(vec![Scripted::new(
        "scrobbles",
        RecordType::Track,
        (1..=10).map(|n| track(n, n)).collect(),
    )]);
    assert_eq!(
        orchestrator
            .last_updated("scrobbles", RecordType::Track, None)
            .unwrap(),
        epoch()
    );

    let first = orchestrator.run(&[]).unwrap();
    assert_eq!(first.created(), 10);
    assert_eq!(
        orchestrator
            .last_updated("scrobbles", RecordType::Track, None)
            .unwrap(),
        at(10)
    );

    // Same provider name, only older entries upstream
    let store = orchestrator.into_store();
    let mut registry = ProviderRegistry::new();
    registry
        .register(Box::new(Scripted::new(
            "scrobbles",
            RecordType::Track,
            vec![track(11, 0), track(12, 10)],
        )))
        .unwrap();
    let mut orchestrator = Orchestrator::new(store, registry);

    let second = orchestrator.run(&[]).unwrap();
    let scrobbles = second.provider("scrobbles").unwrap();
    assert_eq!(scrobbles.fetched, 0);
    assert_eq!(scrobbles.processed(), 0);
    assert_eq!(item_count(&orchestrator, RecordType::Track), 10);
    assert_eq!(
        orchestrator
            .last_updated("scrobbles", RecordType::Track, None)
            .unwrap(),
        at(10)
    );
}

#[test]
fn test_record_failure_is_isolated() {
    let tracks = (1..=5)
        .map(|n| {
            let candidate = track(n, n);
            if n == 2 {
                candidate.field("fault", "record")
            } else {
                candidate
            }
        })
        .collect();
    let mut orchestrator = orchestrator(vec![Scripted::new(
        "scrobbles",
        RecordType::Track,
        tracks,
    )]);

    let report = orchestrator.run(&[]).unwrap();
    let scrobbles = report.provider("scrobbles").unwrap();
    assert_eq!(scrobbles.state, ProviderState::Done);
    assert_eq!(scrobbles.created, 4);
    assert_eq!(scrobbles.failed, 1);
    assert_eq!(item_count(&orchestrator, RecordType::Track), 4);
    assert_eq!(
        orchestrator
            .store()
            .records()
            .count(Some(RecordType::Track))
            .unwrap(),
        4
    );

    // The failed record stays ahead of the checkpoint for the next run
    assert_eq!(
        orchestrator
            .last_updated("scrobbles", RecordType::Track, None)
            .unwrap(),
        at(1)
    );
}

#[test]
fn test_unidentifiable_record_is_skipped() {
    // No timestamp, so no source id and no intrinsic key for a track
    let undated = Candidate::new()
        .field("artist_name", "Boards of Canada")
        .field("track_name", "Undated")
        .field("url", "https://www.last.fm/music/boc/undated");
    let mut orchestrator = orchestrator(vec![Scripted::new(
        "scrobbles",
        RecordType::Track,
        vec![track(1, 1), undated, track(3, 3)],
    )]);

    let report = orchestrator.run(&[]).unwrap();
    let scrobbles = report.provider("scrobbles").unwrap();
    assert_eq!(scrobbles.state, ProviderState::Done);
    assert!(scrobbles.error.is_none());
    assert_eq!(scrobbles.fetched, 3);
    assert_eq!(scrobbles.created, 2);
    assert_eq!(scrobbles.failed, 1);
    assert_eq!(item_count(&orchestrator, RecordType::Track), 2);
    assert_eq!(
        orchestrator
            .store()
            .records()
            .count(Some(RecordType::Track))
            .unwrap(),
        2
    );

    // An undated candidate cannot hold the checkpoint back
    assert_eq!(
        orchestrator
            .last_updated("scrobbles", RecordType::Track, None)
            .unwrap(),
        at(3)
    );
}

#[test]
fn test_interrupt_stops_the_run() {
    let shutdown = Shutdown::new();
    let mut scrobbles = Scripted::new(
        "scrobbles",
        RecordType::Track,
        vec![track(1, 1), track(2, 2).field("fault", "interrupt"), track(3, 3)],
    );
    scrobbles.shutdown = shutdown.clone();
    let mut orchestrator = orchestrator(vec![
        scrobbles,
        Scripted::new("messages", RecordType::Message, vec![message("never", 4)]),
    ])
    .with_shutdown(shutdown);

    let err = orchestrator.run(&[]).unwrap_err();
    assert!(matches!(err, SyncError::Interrupted));

    assert_eq!(item_count(&orchestrator, RecordType::Track), 2);
    assert_eq!(item_count(&orchestrator, RecordType::Message), 0);
    assert_eq!(
        orchestrator
            .last_updated("scrobbles", RecordType::Track, None)
            .unwrap(),
        at(2)
    );
}

#[test]
fn test_interrupted_before_start() {
    let shutdown = Shutdown::new();
    shutdown.trigger();
    let mut orchestrator = orchestrator(vec![Scripted::new(
        "photos",
        RecordType::Photo,
        vec![photo("P1", 1)],
    )])
    .with_shutdown(shutdown);

    assert!(matches!(orchestrator.run(&[]), Err(SyncError::Interrupted)));
    assert_eq!(item_count(&orchestrator, RecordType::Photo), 0);
}

#[test]
fn test_disabled_provider_is_skipped() {
    let mut provider = Scripted::new("photos", RecordType::Photo, vec![photo("P1", 1)]);
    provider.enabled = false;
    let mut orchestrator = orchestrator(vec![provider]);

    let report = orchestrator.run(&[]).unwrap();
    let photos = report.provider("photos").unwrap();
    assert_eq!(photos.state, ProviderState::Disabled);
    assert_eq!(photos.fetched, 0);
    assert!(photos.error.is_none());
}

#[test]
fn test_selection_order_and_unknown_ids() {
    let mut orchestrator = orchestrator(vec![
        Scripted::new("photos", RecordType::Photo, vec![photo("P1", 1)]),
        Scripted::new("messages", RecordType::Message, vec![message("hi", 2)]),
    ]);

    let selection = vec!["messages".to_string(), "nope".to_string(), "messages".to_string()];
    let report = orchestrator.run(&selection).unwrap();

    let ran: Vec<_> = report.providers.iter().map(|p| p.provider.as_str()).collect();
    assert_eq!(ran, vec!["messages"]);
    assert_eq!(item_count(&orchestrator, RecordType::Photo), 0);
}

#[test]
fn test_hook_changes_are_saved() {
    let mut orchestrator = orchestrator(vec![Scripted::new(
        "photos",
        RecordType::Photo,
        vec![photo("P1", 1)],
    )]);
    orchestrator.run(&[]).unwrap();

    let item = orchestrator
        .find("photos", RecordType::Photo, &photo("P1", 1))
        .unwrap()
        .unwrap();
    let Some(DomainRecord::Photo(Photo { exif, .. })) =
        orchestrator.store().get_record(&item.record).unwrap()
    else {
        panic!("photo not stored");
    };
    assert_eq!(exif.get("Model").map(String::as_str), Some("Test camera"));
}

#[test]
fn test_filtered_checkpoints_advance_separately() {
    let commit = |repository: &str, revision: &str, hour: u32| {
        Candidate::new()
            .field("repository", repository)
            .field("revision", revision)
            .field("message", "Fix things")
            .at(at(hour))
            .with_filter(repository)
    };
    let mut provider = Scripted::new(
        "git",
        RecordType::Commit,
        vec![
            commit("alpha", "a1", 1),
            commit("beta", "b1", 2).field("fault", "record"),
            commit("alpha", "a2", 3),
            commit("beta", "b2", 4),
        ],
    );
    provider.replay_all = true;
    let mut orchestrator = orchestrator(vec![provider]);
    orchestrator.run(&[]).unwrap();

    let checkpoint = |filter| {
        orchestrator
            .last_updated("git", RecordType::Commit, Some(filter))
            .unwrap()
    };
    assert_eq!(checkpoint("alpha"), at(3));
    assert_eq!(checkpoint("beta"), epoch());
    assert_eq!(
        orchestrator
            .last_updated("git", RecordType::Commit, None)
            .unwrap(),
        epoch()
    );
    assert_eq!(item_count(&orchestrator, RecordType::Commit), 3);
}

#[test]
fn test_feed_is_ordered_and_unique_across_types() {
    let mut orchestrator = orchestrator(vec![
        Scripted::new(
            "photos",
            RecordType::Photo,
            vec![photo("P1", 5), photo("P2", 1)],
        ),
        Scripted::new(
            "messages",
            RecordType::Message,
            vec![message("first", 3), message("second", 7)],
        ),
        Scripted::new(
            "scrobbles",
            RecordType::Track,
            vec![track(1, 3), track(2, 6)],
        ),
    ]);
    orchestrator.run(&[]).unwrap();
    orchestrator.run(&[]).unwrap();

    let feed = orchestrator
        .store()
        .timeline()
        .feed(&FeedQuery::default())
        .unwrap();
    assert_eq!(feed.len(), 6);
    assert!(feed.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

    let duplicates: i64 = orchestrator
        .store()
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM (SELECT 1 FROM items GROUP BY record_type, record_id HAVING COUNT(*) > 1)",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(duplicates, 0);

    for record_type in [RecordType::Photo, RecordType::Message, RecordType::Track] {
        assert_eq!(
            orchestrator
                .store()
                .records()
                .count(Some(record_type))
                .unwrap(),
            item_count(&orchestrator, record_type)
        );
    }
}
