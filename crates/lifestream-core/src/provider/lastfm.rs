//! Last.fm recently played tracks
//!
//! Reads the audioscrobbler 1.0 recent-tracks feed. Each track can be
//! tagged with the artist's and the track's top tags, keeping only tags
//! used at least `tag_usage_threshold` times. Tag lookups are memoized per
//! URL so a run that scrobbled one album fetches its tags once.

use std::cell::RefCell;

use chrono::{DateTime, Utc};
use reqwest::Url;
use tracing::{debug, warn};

use crate::candidate::Candidate;
use crate::config::{Config, HttpConfig, LastfmConfig};
use crate::error::{SyncError, SyncResult};
use crate::models::{Checkpoint, RecordType};
use crate::provider::http::{BoundedCache, HttpClient};
use crate::provider::{
    slugify, source_digest, unsupported, FetchContext, Provider, RawPayload, Registration,
    XmlElement,
};
use crate::sync::Shutdown;

const NAME: &str = "lastfm";
const API_ROOT: &str = "http://ws.audioscrobbler.com/1.0/";
const RECENT_TRACKS_LIMIT: &str = "limit=100";
const MAX_TAG_LEN: usize = 50;
const TAG_CACHE_CAPACITY: usize = 512;

pub struct LastfmProvider {
    config: LastfmConfig,
    client: HttpClient,
    tag_cache: RefCell<BoundedCache<String, Vec<String>>>,
}

impl LastfmProvider {
    pub fn new(config: LastfmConfig, http: &HttpConfig, shutdown: Shutdown) -> SyncResult<Self> {
        Ok(Self {
            config,
            client: HttpClient::new(NAME, http, shutdown)?,
            tag_cache: RefCell::new(BoundedCache::new(TAG_CACHE_CAPACITY)),
        })
    }

    pub fn from_config(config: &Config, shutdown: Shutdown) -> SyncResult<Self> {
        Self::new(config.lastfm.clone().unwrap_or_default(), &config.http, shutdown)
    }

    fn username(&self) -> Option<&str> {
        self.config.username.as_deref().filter(|u| !u.is_empty())
    }

    fn tags_for_track(&self, artist: &str, track: &str) -> SyncResult<Vec<String>> {
        let urls = [
            api_url(&["artist", artist, "toptags.xml"])?,
            api_url(&["track", artist, track, "toptags.xml"])?,
        ];

        let mut tags = Vec::new();
        for url in &urls {
            for tag in self.tags_for_url(url)? {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
        Ok(tags)
    }

    fn tags_for_url(&self, url: &str) -> SyncResult<Vec<String>> {
        if let Some(tags) = self.tag_cache.borrow().get(&url.to_string()) {
            return Ok(tags.clone());
        }

        let tags = match self.client.get_xml(url) {
            Ok(root) => parse_top_tags(&root, self.config.tag_usage_threshold),
            Err(SyncError::Interrupted) => return Err(SyncError::Interrupted),
            Err(e) => {
                // Tags are decoration; the track is stored without them
                warn!(url, error = %e, "Failed to fetch Last.fm tags");
                return Ok(Vec::new());
            }
        };

        self.tag_cache
            .borrow_mut()
            .insert(url.to_string(), tags.clone());
        Ok(tags)
    }

    fn track_candidate(
        &self,
        track: &XmlElement,
        checkpoint: &Checkpoint,
    ) -> SyncResult<Option<Candidate>> {
        let Some(timestamp) = track
            .child("date")
            .and_then(|d| d.attr("uts"))
            .and_then(|uts| uts.trim().parse::<i64>().ok())
            .and_then(|uts| DateTime::<Utc>::from_timestamp(uts, 0))
        else {
            // Now playing entries carry no date
            debug!("Skipping Last.fm track without a play date");
            return Ok(None);
        };

        if !checkpoint.admits(timestamp) {
            return Ok(None);
        }

        let artist = track.child("artist");
        let artist_name = artist.map(|a| a.text.as_str()).unwrap_or_default();
        let artist_mbid = artist
            .and_then(|a| a.attr("mbid"))
            .filter(|m| !m.is_empty())
            .map(String::from);
        let track_name = track.child_text("name").unwrap_or_default();
        let track_mbid = track
            .child_text("mbid")
            .filter(|m| !m.is_empty())
            .map(String::from);
        let url = track.child_text("url").unwrap_or_default();

        let tags = if self.config.with_tags {
            self.tags_for_track(artist_name, track_name)?
        } else {
            Vec::new()
        };

        Ok(Some(
            Candidate::new()
                .field("artist_name", artist_name)
                .field("artist_mbid", artist_mbid)
                .field("track_name", track_name)
                .field("track_mbid", track_mbid)
                .field("url", url)
                .at(timestamp)
                .with_url(url)
                .with_tags(tags),
        ))
    }
}

impl Provider for LastfmProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.username().is_some()
    }

    fn registrations(&self) -> Vec<Registration> {
        vec![Registration::new(RecordType::Track, 0)]
    }

    fn fetch(&self, record_type: RecordType, _ctx: &FetchContext<'_>) -> SyncResult<RawPayload> {
        let username = match (record_type, self.username()) {
            (RecordType::Track, Some(username)) => username,
            _ => return Err(unsupported(NAME, record_type)),
        };

        let mut url = Url::parse(&api_url(&["user", username, "recenttracks.xml"])?)
            .map_err(|e| SyncError::fetch(NAME, e))?;
        url.set_query(Some(RECENT_TRACKS_LIMIT));
        Ok(RawPayload::Xml(self.client.get_xml(url.as_str())?))
    }

    fn normalize(
        &self,
        record_type: RecordType,
        payload: RawPayload,
        checkpoint: &Checkpoint,
    ) -> SyncResult<Vec<Candidate>> {
        let root = match (record_type, payload) {
            (RecordType::Track, RawPayload::Xml(root)) => root,
            (_, RawPayload::Empty) => return Ok(Vec::new()),
            _ => return Err(unsupported(NAME, record_type)),
        };

        let mut candidates = Vec::new();
        for track in root.children_named("track") {
            if let Some(candidate) = self.track_candidate(track, checkpoint)? {
                candidates.push(candidate);
            }
        }
        Ok(candidates)
    }

    fn source_id(&self, _record_type: RecordType, candidate: &Candidate) -> Option<String> {
        let timestamp = candidate.timestamp?.timestamp().to_string();
        Some(source_digest(&[
            candidate.get_str("artist_name")?,
            candidate.get_str("track_name")?,
            &timestamp,
        ]))
    }
}

/// Build an audioscrobbler URL with each segment percent-encoded
fn api_url(segments: &[&str]) -> SyncResult<String> {
    let mut url = Url::parse(API_ROOT).map_err(|e| SyncError::fetch(NAME, e))?;
    url.path_segments_mut()
        .map_err(|_| SyncError::fetch(NAME, "API root cannot take path segments"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.into())
}

/// Slugified tag names whose usage count reaches the threshold
fn parse_top_tags(root: &XmlElement, threshold: u32) -> Vec<String> {
    let mut tags = Vec::new();
    for tag in root.descendants("tag") {
        let count = tag
            .child_text("count")
            .and_then(|c| c.trim().parse::<u32>().ok())
            .unwrap_or(0);
        if count < threshold {
            continue;
        }

        let slug: String = slugify(tag.child_text("name").unwrap_or_default())
            .chars()
            .take(MAX_TAG_LEN)
            .collect();
        if !slug.is_empty() && !tags.contains(&slug) {
            tags.push(slug);
        }
    }
    tags
}
