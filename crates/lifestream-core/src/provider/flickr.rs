//! Flickr photos and photosets
//!
//! Uses the REST API with JSON responses. Public photos are listed newest
//! first, so paging stops at the first photo taken before the checkpoint.
//! Photos are registered before photosets: the photoset hook links only
//! member photos that are already stored.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Url;
use serde_json::{json, Value};
use tracing::debug;

use crate::candidate::Candidate;
use crate::config::{Config, FlickrConfig, HttpConfig};
use crate::error::{SyncError, SyncResult};
use crate::models::{Checkpoint, DomainRecord, Photoset, RecordRef, RecordType};
use crate::provider::http::HttpClient;
use crate::provider::{
    unsupported, FetchContext, HookContext, Provider, RawPayload, Registration,
};
use crate::sync::Shutdown;

const NAME: &str = "flickr";
const REST_URL: &str = "https://api.flickr.com/services/rest/";
const PER_PAGE: &str = "500";

pub struct FlickrProvider {
    config: FlickrConfig,
    client: HttpClient,
}

impl FlickrProvider {
    pub fn new(config: FlickrConfig, http: &HttpConfig, shutdown: Shutdown) -> SyncResult<Self> {
        Ok(Self {
            config,
            client: HttpClient::new(NAME, http, shutdown)?,
        })
    }

    pub fn from_config(config: &Config, shutdown: Shutdown) -> SyncResult<Self> {
        Self::new(config.flickr.clone().unwrap_or_default(), &config.http, shutdown)
    }

    fn api_key(&self) -> &str {
        self.config.api_key.as_deref().unwrap_or_default()
    }

    fn user_id(&self) -> &str {
        self.config.user_id.as_deref().unwrap_or_default()
    }

    /// Call a REST method; a `stat: fail` response is a fetch error
    fn call(&self, method: &str, params: &[(&str, &str)]) -> SyncResult<Value> {
        let mut query = vec![
            ("method", method),
            ("api_key", self.api_key()),
            ("format", "json"),
            ("nojsoncallback", "1"),
        ];
        query.extend_from_slice(params);

        let url = Url::parse_with_params(REST_URL, &query).map_err(|e| SyncError::fetch(NAME, e))?;
        let response = self.client.get_json(url.as_str())?;
        if response["stat"] == "fail" {
            return Err(SyncError::fetch(
                NAME,
                format!(
                    "{} returned error {}: {}",
                    method,
                    text(&response["code"]),
                    text(&response["message"])
                ),
            ));
        }
        Ok(response)
    }

    fn fetch_photos(&self, ctx: &FetchContext<'_>) -> SyncResult<RawPayload> {
        let licenses: BTreeMap<String, String> = self
            .call("flickr.photos.licenses.getInfo", &[])?["licenses"]["license"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|l| (text(&l["id"]), text(&l["url"])))
                    .collect()
            })
            .unwrap_or_default();

        let mut entries = Vec::new();
        let mut page = 1;
        'pages: loop {
            ctx.check_shutdown()?;
            debug!(page, "Fetching page of Flickr photos");
            let page_str = page.to_string();
            let response = self.call(
                "flickr.people.getPublicPhotos",
                &[
                    ("user_id", self.user_id()),
                    ("extras", "license,date_taken"),
                    ("per_page", PER_PAGE),
                    ("page", page_str.as_str()),
                ],
            )?;

            let photos = &response["photos"];
            if page > int(&photos["pages"]) {
                debug!("Ran out of photos; stopping");
                break;
            }

            for photo in photos["photo"].as_array().into_iter().flatten() {
                let taken = parse_date_taken(&text(&photo["datetaken"]));
                if taken.is_some_and(|t| !ctx.checkpoint().admits(t)) {
                    debug!(taken = ?taken, "Hit an old photo; stopping");
                    break 'pages;
                }

                let id = text(&photo["id"]);
                let secret = text(&photo["secret"]);
                let info = self.call(
                    "flickr.photos.getInfo",
                    &[("photo_id", id.as_str()), ("secret", secret.as_str())],
                )?;
                let license_url = licenses
                    .get(&text(&photo["license"]))
                    .cloned()
                    .unwrap_or_default();

                entries.push(json!({
                    "photo": photo,
                    "info": info["photo"],
                    "license_url": license_url,
                }));
            }
            page += 1;
        }

        Ok(RawPayload::Json(Value::Array(entries)))
    }

    fn fetch_photosets(&self) -> SyncResult<RawPayload> {
        let person = self.call("flickr.people.getInfo", &[("user_id", self.user_id())])?;
        let sets = self.call("flickr.photosets.getList", &[("user_id", self.user_id())])?;
        Ok(RawPayload::Json(json!({
            "photos_url": person["person"]["photosurl"]["_content"],
            "photosets": sets["photosets"]["photoset"],
        })))
    }

    fn photoset_member_ids(&self, ctx: &HookContext<'_>, photoset_id: &str) -> SyncResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut page = 1;
        loop {
            ctx.check_shutdown()?;
            let page_str = page.to_string();
            let response = self.call(
                "flickr.photosets.getPhotos",
                &[
                    ("user_id", self.user_id()),
                    ("photoset_id", photoset_id),
                    ("extras", "license,date_taken"),
                    ("per_page", PER_PAGE),
                    ("page", page_str.as_str()),
                    ("media", "photos"),
                ],
            )?;

            let set = &response["photoset"];
            if page > int(&set["pages"]) {
                return Ok(ids);
            }
            ids.extend(
                set["photo"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|p| text(&p["id"])),
            );
            page += 1;
        }
    }
}

impl Provider for FlickrProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        [&self.config.api_key, &self.config.user_id, &self.config.username]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }

    fn registrations(&self) -> Vec<Registration> {
        vec![
            Registration::new(RecordType::Photo, 0),
            Registration::new(RecordType::Photoset, 1),
        ]
    }

    fn fetch(&self, record_type: RecordType, ctx: &FetchContext<'_>) -> SyncResult<RawPayload> {
        match record_type {
            RecordType::Photo => self.fetch_photos(ctx),
            RecordType::Photoset => self.fetch_photosets(),
            _ => Err(unsupported(NAME, record_type)),
        }
    }

    fn normalize(
        &self,
        record_type: RecordType,
        payload: RawPayload,
        checkpoint: &Checkpoint,
    ) -> SyncResult<Vec<Candidate>> {
        match (record_type, payload) {
            (_, RawPayload::Empty) => Ok(Vec::new()),
            (RecordType::Photo, RawPayload::Json(entries)) => Ok(entries
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(photo_candidate)
                .filter(|c| c.timestamp.map_or(true, |t| checkpoint.admits(t)))
                .collect()),
            (RecordType::Photoset, RawPayload::Json(listing)) => {
                let base = text(&listing["photos_url"]);
                Ok(listing["photosets"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|set| photoset_candidate(set, &base))
                    .collect())
            }
            _ => Err(unsupported(NAME, record_type)),
        }
    }

    fn source_id(&self, record_type: RecordType, candidate: &Candidate) -> Option<String> {
        let key = record_type.intrinsic_key()?;
        Some(format!("{}:{}", NAME, candidate.get_str(key)?))
    }

    fn post_persist(
        &self,
        ctx: &HookContext<'_>,
        record: &mut DomainRecord,
        _candidate: &Candidate,
        created: bool,
    ) -> SyncResult<()> {
        match record {
            DomainRecord::Photo(photo) if created => {
                let response = self.call(
                    "flickr.photos.getExif",
                    &[
                        ("photo_id", photo.photo_id.as_str()),
                        ("secret", photo.secret.as_str()),
                    ],
                )?;
                photo.exif = convert_exif(&response);
                Ok(())
            }
            DomainRecord::Photoset(set) => {
                let ids = self.photoset_member_ids(ctx, &set.photoset_id)?;
                link_members(ctx, set, ids)
            }
            _ => Ok(()),
        }
    }
}

/// Keep the member ids whose photo is stored
fn link_members(ctx: &HookContext<'_>, set: &mut Photoset, ids: Vec<String>) -> SyncResult<()> {
    let mut linked = Vec::new();
    for id in ids {
        if ctx.record_exists(&RecordRef::new(RecordType::Photo, id.as_str()))? {
            if !linked.contains(&id) {
                linked.push(id);
            }
        } else {
            debug!(photo_id = %id, photoset_id = %set.photoset_id, "Photoset member not stored");
        }
    }
    set.photo_ids = linked;
    Ok(())
}

fn photo_candidate(entry: &Value) -> Option<Candidate> {
    let photo = &entry["photo"];
    let info = &entry["info"];
    let id = text(&photo["id"]);
    if id.is_empty() {
        return None;
    }

    let tags: Vec<String> = info["tags"]["tag"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|t| !truthy(&t["machine_tag"]))
        .map(|t| text(&t["_content"]))
        .collect();

    let mut candidate = Candidate::new()
        .field("photo_id", id)
        .field("cc_license", text(&entry["license_url"]))
        .field("secret", text(&photo["secret"]))
        .field("server_id", int(&info["server"]))
        .field("farm_id", int(&info["farm"]))
        .field("taken_by", text(&info["owner"]["username"]))
        .field("title", text(&info["title"]["_content"]))
        .field("description", text(&info["description"]["_content"]))
        .field("comment_count", int(&info["comments"]["_content"]))
        .with_tags(tags);

    if let Some(posted) = DateTime::<Utc>::from_timestamp(int(&info["dates"]["posted"]), 0) {
        candidate = candidate.time_field("date_uploaded", posted);
    }
    if let Some(updated) = DateTime::<Utc>::from_timestamp(int(&info["dates"]["lastupdate"]), 0) {
        candidate = candidate.time_field("date_updated", updated);
    }
    if let Some(taken) = parse_date_taken(&text(&photo["datetaken"])) {
        candidate = candidate.at(taken);
    }
    Some(candidate)
}

fn photoset_candidate(set: &Value, base_url: &str) -> Candidate {
    let id = text(&set["id"]);
    let url = format!("{}/sets/{}/", base_url.trim_end_matches('/'), id);
    Candidate::new()
        .field("photoset_id", id)
        .field("url", url.as_str())
        .field("secret", text(&set["secret"]))
        .field("server_id", int(&set["server"]))
        .field("farm_id", int(&set["farm"]))
        .field("title", text(&set["title"]["_content"]))
        .field("description", text(&set["description"]["_content"]))
        .with_url(url)
}

fn convert_exif(response: &Value) -> BTreeMap<String, String> {
    response["photo"]["exif"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|e| {
            let value = match e.get("clean") {
                Some(clean) => text(&clean["_content"]),
                None => text(&e["raw"]["_content"]),
            };
            (text(&e["label"]), value)
        })
        .filter(|(label, _)| !label.is_empty())
        .collect()
}

/// Flickr reports `datetaken` in the photo's local time; it is read as UTC
fn parse_date_taken(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// String content of a JSON scalar; numbers are rendered, null is empty
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Integer content of a JSON scalar, 0 when absent or malformed
fn int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().unwrap_or_default() != 0,
        Value::String(s) => !s.is_empty() && s != "0",
        _ => false,
    }
}
