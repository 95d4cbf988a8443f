//! Item descriptors and pages, normalized at the ingestion boundary.
//!
//! The API mixes representations across responses: ids arrive as numbers or
//! strings, dimensions as numbers or numeric strings, ratings as levels,
//! labels or booleans. Each field goes through exactly one total coercion
//! function here; nothing downstream sees the raw shapes except the
//! metadata sidecar, which keeps the original JSON.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::classify::classify;

/// Reasons an item is dropped during ingestion.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    /// The page entry is not a JSON object.
    #[error("item is not a JSON object")]
    NotAnObject,
    /// The entry has no usable `id`.
    #[error("item has no usable id")]
    MissingId,
}

/// Engagement counters. Missing or malformed counters are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Likes.
    pub like: u64,
    /// Hearts.
    pub heart: u64,
    /// Laughs.
    pub laugh: u64,
    /// Cries.
    pub cry: u64,
    /// Comments.
    pub comment: u64,
}

impl Stats {
    /// Like + heart + laugh + cry, used by the minimum-reactions filter.
    #[must_use]
    pub fn reactions(&self) -> u64 {
        self.like
            .saturating_add(self.heart)
            .saturating_add(self.laugh)
            .saturating_add(self.cry)
    }

    /// Like + heart + comment, stored for popularity sorting.
    #[must_use]
    pub fn reaction_total(&self) -> u64 {
        self.like
            .saturating_add(self.heart)
            .saturating_add(self.comment)
    }

    fn from_value(stats: Option<&Value>) -> Self {
        let count = |key: &str| stats.and_then(|s| s.get(key)).map_or(0, coerce_count);
        Self {
            like: count("likeCount"),
            heart: count("heartCount"),
            laugh: count("laughCount"),
            cry: count("cryCount"),
            comment: count("commentCount"),
        }
    }
}

/// Generation parameters found in an item's `meta` object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationMeta {
    /// Positive prompt.
    pub prompt: Option<String>,
    /// Negative prompt.
    pub negative_prompt: Option<String>,
    /// Model (checkpoint) name.
    pub model: Option<String>,
    /// Model hash.
    pub model_hash: Option<String>,
    /// Sampler name.
    pub sampler: Option<String>,
    /// Sampling steps.
    pub steps: Option<i64>,
    /// CFG scale.
    pub cfg_scale: Option<f64>,
    /// Seed.
    pub seed: Option<i64>,
    /// CLIP skip.
    pub clip_skip: Option<i64>,
    /// The whole `meta` object.
    pub raw: Value,
}

impl GenerationMeta {
    fn from_meta(meta: &Map<String, Value>) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| meta.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let first = |keys: &[&str]| keys.iter().find_map(|key| meta.get(*key));

        Self {
            prompt: text(&["prompt"]),
            negative_prompt: text(&["negativePrompt"]),
            model: model_name(meta),
            model_hash: text(&["Model hash"]),
            sampler: text(&["sampler", "Sampler"]),
            steps: first(&["steps", "Steps"]).and_then(coerce_int),
            cfg_scale: first(&["cfgScale", "CFG scale"]).and_then(coerce_float),
            seed: first(&["seed", "Seed"]).and_then(coerce_int),
            clip_skip: first(&["clipSkip", "Clip skip"]).and_then(coerce_int),
            raw: Value::Object(meta.clone()),
        }
    }
}

/// One item as returned by the metadata API. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDescriptor {
    /// Stable unique id.
    pub id: String,
    /// Media URL; items without one are never dispatched.
    pub source_url: Option<String>,
    /// Width in pixels.
    pub width: Option<u32>,
    /// Height in pixels.
    pub height: Option<u32>,
    /// Normalized rating level in `0..=6`.
    pub rating: u8,
    /// Parent post id.
    pub post_id: Option<i64>,
    /// Author.
    pub username: Option<String>,
    /// Engagement counters.
    pub stats: Stats,
    /// Generation parameters, when the item has a `meta` object.
    pub generation: Option<GenerationMeta>,
    /// Tag names, deduplicated, in first-seen order.
    pub tags: Vec<String>,
    /// The original JSON object.
    pub raw: Value,
}

impl ItemDescriptor {
    /// Normalizes one raw page entry.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the entry is not an object or has no id.
    /// Every other malformed field is coerced to a safe default.
    pub fn from_value(raw: Value) -> Result<Self, IngestError> {
        let object = raw.as_object().ok_or(IngestError::NotAnObject)?;
        let id = object.get("id").and_then(coerce_id).ok_or(IngestError::MissingId)?;

        let source_url = object
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        let width = object.get("width").and_then(|v| coerce_dimension(&id, "width", v));
        let height = object
            .get("height")
            .and_then(|v| coerce_dimension(&id, "height", v));

        let generation = object
            .get("meta")
            .and_then(Value::as_object)
            .map(GenerationMeta::from_meta);

        Ok(Self {
            width,
            height,
            rating: resolve_rating(object),
            post_id: object.get("postId").and_then(coerce_int),
            username: object
                .get("username")
                .and_then(Value::as_str)
                .map(str::to_string),
            stats: Stats::from_value(object.get("stats")),
            generation,
            tags: extract_tags(object.get("tags")),
            source_url,
            id,
            raw,
        })
    }

    /// Longer of width and height, if either is known.
    #[must_use]
    pub fn longer_side(&self) -> Option<u32> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(w.max(h)),
            (Some(side), None) | (None, Some(side)) => Some(side),
            (None, None) => None,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Items that survived ingestion.
    pub items: Vec<ItemDescriptor>,
    /// Cursor for the next page; `None` ends pagination.
    pub next_cursor: Option<String>,
    /// Entries dropped during ingestion.
    pub malformed: usize,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    metadata: Option<EnvelopeMetadata>,
}

#[derive(Deserialize)]
struct EnvelopeMetadata {
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<Value>,
}

impl Page {
    /// Parses a response body. Entries that fail ingestion are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the body is not a page object.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(body)?;

        let total = envelope.items.len();
        let items: Vec<ItemDescriptor> = envelope
            .items
            .into_iter()
            .filter_map(|raw| match ItemDescriptor::from_value(raw) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(error = %e, "dropping malformed item");
                    None
                }
            })
            .collect();

        let next_cursor = envelope
            .metadata
            .and_then(|m| m.next_cursor)
            .and_then(|cursor| match cursor {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|c| !c.is_empty());

        Ok(Self {
            malformed: total - items.len(),
            items,
            next_cursor,
        })
    }

    /// True when the server returned no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.malformed == 0
    }
}

/// `nsfwLevel` first; falls back to `nsfw` when the level is absent or 0.
fn resolve_rating(object: &Map<String, Value>) -> u8 {
    object
        .get("nsfwLevel")
        .map(classify)
        .filter(|level| *level > 0)
        .or_else(|| object.get("nsfw").map(classify))
        .unwrap_or(0)
}

fn coerce_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn coerce_dimension(id: &str, field: &str, value: &Value) -> Option<u32> {
    if value.is_null() {
        return None;
    }
    let parsed = coerce_int(value).and_then(|n| u32::try_from(n).ok());
    if parsed.is_none() {
        warn!(item_id = id, field, raw = %value, "malformed dimension, ignoring");
    }
    parsed
}

fn coerce_count(value: &Value) -> u64 {
    coerce_int(value)
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
}

#[allow(clippy::cast_possible_truncation)]
fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

fn model_name(meta: &Map<String, Value>) -> Option<String> {
    let non_empty = |key: &str| {
        meta.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(model) = non_empty("model") {
        return Some(model);
    }

    if let Some(base) = non_empty("baseModel") {
        let checkpoint_version = meta
            .get("civitaiResources")
            .and_then(Value::as_array)
            .and_then(|resources| {
                resources
                    .iter()
                    .find(|r| r.get("type").and_then(Value::as_str) == Some("checkpoint"))
            })
            .and_then(|r| r.get("modelVersionId"))
            .and_then(coerce_int);
        return Some(match checkpoint_version {
            Some(version) => format!("{base} (v{version})"),
            None => base,
        });
    }

    // Some tools emit the checkpoint as a "<name> Version" key.
    meta.keys()
        .find_map(|key| key.strip_suffix("Version"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn extract_tags(tags: Option<&Value>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for tag in tags.and_then(Value::as_array).into_iter().flatten() {
        let name = match tag {
            Value::String(s) => Some(s.as_str()),
            Value::Object(o) => o.get("name").and_then(Value::as_str),
            _ => None,
        };
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty())
            && !names.iter().any(|existing| existing == name)
        {
            names.push(name.to_string());
        }
    }
    names
}
