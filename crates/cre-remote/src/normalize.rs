use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;

use cre_image::ImageResolver;
use cre_types::{Comment, ContentItem, Origin, RichComment, UserId};

use crate::payload::{scalar_string, CommentPayload, ItemPayload, RichCommentPayload};

/// Epoch-seconds values above this are taken to be milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Converts wire payloads into the data model. Never fails.
#[derive(Clone, Debug, Default)]
pub struct Normalizer {
    resolver: ImageResolver,
}

impl Normalizer {
    pub fn new(resolver: ImageResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &ImageResolver {
        &self.resolver
    }

    pub fn item(&self, payload: ItemPayload) -> ContentItem {
        let liked_by = liked_set(&payload.liked_by);
        ContentItem {
            id: payload.id.trim().to_string(),
            origin: Origin::Remote,
            author_id: payload.author_id,
            author: payload.author,
            category: payload.category,
            title: payload.title,
            content: payload.content,
            images: self.resolver.resolve_list(&payload.images),
            like_count: like_count(payload.like_count, &liked_by),
            liked_by,
            comment_count: payload.comment_count.unwrap_or(0),
            created_at: parse_timestamp(&payload.created_at),
        }
    }

    /// `post_id` fills in for payloads that omit their parent.
    pub fn comment(&self, post_id: &str, payload: CommentPayload) -> Comment {
        let liked_by = liked_set(&payload.liked_by);
        let post_id = if payload.post_id.trim().is_empty() {
            post_id.to_string()
        } else {
            payload.post_id
        };
        Comment {
            id: payload.id.trim().to_string(),
            post_id,
            origin: Origin::Remote,
            author_id: payload.author_id,
            author: payload.author,
            content: payload.content,
            image_ref: None,
            like_count: like_count(payload.like_count, &liked_by),
            liked_by,
            created_at: parse_timestamp(&payload.created_at),
        }
    }

    pub fn rich_comment(&self, payload: RichCommentPayload) -> RichComment {
        RichComment {
            author: payload.author,
            author_id: Some(payload.author_id).filter(|id| !id.trim().is_empty()),
            content: payload.content,
            image_ref: self.resolver.resolve(&payload.image),
            created_at: Some(payload.created_at)
                .filter(|raw| !raw.trim().is_empty())
                .map(|raw| parse_timestamp(&raw)),
        }
    }
}

/// Membership from a list of ids (strings or numbers); blanks dropped.
fn liked_set(values: &[Value]) -> BTreeSet<UserId> {
    values
        .iter()
        .map(|v| match v {
            Value::Object(map) => map.get("id").map(scalar_string).unwrap_or_default(),
            other => scalar_string(other),
        })
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

/// Known membership wins over the reported counter; the counter is only
/// used while membership is absent.
fn like_count(reported: Option<u64>, liked_by: &BTreeSet<UserId>) -> u64 {
    if liked_by.is_empty() {
        reported.unwrap_or(0)
    } else {
        liked_by.len() as u64
    }
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), or epoch seconds/milliseconds.
/// Anything else maps to the UNIX epoch.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Utc.from_utc_datetime(&naive);
        }
    }
    if let Ok(n) = raw.parse::<i64>() {
        let parsed = if n.abs() >= MILLIS_THRESHOLD {
            DateTime::from_timestamp_millis(n)
        } else {
            DateTime::from_timestamp(n, 0)
        };
        if let Some(dt) = parsed {
            return dt;
        }
    }
    if !raw.is_empty() {
        debug!(raw, "unparsable timestamp; using the epoch");
    }
    DateTime::<Utc>::UNIX_EPOCH
}
