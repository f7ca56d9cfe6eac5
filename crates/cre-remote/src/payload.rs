//! Wire shapes returned by the remote source.
//!
//! Every field is optional on the wire and tolerant of the wrong JSON type:
//! ids may arrive as numbers, counts as strings, lists as `null`. Decoding a
//! JSON object into these structs never fails.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A post or competition as listed by the remote source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemPayload {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(alias = "userId", alias = "author_id", deserialize_with = "lenient_string")]
    pub author_id: String,
    #[serde(alias = "username", deserialize_with = "lenient_string")]
    pub author: String,
    #[serde(alias = "type", deserialize_with = "lenient_string")]
    pub category: String,
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(alias = "body", deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(alias = "imageUrls", deserialize_with = "lenient_list")]
    pub images: Vec<Value>,
    #[serde(alias = "likes", alias = "like_count", deserialize_with = "lenient_count")]
    pub like_count: Option<u64>,
    #[serde(alias = "likedUsers", alias = "liked_by", deserialize_with = "lenient_list")]
    pub liked_by: Vec<Value>,
    #[serde(alias = "comments_count", alias = "comment_count", deserialize_with = "lenient_count")]
    pub comment_count: Option<u64>,
    #[serde(alias = "created_at", deserialize_with = "lenient_string")]
    pub created_at: String,
}

/// A comment from the authoritative source: stable identity and votes, no
/// image.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommentPayload {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(alias = "post_id", deserialize_with = "lenient_string")]
    pub post_id: String,
    #[serde(alias = "userId", alias = "author_id", deserialize_with = "lenient_string")]
    pub author_id: String,
    #[serde(alias = "username", deserialize_with = "lenient_string")]
    pub author: String,
    #[serde(alias = "body", deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(alias = "likes", alias = "like_count", deserialize_with = "lenient_count")]
    pub like_count: Option<u64>,
    #[serde(alias = "likedUsers", alias = "liked_by", deserialize_with = "lenient_list")]
    pub liked_by: Vec<Value>,
    #[serde(alias = "created_at", deserialize_with = "lenient_string")]
    pub created_at: String,
}

/// A comment from the image-bearing source: no stable identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RichCommentPayload {
    #[serde(alias = "username", deserialize_with = "lenient_string")]
    pub author: String,
    #[serde(alias = "userId", alias = "author_id", deserialize_with = "lenient_string")]
    pub author_id: String,
    #[serde(alias = "body", deserialize_with = "lenient_string")]
    pub content: String,
    /// Raw image value in any shape the resolver understands.
    #[serde(alias = "imageUrl", alias = "imagePath")]
    pub image: Value,
    #[serde(alias = "created_at", deserialize_with = "lenient_string")]
    pub created_at: String,
}

/// An item together with the identities of its comments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemDetailPayload {
    #[serde(flatten)]
    pub item: ItemPayload,
    #[serde(deserialize_with = "lenient_comments")]
    pub comments: Vec<CommentPayload>,
}

impl ItemPayload {
    /// Decode any JSON value; non-objects yield an empty payload.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

impl CommentPayload {
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

impl RichCommentPayload {
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

impl ItemDetailPayload {
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

/// Render a scalar as a string; anything else becomes empty.
pub(crate) fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(scalar_string(&Value::deserialize(d)?))
}

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Value>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(values) => values,
        Value::Null => Vec::new(),
        single => vec![single],
    })
}

fn lenient_comments<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<CommentPayload>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(values) => values.into_iter().map(CommentPayload::from_value).collect(),
        _ => Vec::new(),
    })
}
