use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;

use crate::config::ResolverConfig;

/// Object keys checked, in order, when a raw image value is a JSON object.
const OBJECT_KEYS: [&str; 5] = ["url", "uri", "path", "src", "filename"];

/// Rewrites raw image values into canonical absolute URLs.
///
/// Pure and idempotent: canonical output is always absolute, and absolute
/// input is returned unchanged.
#[derive(Clone, Debug)]
pub struct ImageResolver {
    base: String,
    scheme: String,
    upload_dir: String,
    markers: Vec<String>,
}

impl ImageResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        let base = config.base_url.trim().trim_end_matches('/').to_string();
        let scheme = base
            .split_once("://")
            .map(|(scheme, _)| scheme.to_string())
            .unwrap_or_else(|| {
                warn!(base_url = %config.base_url, "image base URL is not absolute");
                "https".to_string()
            });
        let markers = config
            .storage_markers
            .iter()
            .map(|m| m.trim_start_matches('/').to_string())
            .filter(|m| !m.is_empty())
            .collect();

        Self {
            base,
            scheme,
            upload_dir: config.upload_dir.trim_matches('/').to_string(),
            markers,
        }
    }

    /// Resolve a raw JSON value: a string, `null`, or an object wrapping a
    /// string under one of `url`, `uri`, `path`, `src`, `filename`.
    pub fn resolve(&self, raw: &Value) -> Option<String> {
        match raw {
            Value::String(s) => self.resolve_str(s),
            Value::Object(map) => OBJECT_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .and_then(|s| self.resolve_str(s)),
            _ => None,
        }
    }

    /// Resolve a raw string reference. Returns `None` for empty or
    /// unrecognized input.
    pub fn resolve_str(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("null") || raw.eq_ignore_ascii_case("undefined")
        {
            return None;
        }
        if is_absolute(raw) {
            return Some(raw.to_string());
        }
        if let Some(rest) = raw.strip_prefix("//") {
            return (!rest.is_empty()).then(|| format!("{}://{rest}", self.scheme));
        }

        let path = raw.replace('\\', "/");
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return None;
        }

        if !path.contains('/') || self.has_marker(path) {
            let file = path.rsplit('/').next().filter(|f| !f.is_empty())?;
            return Some(self.upload_url(file));
        }
        Some(format!("{}/{path}", self.base))
    }

    /// Resolve every value, drop unrecognized ones, and deduplicate while
    /// keeping first-seen order.
    pub fn resolve_list<'a, I>(&self, raw: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        dedup_ordered(raw.into_iter().filter_map(|v| self.resolve(v)))
    }

    /// [`resolve_list`](Self::resolve_list) for plain strings.
    pub fn resolve_strs<I, S>(&self, raw: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        dedup_ordered(raw.into_iter().filter_map(|s| self.resolve_str(s.as_ref())))
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// A marker only counts at the start of the path or right after a `/`.
    fn has_marker(&self, path: &str) -> bool {
        self.markers.iter().any(|m| {
            path.match_indices(m.as_str())
                .any(|(at, _)| at == 0 || path[..at].ends_with('/'))
        })
    }

    fn upload_url(&self, file: &str) -> String {
        if self.upload_dir.is_empty() {
            format!("{}/{file}", self.base)
        } else {
            format!("{}/{}/{file}", self.base, self.upload_dir)
        }
    }
}

impl Default for ImageResolver {
    fn default() -> Self {
        Self::new(&ResolverConfig::default())
    }
}

/// `scheme://…` with an RFC 3986 scheme, or a `data:` URI.
fn is_absolute(raw: &str) -> bool {
    if raw.len() > 5 && raw.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:")) {
        return true;
    }
    let Some((scheme, rest)) = raw.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    starts_alpha
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && !rest.is_empty()
}

fn dedup_ordered(urls: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.filter(|url| seen.insert(url.clone())).collect()
}
