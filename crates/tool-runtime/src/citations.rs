//! Citation extraction from `web_search` results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const WEB_SEARCH: &str = "web_search";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub source: String,
}

/// Citations found in a search result payload.
///
/// Accepts `{"results": [...]}` or a bare array. Entries without a URL are
/// skipped; `source` falls back to the URL's host.
pub fn extract_citations(content: &str) -> Vec<Citation> {
    let Ok(payload) = serde_json::from_str::<Value>(content) else {
        return Vec::new();
    };
    let items = match &payload {
        Value::Array(items) => items,
        other => match other.get("results").and_then(Value::as_array) {
            Some(items) => items,
            None => return Vec::new(),
        },
    };
    items.iter().filter_map(citation_from).collect()
}

fn citation_from(item: &Value) -> Option<Citation> {
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| item.get(*k).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let url = field(&["url", "link"])?;
    let source = field(&["source", "site_name"])
        .or_else(|| host_of(&url))
        .unwrap_or_else(|| url.clone());
    Some(Citation {
        title: field(&["title", "name"]).unwrap_or_else(|| url.clone()),
        icon: field(&["icon", "favicon", "thumbnail"]),
        source,
        url,
    })
}

fn host_of(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches("www.").to_string())
}
