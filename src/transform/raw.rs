//! Shared decoding helpers for upstream documents
//!
//! Upstream documents are decoded leniently (every field optional) and then
//! validated field by field, so a missing field is reported by name instead of
//! as a generic deserialization error.

use crate::error::ValidationError;
use crate::model::{ResourceKey, ResourceKind};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

/// `{name, url}` reference; either part may be absent in bad data.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct NamedRef {
    pub name: Option<String>,
    pub url: Option<String>,
}

impl NamedRef {
    /// Trimmed, lowercased name, if present and non-empty.
    pub fn slug(&self) -> Option<String> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    /// Numeric id taken from the reference URL.
    pub fn url_id(&self, kind: ResourceKind) -> Option<i64> {
        self.url
            .as_deref()
            .and_then(|url| ResourceKey::from_url(kind, url))
            .and_then(|key| key.numeric_id())
    }
}

pub(crate) fn decode<T: DeserializeOwned>(entity: &str, body: &Value) -> Result<T, ValidationError> {
    T::deserialize(body).map_err(|e| ValidationError::new(entity, "payload", e.to_string()))
}

/// Trimmed, lowercased name. Absent or blank names are an error.
pub(crate) fn required_name(
    entity: &str,
    field: &str,
    name: Option<&str>,
) -> Result<String, ValidationError> {
    name.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .ok_or_else(|| ValidationError::missing(entity, field))
}

/// Required non-negative integer.
pub(crate) fn required_count(
    entity: &str,
    field: &str,
    value: Option<i64>,
) -> Result<u32, ValidationError> {
    let value = value.ok_or_else(|| ValidationError::missing(entity, field))?;
    to_count(entity, field, value)
}

/// Optional non-negative integer; absent stays absent.
pub(crate) fn optional_count(
    entity: &str,
    field: &str,
    value: Option<i64>,
) -> Result<Option<u32>, ValidationError> {
    value.map(|v| to_count(entity, field, v)).transpose()
}

fn to_count(entity: &str, field: &str, value: i64) -> Result<u32, ValidationError> {
    u32::try_from(value).map_err(|_| {
        ValidationError::new(
            entity,
            field,
            format!("expected a non-negative integer, got {}", value),
        )
    })
}

/// Reject `value` unless it lies in `min..=max`.
pub(crate) fn within<T>(entity: &str, field: &str, value: T, min: T, max: T) -> Result<T, ValidationError>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(ValidationError::new(
            entity,
            field,
            format!("{} is outside {}..={}", value, min, max),
        ));
    }
    Ok(value)
}

/// First English entry of a localized list, with whitespace normalized.
///
/// Game text uses form feeds and hard line breaks; both collapse to a single
/// space.
pub(crate) fn english_text(entries: &[Value], field: &str) -> Option<String> {
    entries
        .iter()
        .filter(|entry| entry["language"]["name"].as_str() == Some("en"))
        .filter_map(|entry| entry[field].as_str())
        .map(clean_text)
        .find(|text| !text.is_empty())
}

pub(crate) fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep `url` only if it is an absolute http(s) URL.
pub(crate) fn http_url(url: &str) -> Option<String> {
    Url::parse(url.trim())
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(String::from)
}
