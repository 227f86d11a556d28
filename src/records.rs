use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A cached image, keyed by the SHA-256 of its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Hex-encoded SHA-256 of `payload`
    pub content_hash: String,

    /// Raw image bytes
    pub payload: Vec<u8>,

    /// MIME type as reported by the server
    pub media_type: String,

    /// File extension derived from `media_type`
    pub extension: String,

    /// Where and how the image was found
    pub metadata: ImageMetadata,
}

impl ImageRecord {
    /// Build a record from fetched bytes, hashing them.
    pub fn new(payload: Vec<u8>, media_type: &str, metadata: ImageMetadata) -> Self {
        Self {
            content_hash: content_hash(&payload),
            extension: extension_for(media_type),
            media_type: media_type.to_string(),
            payload,
            metadata,
        }
    }
}

/// Provenance of a captured image, taken from the page at capture time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageMetadata {
    pub site_name: String,
    pub page_path: String,
    pub page_url: String,
    pub page_title: String,
    pub image_id: String,
    pub image_type: String,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
    pub section: Option<String>,
    /// RFC 3339 capture time
    pub timestamp: String,
}

/// An `<img>` element seen during a DOM sweep, with its surrounding context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageElement {
    pub src: String,
    pub alt: Option<String>,
    pub title: Option<String>,
    pub aria_label: Option<String>,
    pub caption: Option<String>,
    pub section: Option<String>,
}

impl ImageElement {
    pub fn from_src(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            ..Self::default()
        }
    }

    /// Best descriptive label: alt, then title, then aria-label.
    pub fn label(&self) -> Option<&str> {
        [&self.alt, &self.title, &self.aria_label]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}

/// The page currently shown in the browser session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

impl PageInfo {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Hex SHA-256 of the given bytes
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Strip parameters from a Content-Type value, falling back to JPEG.
pub fn normalize_media_type(content_type: Option<&str>) -> String {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| ct.contains('/'))
        .unwrap_or_else(|| "image/jpeg".to_string())
}

/// File extension for a MIME type (`image/svg+xml` -> `svg`), `jpg` when unknown.
pub fn extension_for(media_type: &str) -> String {
    let subtype = media_type
        .split('/')
        .nth(1)
        .map(|s| s.split(['+', ';']).next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();

    match subtype.as_str() {
        "" => "jpg".to_string(),
        "jpeg" | "pjpeg" => "jpg".to_string(),
        other if other.chars().all(|c| c.is_ascii_alphanumeric()) => other.to_string(),
        _ => "jpg".to_string(),
    }
}

/// Truncate to at most `max` characters, respecting char boundaries.
pub fn cap_len(value: &str, max: usize) -> String {
    value.trim().chars().take(max).collect()
}
