//! Collection identifiers, image URL templates and local path naming.
//!
//! A collection's images are numbered `01, 02, …, 09, 10, 11, …` and share a
//! URL apart from that index. [`UrlTemplate::from_sample`] splits the first
//! image's URL around its index so every other URL can be rebuilt without
//! another page request.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use url::{Position, Url};

/// Characters that are not allowed in a directory name on common filesystems.
const ILLEGAL_PATH_CHARS: &[char] = &[
    '*', '|', ':', '\u{ff1a}', '?', '\u{ff1f}', '/', '<', '>', '"', '\\',
];

/// Sample image file names end in a two-digit index, optionally followed by an extension.
#[allow(clippy::expect_used)]
static INDEXED_FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<head>.*?)(?P<index>\d{2})(?P<ext>\.[A-Za-z0-9]+)?$")
        .expect("static regex is valid")
});

/// Catalog identifier of a collection.
///
/// Always a string of at least two ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(String);

impl CollectionId {
    /// Minimum accepted identifier length.
    pub const MIN_LEN: usize = 2;

    /// Validates a raw catalog identifier.
    ///
    /// Returns `None` for empty, too-short, or non-numeric input.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() < Self::MIN_LEN || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CollectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Formats a 1-based sequence index the way image file names carry it.
///
/// ```
/// use gallery_sync::collection::pad_index;
///
/// assert_eq!(pad_index(1), "01");
/// assert_eq!(pad_index(10), "10");
/// assert_eq!(pad_index(123), "123");
/// ```
#[must_use]
pub fn pad_index(index: u32) -> String {
    format!("{index:02}")
}

/// Reason a sample image URL could not be turned into a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// The URL did not parse or has no path segments.
    #[error("not a usable image URL: {0}")]
    InvalidUrl(String),
    /// The final path segment carries no two-digit index.
    #[error("no two-digit image index in: {0}")]
    NoIndex(String),
}

/// The `(prefix, suffix)` pair around an image's sequence index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    /// Everything before the index.
    pub prefix: String,
    /// Everything after the index.
    pub suffix: String,
}

impl UrlTemplate {
    /// Creates a template from stored fields.
    #[must_use]
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Derives the template from the first image's URL.
    ///
    /// The index is the two digits that end the final path segment's stem:
    /// `https://site/2020/05/10a01.jpg` splits into `https://site/2020/05/10a`
    /// and `.jpg`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] when the URL is unusable or carries no index.
    pub fn from_sample(sample_url: &str) -> Result<Self, TemplateError> {
        let parsed =
            Url::parse(sample_url).map_err(|_| TemplateError::InvalidUrl(sample_url.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(TemplateError::InvalidUrl(sample_url.to_string()));
        }

        // Query and fragment belong to the suffix, never to the file name.
        let (dir, file_name) = parsed[..Position::AfterPath]
            .rsplit_once('/')
            .filter(|(_, name)| !name.is_empty())
            .ok_or_else(|| TemplateError::InvalidUrl(sample_url.to_string()))?;
        let tail = &parsed[Position::AfterPath..];

        let captures = INDEXED_FILE_NAME
            .captures(file_name)
            .ok_or_else(|| TemplateError::NoIndex(sample_url.to_string()))?;
        let head = captures.name("head").map_or("", |m| m.as_str());
        let ext = captures.name("ext").map_or("", |m| m.as_str());

        Ok(Self {
            prefix: format!("{dir}/{head}"),
            suffix: format!("{ext}{tail}"),
        })
    }

    /// URL of the image at 1-based `index`.
    #[must_use]
    pub fn url_for(&self, index: u32) -> String {
        format!("{}{}{}", self.prefix, pad_index(index), self.suffix)
    }

    /// URLs of images `1..=count`, in order.
    #[must_use]
    pub fn image_urls(&self, count: u32) -> Vec<String> {
        (1..=count).map(|index| self.url_for(index)).collect()
    }
}

/// Date components encoded in an image URL path (`…/{year}/{month}/{dd}…`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDate {
    /// Four-digit year segment.
    pub year: Option<String>,
    /// Month segment.
    pub month: Option<String>,
    /// Day, taken from the first two characters of the file name.
    pub day: Option<String>,
}

impl ImageDate {
    /// Extracts date components from the sample image URL.
    ///
    /// Components that do not look numeric are left empty.
    #[must_use]
    pub fn from_sample(sample_url: &str) -> Self {
        let Ok(parsed) = Url::parse(sample_url) else {
            return Self::default();
        };
        let Some(segments) = parsed.path_segments() else {
            return Self::default();
        };
        let segments: Vec<&str> = segments.collect();
        if segments.len() < 3 {
            return Self::default();
        }

        let numeric = |s: &str| {
            (!s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())).then(|| s.to_string())
        };
        let file_name = segments[segments.len() - 1];
        Self {
            year: numeric(segments[segments.len() - 3]),
            month: numeric(segments[segments.len() - 2]),
            day: file_name.get(..2).and_then(numeric),
        }
    }
}

/// Strips characters that are illegal in a directory name.
///
/// Leading/trailing whitespace and trailing dots are trimmed as well. Returns
/// an empty string when nothing usable remains.
#[must_use]
pub fn sanitize_dir_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !ILLEGAL_PATH_CHARS.contains(c) && !c.is_control())
        .collect();
    cleaned.trim().trim_end_matches('.').trim_end().to_string()
}

/// Directory names for a set of collections, unique within the set.
///
/// Each collection gets its sanitized name; one with nothing printable left
/// gets its id. When several sanitize to the same name, the numerically
/// smallest id keeps it and every other one gets ` (<id>)` appended.
#[must_use]
pub fn assign_dir_names<'a, I>(collections: I) -> HashMap<CollectionId, String>
where
    I: IntoIterator<Item = (&'a CollectionId, &'a str)>,
{
    let sanitized: Vec<(&CollectionId, String)> = collections
        .into_iter()
        .map(|(id, name)| (id, sanitize_dir_name(name)))
        .collect();

    let mut owners: HashMap<&str, &CollectionId> = HashMap::new();
    for (id, name) in &sanitized {
        let owner = owners.entry(name.as_str()).or_insert(*id);
        if numeric_key(id) < numeric_key(*owner) {
            *owner = *id;
        }
    }

    sanitized
        .iter()
        .map(|(id, name)| {
            let dir = if name.is_empty() {
                id.to_string()
            } else if owners.get(name.as_str()) == Some(id) {
                name.clone()
            } else {
                format!("{name} ({id})")
            };
            ((*id).clone(), dir)
        })
        .collect()
}

fn numeric_key(id: &CollectionId) -> (usize, &str) {
    (id.as_str().len(), id.as_str())
}

/// Local file name for an image URL: its decoded final path segment.
#[must_use]
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |s| s.into_owned());
    let cleaned: String = decoded
        .chars()
        .filter(|c| !ILLEGAL_PATH_CHARS.contains(c) && !c.is_control())
        .collect();
    (!cleaned.is_empty() && cleaned != "." && cleaned != "..").then_some(cleaned)
}
