//! Panorama identity and capture metadata.

mod resolver;

pub use resolver::PanoramaResolver;

use derive_debug::Dbg;
use serde_json::Value;

use crate::http;

/// Provider-assigned panorama identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PanoramaId(String);

impl PanoramaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PanoramaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub year: String,
    pub id: PanoramaId,
}

#[derive(Dbg, Clone)]
pub struct PanoramaMetadata {
    /// Heading of travel at capture time, in degrees.
    pub move_dir: Option<f64>,
    pub timeline: Vec<TimelineEntry>,
    #[dbg(skip)]
    pub raw_content: Value,
}

/// Years are served both as `"2019"` and as `2019`.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

impl PanoramaMetadata {
    /// Interpret one element of the `sdata` response's `content` array.
    pub fn from_content(content: Value) -> Self {
        let move_dir = match content.get("MoveDir") {
            Some(Value::Number(number)) => number.as_f64(),
            Some(Value::String(text)) => text.trim().parse().ok(),
            _ => None,
        };
        let timeline = content
            .get("TimeLine")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let year = text_of(entry.get("Year")?)?;
                        let id = text_of(entry.get("ID")?)?;
                        (!id.is_empty()).then(|| TimelineEntry {
                            year,
                            id: PanoramaId(id),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            move_dir,
            timeline,
            raw_content: content,
        }
    }

    /// The capture id listed for `year`, first match wins.
    pub fn id_for_year(&self, year: &str) -> Option<&PanoramaId> {
        self.timeline
            .iter()
            .find(|entry| entry.year == year)
            .map(|entry| &entry.id)
    }
}

/// Metadata together with the id it belongs to, which differs from the
/// looked-up id after a year redirection.
#[derive(Debug, Clone)]
pub struct ResolvedPanorama {
    pub id: PanoramaId,
    pub metadata: PanoramaMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no panorama at ({x}, {y})")]
    NoPanorama { x: f64, y: f64 },
    #[error("panorama lookup at ({x}, {y}) failed: {error}")]
    Lookup { x: f64, y: f64, error: http::Error },
    #[error("metadata request for {id} failed: {error}")]
    MetadataRequest { id: PanoramaId, error: http::Error },
    #[error("empty metadata for {id}")]
    EmptyMetadata { id: PanoramaId },
    #[error("no capture from {year} in the timeline of {id}")]
    YearNotFound { id: PanoramaId, year: String },
}
