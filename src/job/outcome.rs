use std::path::PathBuf;

use derive_debug::Dbg;
use itertools::Itertools as _;
use serde_json::Value;

use crate::panorama::PanoramaId;

/// Longest error message kept in the `process_status` column.
const MAX_ERROR_CHARS: usize = 100;

pub const BD_ID: &str = "BD_ID";
pub const BD_MOVE_DIR: &str = "BD_MoveDir";
pub const BD_CONTENT: &str = "BD_Content";
pub const BD_IMAGE_PATHS: &str = "BD_ImagePaths";
pub const PROCESS_STATUS: &str = "process_status";

/// Terminal state of one point's pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Success,
    CoordinateFailure,
    NoPanorama,
    MetadataFailure,
    ImageFailure,
    Error(String),
}

impl ProcessStatus {
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::Error(message.to_string().chars().take(MAX_ERROR_CHARS).collect())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::CoordinateFailure => f.write_str("coordinate_failure"),
            Self::NoPanorama => f.write_str("no_panorama"),
            Self::MetadataFailure => f.write_str("metadata_failure"),
            Self::ImageFailure => f.write_str("image_failure"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

#[derive(Dbg, Clone, PartialEq)]
pub struct ProcessingOutcome {
    pub bd_id: Option<PanoramaId>,
    pub move_dir: Option<f64>,
    #[dbg(skip)]
    pub content: Option<Value>,
    pub image_paths: Vec<PathBuf>,
    pub status: ProcessStatus,
}

impl ProcessingOutcome {
    pub fn failed(status: ProcessStatus) -> Self {
        Self {
            bd_id: None,
            move_dir: None,
            content: None,
            image_paths: Vec::new(),
            status,
        }
    }

    /// Cells appended to the point's input row.
    pub fn columns(&self) -> [(&'static str, String); 5] {
        [
            (
                BD_ID,
                self.bd_id.as_ref().map(ToString::to_string).unwrap_or_default(),
            ),
            (
                BD_MOVE_DIR,
                self.move_dir.map(|dir| dir.to_string()).unwrap_or_default(),
            ),
            (
                BD_CONTENT,
                self.content
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_default(),
            ),
            (
                BD_IMAGE_PATHS,
                self.image_paths
                    .iter()
                    .map(|path| path.display())
                    .join(","),
            ),
            (PROCESS_STATUS, self.status.to_string()),
        ]
    }
}
