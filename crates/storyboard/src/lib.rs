/// Storyboard project model
///
/// Turns pasted lyrics or script text into scene segments, tracks the
/// character roster, and persists the whole project as one JSON bundle.
/// Everything in this crate is synchronous; the remote generation calls
/// live in `ai-pipeline`.
use thiserror::Error;

pub mod bundle;
pub mod diagram;
pub mod export;
pub mod image;
pub mod mentions;
mod model;
pub mod roster;
pub mod segmenter;
pub mod workflow;

pub use bundle::{BUNDLE_VERSION, suggested_file_name};
pub use image::DataUri;
pub use mentions::{MentionMatcher, Span};
pub use model::*;
pub use segmenter::{canonical_lines, segment_text};
pub use workflow::Step;

#[derive(Debug, Error)]
pub enum StoryboardError {
    #[error("invalid project bundle: {0}")]
    InvalidBundle(String),

    #[error("unknown scene: {0}")]
    UnknownSegment(String),

    #[error("unknown character: {0}")]
    UnknownCharacter(String),

    #[error("scene {segment_id} changed while the update was in flight (expected generation {expected}, found {found})")]
    Conflict {
        segment_id: String,
        expected: u64,
        found: u64,
    },

    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: Step, to: Step },

    #[error("invalid scene marker {index}: must fall between two of the {line_count} lines")]
    InvalidMarker { index: usize, line_count: usize },

    #[error("invalid image data: {0}")]
    InvalidImage(String),

    #[error("character name cannot be empty")]
    EmptyName,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoryboardError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoryboardError>;
