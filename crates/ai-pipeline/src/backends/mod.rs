/// Generation backends abstraction
///
/// One trait covers the three remote collaborators the storyboard needs:
/// - scene content (visuals, camera, lighting, title) for a lyrics segment
/// - diagram markup for a populated scene
/// - reference frames conditioned on character images
pub mod gemini;
pub mod mock;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use storyboard::{DataUri, SceneContent, SceneSegment};
use thiserror::Error;

pub use gemini::{GeminiBackend, GeminiConfig};
pub use mock::{MockBackend, MockFailure};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider misconfigured: {0}")]
    Configuration(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("QUOTA_EXHAUSTED: {0}")]
    QuotaExhausted(String),

    /// The provider refused the request as invalid (bad prompt or reference images).
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExhausted(_))
    }

    /// Short label for logs.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Authentication(_) => "authentication",
            Self::QuotaExhausted(_) => "quota",
            Self::Rejected(_) => "rejected",
            Self::Transport(_) => "transport",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Other(_) => "other",
        }
    }

    /// Maps a non-success HTTP status and its body to an error.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {status}: {}", body.trim());
        if status == 429 || has_quota_token(body) {
            return Self::QuotaExhausted(detail);
        }
        match status {
            401 | 403 => Self::Authentication(detail),
            400 | 404 | 413 | 422 => Self::Rejected(detail),
            500..=599 => Self::Transport(detail),
            _ => Self::Other(detail),
        }
    }
}

/// Classifies a free-text failure, recognising the quota markers remote
/// services put in their messages.
pub fn classify_failure_message(message: &str) -> ProviderError {
    if has_quota_token(message) || has_standalone_429(message) {
        ProviderError::QuotaExhausted(message.to_string())
    } else {
        ProviderError::Other(message.to_string())
    }
}

fn has_quota_token(text: &str) -> bool {
    text.contains("RESOURCE_EXHAUSTED") || text.contains("QUOTA_EXHAUSTED")
}

/// `429` as a status code in prose, not as digits inside a larger number.
fn has_standalone_429(text: &str) -> bool {
    let bytes = text.as_bytes();
    text.match_indices("429").any(|(start, _)| {
        let before = start.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(start + 3).copied();
        !before.is_some_and(|b| b.is_ascii_digit()) && !after.is_some_and(|b| b.is_ascii_digit())
    })
}

/// Content request for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneContentRequest {
    pub lyrics: String,
    pub context: String,
    pub narrative_seed: String,
    pub character_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramRequest {
    pub segment_id: String,
    pub visuals: String,
    pub camera_work: String,
}

impl DiagramRequest {
    pub fn from_segment(segment: &SceneSegment) -> Self {
        Self {
            segment_id: segment.id.clone(),
            visuals: segment.visuals.clone(),
            camera_work: segment.camera_work.clone(),
        }
    }
}

/// Which moment of the scene a frame depicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameKind {
    /// Opening moment.
    First,
    /// Peak of motion.
    Last,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "FIRST",
            Self::Last => "LAST",
        }
    }

    pub fn moment_instruction(&self) -> &'static str {
        match self {
            Self::First => "Capture the starting moment.",
            Self::Last => "Capture the peak of motion.",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRequest {
    pub kind: FrameKind,
    pub visuals: String,
    pub camera_work: String,
    pub lighting_mood: String,
    pub narrative_seed: String,
    /// Character reference images used as conditioning input.
    pub references: Vec<DataUri>,
}

/// Remote generation service.
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    async fn generate_scene_content(
        &self,
        request: &SceneContentRequest,
    ) -> Result<SceneContent, ProviderError>;

    async fn generate_diagram(&self, request: &DiagramRequest) -> Result<String, ProviderError>;

    async fn generate_frame(&self, request: &FrameRequest) -> Result<DataUri, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Gemini,
    Mock,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "mock" => Ok(Self::Mock),
            other => Err(ProviderError::configuration(format!("unknown provider {other:?}"))),
        }
    }
}

/// Backend factory for creating the shared client at startup.
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(
        kind: BackendKind,
        gemini: GeminiConfig,
    ) -> Result<Arc<dyn GenerationBackend>, ProviderError> {
        match kind {
            BackendKind::Gemini => Ok(Arc::new(GeminiBackend::new(gemini)?)),
            BackendKind::Mock => Ok(Arc::new(MockBackend::new())),
        }
    }
}
