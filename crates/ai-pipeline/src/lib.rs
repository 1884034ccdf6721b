/// Storyboard generation pipeline
///
/// Drives the remote generation service for a storyboard project: scene
/// content for every segment through a bounded request pool, diagrams and
/// scene regeneration for one segment, and reference frame pairs.
///
/// The backend is constructed once by the caller and shared as an
/// `Arc<dyn GenerationBackend>`; nothing here holds global client state.
use thiserror::Error;

pub mod backends;
pub mod frames;
pub mod pool;
pub mod prompts;
pub mod scenes;

pub use backends::{
    classify_failure_message, BackendFactory, BackendKind, DiagramRequest, FrameKind,
    FrameRequest, GeminiBackend, GeminiConfig, GenerationBackend, MockBackend, MockFailure,
    ProviderError, SceneContentRequest,
};
pub use frames::{FrameError, FramePair, FramePopulator};
pub use pool::{PoolConfig, RequestPool};
pub use scenes::{DiagramUpdate, PopulationReport, Regeneration, ScenePopulator};

/// Context label sent with every scene content request.
pub const DEFAULT_CONTEXT_LABEL: &str = "Musical Video Storyboard";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storyboard(#[from] storyboard::StoryboardError),

    #[error("scene {0} has no visuals yet; populate it first")]
    Unpopulated(String),
}

impl PipelineError {
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Provider(err) if err.is_quota())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
