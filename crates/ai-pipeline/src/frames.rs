/// Reference frame generation
///
/// Produces the opening and peak-motion frames for one scene, conditioned
/// on reference images of the characters the scene names. Both frames are
/// committed together or not at all.
use crate::backends::{FrameKind, FrameRequest, GenerationBackend, ProviderError};
use std::sync::Arc;
use storyboard::mentions::contains_name;
use storyboard::{Character, DataUri, Project, SceneSegment, StoryboardError};
use thiserror::Error;

/// Reference images taken from each mentioned character.
pub const MAX_REFERENCES_PER_CHARACTER: usize = 2;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Rate limit reached while generating frames; try again shortly.")]
    QuotaExhausted(#[source] ProviderError),

    #[error("Frame generation failed; check your reference images.")]
    Failed(#[source] ProviderError),

    #[error("scene {0} has no visuals yet; populate it first")]
    Unpopulated(String),

    #[error(transparent)]
    Storyboard(#[from] StoryboardError),
}

impl FrameError {
    fn from_provider(err: ProviderError) -> Self {
        if err.is_quota() {
            Self::QuotaExhausted(err)
        } else {
            Self::Failed(err)
        }
    }
}

/// Conditioning images for a scene: up to two per character whose name
/// appears (as a plain substring) in the visuals or camera work.
pub fn conditioning_images(segment: &SceneSegment, roster: &[Character]) -> Vec<DataUri> {
    roster
        .iter()
        .filter(|character| {
            contains_name(&segment.visuals, &character.name)
                || contains_name(&segment.camera_work, &character.name)
        })
        .flat_map(|character| {
            character
                .images
                .iter()
                .take(MAX_REFERENCES_PER_CHARACTER)
                .filter_map(move |image| match DataUri::parse(image) {
                    Ok(uri) => Some(uri),
                    Err(err) => {
                        tracing::warn!(character = %character.name, "skipping reference image: {err}");
                        None
                    }
                })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePair {
    pub segment_id: String,
    pub generation: u64,
    pub first_frame: DataUri,
    pub last_frame: DataUri,
}

impl FramePair {
    pub fn apply_to(self, project: &mut Project) -> storyboard::Result<()> {
        project.apply_frames(
            &self.segment_id,
            self.generation,
            self.first_frame.to_string(),
            self.last_frame.to_string(),
        )
    }
}

pub struct FramePopulator {
    backend: Arc<dyn GenerationBackend>,
}

impl FramePopulator {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    fn request(&self, kind: FrameKind, segment: &SceneSegment, seed: &str, references: &[DataUri]) -> FrameRequest {
        FrameRequest {
            kind,
            visuals: segment.visuals.clone(),
            camera_work: segment.camera_work.clone(),
            lighting_mood: segment.lighting_mood.clone(),
            narrative_seed: seed.to_string(),
            references: references.to_vec(),
        }
    }

    /// Requests both frames concurrently. Fails as a unit: if either request
    /// fails there is no pair, and a quota failure on either side wins.
    pub async fn generate(
        &self,
        segment: &SceneSegment,
        roster: &[Character],
        seed: &str,
    ) -> Result<FramePair, FrameError> {
        if !segment.is_populated() {
            return Err(FrameError::Unpopulated(segment.id.clone()));
        }
        let generation = segment.generation();
        let references = conditioning_images(segment, roster);
        tracing::debug!(scene = %segment.id, references = references.len(), "generating frame pair");

        let first_request = self.request(FrameKind::First, segment, seed, &references);
        let last_request = self.request(FrameKind::Last, segment, seed, &references);
        let (first, last) = tokio::join!(
            self.backend.generate_frame(&first_request),
            self.backend.generate_frame(&last_request),
        );

        match (first, last) {
            (Ok(first_frame), Ok(last_frame)) => Ok(FramePair {
                segment_id: segment.id.clone(),
                generation,
                first_frame,
                last_frame,
            }),
            (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(FrameError::from_provider(err)),
            (Err(first), Err(last)) => {
                let err = if last.is_quota() && !first.is_quota() { last } else { first };
                Err(FrameError::from_provider(err))
            }
        }
    }

    /// Generates and commits the frame pair for scene `id`.
    pub async fn populate(&self, project: &mut Project, id: &str) -> Result<(), FrameError> {
        let seed = project.narrative_seed.clone();
        let pair = self
            .generate(project.segment(id)?, &project.characters, &seed)
            .await;
        match pair {
            Ok(pair) => {
                pair.apply_to(project)?;
                tracing::info!(scene = id, "frames updated");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(scene = id, "frame generation failed: {err}");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character(name: &str, images: usize) -> Character {
        let mut character = Character::new(name);
        character.images = (0..images)
            .map(|n| DataUri::from_bytes("image/png", &[n as u8]).to_string())
            .collect();
        character
    }

    #[test]
    fn test_conditioning_uses_substring_match_and_two_images() {
        let roster = vec![character("Alex", 4), character("Ren", 1), character("Kai", 2)];
        let mut segment = SceneSegment::stub(0, "lyrics mention Kai".into());
        segment.visuals = "Alexander walks in".into();
        segment.camera_work = "over REN's shoulder".into();
        let images = conditioning_images(&segment, &roster);
        // Alex via substring (2 of 4), Ren (1), Kai only in lyrics (0)
        assert_eq!(images.len(), 3);
    }

    #[test]
    fn test_invalid_reference_images_are_skipped() {
        let mut mara = character("Mara", 1);
        mara.images.insert(0, "not-a-data-uri".into());
        let mut segment = SceneSegment::stub(0, String::new());
        segment.visuals = "Mara".into();
        assert_eq!(conditioning_images(&segment, &[mara]).len(), 1);
    }
}
