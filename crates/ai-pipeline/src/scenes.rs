/// Scene population
///
/// Fans content requests for every segment out through the request pool and
/// merges each success onto its own stub. A failed scene keeps its
/// placeholders; quota failures collapse into one warning for the batch.
use crate::backends::{DiagramRequest, GenerationBackend, ProviderError, SceneContentRequest};
use crate::pool::RequestPool;
use crate::{PipelineError, Result};
use std::sync::Arc;
use storyboard::{Character, Project, SceneContent, SceneSegment};

pub const QUOTA_WARNING: &str =
    "API rate limit reached. Some scenes were left unfilled; wait a moment and try again.";

#[derive(Debug, Clone, PartialEq)]
pub struct PopulationReport {
    /// Same length and order as the input stubs.
    pub segments: Vec<SceneSegment>,
    pub quota_warning: Option<String>,
    /// Ids of the scenes that kept their placeholders.
    pub failed: Vec<String>,
}

impl PopulationReport {
    pub fn populated(&self) -> usize {
        self.segments.len() - self.failed.len()
    }
}

/// Fresh content and diagram for one scene, committed as one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regeneration {
    pub segment_id: String,
    pub generation: u64,
    pub content: SceneContent,
    /// Replaces the stored diagram even when empty.
    pub diagram: String,
}

impl Regeneration {
    pub fn apply_to(self, project: &mut Project) -> storyboard::Result<()> {
        project.apply_content(&self.segment_id, self.generation, self.content, Some(self.diagram))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramUpdate {
    pub segment_id: String,
    pub generation: u64,
    pub markup: String,
}

impl DiagramUpdate {
    pub fn apply_to(self, project: &mut Project) -> storyboard::Result<()> {
        project.apply_diagram(&self.segment_id, self.generation, self.markup)
    }
}

pub struct ScenePopulator {
    backend: Arc<dyn GenerationBackend>,
    pool: RequestPool,
    context: String,
}

impl ScenePopulator {
    pub fn new(backend: Arc<dyn GenerationBackend>, pool: RequestPool, context: impl Into<String>) -> Self {
        Self {
            backend,
            pool,
            context: context.into(),
        }
    }

    fn content_request(&self, lyrics: &str, seed: &str, roster: &[Character]) -> SceneContentRequest {
        SceneContentRequest {
            lyrics: lyrics.to_string(),
            context: self.context.clone(),
            narrative_seed: seed.to_string(),
            character_names: roster.iter().map(|character| character.name.clone()).collect(),
        }
    }

    async fn generate_all(
        &self,
        segments: &[SceneSegment],
        seed: &str,
        roster: &[Character],
    ) -> Vec<std::result::Result<SceneContent, ProviderError>> {
        let requests: Vec<SceneContentRequest> = segments
            .iter()
            .map(|segment| self.content_request(&segment.lyrics, seed, roster))
            .collect();
        self.pool
            .run(requests, |request| {
                let backend = Arc::clone(&self.backend);
                async move { backend.generate_scene_content(&request).await }
            })
            .await
    }

    /// Populates every stub. The returned list is index-aligned with `stubs`.
    pub async fn populate(
        &self,
        stubs: Vec<SceneSegment>,
        seed: &str,
        roster: &[Character],
    ) -> PopulationReport {
        let outcomes = self.generate_all(&stubs, seed, roster).await;
        let mut report = PopulationReport {
            segments: Vec::with_capacity(stubs.len()),
            quota_warning: None,
            failed: Vec::new(),
        };
        for (mut segment, outcome) in stubs.into_iter().zip(outcomes) {
            match outcome {
                Ok(content) => segment.merge_content(content),
                Err(err) => report.record_failure(&segment.id, &err),
            }
            report.segments.push(segment);
        }
        tracing::info!(
            backend = self.backend.name(),
            populated = report.populated(),
            failed = report.failed.len(),
            "scene population finished"
        );
        report
    }

    /// Populates the project's segments in place. Each result is committed
    /// against the generation the segment had when its request went out.
    pub async fn populate_project(&self, project: &mut Project) -> PopulationReport {
        let snapshot: Vec<(String, u64)> = project
            .segments
            .iter()
            .map(|segment| (segment.id.clone(), segment.generation()))
            .collect();
        let seed = project.narrative_seed.clone();
        let outcomes = self
            .generate_all(&project.segments, &seed, &project.characters)
            .await;

        let mut report = PopulationReport {
            segments: Vec::new(),
            quota_warning: None,
            failed: Vec::new(),
        };
        for ((id, generation), outcome) in snapshot.into_iter().zip(outcomes) {
            match outcome {
                Ok(content) => {
                    if let Err(err) = project.apply_content(&id, generation, content, None) {
                        tracing::warn!(scene = %id, "scene content not applied: {err}");
                        report.failed.push(id);
                    }
                }
                Err(err) => report.record_failure(&id, &err),
            }
        }
        report.segments = project.segments.clone();
        report
    }

    /// Requests fresh content for one scene, then a diagram for that
    /// content. Either failure fails the whole regeneration.
    pub async fn regenerate(
        &self,
        segment: &SceneSegment,
        seed: &str,
        roster: &[Character],
    ) -> Result<Regeneration> {
        let generation = segment.generation();
        let request = self.content_request(&segment.lyrics, seed, roster);
        let content = self.backend.generate_scene_content(&request).await?;

        let diagram_request = DiagramRequest {
            segment_id: segment.id.clone(),
            visuals: content.visuals.clone(),
            camera_work: content.camera_work.clone(),
        };
        let diagram = self
            .backend
            .generate_diagram(&diagram_request)
            .await
            .map_err(|err| {
                tracing::warn!(scene = %segment.id, class = err.class(), "diagram regeneration failed: {err}");
                err
            })?;

        Ok(Regeneration {
            segment_id: segment.id.clone(),
            generation,
            content,
            diagram,
        })
    }

    pub async fn generate_diagram(&self, segment: &SceneSegment) -> Result<DiagramUpdate> {
        if !segment.is_populated() {
            return Err(PipelineError::Unpopulated(segment.id.clone()));
        }
        let generation = segment.generation();
        let markup = self
            .backend
            .generate_diagram(&DiagramRequest::from_segment(segment))
            .await?;
        Ok(DiagramUpdate {
            segment_id: segment.id.clone(),
            generation,
            markup,
        })
    }
}

impl PopulationReport {
    fn record_failure(&mut self, segment_id: &str, err: &ProviderError) {
        tracing::warn!(scene = segment_id, class = err.class(), "scene content generation failed: {err}");
        if err.is_quota() && self.quota_warning.is_none() {
            self.quota_warning = Some(QUOTA_WARNING.to_string());
        }
        self.failed.push(segment_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockBackend, MockFailure};

    fn populator(backend: MockBackend) -> ScenePopulator {
        ScenePopulator::new(Arc::new(backend), RequestPool::default(), "Musical Video Storyboard")
    }

    #[tokio::test]
    async fn test_generate_diagram_requires_visuals() {
        let populator = populator(MockBackend::new());
        let stub = SceneSegment::stub(0, "la la".into());
        assert!(matches!(
            populator.generate_diagram(&stub).await,
            Err(PipelineError::Unpopulated(_))
        ));
    }

    #[tokio::test]
    async fn test_regeneration_applies_content_and_diagram_together() {
        let populator = populator(MockBackend::new());
        let mut project = Project::new("First line\nSecond line", "");
        project.build_segments();
        let pending = populator
            .regenerate(project.segment("scene-0").unwrap(), "", &[])
            .await
            .unwrap();
        pending.apply_to(&mut project).unwrap();
        let segment = project.segment("scene-0").unwrap();
        assert_eq!(segment.visuals, "The band performs \"First line\"");
        assert!(segment.mermaid_diagram.as_deref().unwrap().contains("graph TD"));
        assert_eq!(segment.generation(), 1);
    }

    #[tokio::test]
    async fn test_diagram_failure_fails_whole_regeneration() {
        let populator = populator(MockBackend::new().fail_diagram(MockFailure::Transport));
        let mut project = Project::new("hello", "");
        project.build_segments();
        let before = project.segment("scene-0").unwrap().clone();

        let err = populator
            .regenerate(project.segment("scene-0").unwrap(), "", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Provider(ProviderError::Transport(_))));
        assert_eq!(project.segment("scene-0").unwrap(), &before);
    }
}
