/// Project bundle serialization
///
/// A project is saved as one versioned JSON document and loaded back
/// wholesale. Loading either yields a complete project or an error; the
/// caller's current project is never partially overwritten.
use crate::model::{Character, Project, SceneSegment};
use crate::workflow::Step;
use crate::{Result, StoryboardError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

pub const BUNDLE_VERSION: &str = "1.1.0";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleOut<'a> {
    raw_text: &'a str,
    narrative_seed: &'a str,
    scene_markers: &'a [usize],
    segments: &'a [SceneSegment],
    characters: &'a [Character],
    step: Step,
    version: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleIn {
    raw_text: String,
    #[serde(default)]
    narrative_seed: Option<String>,
    #[serde(default)]
    scene_markers: Option<Vec<usize>>,
    #[serde(default)]
    segments: Option<Vec<SceneSegment>>,
    #[serde(default)]
    characters: Option<Vec<Character>>,
    /// Kept loose so an unrecognised step falls back instead of failing the load.
    #[serde(default)]
    step: Option<serde_json::Value>,
    #[serde(default)]
    version: Option<String>,
}

/// Serializes the project. Each segment's `characters` list is recomputed
/// from its direction fields first, whatever the in-memory copy holds.
pub fn to_json(project: &Project) -> Result<String> {
    let mut refreshed = project.clone();
    refreshed.refresh_mentions();
    let bundle = BundleOut {
        raw_text: &refreshed.raw_text,
        narrative_seed: &refreshed.narrative_seed,
        scene_markers: refreshed.scene_markers(),
        segments: &refreshed.segments,
        characters: &refreshed.characters,
        step: refreshed.step().persistable(),
        version: BUNDLE_VERSION,
    };
    Ok(serde_json::to_string_pretty(&bundle)?)
}

pub fn from_json(json: &str) -> Result<Project> {
    let bundle: BundleIn = serde_json::from_str(json)
        .map_err(|err| StoryboardError::InvalidBundle(err.to_string()))?;

    let segments = bundle.segments.unwrap_or_default();
    let mut seen = HashSet::new();
    for segment in &segments {
        if !seen.insert(segment.id.as_str()) {
            return Err(StoryboardError::InvalidBundle(format!(
                "duplicate scene id {}",
                segment.id
            )));
        }
    }

    let mut scene_markers: Vec<usize> = bundle
        .scene_markers
        .unwrap_or_default()
        .into_iter()
        .filter(|&index| index > 0)
        .collect();
    scene_markers.sort_unstable();
    scene_markers.dedup();

    let step = match bundle.step {
        None => Step::default(),
        Some(value) => serde_json::from_value::<Step>(value.clone()).unwrap_or_else(|_| {
            tracing::warn!(step = %value, "unrecognised workflow step, starting from {}", Step::default());
            Step::default()
        }),
    };
    if step.is_transient() {
        tracing::debug!(%step, "restoring transient step as {}", step.persistable());
    }
    tracing::debug!(
        version = bundle.version.as_deref().unwrap_or("unversioned"),
        scenes = segments.len(),
        "loaded project bundle"
    );

    Ok(Project {
        raw_text: bundle.raw_text,
        narrative_seed: bundle.narrative_seed.unwrap_or_default(),
        scene_markers,
        segments,
        characters: bundle.characters.unwrap_or_default(),
        step: step.persistable(),
    })
}

impl Project {
    /// Replaces this project with the bundle's contents. On error nothing changes.
    pub fn replace_from_json(&mut self, json: &str) -> Result<()> {
        *self = from_json(json)?;
        Ok(())
    }
}

pub fn save_to_path(project: &Project, path: &Path) -> Result<()> {
    let json = to_json(project)?;
    fs::write(path, json)?;
    tracing::info!(path = %path.display(), scenes = project.segments.len(), "saved project bundle");
    Ok(())
}

pub fn load_from_path(path: &Path) -> Result<Project> {
    let json = fs::read_to_string(path)?;
    from_json(&json)
}

/// Advisory, timestamp-suffixed file name for a new bundle.
pub fn suggested_file_name(now: DateTime<Utc>) -> String {
    format!("storyboard-project-{}.json", now.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SegmentField;
    use chrono::TimeZone;

    fn sample() -> Project {
        let mut project = Project::new("Mara wakes\nRen waits\n\nThey meet", "rainy neon");
        project.toggle_marker(1).unwrap();
        project.add_character("Mara").unwrap();
        project.add_character("Ren").unwrap();
        project.build_segments();
        project
            .update_segment_text("scene-0", SegmentField::Visuals, "Mara at the window")
            .unwrap();
        project
            .update_segment_text("scene-1", SegmentField::CameraWork, "slow push on ren")
            .unwrap();
        project.transition(Step::DefineScenes).unwrap();
        project.transition(Step::Production).unwrap();
        project
    }

    #[test]
    fn test_save_recomputes_stale_mentions() {
        let mut project = sample();
        project.segments[0].characters = vec!["Nobody".into()];
        let json = to_json(&project).unwrap();
        let loaded = from_json(&json).unwrap();
        assert_eq!(loaded.segments[0].characters, vec!["Mara"]);
        assert_eq!(loaded.segments[1].characters, vec!["Ren"]);
    }

    #[test]
    fn test_round_trip() {
        let project = sample();
        let loaded = from_json(&to_json(&project).unwrap()).unwrap();

        let mut expected = project.clone();
        expected.refresh_mentions();
        assert_eq!(loaded, expected);

        let mut fresh = loaded.clone();
        fresh.refresh_mentions();
        assert_eq!(fresh.segments, loaded.segments);
    }

    #[test]
    fn test_bundle_shape() {
        let value: serde_json::Value = serde_json::from_str(&to_json(&sample()).unwrap()).unwrap();
        assert_eq!(value["version"], BUNDLE_VERSION);
        assert_eq!(value["step"], "PRODUCTION");
        assert_eq!(value["sceneMarkers"], serde_json::json!([1]));
        assert_eq!(value["segments"][0]["cameraWork"], "");
        assert!(value["segments"][0]["mermaidDiagram"].is_null());
        assert!(value["segments"][0].get("generation").is_none());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let project = from_json(r#"{"rawText":"a\nb"}"#).unwrap();
        assert_eq!(project.raw_text, "a\nb");
        assert!(project.narrative_seed.is_empty());
        assert!(project.scene_markers().is_empty());
        assert!(project.segments.is_empty());
        assert!(project.characters.is_empty());
        assert_eq!(project.step(), Step::PasteLyrics);
    }

    #[test]
    fn test_presentation_step_restores_to_production() {
        let project = from_json(r#"{"rawText":"a","step":"PRESENTATION"}"#).unwrap();
        assert_eq!(project.step(), Step::Production);
    }

    #[test]
    fn test_presentation_is_never_saved() {
        let mut project = sample();
        project.transition(Step::Resources).unwrap();
        project.transition(Step::Presentation).unwrap();
        let value: serde_json::Value = serde_json::from_str(&to_json(&project).unwrap()).unwrap();
        assert_eq!(value["step"], "PRODUCTION");
    }

    #[test]
    fn test_failed_load_leaves_project_untouched() {
        let mut project = sample();
        let before = project.clone();
        for bad in ["not json", r#"{"segments":[]}"#, r#"{"rawText":"a","segments":{}}"#] {
            assert!(matches!(
                project.replace_from_json(bad),
                Err(StoryboardError::InvalidBundle(_))
            ));
            assert_eq!(project, before);
        }
    }

    #[test]
    fn test_unknown_step_falls_back_to_paste_lyrics() {
        for json in [r#"{"rawText":"a","step":"EDITING"}"#, r#"{"rawText":"a","step":3}"#] {
            let project = from_json(json).unwrap();
            assert_eq!(project.step(), Step::PasteLyrics);
            assert_eq!(project.raw_text, "a");
        }
    }

    #[test]
    fn test_duplicate_scene_ids_rejected() {
        let json = r#"{"rawText":"a","segments":[
            {"id":"scene-0","sectionTitle":"A","lyrics":"a"},
            {"id":"scene-0","sectionTitle":"B","lyrics":"b"}]}"#;
        assert!(from_json(json).is_err());
    }

    #[test]
    fn test_suggested_file_name() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(suggested_file_name(now), "storyboard-project-1700000000123.json");
    }
}
