use crate::mentions::MentionMatcher;
use crate::segmenter;
use crate::workflow::Step;
use crate::{Result, StoryboardError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference images kept per character; uploads past this drop the oldest.
pub const MAX_REFERENCE_IMAGES: usize = 5;

/// A named member of the cast with up to five reference images
/// (data URIs, oldest first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CharacterRecord")]
pub struct Character {
    pub id: String,
    pub name: String,
    pub images: Vec<String>,
}

impl Character {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_character_id(),
            name: name.into(),
            images: Vec::new(),
        }
    }
}

pub(crate) fn new_character_id() -> String {
    format!("char-{}", Uuid::new_v4().simple())
}

/// On-disk shape of a character. Older bundles carried a single `imageUrl`
/// instead of the `images` list.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CharacterRecord {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    images: Option<Vec<String>>,
    #[serde(default)]
    image_url: Option<String>,
}

impl From<CharacterRecord> for Character {
    fn from(record: CharacterRecord) -> Self {
        let mut images = record.images.unwrap_or_default();
        if images.is_empty() {
            if let Some(url) = record.image_url.filter(|url| !url.trim().is_empty()) {
                images.push(url);
            }
        }
        if images.len() > MAX_REFERENCE_IMAGES {
            images.drain(..images.len() - MAX_REFERENCE_IMAGES);
        }
        let id = if record.id.trim().is_empty() {
            new_character_id()
        } else {
            record.id
        };
        Self {
            id,
            name: record.name,
            images,
        }
    }
}

/// Fields returned by the content-generation collaborator for one scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneContent {
    pub visuals: String,
    pub camera_work: String,
    pub lighting_mood: String,
    pub section_title: String,
}

/// User-editable text fields of a segment. Lyrics are deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentField {
    SectionTitle,
    Visuals,
    CameraWork,
    LightingMood,
}

impl std::str::FromStr for SegmentField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "title" | "section_title" | "sectiontitle" => Ok(Self::SectionTitle),
            "visuals" => Ok(Self::Visuals),
            "camera" | "camera_work" | "camerawork" => Ok(Self::CameraWork),
            "lighting" | "lighting_mood" | "lightingmood" => Ok(Self::LightingMood),
            other => Err(format!("unknown scene field: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSegment {
    pub id: String,
    pub section_title: String,
    pub lyrics: String,
    #[serde(default)]
    pub visuals: String,
    #[serde(default)]
    pub camera_work: String,
    #[serde(default)]
    pub lighting_mood: String,
    #[serde(default)]
    pub mermaid_diagram: Option<String>,
    #[serde(default)]
    pub first_frame: Option<String>,
    #[serde(default)]
    pub last_frame: Option<String>,
    /// Derived; recomputed from the direction fields whenever the bundle is saved.
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(skip)]
    generation: u64,
}

impl SceneSegment {
    /// Placeholder segment produced by the segmenter for the scene at `ordinal`.
    pub fn stub(ordinal: usize, lyrics: String) -> Self {
        Self {
            id: format!("scene-{ordinal}"),
            section_title: format!("Scene {}", ordinal + 1),
            lyrics,
            visuals: String::new(),
            camera_work: String::new(),
            lighting_mood: String::new(),
            mermaid_diagram: None,
            first_frame: None,
            last_frame: None,
            characters: Vec::new(),
            generation: 0,
        }
    }

    /// Monotonic edit counter. Not persisted.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_populated(&self) -> bool {
        !self.visuals.trim().is_empty()
    }

    /// Text the mention detector runs over: visuals, camera and lighting.
    pub fn direction_text(&self) -> String {
        format!("{} {} {}", self.visuals, self.camera_work, self.lighting_mood)
    }

    pub fn field(&self, field: SegmentField) -> &str {
        match field {
            SegmentField::SectionTitle => &self.section_title,
            SegmentField::Visuals => &self.visuals,
            SegmentField::CameraWork => &self.camera_work,
            SegmentField::LightingMood => &self.lighting_mood,
        }
    }

    pub fn merge_content(&mut self, content: SceneContent) {
        self.visuals = content.visuals;
        self.camera_work = content.camera_work;
        self.lighting_mood = content.lighting_mood;
        self.section_title = content.section_title;
        self.generation += 1;
    }

    fn set_field(&mut self, field: SegmentField, value: String) {
        match field {
            SegmentField::SectionTitle => self.section_title = value,
            SegmentField::Visuals => self.visuals = value,
            SegmentField::CameraWork => self.camera_work = value,
            SegmentField::LightingMood => self.lighting_mood = value,
        }
    }
}

impl PartialEq for SceneSegment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.section_title == other.section_title
            && self.lyrics == other.lyrics
            && self.visuals == other.visuals
            && self.camera_work == other.camera_work
            && self.lighting_mood == other.lighting_mood
            && self.mermaid_diagram == other.mermaid_diagram
            && self.first_frame == other.first_frame
            && self.last_frame == other.last_frame
            && self.characters == other.characters
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Project {
    pub raw_text: String,
    pub narrative_seed: String,
    pub(crate) scene_markers: Vec<usize>,
    pub segments: Vec<SceneSegment>,
    pub characters: Vec<Character>,
    pub(crate) step: Step,
}

impl Project {
    pub fn new(raw_text: impl Into<String>, narrative_seed: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            narrative_seed: narrative_seed.into(),
            ..Self::default()
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn lines(&self) -> Vec<&str> {
        segmenter::canonical_lines(&self.raw_text)
    }

    pub fn scene_markers(&self) -> &[usize] {
        &self.scene_markers
    }

    /// Adds the marker if absent, removes it if present. Returns whether the
    /// marker is set afterwards.
    pub fn toggle_marker(&mut self, index: usize) -> Result<bool> {
        self.validate_marker(index)?;
        match self.scene_markers.binary_search(&index) {
            Ok(pos) => {
                self.scene_markers.remove(pos);
                Ok(false)
            }
            Err(pos) => {
                self.scene_markers.insert(pos, index);
                Ok(true)
            }
        }
    }

    pub fn set_scene_markers(&mut self, markers: impl IntoIterator<Item = usize>) -> Result<()> {
        let mut next: Vec<usize> = markers.into_iter().collect();
        for &index in &next {
            self.validate_marker(index)?;
        }
        next.sort_unstable();
        next.dedup();
        self.scene_markers = next;
        Ok(())
    }

    fn validate_marker(&self, index: usize) -> Result<()> {
        let line_count = self.lines().len();
        if index == 0 || index >= line_count {
            return Err(StoryboardError::InvalidMarker { index, line_count });
        }
        Ok(())
    }

    /// Runs the segmenter over the current text and markers, replacing any
    /// previous segments. Later edits to `raw_text` do not resegment.
    pub fn build_segments(&mut self) -> &[SceneSegment] {
        self.segments = segmenter::segment_text(&self.raw_text, &self.scene_markers);
        &self.segments
    }

    pub fn segment(&self, id: &str) -> Result<&SceneSegment> {
        let index = self.segment_index(id)?;
        Ok(&self.segments[index])
    }

    pub fn segment_index(&self, id: &str) -> Result<usize> {
        self.segments
            .iter()
            .position(|segment| segment.id == id)
            .ok_or_else(|| StoryboardError::UnknownSegment(id.to_string()))
    }

    pub fn update_segment_text(
        &mut self,
        id: &str,
        field: SegmentField,
        value: impl Into<String>,
    ) -> Result<()> {
        let index = self.segment_index(id)?;
        let segment = &mut self.segments[index];
        segment.set_field(field, value.into());
        segment.generation += 1;
        Ok(())
    }

    /// Merges generated content (and optionally a fresh diagram) in one update.
    pub fn apply_content(
        &mut self,
        id: &str,
        generation: u64,
        content: SceneContent,
        diagram: Option<String>,
    ) -> Result<()> {
        self.commit(id, generation, move |segment| {
            segment.visuals = content.visuals;
            segment.camera_work = content.camera_work;
            segment.lighting_mood = content.lighting_mood;
            segment.section_title = content.section_title;
            if diagram.is_some() {
                segment.mermaid_diagram = diagram;
            }
        })
    }

    pub fn apply_diagram(&mut self, id: &str, generation: u64, markup: String) -> Result<()> {
        self.commit(id, generation, move |segment| {
            segment.mermaid_diagram = Some(markup);
        })
    }

    /// Sets both frames together; observers never see only one of them change.
    pub fn apply_frames(
        &mut self,
        id: &str,
        generation: u64,
        first_frame: String,
        last_frame: String,
    ) -> Result<()> {
        self.commit(id, generation, move |segment| {
            segment.first_frame = Some(first_frame);
            segment.last_frame = Some(last_frame);
        })
    }

    fn commit(
        &mut self,
        id: &str,
        generation: u64,
        update: impl FnOnce(&mut SceneSegment),
    ) -> Result<()> {
        let index = self.segment_index(id)?;
        let segment = &mut self.segments[index];
        if segment.generation != generation {
            tracing::warn!(
                segment = id,
                expected = generation,
                found = segment.generation,
                "discarding stale scene update"
            );
            return Err(StoryboardError::Conflict {
                segment_id: id.to_string(),
                expected: generation,
                found: segment.generation,
            });
        }
        update(segment);
        segment.generation += 1;
        Ok(())
    }

    /// Recomputes every segment's derived `characters` list from its own
    /// direction fields.
    pub fn refresh_mentions(&mut self) {
        let matcher = MentionMatcher::new(&self.characters);
        for segment in &mut self.segments {
            segment.characters = matcher.mentioned(&segment.direction_text());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project::new("One\nTwo\n\nThree\nFour", "noir")
    }

    #[test]
    fn test_toggle_marker_keeps_sorted_set() {
        let mut p = project();
        assert!(p.toggle_marker(3).unwrap());
        assert!(p.toggle_marker(1).unwrap());
        assert_eq!(p.scene_markers(), &[1, 3]);
        assert!(!p.toggle_marker(3).unwrap());
        assert_eq!(p.scene_markers(), &[1]);
    }

    #[test]
    fn test_marker_bounds() {
        let mut p = project();
        assert!(matches!(
            p.toggle_marker(0),
            Err(StoryboardError::InvalidMarker { index: 0, .. })
        ));
        assert!(p.toggle_marker(4).is_err());
        assert!(p.set_scene_markers([2, 2, 1]).is_ok());
        assert_eq!(p.scene_markers(), &[1, 2]);
    }

    #[test]
    fn test_stale_update_is_rejected() {
        let mut p = project();
        p.build_segments();
        let id = p.segments[0].id.clone();
        let started_at = p.segments[0].generation();

        p.update_segment_text(&id, SegmentField::Visuals, "edited by hand")
            .unwrap();
        let err = p
            .apply_frames(&id, started_at, "data:a".into(), "data:b".into())
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(p.segments[0].first_frame.is_none());
        assert_eq!(p.segments[0].visuals, "edited by hand");
    }

    #[test]
    fn test_apply_frames_sets_both() {
        let mut p = project();
        p.build_segments();
        let generation = p.segments[0].generation();
        p.apply_frames("scene-0", generation, "first".into(), "last".into())
            .unwrap();
        assert_eq!(p.segments[0].first_frame.as_deref(), Some("first"));
        assert_eq!(p.segments[0].last_frame.as_deref(), Some("last"));
        assert_eq!(p.segments[0].generation(), generation + 1);
    }

    #[test]
    fn test_legacy_character_image_url() {
        let json = r#"{"id":"c1","name":"Mara","imageUrl":"data:image/png;base64,AAAA"}"#;
        let character: Character = serde_json::from_str(json).unwrap();
        assert_eq!(character.images, vec!["data:image/png;base64,AAAA".to_string()]);
    }

    #[test]
    fn test_segment_field_parse() {
        assert_eq!("camera".parse::<SegmentField>(), Ok(SegmentField::CameraWork));
        assert!("lyrics".parse::<SegmentField>().is_err());
    }
}
