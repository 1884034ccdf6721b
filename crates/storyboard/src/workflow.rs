use crate::model::Project;
use crate::{Result, StoryboardError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in the authoring workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    #[default]
    PasteLyrics,
    DefineScenes,
    Production,
    Resources,
    /// Full-screen overlay; never a resting step.
    Presentation,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PasteLyrics => "PASTE_LYRICS",
            Self::DefineScenes => "DEFINE_SCENES",
            Self::Production => "PRODUCTION",
            Self::Resources => "RESOURCES",
            Self::Presentation => "PRESENTATION",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Presentation)
    }

    /// The step to persist or restore in place of this one.
    pub fn persistable(self) -> Self {
        match self {
            Self::Presentation => Self::Production,
            other => other,
        }
    }

    pub fn can_transition_to(&self, to: Step) -> bool {
        use Step::*;
        match (*self, to) {
            (Presentation, Production) => true,
            (Presentation, _) => false,
            (_, PasteLyrics) => true,
            (PasteLyrics, DefineScenes) => true,
            (DefineScenes, Production) => true,
            (Production, Resources) | (Production, DefineScenes) => true,
            (Resources, Production) | (Resources, Presentation) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Project {
    pub fn transition(&mut self, to: Step) -> Result<Step> {
        let from = self.step;
        if !from.can_transition_to(to) {
            return Err(StoryboardError::InvalidTransition { from, to });
        }
        if from == Step::PasteLyrics && to == Step::DefineScenes && self.raw_text.trim().is_empty() {
            return Err(StoryboardError::InvalidTransition { from, to });
        }
        tracing::debug!(%from, %to, "workflow transition");
        self.step = to;
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presentation_only_from_resources() {
        for from in [Step::PasteLyrics, Step::DefineScenes, Step::Production] {
            assert!(!from.can_transition_to(Step::Presentation), "{from}");
        }
        assert!(Step::Resources.can_transition_to(Step::Presentation));
    }

    #[test]
    fn test_presentation_only_returns_to_production() {
        assert!(Step::Presentation.can_transition_to(Step::Production));
        assert!(!Step::Presentation.can_transition_to(Step::PasteLyrics));
        assert!(!Step::Presentation.can_transition_to(Step::Resources));
    }

    #[test]
    fn test_full_walk() {
        let mut project = Project::new("a\nb", "");
        for step in [
            Step::DefineScenes,
            Step::Production,
            Step::Resources,
            Step::Presentation,
            Step::Production,
            Step::PasteLyrics,
        ] {
            project.transition(step).unwrap();
            assert_eq!(project.step(), step);
        }
    }

    #[test]
    fn test_blank_text_cannot_advance() {
        let mut project = Project::new("   \n", "");
        assert!(project.transition(Step::DefineScenes).is_err());
        assert_eq!(project.step(), Step::PasteLyrics);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Step::DefineScenes).unwrap(), "\"DEFINE_SCENES\"");
        let step: Step = serde_json::from_str("\"PRESENTATION\"").unwrap();
        assert_eq!(step.persistable(), Step::Production);
    }
}
