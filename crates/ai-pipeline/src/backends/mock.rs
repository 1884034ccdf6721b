/// Deterministic in-process backend
///
/// Used by `--mock` runs and by the test suites. Output is derived from the
/// request text, and failures and delays are scripted per lyrics substring.
use super::{
    DiagramRequest, FrameKind, FrameRequest, GenerationBackend, ProviderError, SceneContentRequest,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use storyboard::{DataUri, SceneContent};

/// Failure class a scripted rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Quota,
    Rejected,
    Transport,
}

impl MockFailure {
    fn to_error(self, what: &str) -> ProviderError {
        match self {
            Self::Quota => ProviderError::QuotaExhausted(format!(
                "API rate limit reached while generating {what}. Please wait a moment before trying again."
            )),
            Self::Rejected => ProviderError::Rejected(format!("{what} request was rejected")),
            Self::Transport => ProviderError::transport(format!("{what} request failed")),
        }
    }
}

struct ContentRule {
    needle: String,
    failure: MockFailure,
    /// `None` fails every time.
    remaining: Option<AtomicUsize>,
}

impl ContentRule {
    fn fires(&self, lyrics: &str) -> bool {
        if !lyrics.contains(&self.needle) {
            return false;
        }
        match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

#[derive(Default)]
pub struct MockBackend {
    content_rules: Vec<ContentRule>,
    content_delays: Vec<(String, Duration)>,
    frame_failures: Vec<(FrameKind, MockFailure)>,
    diagram_failure: Option<MockFailure>,
    content_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    frame_requests: Mutex<Vec<FrameRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every content request whose lyrics contain `needle` fails.
    pub fn fail_content_when(mut self, needle: impl Into<String>, failure: MockFailure) -> Self {
        self.content_rules.push(ContentRule {
            needle: needle.into(),
            failure,
            remaining: None,
        });
        self
    }

    /// The first `times` matching content requests fail, later ones succeed.
    pub fn fail_content_times(
        mut self,
        needle: impl Into<String>,
        failure: MockFailure,
        times: usize,
    ) -> Self {
        self.content_rules.push(ContentRule {
            needle: needle.into(),
            failure,
            remaining: Some(AtomicUsize::new(times)),
        });
        self
    }

    pub fn delay_content_when(mut self, needle: impl Into<String>, delay: Duration) -> Self {
        self.content_delays.push((needle.into(), delay));
        self
    }

    pub fn fail_frame(mut self, kind: FrameKind, failure: MockFailure) -> Self {
        self.frame_failures.push((kind, failure));
        self
    }

    pub fn fail_diagram(mut self, failure: MockFailure) -> Self {
        self.diagram_failure = Some(failure);
        self
    }

    pub fn content_calls(&self) -> usize {
        self.content_calls.load(Ordering::SeqCst)
    }

    /// Highest number of content requests observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn frame_requests(&self) -> Vec<FrameRequest> {
        self.frame_requests.lock().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_scene_content(
        &self,
        request: &SceneContentRequest,
    ) -> Result<SceneContent, ProviderError> {
        self.content_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.in_flight, &self.peak_in_flight);

        let delay = self
            .content_delays
            .iter()
            .find(|(needle, _)| request.lyrics.contains(needle.as_str()))
            .map(|(_, delay)| *delay)
            .unwrap_or(Duration::from_millis(1));
        tokio::time::sleep(delay).await;

        if let Some(rule) = self.content_rules.iter().find(|rule| rule.fires(&request.lyrics)) {
            return Err(rule.failure.to_error("scene content"));
        }

        let first_line = request.lyrics.lines().next().unwrap_or_default().trim();
        let lead = request
            .character_names
            .first()
            .map(|name| format!("{name} performs"))
            .unwrap_or_else(|| "The band performs".to_string());
        let seed = request.narrative_seed.trim();
        Ok(SceneContent {
            visuals: format!("{lead} \"{first_line}\""),
            camera_work: "Slow dolly in, then a wide crane shot".to_string(),
            lighting_mood: format!(
                "Lighting shaped by {}",
                if seed.is_empty() { "the song" } else { seed }
            ),
            section_title: format!("Section: {first_line}"),
        })
    }

    async fn generate_diagram(&self, request: &DiagramRequest) -> Result<String, ProviderError> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        if let Some(failure) = self.diagram_failure {
            return Err(failure.to_error("diagram"));
        }
        Ok(format!(
            "```mermaid\ngraph TD\nA[\"{}\"] --> B[\"{}\"]\n```",
            request.visuals.replace('"', "'"),
            request.camera_work.replace('"', "'")
        ))
    }

    async fn generate_frame(&self, request: &FrameRequest) -> Result<DataUri, ProviderError> {
        self.frame_requests.lock().push(request.clone());
        tokio::time::sleep(Duration::from_millis(1)).await;
        if let Some((_, failure)) = self
            .frame_failures
            .iter()
            .find(|(kind, _)| *kind == request.kind)
        {
            return Err(failure.to_error("frame"));
        }
        let payload = format!("{}|{}|{}", request.kind, request.visuals, request.references.len());
        Ok(DataUri::from_bytes("image/png", payload.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(lyrics: &str) -> SceneContentRequest {
        SceneContentRequest {
            lyrics: lyrics.into(),
            context: "ctx".into(),
            narrative_seed: String::new(),
            character_names: vec!["Mara".into()],
        }
    }

    #[tokio::test]
    async fn test_content_is_deterministic() {
        let backend = MockBackend::new();
        let a = backend.generate_scene_content(&request("Line one\nLine two")).await.unwrap();
        let b = backend.generate_scene_content(&request("Line one\nLine two")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.visuals, "Mara performs \"Line one\"");
        assert_eq!(backend.content_calls(), 2);
    }

    #[tokio::test]
    async fn test_limited_failures_recover() {
        let backend = MockBackend::new().fail_content_times("flaky", MockFailure::Quota, 1);
        assert!(backend
            .generate_scene_content(&request("flaky"))
            .await
            .unwrap_err()
            .is_quota());
        assert!(backend.generate_scene_content(&request("flaky")).await.is_ok());
    }
}
