/// Gemini backend
///
/// Talks to the `generateContent` endpoint: JSON-schema constrained text for
/// scene content, free text for diagrams, and inline image parts for frames.
use super::{
    classify_failure_message, DiagramRequest, FrameRequest, GenerationBackend, ProviderError,
    SceneContentRequest,
};
use crate::prompts;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use storyboard::{DataUri, SceneContent};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,
    pub text_model: String,
    pub image_model: String,
    pub api_base: String,
    pub connect_timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            text_model: "gemini-3-flash-preview".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            api_base: GEMINI_API_BASE.to_string(),
            connect_timeout: Duration::from_secs(20),
        }
    }
}

pub struct GeminiBackend {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::configuration(
                "Gemini API key is required (set GEMINI_API_KEY or api_key in the config file).",
            ));
        }
        if config.text_model.trim().is_empty() || config.image_model.trim().is_empty() {
            return Err(ProviderError::configuration("Gemini model names are required."));
        }
        // No overall request timeout: a slow generation only holds up its own scene.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| ProviderError::configuration(format!("HTTP client setup failed: {err}")))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model.trim()
        )
    }

    async fn execute(&self, model: &str, payload: &Value) -> Result<GeminiCandidate, ProviderError> {
        let start = Instant::now();
        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", self.config.api_key.trim())
            .json(payload)
            .send()
            .await
            .map_err(|err| classify_transport(format!("Gemini request failed: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ProviderError::transport(format!("Read Gemini response failed: {err}")))?;
        tracing::debug!(
            model,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "gemini response"
        );
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        let parsed: GeminiResponse = serde_json::from_str(&body).map_err(|err| {
            ProviderError::invalid_response(format!("Invalid Gemini response JSON: {err}"))
        })?;
        if let Some(usage) = &parsed.usage_metadata {
            tracing::debug!(
                model,
                input_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "gemini usage"
            );
        }
        parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::invalid_response("Gemini response had no candidates."))
    }
}

fn classify_transport(message: String) -> ProviderError {
    match classify_failure_message(&message) {
        ProviderError::Other(message) => ProviderError::Transport(message),
        quota => quota,
    }
}

/// Drops a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait::async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate_scene_content(
        &self,
        request: &SceneContentRequest,
    ) -> Result<SceneContent, ProviderError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompts::scene_content_prompt(request) }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": scene_content_schema(),
            }
        });
        let candidate = self.execute(&self.config.text_model, &payload).await?;
        let text = candidate
            .text()
            .ok_or_else(|| ProviderError::invalid_response("No response from AI"))?;
        serde_json::from_str(strip_code_fence(&text)).map_err(|err| {
            ProviderError::invalid_response(format!("Scene content was not valid JSON: {err}"))
        })
    }

    async fn generate_diagram(&self, request: &DiagramRequest) -> Result<String, ProviderError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompts::diagram_prompt(request) }] }],
        });
        let candidate = self.execute(&self.config.text_model, &payload).await?;
        Ok(candidate.text().unwrap_or_default())
    }

    async fn generate_frame(&self, request: &FrameRequest) -> Result<DataUri, ProviderError> {
        let mut parts: Vec<Value> = request
            .references
            .iter()
            .map(|image| {
                json!({ "inlineData": { "mimeType": image.mime_type(), "data": image.data() } })
            })
            .collect();
        parts.push(json!({ "text": prompts::frame_prompt(request) }));

        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": "16:9" },
            }
        });
        let candidate = self.execute(&self.config.image_model, &payload).await?;
        let inline = candidate
            .parts()
            .iter()
            .find_map(|part| part.inline_data.as_ref())
            .ok_or_else(|| ProviderError::invalid_response("No image generated"))?;
        DataUri::new(inline.mime_type.clone(), inline.data.clone())
            .map_err(|err| ProviderError::invalid_response(err.to_string()))
    }
}

fn scene_content_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "visuals": { "type": "STRING", "description": "Action happening in the scene. Use character names if applicable." },
            "cameraWork": { "type": "STRING", "description": "Camera movement and angles" },
            "lightingMood": { "type": "STRING", "description": "Lighting style and color palette" },
            "sectionTitle": { "type": "STRING", "description": "Logical name (e.g. Verse 1)" }
        },
        "required": ["visuals", "cameraWork", "lightingMood", "sectionTitle"]
    })
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

impl GeminiCandidate {
    fn parts(&self) -> &[GeminiPart] {
        self.content
            .as_ref()
            .and_then(|content| content.parts.as_deref())
            .unwrap_or(&[])
    }

    /// Concatenated text parts, `None` when there are none.
    fn text(&self) -> Option<String> {
        let text: String = self
            .parts()
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "inlineData")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Deserialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let err = GeminiBackend::new(GeminiConfig::default()).err().unwrap();
        assert_eq!(err.class(), "configuration");
    }

    #[test]
    fn test_endpoint() {
        let backend = GeminiBackend::new(GeminiConfig {
            api_key: "key".into(),
            api_base: "http://localhost:8080/".into(),
            ..GeminiConfig::default()
        })
        .unwrap();
        assert_eq!(
            backend.endpoint("gemini-2.5-flash-image"),
            "http://localhost:8080/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_candidate_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[
            {"text":"here you go"},
            {"inlineData":{"mimeType":"image/png","data":"AAAA"}}]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        let candidate = &parsed.candidates[0];
        assert_eq!(candidate.text().as_deref(), Some("here you go"));
        let inline = candidate.parts().iter().find_map(|p| p.inline_data.as_ref()).unwrap();
        assert_eq!(inline.mime_type, "image/png");
    }
}
