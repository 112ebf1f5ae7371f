use std::env;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::GenerationError;
use super::GenerationService;
use crate::config::{GenerationConfig, MIN_REQUEST_TIMEOUT_SECS};

const PROVIDER_NAME: &str = "gemini";
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
];

#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
}

impl GeminiGenerator {
    /// Reads the API key from the environment variable named in the config.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = match env::var(&config.api_key_env) {
            Ok(value) if !value.trim().is_empty() => value,
            _ => return Err(GenerationError::MissingApiKey(config.api_key_env.clone())),
        };
        Self::new(api_key, config)
    }

    pub fn new(api_key: String, config: &GenerationConfig) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::MissingApiKey(config.api_key_env.clone()));
        }

        if config.request_timeout_secs < MIN_REQUEST_TIMEOUT_SECS {
            return Err(GenerationError::Configuration(format!(
                "request timeout must be at least {}s, got {}s",
                MIN_REQUEST_TIMEOUT_SECS, config.request_timeout_secs
            )));
        }

        let trimmed_endpoint = config.endpoint.trim_end_matches('/');
        let model = config.model.trim_start_matches("models/");
        let endpoint = Url::parse(&format!("{}/{}:generateContent", trimmed_endpoint, model))
            .map_err(|err| {
                GenerationError::Configuration(format!(
                    "invalid Gemini endpoint {}: {}",
                    config.endpoint, err
                ))
            })?;

        let client = Client::builder()
            .user_agent("topicgen-rs (gemini)")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| {
                GenerationError::Configuration(format!("failed to build HTTP client: {}", err))
            })?;

        info!(
            "✅ Gemini generation ready (model: {}, timeout: {}s)",
            model, config.request_timeout_secs
        );

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: model.to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body<'a>(&self, prompt: &'a str) -> GeminiRequest<'a> {
        let generation_config = if self.temperature.is_some() || self.max_output_tokens.is_some() {
            Some(GenerationParams {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            })
        } else {
            None
        };

        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config,
        }
    }
}

#[async_trait]
impl GenerationService for GeminiGenerator {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let start = Instant::now();
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("key", &self.api_key);

        debug!(model = %self.model, chars = prompt.len(), "sending Gemini request");

        let response = self
            .client
            .post(url)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|err| GenerationError::http(PROVIDER_NAME, err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unavailable>".to_string());
            warn!("gemini returned {}: {}", status, truncate(&body));
            return Err(GenerationError::status(
                PROVIDER_NAME,
                status,
                error_message(&body),
            ));
        }

        let payload: GeminiResponse = response
            .json()
            .await
            .map_err(|err| GenerationError::response(PROVIDER_NAME, err.to_string()))?;
        let text = extract_text(payload)?;

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "Gemini response received"
        );
        Ok(text)
    }
}

fn extract_text(response: GeminiResponse) -> Result<String, GenerationError> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(GenerationError::Blocked {
            provider: PROVIDER_NAME,
            reason,
        });
    }

    let candidate = response
        .candidates
        .into_iter()
        .flatten()
        .next()
        .ok_or(GenerationError::EmptyResponse(PROVIDER_NAME))?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if BLOCKING_FINISH_REASONS.contains(&reason) {
            return Err(GenerationError::Blocked {
                provider: PROVIDER_NAME,
                reason: reason.to_string(),
            });
        }
    }

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(GenerationError::EmptyResponse(PROVIDER_NAME));
    }

    Ok(text)
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<GeminiErrorResponse>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .and_then(|err| err.message)
        .unwrap_or_else(|| truncate(body))
}

fn truncate(input: &str) -> String {
    const MAX_CHARS: usize = 512;
    if input.chars().count() <= MAX_CHARS {
        input.to_string()
    } else {
        let head: String = input.chars().take(MAX_CHARS).collect();
        format!("{}…", head)
    }
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationParams>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct GeminiErrorResponse {
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> GeminiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn joins_text_parts_of_first_candidate() {
        let response = parse(
            r##"{
                "candidates": [
                    {
                        "content": { "role": "model", "parts": [{ "text": "# EC2\n" }, { "text": "Details" }] },
                        "finishReason": "STOP"
                    },
                    { "content": { "parts": [{ "text": "ignored" }] } }
                ]
            }"##,
        );
        assert_eq!(extract_text(response).unwrap(), "# EC2\nDetails");
    }

    #[test]
    fn blocked_prompt_is_reported() {
        let response = parse(r#"{ "promptFeedback": { "blockReason": "SAFETY" } }"#);
        assert!(matches!(
            extract_text(response),
            Err(GenerationError::Blocked { reason, .. }) if reason == "SAFETY"
        ));
    }

    #[test]
    fn safety_finish_reason_is_reported() {
        let response = parse(
            r#"{ "candidates": [{ "content": { "parts": [] }, "finishReason": "RECITATION" }] }"#,
        );
        assert!(matches!(
            extract_text(response),
            Err(GenerationError::Blocked { .. })
        ));
    }

    #[test]
    fn missing_candidates_is_empty_response() {
        assert!(matches!(
            extract_text(parse("{}")),
            Err(GenerationError::EmptyResponse(_))
        ));
    }

    #[test]
    fn error_message_prefers_api_message() {
        let body = r#"{ "error": { "code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED" } }"#;
        assert_eq!(error_message(body), "API key not valid");
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn request_body_omits_unset_generation_config() {
        let config = GenerationConfig::default();
        let generator = GeminiGenerator::new("test-key".into(), &config).unwrap();
        let body = serde_json::to_value(generator.request_body("EC2 IN AWS")).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "EC2 IN AWS");
        assert_eq!(body["contents"][0]["role"], "user");
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn endpoint_includes_model() {
        let config = GenerationConfig {
            model: "models/gemini-2.5-flash".into(),
            ..GenerationConfig::default()
        };
        let generator = GeminiGenerator::new("test-key".into(), &config).unwrap();
        assert_eq!(
            generator.endpoint.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(generator.model(), "gemini-2.5-flash");
    }

    #[test]
    fn short_timeout_is_rejected_not_raised() {
        let config = GenerationConfig {
            request_timeout_secs: 1,
            ..GenerationConfig::default()
        };
        assert!(matches!(
            GeminiGenerator::new("test-key".into(), &config),
            Err(GenerationError::Configuration(msg)) if msg.contains("at least 5s")
        ));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let config = GenerationConfig::default();
        assert!(matches!(
            GeminiGenerator::new("  ".into(), &config),
            Err(GenerationError::MissingApiKey(name)) if name == "GEMINI_API_KEY"
        ));
    }
}
