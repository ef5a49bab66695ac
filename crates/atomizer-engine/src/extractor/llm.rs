//! Model-backed extractor (Gemini `generateContent` over HTTP)

use std::time::Duration;

use anyhow::{bail, Context, Result};
use atomizer_core::{CommitRecord, FileDiff};
use serde::{Deserialize, Serialize};

use super::chunk::{chunk_files, merge_chunk_events};
use super::error::ExtractError;
use super::parse::{parse_response, Validator};
use super::patterns::Patterns;
use super::prompt::build_prompt;
use super::{Extraction, Extractor};
use crate::atomizer::AtomizerConfig;
use crate::throttle::{retry_with_backoff, Backoff, Throttle};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Request header carrying the API key (kept out of URLs and error text)
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Model backend settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API base URL
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// API key (required for calls)
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
            temperature: 0.0,
        }
    }
}

impl LlmConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        LlmConfig {
            endpoint: std::env::var("ATOMIZER_LLM_ENDPOINT").unwrap_or(defaults.endpoint),
            model: std::env::var("ATOMIZER_LLM_MODEL").unwrap_or(defaults.model),
            api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            ..defaults
        }
    }

    /// Set the API key
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Maps an HTTP status and body to the error taxonomy
fn classify_failure(status: u16, body: String) -> ExtractError {
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
        ExtractError::RateLimited(format!("HTTP {}", status))
    } else if status >= 500 {
        ExtractError::Transport(format!("HTTP {}: {}", status, body))
    } else {
        ExtractError::Rejected { status, body }
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Extractor backed by a hosted language model
pub struct LlmExtractor {
    client: reqwest::blocking::Client,
    config: LlmConfig,
    api_key: String,
    throttle: Throttle,
    backoff: Backoff,
    max_chunk_chars: usize,
    patterns: Patterns,
}

impl LlmExtractor {
    /// Creates an extractor; fails without an API key
    pub fn new(config: LlmConfig, tuning: &AtomizerConfig) -> Result<Self> {
        let Some(api_key) = config.api_key.clone() else {
            bail!("No API key configured for the extraction model (set GEMINI_API_KEY)");
        };

        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("code-atomizer/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            throttle: Throttle::new(tuning.batch_size, tuning.batch_delay),
            backoff: Backoff::new(tuning.backoff_base, tuning.max_retries),
            max_chunk_chars: tuning.max_chunk_chars,
            patterns: Patterns::new()?,
            config,
        })
    }

    /// One `generateContent` round trip
    fn call(&self, prompt: &str) -> Result<String, ExtractError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(self.config.generate_url())
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(&request)
            .send()
            .map_err(|e| ExtractError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_failure(status.as_u16(), body));
        }

        response
            .json::<GenerateResponse>()
            .map_err(|e| ExtractError::InvalidResponse(e.without_url().to_string()))?
            .into_text()
            .ok_or_else(|| ExtractError::InvalidResponse("empty candidate".to_string()))
    }
}

impl Extractor for LlmExtractor {
    fn extract(
        &mut self,
        commit: &CommitRecord,
        files: &[FileDiff],
    ) -> Result<Extraction, ExtractError> {
        let chunks = chunk_files(files, self.max_chunk_chars);
        if chunks.len() > 1 {
            log::info!(
                "Commit {} split into {} chunks",
                commit.short_sha(),
                chunks.len()
            );
        }

        let mut extraction = Extraction::default();
        let mut per_chunk = Vec::with_capacity(chunks.len());
        let validator = Validator::new(files, &self.patterns);

        for chunk in &chunks {
            let prompt = build_prompt(commit, chunk);
            self.throttle.acquire();
            let prior_calls = extraction.calls;
            let text = retry_with_backoff(&self.backoff, |attempt| {
                extraction.calls += 1;
                if attempt > 1 {
                    log::debug!("Retrying extraction of {} (attempt {})", commit.short_sha(), attempt);
                }
                self.call(&prompt)
            })
            .map_err(|e| e.with_prior_calls(prior_calls))?;

            let raw = parse_response(&text)
                .map_err(|e| e.with_prior_calls(extraction.calls.saturating_sub(1)))?;
            if extraction.summary.is_empty() {
                if let Some(summary) = raw.llm_intent_summary.as_deref() {
                    extraction.summary = summary.trim().to_string();
                }
            }
            let (events, dropped) = validator.validate(raw);
            extraction.dropped += dropped;
            per_chunk.push(events);
        }

        extraction.events = if per_chunk.len() > 1 {
            merge_chunk_events(per_chunk, &self.patterns)
        } else {
            per_chunk.into_iter().flatten().collect()
        };
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert!(matches!(classify_failure(429, String::new()), ExtractError::RateLimited(_)));
        assert!(matches!(
            classify_failure(400, "RESOURCE_EXHAUSTED".into()),
            ExtractError::RateLimited(_)
        ));
        assert!(matches!(classify_failure(503, String::new()), ExtractError::Transport(_)));
        assert!(matches!(
            classify_failure(403, "denied".into()),
            ExtractError::Rejected { status: 403, .. }
        ));
    }

    #[test]
    fn test_response_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "{\"change_events\""}, {"text": ": []}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(response.into_text().as_deref(), Some("{\"change_events\": []}"));
    }

    #[test]
    fn test_request_wire_format() {
        let request = GenerateRequest {
            contents: vec![Content { role: "user", parts: vec![Part { text: "hi" }] }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: "application/json",
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn test_new_requires_api_key() {
        assert!(LlmExtractor::new(LlmConfig::default(), &AtomizerConfig::default()).is_err());
    }

    #[test]
    fn test_generate_url() {
        let config = LlmConfig {
            endpoint: "http://localhost:8080/".into(),
            ..LlmConfig::default()
        };
        assert_eq!(
            config.generate_url(),
            "http://localhost:8080/models/gemini-2.0-flash:generateContent"
        );
    }
}
