//! Gemini `generateContent` / `embedContent` client.
//!
//! The API key travels in the `x-goog-api-key` header so it never appears in
//! request URLs or logs.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use trail_core::ProviderError;

use crate::client::LlmClient;
use crate::parse;
use crate::types::{AnalysisContext, BatchAnalysis, CodeAnalysis};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: Option<SecretString>,
    pub model: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            embedding_dimensions: 768,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
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
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: EmbedContent<'a>,
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

// ── Client ──────────────────────────────────────────────────────────────────

pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("http client: {e}")))?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: GeminiConfig, client: reqwest::Client) -> Self {
        info!(
            model = %config.model,
            embedding_model = %config.embedding_model,
            has_key = config.api_key.is_some(),
            "Gemini client initialized"
        );
        Self { config, client }
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("GEMINI_API_KEY is not set".into()))
    }

    fn url(&self, model: &str, action: &str) -> String {
        format!(
            "{}/models/{model}:{action}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        url: String,
        body: &B,
    ) -> Result<R, ProviderError> {
        let key = self.api_key()?;
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), api_error_message(&body)));
        }

        resp.json::<R>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    fn map_transport(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.config.timeout)
        } else {
            ProviderError::Http(e.to_string())
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![TextPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: 0.2,
            },
        };
        let response: GenerateResponse = self
            .post(self.url(&self.config.model, "generateContent"), &request)
            .await?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        debug!(chars = text.len(), "generateContent returned");
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    #[instrument(skip_all, fields(model = %self.config.model, code_len = code.len()))]
    async fn analyze_code(
        &self,
        code: &str,
        context: &AnalysisContext,
    ) -> Result<CodeAnalysis, ProviderError> {
        let text = self.generate(&analysis_prompt(code, context)).await?;
        Ok(parse::parse_analysis(&text))
    }

    #[instrument(skip_all, fields(model = %self.config.model, files = files.len()))]
    async fn run_batch(
        &self,
        files: &BTreeMap<String, String>,
        context: &AnalysisContext,
    ) -> Result<BatchAnalysis, ProviderError> {
        let text = self.generate(&batch_prompt(files, context)).await?;
        Ok(parse::parse_batch(&text, files))
    }

    #[instrument(skip_all, fields(model = %self.config.embedding_model))]
    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbedRequest {
            model: format!("models/{}", self.config.embedding_model),
            content: EmbedContent {
                parts: vec![TextPart { text }],
            },
            output_dimensionality: self.config.embedding_dimensions,
        };
        let response: EmbedResponse = self
            .post(self.url(&self.config.embedding_model, "embedContent"), &request)
            .await?;

        let values = response.embedding.values;
        if values.len() != self.config.embedding_dimensions {
            return Err(ProviderError::InvalidResponse(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.config.embedding_dimensions,
                values.len()
            )));
        }
        Ok(values)
    }

    fn is_ready(&self) -> bool {
        self.api_key().is_ok()
    }

    fn embedding_dimensions(&self) -> usize {
        self.config.embedding_dimensions
    }
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

fn context_json(context: &AnalysisContext) -> String {
    serde_json::to_string_pretty(context).unwrap_or_default()
}

fn analysis_prompt(code: &str, context: &AnalysisContext) -> String {
    format!(
        "Review the code below in light of the developer context.\n\
         Respond with one JSON object: {{\"issues\": [{{\"severity\": \"error|warning|info\", \"message\": string, \"line\": number?}}], \
         \"suggestions\": [string], \"risk_level\": \"none|low|medium|high\", \"summary\": string, \"tests\": string?}}\n\n\
         Context:\n{}\n\nCode:\n{code}",
        context_json(context)
    )
}

fn batch_prompt(files: &BTreeMap<String, String>, context: &AnalysisContext) -> String {
    let mut prompt = format!(
        "Review each file below in light of the developer context.\n\
         Respond with one JSON object: {{\"globalSummary\": string, \"perFileResults\": [{{\"filePath\": string, \
         \"issues\": [...], \"suggestions\": [string], \"risk_level\": \"none|low|medium|high\", \"summary\": string}}]}}\n\n\
         Context:\n{}\n",
        context_json(context)
    );
    for (path, content) in files {
        prompt.push_str(&format!("\n--- {path} ---\n{content}\n"));
    }
    prompt
}
