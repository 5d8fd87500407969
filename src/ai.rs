use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use ollama_rs::{generation::completion::request::GenerationRequest, Ollama};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{AiBackend, AiConfig};
use crate::error::{ClassificationError, ConfigError};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
/// Longest message text forwarded to the classifier.
const MAX_PROMPT_TEXT: usize = 2000;

/// The classifier's answer for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    #[serde(alias = "relevant", alias = "Relevant")]
    Relevant,
    #[serde(alias = "not_relevant", alias = "NotRelevant", alias = "IRRELEVANT")]
    NotRelevant,
    #[serde(alias = "uncertain", alias = "Uncertain")]
    Uncertain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgement {
    pub decision: Decision,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl Judgement {
    pub fn relevant(confidence: f32) -> Self {
        Self {
            decision: Decision::Relevant,
            confidence,
            reasons: Vec::new(),
        }
    }

    pub fn not_relevant(confidence: f32) -> Self {
        Self {
            decision: Decision::NotRelevant,
            confidence,
            reasons: Vec::new(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.decision == Decision::Relevant
    }
}

/// External judge of whether a message is about the user's keywords.
#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    async fn classify(
        &self,
        text: &str,
        keywords: &str,
    ) -> Result<Judgement, ClassificationError>;
}

/// Build the classifier selected in the configuration.
pub fn build_oracle(config: &AiConfig) -> Result<Arc<dyn ClassificationOracle>, ConfigError> {
    match config.backend {
        AiBackend::Gemini => Ok(Arc::new(GeminiOracle::new(config)?)),
        AiBackend::Ollama => Ok(Arc::new(OllamaOracle::new(config)?)),
    }
}

/// Prompt asking for a single JSON verdict.
pub fn build_prompt(text: &str, keywords: &str) -> String {
    let flattened = text.replace('\n', " ");
    let clipped: String = flattened.chars().take(MAX_PROMPT_TEXT).collect();

    let mut prompt = format!(
        "Evaluate if the following Telegram message is relevant to the keywords: \"{}\".\n\n",
        keywords
    );
    prompt += &format!("Message:\n{}\n\n", clipped);
    prompt += "If the message names a magazine or publication, use your knowledge of what it typically covers.\n";
    prompt += "Answer with a single JSON object and nothing else:\n";
    prompt += "{\"decision\": \"RELEVANT\" | \"NOT_RELEVANT\" | \"UNCERTAIN\", \"confidence\": 0.0 to 1.0, \"reasons\": [\"short reason\"]}\n";
    prompt
}

/// Read a verdict out of raw model output.
///
/// Accepts a bare JSON object, one wrapped in prose or code fences, or a
/// `Decision: RELEVANT` style line.
pub fn parse_judgement(raw: &str) -> Result<Judgement, ClassificationError> {
    let trimmed = raw.trim();
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(judgement) = serde_json::from_str::<Judgement>(&trimmed[start..=end]) {
                return Ok(judgement);
            }
        }
    }

    for line in trimmed.lines() {
        let line = line.trim().trim_matches('*');
        let lower = line.to_lowercase();
        if let Some(rest) = lower.strip_prefix("decision:") {
            let rest = rest.trim().replace([' ', '-'], "_");
            let decision = match rest.trim_matches('"') {
                "relevant" => Decision::Relevant,
                "not_relevant" | "irrelevant" => Decision::NotRelevant,
                "uncertain" => Decision::Uncertain,
                _ => continue,
            };
            return Ok(Judgement {
                decision,
                confidence: 0.0,
                reasons: Vec::new(),
            });
        }
    }

    Err(ClassificationError::Malformed(
        trimmed.chars().take(200).collect(),
    ))
}

/// Google Gemini `generateContent` over HTTPS.
pub struct GeminiOracle {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiOracle {
    pub fn new(config: &AiConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or(ConfigError::Missing("GOOGLE_API_KEY"))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                name: "AI_ENDPOINT",
                reason: e.to_string(),
            })?;
        let base_url = config
            .endpoint
            .clone()
            .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client,
            base_url,
            model: config.model.clone(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl ClassificationOracle for GeminiOracle {
    async fn classify(
        &self,
        text: &str,
        keywords: &str,
    ) -> Result<Judgement, ClassificationError> {
        let prompt = build_prompt(text, keywords);
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: &prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassificationError::Api {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: GeminiResponse = response.json().await?;
        let answer: String = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect();
        debug!("Gemini raw response: {}", answer);
        parse_judgement(&answer)
    }
}

/// Local model served by Ollama.
pub struct OllamaOracle {
    ollama: Ollama,
    model: String,
}

impl OllamaOracle {
    pub fn new(config: &AiConfig) -> Result<Self, ConfigError> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());
        let url = Url::parse(&endpoint).map_err(|e| ConfigError::Invalid {
            name: "AI_ENDPOINT",
            reason: e.to_string(),
        })?;
        let host = format!(
            "{}://{}",
            url.scheme(),
            url.host_str().unwrap_or("localhost")
        );
        let port = url.port_or_known_default().unwrap_or(11434);
        Ok(Self {
            ollama: Ollama::new(host, port),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ClassificationOracle for OllamaOracle {
    async fn classify(
        &self,
        text: &str,
        keywords: &str,
    ) -> Result<Judgement, ClassificationError> {
        let request = GenerationRequest::new(self.model.clone(), build_prompt(text, keywords));
        let response = self
            .ollama
            .generate(request)
            .await
            .map_err(|e| ClassificationError::Backend(e.to_string()))?;
        let answer = response.response.trim().to_string();
        debug!("Ollama raw response: {}", answer);
        parse_judgement(&answer)
    }
}
