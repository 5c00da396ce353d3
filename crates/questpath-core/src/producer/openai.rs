//! [`PlanProducer`] backed by an OpenAI-compatible chat completions API.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{GeneratedPlan, PlanProducer, ProducerError, parse_generated_plan};

const SYSTEM_PROMPT: &str = r#"You turn a personal goal into a structured learning roadmap.
Respond with a single JSON object and nothing else, shaped exactly like:
{
  "title": "short goal title",
  "category": "one or two word category",
  "difficulty": "beginner" | "intermediate" | "advanced",
  "roadmap": {
    "name": "roadmap name",
    "levels": [
      {
        "order": 1,
        "title": "level title",
        "description": "what this level covers",
        "topics": [{"name": "topic", "explanation": "one sentence"}],
        "xp_reward": 100
      }
    ]
  }
}
Levels are numbered from 1 without gaps. Use 4 to 8 levels with 3 to 6 topics each."#;

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub api_key: String,
    pub model: String,
    /// Base URL up to and including `/v1`.
    pub api_base: String,
    /// Upper bound on one generation, enforced by the pipeline.
    pub timeout: Duration,
}

impl ProducerConfig {
    pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
    pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: Self::DEFAULT_MODEL.to_owned(),
            api_base: Self::DEFAULT_API_BASE.to_owned(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiProducer {
    client: Client,
    config: ProducerConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProducer {
    pub fn new(config: ProducerConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'))
    }
}

/// Map an HTTP status from the provider onto the producer taxonomy.
fn classify_status(status: StatusCode, body: &str) -> ProducerError {
    let detail = format!("provider returned {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProducerError::UpstreamUnavailable(detail)
    } else {
        ProducerError::Unknown(detail)
    }
}

fn classify_transport(err: &reqwest::Error) -> ProducerError {
    if err.is_timeout() || err.is_connect() {
        ProducerError::UpstreamUnavailable(err.to_string())
    } else {
        ProducerError::Unknown(err.to_string())
    }
}

#[async_trait]
impl PlanProducer for OpenAiProducer {
    async fn generate(&self, description: &str) -> Result<GeneratedPlan, ProducerError> {
        let body = json!({
            "model": self.config.model,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": description},
            ],
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "plan generation request failed");
            return Err(classify_status(status, &text));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProducerError::UpstreamUnavailable(e.to_string())
            } else {
                ProducerError::MalformedOutput(format!("undecodable completion: {e}"))
            }
        })?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProducerError::MalformedOutput("completion has no content".into()))?;

        debug!(bytes = content.len(), "plan generated");
        parse_generated_plan(&content)
    }
}
