//! Summarizer capability used by the consolidation engine.
//!
//! The engine only sees the [`Summarizer`] trait; [`HttpSummarizer`] talks to any
//! OpenAI-compatible `/v1/chat/completions` endpoint.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SummarizerConfig;

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Compress a transcript into text that is expected to contain a JSON object
    /// with `topic`, `summary` and `importance`. The output is untrusted.
    async fn summarize(&self, transcript: &str, participants: &[String]) -> anyhow::Result<String>;
}

const SYSTEM_PROMPT: &str = "You compress group chat conversations into memories.
Return ONLY a JSON object:
{
    \"topic\": \"short topic label\",
    \"summary\": \"who discussed what, decisions taken, important details\",
    \"importance\": 0.1-1.0,
    \"key_points\": [\"point 1\", \"point 2\"]
}
Rules:
- keep every decision, plan and concrete fact
- drop flood and meaningless messages
- importance 0.1-0.3 for flood, 0.4-0.6 for ordinary chat, 0.7-1.0 for important decisions";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

pub struct HttpSummarizer {
    base_url: String,
    model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl HttpSummarizer {
    /// The engine enforces its own hard timeout; the client timeout here only
    /// guards against a connection that never closes.
    pub fn new(config: &SummarizerConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build summarizer HTTP client: {}", e))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            http_client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn user_message(transcript: &str, participants: &[String]) -> String {
        format!(
            "GROUP CONVERSATION\nParticipants: {}\n\n{}\n\nReturn the JSON summary of this conversation.",
            participants.join(", "),
            transcript
        )
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, transcript: &str, participants: &[String]) -> anyhow::Result<String> {
        debug!(
            "Summarizing transcript ({} chars, {} participants)",
            transcript.len(),
            participants.len()
        );
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: SYSTEM_PROMPT.to_string() },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::user_message(transcript, participants),
                },
            ],
            max_tokens: 2000,
            temperature: 0.2,
            stream: false,
        };

        let mut builder = self.http_client.post(self.completions_url()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Summarizer request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Summarizer returned {}: {}", status, body));
        }
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse summarizer response: {}", e))?;
        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if content.trim().is_empty() {
            anyhow::bail!("Summarizer returned an empty completion");
        }
        Ok(content)
    }
}
