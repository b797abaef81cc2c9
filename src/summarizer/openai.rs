use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::Summarizer;
use crate::config::SummarizerConfig;
use crate::error::CallError;

const SYSTEM_PROMPT: &str = "You are an expert meeting note taker.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn build_prompt(transcript: &str) -> String {
    format!(
        "Analyze this meeting transcript and write structured meeting notes.\n\n\
         Transcript:\n{transcript}\n\n\
         Format:\n\
         Meeting notes:\n\
         * [topic]: [who does what]\n    \
         * [subtopic]: [who does what]\n\n\
         Follow-up tasks:\n\
         * [task]: [description] ([person responsible])\n"
    )
}

/// Chat-completions summarizer for OpenAI-compatible endpoints.
pub struct OpenAISummarizer {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAISummarizer {
    pub fn new(config: &SummarizerConfig, request_timeout: Duration) -> Result<Self> {
        if config.api_key.is_empty() {
            bail!("summarizer.api_key is empty (set it in config or SCRIBELINE_SUMMARIZER_API_KEY)");
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let endpoint = config.api_endpoint.trim_end_matches('/').to_string();

        info!(
            "Initialized summarizer with endpoint: {} (model {})",
            endpoint, config.model
        );

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Summarizer for OpenAISummarizer {
    fn name(&self) -> &'static str {
        "OpenAI chat completions"
    }

    async fn summarize(&self, transcript: &str) -> Result<String, CallError> {
        if transcript.trim().is_empty() {
            return Err(CallError::permanent("transcript is empty"));
        }

        let prompt = build_prompt(transcript);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(
            "Requesting notes for a {} character transcript",
            transcript.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::from_reqwest(&e))?;

        if !status.is_success() {
            error!("Summarization failed with status {}: {}", status, body);
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(CallError::from_status(status, &detail));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| CallError::permanent(format!("malformed completion response: {e}")))?;
        let notes = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if notes.is_empty() {
            return Err(CallError::permanent("completion returned no content"));
        }
        Ok(notes)
    }
}
