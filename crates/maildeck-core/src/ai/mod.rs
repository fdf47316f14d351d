pub mod mock;

pub use mock::MockAiClient;

use async_trait::async_trait;
use genai::Client as GenaiClient;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest};
use thiserror::Error;

use crate::config::AiConfig;

/// How much body text feeds the embedding projection.
const EMBEDDING_CONTENT_CHARS: usize = 2000;

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize emails. Reply with a short plain-text summary \
of the email in at most three sentences. Do not add preamble.";

#[derive(Debug, Error)]
pub enum AiError {
    #[error("ai provider error: {0}")]
    Provider(String),
    #[error("ai provider returned an empty response")]
    EmptyResponse,
}

/// Minimal async interface for the AI features: fixed-dimension embeddings
/// and short summaries.
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError>;

    async fn summarize(&self, subject: Option<&str>, body: &str) -> Result<String, AiError>;
}

/// Default AI client backed by the genai crate.
pub struct GenaiAiClient {
    client: GenaiClient,
    chat_model: String,
    embedding_model: String,
}

impl GenaiAiClient {
    pub fn new(config: AiConfig) -> Self {
        Self {
            client: GenaiClient::default(),
            chat_model: namespaced_model(&config.provider, &config.model),
            embedding_model: namespaced_model(&config.provider, &config.embedding_model),
        }
    }
}

#[async_trait]
impl AiClient for GenaiAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        let response = self
            .client
            .embed(&self.embedding_model, text.to_string(), None)
            .await
            .map_err(|err| AiError::Provider(err.to_string()))?;

        let embedding = response.first_embedding().ok_or(AiError::EmptyResponse)?;
        Ok(embedding.vector().iter().map(|v| *v as f32).collect())
    }

    async fn summarize(&self, subject: Option<&str>, body: &str) -> Result<String, AiError> {
        let user_prompt = match subject {
            Some(subject) => format!("Subject: {subject}\n\n{body}"),
            None => body.to_string(),
        };
        let request = ChatRequest::from_messages(vec![
            ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(user_prompt),
        ]);
        let options = ChatOptions::default().with_temperature(0.2);

        let response = self
            .client
            .exec_chat(&self.chat_model, request, Some(&options))
            .await
            .map_err(|err| AiError::Provider(err.to_string()))?;

        let summary = response
            .first_text()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or(AiError::EmptyResponse)?;
        Ok(summary.to_string())
    }
}

/// Canonical projection fed to the embedding model: subject, sender and the
/// first two thousand characters of content, one field per line. HTML-only
/// bodies fall back to a plain-text rendering.
pub fn embedding_input(
    subject: Option<&str>,
    from_name: Option<&str>,
    from_email: &str,
    body_text: Option<&str>,
    body_html: Option<&str>,
) -> String {
    let text_fallback;
    let content = match body_text {
        Some(text) => text,
        None => {
            text_fallback = body_html
                .map(|html| html2text::from_read(html.as_bytes(), 80))
                .unwrap_or_default();
            text_fallback.as_str()
        }
    };
    let content: String = content.chars().take(EMBEDDING_CONTENT_CHARS).collect();

    format!(
        "Subject: {}\nFrom: {}\nContent: {}",
        subject.unwrap_or(""),
        from_name.unwrap_or(from_email),
        content
    )
}

/// Plain-text body for summarization: the text part when present, otherwise
/// a text rendering of the HTML part.
pub fn plain_text_body(body_text: Option<&str>, body_html: Option<&str>) -> Option<String> {
    if let Some(text) = body_text.filter(|t| !t.trim().is_empty()) {
        return Some(text.to_string());
    }
    body_html
        .map(|html| html2text::from_read(html.as_bytes(), 80))
        .filter(|t| !t.trim().is_empty())
}

fn namespaced_model(provider: &str, model: &str) -> String {
    if provider.is_empty() {
        model.to_string()
    } else {
        format!("{}::{}", provider.to_lowercase(), model)
    }
}
