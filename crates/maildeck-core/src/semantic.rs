use std::sync::Arc;

use thiserror::Error;

use crate::ai::{AiClient, AiError};
use crate::messages::{EMBEDDING_DIM, MessageError, MessageRepository};

#[derive(Debug, Clone)]
pub struct SemanticSearchParams {
    pub query: String,
    pub min_similarity: f32,
    pub mailbox_id: Option<i64>,
    pub page: u32,
    pub limit: u32,
}

impl Default for SemanticSearchParams {
    fn default() -> Self {
        Self {
            query: String::new(),
            min_similarity: 0.5,
            mailbox_id: None,
            page: 1,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub message_id: i64,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SemanticResults {
    pub hits: Vec<SemanticHit>,
    pub total: u64,
}

#[derive(Debug, Error)]
pub enum SemanticSearchError {
    #[error("store error: {0}")]
    Store(#[from] MessageError),
    #[error("embedding error: {0}")]
    Ai(#[from] AiError),
    #[error("query embedding has {actual} dimensions, expected {expected}")]
    QueryDimension { expected: usize, actual: usize },
}

/// Cosine-similarity search over stored message embeddings.
#[derive(Clone)]
pub struct SemanticSearchService {
    messages: MessageRepository,
    ai: Arc<dyn AiClient>,
}

impl SemanticSearchService {
    pub fn new(messages: MessageRepository, ai: Arc<dyn AiClient>) -> Self {
        Self { messages, ai }
    }

    pub async fn search(
        &self,
        user_id: i64,
        params: &SemanticSearchParams,
    ) -> Result<SemanticResults, SemanticSearchError> {
        let query = params.query.trim();
        if query.is_empty() {
            return Ok(SemanticResults::default());
        }

        let query_vector = self.ai.embed(query).await?;
        if query_vector.len() != EMBEDDING_DIM {
            return Err(SemanticSearchError::QueryDimension {
                expected: EMBEDDING_DIM,
                actual: query_vector.len(),
            });
        }

        let stored = self
            .messages
            .embeddings_for_user(user_id, params.mailbox_id)
            .await?;

        let mut hits: Vec<SemanticHit> = stored
            .into_iter()
            .filter_map(|(message_id, vector)| {
                let similarity = cosine_similarity(&query_vector, &vector)?;
                (similarity >= params.min_similarity).then_some(SemanticHit {
                    message_id,
                    similarity,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.message_id.cmp(&b.message_id))
        });

        let total = hits.len() as u64;
        let limit = params.limit.clamp(1, 100) as usize;
        let offset = (params.page.max(1) as usize - 1) * limit;
        let hits = hits.into_iter().skip(offset).take(limit).collect();

        Ok(SemanticResults { hits, total })
    }
}

/// `1 - cosine_distance`. Returns `None` for mismatched widths or zero-norm
/// vectors, which simply drop out of the result set.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
