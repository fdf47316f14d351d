use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ai::{AiClient, AiError};
use crate::messages::EMBEDDING_DIM;

/// Test double for the AI adapter. Embeddings are deterministic functions of
/// the input text unless scripted; failures can be queued per call.
#[derive(Default)]
pub struct MockAiClient {
    scripted_embeddings: Mutex<VecDeque<Result<Vec<f32>, String>>>,
    scripted_summaries: Mutex<VecDeque<Result<String, String>>>,
    embed_calls: Mutex<Vec<String>>,
    summarize_calls: Mutex<Vec<String>>,
}

impl MockAiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_embedding(&self, result: Result<Vec<f32>, &str>) {
        self.scripted_embeddings
            .lock()
            .expect("lock embeddings")
            .push_back(result.map_err(str::to_string));
    }

    pub fn push_summary(&self, result: Result<&str, &str>) {
        self.scripted_summaries
            .lock()
            .expect("lock summaries")
            .push_back(
                result
                    .map(str::to_string)
                    .map_err(str::to_string),
            );
    }

    pub fn embed_calls(&self) -> Vec<String> {
        self.embed_calls.lock().expect("lock calls").clone()
    }

    pub fn summarize_calls(&self) -> Vec<String> {
        self.summarize_calls.lock().expect("lock calls").clone()
    }

    /// Deterministic unit-norm vector derived from the input bytes, so equal
    /// inputs embed identically and similarity tests are reproducible.
    pub fn deterministic_embedding(text: &str) -> Vec<f32> {
        let mut state: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.bytes() {
            state ^= byte as u64;
            state = state.wrapping_mul(0x0000_0100_0000_01b3);
        }

        let mut vector = Vec::with_capacity(EMBEDDING_DIM);
        for _ in 0..EMBEDDING_DIM {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            vector.push(((state % 2000) as f32 - 1000.0) / 1000.0);
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl AiClient for MockAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        self.embed_calls
            .lock()
            .expect("lock calls")
            .push(text.to_string());

        if let Some(scripted) = self
            .scripted_embeddings
            .lock()
            .expect("lock embeddings")
            .pop_front()
        {
            return scripted.map_err(AiError::Provider);
        }

        Ok(Self::deterministic_embedding(text))
    }

    async fn summarize(&self, subject: Option<&str>, body: &str) -> Result<String, AiError> {
        self.summarize_calls
            .lock()
            .expect("lock calls")
            .push(format!("{}|{}", subject.unwrap_or(""), body));

        if let Some(scripted) = self
            .scripted_summaries
            .lock()
            .expect("lock summaries")
            .pop_front()
        {
            return scripted.map_err(AiError::Provider);
        }

        Ok(format!("Summary: {}", subject.unwrap_or("(no subject)")))
    }
}
