use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use thiserror::Error;

use crate::messages::{MessageError, MessageRepository, SearchCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Subject,
    Sender,
    Body,
    #[default]
    All,
}

/// Caller-supplied field weights. They are not required to sum to one.
#[derive(Debug, Clone, Copy)]
pub struct SearchWeights {
    pub subject: f64,
    pub sender: f64,
    pub body: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            subject: 0.5,
            sender: 0.3,
            body: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FuzzySearchParams {
    pub query: String,
    pub threshold: f64,
    pub scope: SearchScope,
    pub mailbox_id: Option<i64>,
    pub label: Option<String>,
    pub weights: SearchWeights,
    pub page: u32,
    pub limit: u32,
}

impl Default for FuzzySearchParams {
    fn default() -> Self {
        Self {
            query: String::new(),
            threshold: 0.2,
            scope: SearchScope::All,
            mailbox_id: None,
            label: None,
            weights: SearchWeights::default(),
            page: 1,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyHit {
    pub message_id: i64,
    pub relevance: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuzzyResults {
    pub hits: Vec<FuzzyHit>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Suggestions {
    pub contacts: Vec<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("store error: {0}")]
    Store(#[from] MessageError),
}

/// Hybrid fuzzy ranker over locally-stored messages: trigram similarity on
/// subject and sender, phrase rank on body text plus AI summary.
#[derive(Clone)]
pub struct SearchService {
    messages: MessageRepository,
}

impl SearchService {
    pub fn new(messages: MessageRepository) -> Self {
        Self { messages }
    }

    pub async fn fuzzy(
        &self,
        user_id: i64,
        params: &FuzzySearchParams,
    ) -> Result<FuzzyResults, SearchError> {
        let query = params.query.trim();
        if query.is_empty() {
            return Ok(FuzzyResults::default());
        }

        let candidates = self
            .messages
            .search_candidates(user_id, params.mailbox_id)
            .await?;

        let query_lower = query.to_lowercase();
        let query_trigrams = trigrams(&query_lower);
        let query_tokens = tokenize(&query_lower);

        let mut scored: Vec<FuzzyHit> = Vec::new();
        for candidate in &candidates {
            if let Some(label) = params.label.as_deref() {
                if !candidate.labels.iter().any(|l| l == label) {
                    continue;
                }
            }

            let subject = candidate.subject.as_deref().unwrap_or("");
            let from_name = candidate.from_name.as_deref().unwrap_or("");
            let from_email = candidate.from_email.as_str();

            let subject_score = field_score(&query_lower, &query_trigrams, subject);
            let sender_score = field_score(&query_lower, &query_trigrams, from_name)
                .max(field_score(&query_lower, &query_trigrams, from_email));

            let include_body = matches!(params.scope, SearchScope::Body | SearchScope::All);
            let (body_score, body_matches) = if include_body {
                let mut document = candidate.body_text.clone().unwrap_or_default();
                if let Some(summary) = candidate.ai_summary.as_deref() {
                    document.push(' ');
                    document.push_str(summary);
                }
                phrase_rank(&tokenize(&document.to_lowercase()), &query_tokens)
            } else {
                (0.0, false)
            };

            let subject_qualifies = subject_score > params.threshold
                || subject.to_lowercase().contains(&query_lower);
            let sender_qualifies = sender_score > params.threshold
                || from_name.to_lowercase().contains(&query_lower)
                || from_email.to_lowercase().contains(&query_lower);

            let qualifies = match params.scope {
                SearchScope::Subject => subject_qualifies,
                SearchScope::Sender => sender_qualifies,
                SearchScope::Body => body_matches,
                SearchScope::All => subject_qualifies || sender_qualifies || body_matches,
            };
            if !qualifies {
                continue;
            }

            let relevance = params.weights.subject * subject_score
                + params.weights.sender * sender_score
                + params.weights.body * body_score;
            scored.push(FuzzyHit {
                message_id: candidate.id,
                relevance,
            });
        }

        scored.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.message_id.cmp(&b.message_id))
        });

        let total = scored.len() as u64;
        let limit = params.limit.clamp(1, 100) as usize;
        let offset = (params.page.max(1) as usize - 1) * limit;
        let hits = scored.into_iter().skip(offset).take(limit).collect();

        Ok(FuzzyResults { hits, total })
    }

    /// Contact and keyword completions for a typed prefix.
    pub async fn suggestions(
        &self,
        user_id: i64,
        prefix: &str,
    ) -> Result<Suggestions, SearchError> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() {
            return Ok(Suggestions::default());
        }

        let mut contacts = Vec::new();
        let mut seen = HashSet::new();
        for (name, email) in self.messages.sender_contacts(user_id).await? {
            let display = match name.filter(|n| !n.trim().is_empty()) {
                Some(name) => name,
                None => email,
            };
            if display.to_lowercase().contains(&prefix) && seen.insert(display.clone()) {
                contacts.push(display);
                if contacts.len() == 10 {
                    break;
                }
            }
        }

        let mut frequencies: HashMap<String, usize> = HashMap::new();
        for subject in self.messages.subjects(user_id).await? {
            for token in tokenize(&subject.to_lowercase()) {
                if token.chars().count() > 3 && token.contains(&prefix) {
                    *frequencies.entry(token).or_default() += 1;
                }
            }
        }
        let mut keywords: Vec<(String, usize)> = frequencies.into_iter().collect();
        keywords.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let keywords = keywords.into_iter().take(10).map(|(word, _)| word).collect();

        Ok(Suggestions { contacts, keywords })
    }
}

/// Score of a query against one short field:
/// `max(word_sim(query, field), sim(field, query))`.
fn field_score(query_lower: &str, query_trigrams: &HashSet<String>, field: &str) -> f64 {
    if field.is_empty() {
        return 0.0;
    }
    let field_lower = field.to_lowercase();
    let field_trigrams = trigrams(&field_lower);
    word_similarity(query_trigrams, &field_trigrams)
        .max(jaccard(query_trigrams, &field_trigrams))
}

/// Trigram shingles over each word, padded so prefixes weigh in, in the style
/// of Postgres trigram matching.
fn trigrams(text: &str) -> HashSet<String> {
    let mut set = HashSet::new();
    for word in text
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = format!("  {word} ").chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}

/// Symmetric set similarity over trigrams.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Asymmetric similarity: how much of the query's trigram set appears in the
/// target. A query that is a typo of one word in a long field still scores
/// high, which plain jaccard would dilute.
fn word_similarity(query: &HashSet<String>, target: &HashSet<String>) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let shared = query.intersection(target).count();
    shared as f64 / query.len() as f64
}

/// Lowercased alphanumeric tokens with light suffix stemming.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(stem)
        .collect()
}

fn stem(token: &str) -> String {
    for suffix in ["ing", "ed", "es", "s"] {
        if let Some(stripped) = token.strip_suffix(suffix) {
            if stripped.chars().count() >= 3 {
                return stripped.to_string();
            }
        }
    }
    token.to_string()
}

/// Rank of a tokenized document against a tokenized query. The score is the
/// fraction of query tokens present; the predicate requires all of them.
fn phrase_rank(document: &[String], query: &[String]) -> (f64, bool) {
    if query.is_empty() || document.is_empty() {
        return (0.0, false);
    }
    let document: HashSet<&String> = document.iter().collect();
    let distinct: HashSet<&String> = query.iter().collect();
    let matched = distinct
        .iter()
        .filter(|token| document.contains(**token))
        .count();
    let rank = matched as f64 / distinct.len() as f64;
    (rank, matched == distinct.len())
}
