use std::collections::{HashMap, HashSet};

use futures::{StreamExt, stream};
use tracing::warn;

use crate::gmail::client::{GmailClient, GmailClientError};
use crate::gmail::oauth::TokenStore;
use crate::gmail::types::Message;

/// Maximum messages hydrated concurrently per batch.
const HYDRATION_CONCURRENCY: usize = 50;

/// One message's merged label changes from a history replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDelta {
    pub message_id: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Aggregated view of every change since a history cursor. Id lists are
/// deduplicated; `cursor` is the latest id reported across all pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryDelta {
    pub cursor: Option<String>,
    pub messages_added: Vec<String>,
    pub messages_deleted: Vec<String>,
    pub labels_modified: Vec<LabelDelta>,
}

impl<S: TokenStore> GmailClient<S> {
    /// Replays the change log since `start_history_id`, paging until the
    /// provider stops returning a `nextPageToken`.
    pub async fn history_changes(
        &self,
        start_history_id: &str,
    ) -> Result<HistoryDelta, GmailClientError> {
        let mut delta = HistoryDelta::default();
        let mut seen_added = HashSet::new();
        let mut seen_deleted = HashSet::new();
        let mut label_order: Vec<String> = Vec::new();
        let mut label_changes: HashMap<String, (Vec<String>, Vec<String>)> = HashMap::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self
                .list_history(start_history_id, page_token.as_deref(), None)
                .await?;

            if response.history_id.is_some() {
                delta.cursor = response.history_id.clone();
            }

            for record in &response.history {
                if let Some(added) = &record.messages_added {
                    for change in added {
                        if seen_added.insert(change.message.id.clone()) {
                            delta.messages_added.push(change.message.id.clone());
                        }
                    }
                }
                if let Some(deleted) = &record.messages_deleted {
                    for change in deleted {
                        if seen_deleted.insert(change.message.id.clone()) {
                            delta.messages_deleted.push(change.message.id.clone());
                        }
                    }
                }
                if let Some(labels_added) = &record.labels_added {
                    for change in labels_added {
                        let entry = label_changes
                            .entry(change.message.id.clone())
                            .or_insert_with(|| {
                                label_order.push(change.message.id.clone());
                                (Vec::new(), Vec::new())
                            });
                        for label in &change.label_ids {
                            entry.1.retain(|l| l != label);
                            if !entry.0.contains(label) {
                                entry.0.push(label.clone());
                            }
                        }
                    }
                }
                if let Some(labels_removed) = &record.labels_removed {
                    for change in labels_removed {
                        let entry = label_changes
                            .entry(change.message.id.clone())
                            .or_insert_with(|| {
                                label_order.push(change.message.id.clone());
                                (Vec::new(), Vec::new())
                            });
                        for label in &change.label_ids {
                            entry.0.retain(|l| l != label);
                            if !entry.1.contains(label) {
                                entry.1.push(label.clone());
                            }
                        }
                    }
                }
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        delta.labels_modified = label_order
            .into_iter()
            .filter_map(|message_id| {
                let (added, removed) = label_changes.remove(&message_id)?;
                if added.is_empty() && removed.is_empty() {
                    return None;
                }
                Some(LabelDelta {
                    message_id,
                    added,
                    removed,
                })
            })
            .collect();

        Ok(delta)
    }

    /// Hydrates a batch of messages, at most fifty in flight at a time.
    /// Per-message failures are logged and dropped from the result set.
    pub async fn fetch_messages(&self, ids: &[String]) -> Vec<Message> {
        let fetched: Vec<Option<Message>> = stream::iter(ids.iter().cloned())
            .map(|id| async move {
                match self.get_message(&id).await {
                    Ok(message) => Some(message),
                    Err(err) => {
                        warn!(message_id = %id, error = %err, "failed to hydrate message");
                        None
                    }
                }
            })
            .buffer_unordered(HYDRATION_CONCURRENCY)
            .collect()
            .await;

        fetched.into_iter().flatten().collect()
    }
}
