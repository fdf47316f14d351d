use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::connector::{ConnectorError, GmailConnector};
use crate::gmail::client::GmailClientError;
use crate::gmail::oauth::{ON_DEMAND_REFRESH_HORIZON, SCHEDULED_REFRESH_HORIZON};
use crate::gmail::parser::parse_message;
use crate::mailboxes::{Mailbox, MailboxError, MailboxRepository, SyncStatus};
use crate::messages::{MessageError, MessageRepository};

/// Backoff schedule for transient sync failures, capped at the last entry.
const RETRY_BACKOFF_SECS: [i64; 3] = [60, 300, 900];
const MAX_SYNC_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    /// Another mailbox holds the in-flight guard; the attempt was skipped.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryEntry {
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
enum SyncError {
    #[error("provider error: {0}")]
    Provider(#[from] GmailClientError),
    #[error("mailbox store error: {0}")]
    Mailbox(#[from] MailboxError),
    #[error("message store error: {0}")]
    Message(#[from] MessageError),
    #[error("token refresh error: {0}")]
    Connector(#[from] ConnectorError),
}

impl SyncError {
    fn is_transient(&self) -> bool {
        match self {
            SyncError::Provider(err) => err.is_transient(),
            SyncError::Connector(ConnectorError::OAuth(err)) => !err.is_fatal(),
            SyncError::Connector(ConnectorError::Mailbox(_)) => true,
            SyncError::Mailbox(_) | SyncError::Message(_) => true,
        }
    }
}

/// Releases the process-wide in-flight flag on every exit path.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-mailbox synchronization state machine. At most one mailbox syncs at a
/// time; timers that fire while a sync is running skip instead of queueing.
pub struct SyncEngine {
    mailboxes: MailboxRepository,
    messages: MessageRepository,
    connector: GmailConnector,
    config: SyncConfig,
    in_flight: AtomicBool,
    retries: Mutex<HashMap<i64, RetryEntry>>,
}

impl SyncEngine {
    pub fn new(
        mailboxes: MailboxRepository,
        messages: MessageRepository,
        connector: GmailConnector,
        config: SyncConfig,
    ) -> Self {
        Self {
            mailboxes,
            messages,
            connector,
            config,
            in_flight: AtomicBool::new(false),
            retries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn try_acquire(&self) -> Option<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| FlightGuard(&self.in_flight))
    }

    /// Bounded scan of inbox-labeled messages from scratch. Used on first
    /// connect and after stale-cursor recovery.
    pub async fn full_sync(&self, mailbox_id: i64, max_messages: Option<u32>) -> SyncOutcome {
        let Some(guard) = self.try_acquire() else {
            return SyncOutcome::Skipped;
        };

        let result = self.full_sync_locked(mailbox_id, max_messages).await;
        drop(guard);
        self.conclude(mailbox_id, result).await
    }

    /// Replays provider history since the stored cursor. Falls back to a full
    /// sync when no cursor exists yet or the provider reports it stale.
    pub async fn incremental_sync(&self, mailbox_id: i64) -> SyncOutcome {
        let Some(guard) = self.try_acquire() else {
            return SyncOutcome::Skipped;
        };

        let cursor = match self.mailboxes.get_by_id(mailbox_id).await {
            Ok(mailbox) => mailbox.history_cursor,
            Err(err) => {
                drop(guard);
                return self.conclude(mailbox_id, Err(err.into())).await;
            }
        };

        let Some(cursor) = cursor else {
            let result = self.full_sync_locked(mailbox_id, None).await;
            drop(guard);
            return self.conclude(mailbox_id, result).await;
        };

        let result = self.incremental_sync_locked(mailbox_id, &cursor).await;
        match result {
            Err(SyncError::Provider(err)) if err.is_not_found() => {
                // Stale cursor: reset to pending, release the guard, full sync.
                info!(mailbox_id, "history cursor rejected as stale, running full sync");
                if let Err(reset_err) = self.mailboxes.reset_for_full_sync(mailbox_id).await {
                    drop(guard);
                    return self.conclude(mailbox_id, Err(reset_err.into())).await;
                }
                self.clear_retry(mailbox_id);
                drop(guard);
                self.full_sync(mailbox_id, None).await
            }
            result => {
                drop(guard);
                self.conclude(mailbox_id, result).await
            }
        }
    }

    /// User-triggered sync. Fire-and-forget from the caller's point of view;
    /// failures are recorded on the mailbox, never surfaced synchronously.
    pub async fn sync_on_demand(&self, mailbox_id: i64, force_full: bool) -> SyncOutcome {
        let needs_full = force_full
            || match self.mailboxes.get_by_id(mailbox_id).await {
                Ok(mailbox) => mailbox.history_cursor.is_none(),
                Err(_) => false,
            };

        if needs_full {
            self.full_sync(mailbox_id, None).await
        } else {
            self.incremental_sync(mailbox_id).await
        }
    }

    /// One pass of the incremental timer over every eligible mailbox.
    pub async fn incremental_tick(&self) {
        let mailboxes = match self.mailboxes.list_active().await {
            Ok(mailboxes) => mailboxes,
            Err(err) => {
                warn!(error = %err, "failed to list mailboxes for incremental tick");
                return;
            }
        };

        for mailbox in mailboxes {
            if mailbox.sync_status == SyncStatus::Syncing {
                continue;
            }
            self.incremental_sync(mailbox.id).await;
        }
    }

    /// Refreshes tokens for mailboxes whose access token expires soon, and
    /// persists the re-encrypted result.
    pub async fn refresh_due_tokens(&self) {
        let due = match self.mailboxes.list_needing_refresh(SCHEDULED_REFRESH_HORIZON).await {
            Ok(due) => due,
            Err(err) => {
                warn!(error = %err, "failed to list mailboxes for token refresh");
                return;
            }
        };

        for mailbox in due {
            let mailbox_id = mailbox.id;
            match self
                .connector
                .refresh_if_expiring(mailbox, SCHEDULED_REFRESH_HORIZON)
                .await
            {
                Ok(_) => info!(mailbox_id, "refreshed provider tokens"),
                Err(err) => {
                    warn!(mailbox_id, error = %err, "token refresh failed");
                    if let Err(mark_err) = self
                        .mailboxes
                        .mark_error(mailbox_id, &format!("token refresh failed: {err}"))
                        .await
                    {
                        warn!(mailbox_id, error = %mark_err, "failed to record refresh failure");
                    }
                }
            }
        }
    }

    /// Re-invokes incremental sync for retry entries whose time has come.
    pub async fn process_due_retries(&self) {
        let now = Utc::now();
        let due: Vec<i64> = {
            let retries = self.retries.lock().expect("lock retries");
            retries
                .iter()
                .filter(|(_, entry)| entry.next_attempt_at <= now)
                .map(|(id, _)| *id)
                .collect()
        };

        for mailbox_id in due {
            info!(mailbox_id, "retrying sync");
            self.incremental_sync(mailbox_id).await;
        }
    }

    /// Forces mailboxes stuck in `syncing` back to `synced` so the next tick
    /// can attempt them again.
    pub async fn run_watchdog(&self) {
        let threshold = Duration::seconds(self.config.watchdog_threshold_secs);
        match self.mailboxes.reset_stuck_syncing(threshold).await {
            Ok(ids) if !ids.is_empty() => {
                warn!(mailboxes = ?ids, "watchdog reset mailboxes stuck in syncing");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "watchdog scan failed"),
        }
    }

    async fn conclude(&self, mailbox_id: i64, result: Result<(), SyncError>) -> SyncOutcome {
        match result {
            Ok(()) => {
                self.clear_retry(mailbox_id);
                SyncOutcome::Completed
            }
            Err(err) => {
                self.record_failure(mailbox_id, err).await;
                SyncOutcome::Failed
            }
        }
    }

    async fn full_sync_locked(
        &self,
        mailbox_id: i64,
        max_messages: Option<u32>,
    ) -> Result<(), SyncError> {
        let mailbox = self.mailboxes.mark_syncing(mailbox_id).await?;
        let mailbox = self.refresh_tokens(mailbox).await?;
        let client = self.connector.client_for(&mailbox);

        // The cursor is captured before paging so changes that race the scan
        // are replayed by the next incremental sync.
        let profile = client.get_profile().await?;

        let max_messages = max_messages.unwrap_or(self.config.full_sync_max_messages);
        let inbox = vec!["INBOX".to_string()];
        let mut imported: u32 = 0;
        let mut page_token: Option<String> = None;

        loop {
            let batch = self.config.page_size.min(max_messages - imported);
            if batch == 0 {
                break;
            }

            let response = client
                .list_messages(None, &inbox, page_token.as_deref(), Some(batch))
                .await?;
            let ids: Vec<String> = response.messages.iter().map(|m| m.id.clone()).collect();
            if ids.is_empty() {
                break;
            }

            let hydrated = client.fetch_messages(&ids).await;
            for raw in &hydrated {
                let parsed = parse_message(raw);
                self.messages.ingest(mailbox.id, &parsed).await?;
            }
            imported += ids.len() as u32;

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        self.mailboxes
            .mark_synced(mailbox_id, Some(profile.history_id.clone()))
            .await?;
        self.mailboxes.recount(mailbox_id).await?;

        info!(mailbox_id, imported, cursor = %profile.history_id, "full sync complete");
        Ok(())
    }

    async fn incremental_sync_locked(
        &self,
        mailbox_id: i64,
        cursor: &str,
    ) -> Result<(), SyncError> {
        let mailbox = self.mailboxes.mark_syncing(mailbox_id).await?;
        let mailbox = self.refresh_tokens(mailbox).await?;
        let client = self.connector.client_for(&mailbox);

        let delta = client.history_changes(cursor).await?;

        // Order matters: additions, then deletions, then label changes.
        if !delta.messages_added.is_empty() {
            let hydrated = client.fetch_messages(&delta.messages_added).await;
            for raw in &hydrated {
                let parsed = parse_message(raw);
                self.messages.ingest(mailbox.id, &parsed).await?;
            }
        }

        if !delta.messages_deleted.is_empty() {
            self.messages
                .soft_delete_by_provider_ids(mailbox.id, &delta.messages_deleted)
                .await?;
        }

        for change in &delta.labels_modified {
            self.messages
                .apply_label_delta(mailbox.id, &change.message_id, &change.added, &change.removed)
                .await?;
        }

        self.mailboxes
            .mark_synced(mailbox_id, delta.cursor.clone())
            .await?;
        self.mailboxes.recount(mailbox_id).await?;

        info!(
            mailbox_id,
            added = delta.messages_added.len(),
            deleted = delta.messages_deleted.len(),
            relabeled = delta.labels_modified.len(),
            "incremental sync complete"
        );
        Ok(())
    }

    async fn refresh_tokens(&self, mailbox: Mailbox) -> Result<Mailbox, SyncError> {
        Ok(self
            .connector
            .refresh_if_expiring(mailbox, ON_DEMAND_REFRESH_HORIZON)
            .await?)
    }

    async fn record_failure(&self, mailbox_id: i64, err: SyncError) {
        if !err.is_transient() {
            warn!(mailbox_id, error = %err, "sync failed with non-retryable error");
            self.clear_retry(mailbox_id);
            self.mark_error(mailbox_id, &err.to_string()).await;
            return;
        }

        let attempts = {
            let mut retries = self.retries.lock().expect("lock retries");
            let attempts = retries.get(&mailbox_id).map(|e| e.attempts).unwrap_or(0) + 1;
            if attempts > MAX_SYNC_ATTEMPTS {
                retries.remove(&mailbox_id);
            } else {
                let backoff_index = (attempts as usize - 1).min(RETRY_BACKOFF_SECS.len() - 1);
                retries.insert(
                    mailbox_id,
                    RetryEntry {
                        attempts,
                        next_attempt_at: Utc::now()
                            + Duration::seconds(RETRY_BACKOFF_SECS[backoff_index]),
                    },
                );
            }
            attempts
        };

        if attempts > MAX_SYNC_ATTEMPTS {
            self.mark_error(mailbox_id, &format!("{err} (max retries exceeded)"))
                .await;
        } else {
            warn!(mailbox_id, attempts, error = %err, "sync failed, retry scheduled");
            self.mark_error(mailbox_id, &err.to_string()).await;
        }
    }

    async fn mark_error(&self, mailbox_id: i64, message: &str) {
        if let Err(err) = self.mailboxes.mark_error(mailbox_id, message).await {
            warn!(mailbox_id, error = %err, "failed to record sync error");
        }
    }

    fn clear_retry(&self, mailbox_id: i64) {
        self.retries
            .lock()
            .expect("lock retries")
            .remove(&mailbox_id);
    }

    #[cfg(test)]
    pub(crate) fn retry_entry(&self, mailbox_id: i64) -> Option<RetryEntry> {
        self.retries
            .lock()
            .expect("lock retries")
            .get(&mailbox_id)
            .copied()
    }

    #[cfg(test)]
    pub(crate) fn force_retry_due(&self, mailbox_id: i64) {
        let mut retries = self.retries.lock().expect("lock retries");
        if let Some(entry) = retries.get_mut(&mailbox_id) {
            entry.next_attempt_at = Utc::now() - Duration::seconds(1);
        }
    }
}
