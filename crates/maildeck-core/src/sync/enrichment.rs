use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ai::{AiClient, embedding_input};
use crate::mailboxes::MailboxRepository;
use crate::messages::MessageRepository;

/// Background catch-up generation of missing embeddings, newest first.
/// Per-message failures are logged and never abort the batch.
pub struct EnrichmentWorker {
    mailboxes: MailboxRepository,
    messages: MessageRepository,
    ai: Arc<dyn AiClient>,
    batch_size: u32,
}

impl EnrichmentWorker {
    pub fn new(
        mailboxes: MailboxRepository,
        messages: MessageRepository,
        ai: Arc<dyn AiClient>,
        batch_size: u32,
    ) -> Self {
        Self {
            mailboxes,
            messages,
            ai,
            batch_size,
        }
    }

    /// One pass over every active mailbox. Returns how many embeddings were
    /// generated.
    pub async fn run_once(&self) -> u64 {
        let mailboxes = match self.mailboxes.list_active().await {
            Ok(mailboxes) => mailboxes,
            Err(err) => {
                warn!(error = %err, "failed to list mailboxes for enrichment");
                return 0;
            }
        };

        let mut generated = 0u64;
        for mailbox in mailboxes {
            generated += self.enrich_mailbox(mailbox.id).await;
        }
        generated
    }

    /// Generates and persists one embedding; used by the force-enrichment API
    /// endpoints as well as the batch pass.
    pub async fn enrich_message(&self, message_id: i64) -> Result<(), EnrichmentError> {
        let message = self.messages.get_by_id(message_id).await?;
        let input = embedding_input(
            message.subject.as_deref(),
            message.from_name.as_deref(),
            &message.from_email,
            message.body_text.as_deref(),
            message.body_html.as_deref(),
        );
        let vector = self.ai.embed(&input).await?;
        self.messages.store_embedding(message.id, &vector).await?;
        Ok(())
    }

    async fn enrich_mailbox(&self, mailbox_id: i64) -> u64 {
        let pending = match self
            .messages
            .list_missing_embeddings(mailbox_id, self.batch_size)
            .await
        {
            Ok(pending) => pending,
            Err(err) => {
                warn!(mailbox_id, error = %err, "failed to list messages for enrichment");
                return 0;
            }
        };

        let mut generated = 0u64;
        for message in pending {
            match self.enrich_message(message.id).await {
                Ok(()) => generated += 1,
                Err(err) => {
                    warn!(
                        mailbox_id,
                        message_id = message.id,
                        error = %err,
                        "embedding generation failed"
                    );
                }
            }
        }

        if generated > 0 {
            info!(mailbox_id, generated, "generated embeddings");
        }
        generated
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("store error: {0}")]
    Store(#[from] crate::messages::MessageError),
    #[error("ai error: {0}")]
    Ai(#[from] crate::ai::AiError),
}

pub async fn run_enrichment_worker(
    worker: Arc<EnrichmentWorker>,
    interval_secs: u64,
    shutdown: CancellationToken,
) {
    let mut tick = interval(Duration::from_secs(interval_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                if shutdown.is_cancelled() {
                    break;
                }
                worker.run_once().await;
            }
        }
    }

    info!("enrichment worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockAiClient;
    use crate::mailboxes::test_support::{seed_mailbox, seed_user, setup_db, test_secrets};
    use crate::messages::EMBEDDING_DIM;
    use crate::messages::test_support::sample_parsed;

    async fn setup_worker(
        batch_size: u32,
    ) -> (
        EnrichmentWorker,
        Arc<MockAiClient>,
        MessageRepository,
        i64,
        tempfile::TempDir,
    ) {
        let (db, dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let mailboxes = MailboxRepository::new(db.clone(), test_secrets());
        let messages = MessageRepository::new(db.clone());
        let ai = Arc::new(MockAiClient::new());
        let worker = EnrichmentWorker::new(mailboxes, messages.clone(), ai.clone(), batch_size);
        (worker, ai, messages, mailbox.id, dir)
    }

    #[tokio::test]
    async fn generates_embeddings_for_messages_missing_them() {
        let (worker, ai, messages, mailbox_id, _dir) = setup_worker(50).await;

        let mut parsed = sample_parsed("m1");
        parsed.subject = Some("Quarterly numbers".into());
        parsed.body_text = Some("Revenue is up".into());
        let message = messages.ingest(mailbox_id, &parsed).await.expect("ingest");

        let generated = worker.run_once().await;
        assert_eq!(generated, 1);

        let stored = messages.get_by_id(message.id).await.expect("reload");
        assert!(stored.embedding.is_some());
        assert!(stored.embedding_generated_at.is_some());

        let calls = ai.embed_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("Subject: Quarterly numbers\nFrom: Alice\nContent: Revenue is up"));

        // Second pass finds nothing to do.
        assert_eq!(worker.run_once().await, 0);
    }

    #[tokio::test]
    async fn per_message_failures_do_not_abort_the_batch() {
        let (worker, ai, messages, mailbox_id, _dir) = setup_worker(50).await;

        // Newest-first ordering: m2 is newer than m1, so m2 embeds first.
        let mut older = sample_parsed("m1");
        older.received_at = chrono::Utc::now() - chrono::Duration::hours(2);
        messages.ingest(mailbox_id, &older).await.expect("ingest");
        messages
            .ingest(mailbox_id, &sample_parsed("m2"))
            .await
            .expect("ingest");

        ai.push_embedding(Err("provider quota exceeded"));

        let generated = worker.run_once().await;
        assert_eq!(generated, 1, "second message still embeds");

        let pending = messages
            .list_missing_embeddings(mailbox_id, 10)
            .await
            .expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].provider_message_id, "m2", "failed one remains");
    }

    #[tokio::test]
    async fn dimension_mismatch_is_skipped_not_fatal() {
        let (worker, ai, messages, mailbox_id, _dir) = setup_worker(50).await;

        messages
            .ingest(mailbox_id, &sample_parsed("m1"))
            .await
            .expect("ingest");
        ai.push_embedding(Ok(vec![0.1, 0.2, 0.3]));

        let generated = worker.run_once().await;
        assert_eq!(generated, 0);

        let pending = messages
            .list_missing_embeddings(mailbox_id, 10)
            .await
            .expect("pending");
        assert_eq!(pending.len(), 1, "row left for a later pass");
    }

    #[tokio::test]
    async fn batch_size_caps_work_per_mailbox() {
        let (worker, _ai, messages, mailbox_id, _dir) = setup_worker(2).await;

        for i in 0..5 {
            messages
                .ingest(mailbox_id, &sample_parsed(&format!("m{i}")))
                .await
                .expect("ingest");
        }

        assert_eq!(worker.run_once().await, 2);
        assert_eq!(worker.run_once().await, 2);
        assert_eq!(worker.run_once().await, 1);
    }

    #[tokio::test]
    async fn enrich_message_uses_html_fallback() {
        let (worker, ai, messages, mailbox_id, _dir) = setup_worker(50).await;

        let mut parsed = sample_parsed("m1");
        parsed.body_text = None;
        parsed.body_html = Some("<p>Rendered <b>content</b></p>".into());
        let message = messages.ingest(mailbox_id, &parsed).await.expect("ingest");

        worker
            .enrich_message(message.id)
            .await
            .expect("enrich succeeds");

        let calls = ai.embed_calls();
        assert!(calls[0].contains("Rendered"));
        assert!(!calls[0].contains("<p>"));

        let stored = messages.get_by_id(message.id).await.expect("reload");
        assert_eq!(stored.embedding.expect("embedding").len(), EMBEDDING_DIM);
    }
}
