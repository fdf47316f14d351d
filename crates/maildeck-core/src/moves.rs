use thiserror::Error;

use crate::columns::{ColumnError, ColumnRepository};
use crate::connector::{ConnectorError, GmailConnector};
use crate::gmail::client::GmailClientError;
use crate::gmail::oauth::ON_DEMAND_REFRESH_HORIZON;
use crate::mailboxes::{MailboxError, MailboxRepository};
use crate::messages::{Message, MessageError, MessageRepository, merge_labels};

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("message not found")]
    MessageNotFound,
    #[error("column not found")]
    ColumnNotFound,
    #[error("provider rejected the label change: {0}")]
    Provider(#[from] GmailClientError),
    #[error("token refresh failed: {0}")]
    Connector(#[from] ConnectorError),
    #[error("mailbox store error: {0}")]
    Mailbox(MailboxError),
    #[error("message store error: {0}")]
    Message(MessageError),
    #[error("column store error: {0}")]
    Column(ColumnError),
}

impl From<MailboxError> for MoveError {
    fn from(err: MailboxError) -> Self {
        match err {
            MailboxError::NotFound(_) => MoveError::MessageNotFound,
            other => MoveError::Mailbox(other),
        }
    }
}

impl From<MessageError> for MoveError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::NotFound(_) => MoveError::MessageNotFound,
            other => MoveError::Message(other),
        }
    }
}

impl From<ColumnError> for MoveError {
    fn from(err: ColumnError) -> Self {
        match err {
            ColumnError::NotFound(_) => MoveError::ColumnNotFound,
            other => MoveError::Column(other),
        }
    }
}

/// Applies a "move message to column" intent to both the provider and the
/// store. The provider commits first; a provider failure leaves local state
/// untouched, and a subsequent incremental sync converges the rest.
#[derive(Clone)]
pub struct MoveCoordinator {
    mailboxes: MailboxRepository,
    messages: MessageRepository,
    columns: ColumnRepository,
    connector: GmailConnector,
}

impl MoveCoordinator {
    pub fn new(
        mailboxes: MailboxRepository,
        messages: MessageRepository,
        columns: ColumnRepository,
        connector: GmailConnector,
    ) -> Self {
        Self {
            mailboxes,
            messages,
            columns,
            connector,
        }
    }

    pub async fn move_message_to_column(
        &self,
        user_id: i64,
        message_id: i64,
        target_column_id: i64,
        archive_from_inbox: bool,
    ) -> Result<Message, MoveError> {
        let message = self.messages.get_owned(user_id, message_id).await?;
        let mailbox = self.mailboxes.get_owned(user_id, message.mailbox_id).await?;
        let column = self.columns.get_owned(user_id, target_column_id).await?;

        let add: Vec<String> = column.label_token.clone().into_iter().collect();
        let remove: Vec<String> = if archive_from_inbox {
            vec!["INBOX".to_string()]
        } else {
            Vec::new()
        };

        if !add.is_empty() || !remove.is_empty() {
            let mailbox = self
                .connector
                .refresh_if_expiring(mailbox, ON_DEMAND_REFRESH_HORIZON)
                .await?;
            let client = self.connector.client_for(&mailbox);
            client
                .modify_message(&message.provider_message_id, add.clone(), remove.clone())
                .await?;
        }

        let labels = merge_labels(&message.labels, &add, &remove);
        let updated = self
            .messages
            .replace_labels(message.id, &labels, Some(column.id))
            .await?;
        self.mailboxes.recount(message.mailbox_id).await?;

        Ok(updated)
    }
}
