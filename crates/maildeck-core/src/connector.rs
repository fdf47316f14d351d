use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::warn;

use crate::config::GoogleConfig;
use crate::gmail::client::GmailClient;
use crate::gmail::oauth::{
    OAuthError, OAuthTokens, TOKEN_ENDPOINT, TokenStore, refresh_access_token_with_endpoint,
};
use crate::mailboxes::{Mailbox, MailboxError, MailboxRepository};

/// Builds authenticated Gmail clients for stored mailboxes and owns the
/// on-demand token refresh path.
#[derive(Clone)]
pub struct GmailConnector {
    http: reqwest::Client,
    google: GoogleConfig,
    mailboxes: MailboxRepository,
    api_base: Option<String>,
    token_endpoint: Option<String>,
}

impl GmailConnector {
    pub fn new(http: reqwest::Client, google: GoogleConfig, mailboxes: MailboxRepository) -> Self {
        Self {
            http,
            google,
            mailboxes,
            api_base: None,
            token_endpoint: None,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn with_token_endpoint(mut self, token_endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(token_endpoint.into());
        self
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn token_endpoint(&self) -> &str {
        self.token_endpoint.as_deref().unwrap_or(TOKEN_ENDPOINT)
    }

    pub fn client_for(&self, mailbox: &Mailbox) -> GmailClient<MailboxTokenStore> {
        let store = Arc::new(MailboxTokenStore {
            mailboxes: self.mailboxes.clone(),
            mailbox_id: mailbox.id,
        });
        let mut client = GmailClient::new(
            self.http.clone(),
            mailbox.email.clone(),
            self.google.client_id.clone(),
            self.google.client_secret.clone(),
            mailbox.tokens.clone(),
            store,
        );
        if let Some(api_base) = &self.api_base {
            client = client.with_api_base(api_base.clone());
        }
        if let Some(endpoint) = &self.token_endpoint {
            client = client.with_token_endpoint(endpoint.clone());
        }
        client
    }

    /// One-off client for tokens that do not belong to a stored mailbox yet,
    /// e.g. the profile fetch during the connect flow.
    pub fn client_for_tokens(
        &self,
        user_id: &str,
        tokens: OAuthTokens,
    ) -> GmailClient<crate::gmail::oauth::NoopTokenStore> {
        let mut client = GmailClient::new(
            self.http.clone(),
            user_id,
            self.google.client_id.clone(),
            self.google.client_secret.clone(),
            tokens,
            Arc::new(crate::gmail::oauth::NoopTokenStore),
        );
        if let Some(api_base) = &self.api_base {
            client = client.with_api_base(api_base.clone());
        }
        if let Some(endpoint) = &self.token_endpoint {
            client = client.with_token_endpoint(endpoint.clone());
        }
        client
    }

    /// Refreshes the mailbox tokens when they expire inside `horizon`. The
    /// write is optimistically locked; losing the race means someone else
    /// refreshed first, so the fresher row is returned instead.
    pub async fn refresh_if_expiring(
        &self,
        mailbox: Mailbox,
        horizon: Duration,
    ) -> Result<Mailbox, ConnectorError> {
        if !mailbox.tokens.needs_refresh(Utc::now(), horizon) {
            return Ok(mailbox);
        }

        let refreshed = refresh_access_token_with_endpoint(
            &self.http,
            &self.google.client_id,
            &self.google.client_secret,
            &mailbox.tokens,
            self.token_endpoint(),
        )
        .await?;

        match self
            .mailboxes
            .update_tokens(mailbox.id, &refreshed, Some(mailbox.updated_at))
            .await
        {
            Ok(updated) => Ok(updated),
            Err(MailboxError::Conflict(_)) => {
                let current = self.mailboxes.get_by_id(mailbox.id).await?;
                Ok(current)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),
    #[error("mailbox store error: {0}")]
    Mailbox(#[from] MailboxError),
}

/// Persists tokens refreshed mid-request back into the mailbox row. Losing
/// an optimistic race is not an error: the winner wrote a fresher token.
pub struct MailboxTokenStore {
    mailboxes: MailboxRepository,
    mailbox_id: i64,
}

#[async_trait]
impl TokenStore for MailboxTokenStore {
    type Error = MailboxError;

    async fn save_tokens(&self, tokens: &OAuthTokens) -> Result<(), Self::Error> {
        let current = self.mailboxes.get_by_id(self.mailbox_id).await?;
        match self
            .mailboxes
            .update_tokens(self.mailbox_id, tokens, Some(current.updated_at))
            .await
        {
            Ok(_) => Ok(()),
            Err(MailboxError::Conflict(id)) => {
                warn!(mailbox_id = id, "concurrent token refresh won the race");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
