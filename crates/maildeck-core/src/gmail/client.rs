use std::sync::Arc;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::gmail::oauth::{
    ON_DEMAND_REFRESH_HORIZON, OAuthError, OAuthTokens, TOKEN_ENDPOINT, TokenStore,
    refresh_access_token_with_endpoint,
};
use crate::gmail::types::{
    AttachmentBody, ListHistoryResponse, ListLabelsResponse, ListMessagesResponse, Message,
    ModifyMessageRequest, Profile, SendMessageRequest, SendMessageResponse,
};

const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users";

#[derive(Debug, Error)]
pub enum GmailClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),
    #[error("token persistence error: {0}")]
    TokenStore(String),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unauthorized after refresh")]
    Unauthorized,
}

impl GmailClientError {
    /// A 404-class answer from the history endpoint signals a stale cursor.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GmailClientError::Http(err) if err.status() == Some(StatusCode::NOT_FOUND))
    }

    /// Network failures, rate limits and 5xx responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            GmailClientError::Http(err) => match err.status() {
                Some(status) => {
                    status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::FORBIDDEN
                        || status == StatusCode::UNAUTHORIZED
                        || status.is_server_error()
                }
                None => true,
            },
            GmailClientError::Unauthorized => true,
            GmailClientError::OAuth(err) => !err.is_fatal(),
            _ => false,
        }
    }
}

/// Authenticated Gmail REST client for a single mailbox.
///
/// Access tokens are refreshed ahead of expiry and once more after a 401;
/// refreshed tokens are handed to the [`TokenStore`] for persistence.
pub struct GmailClient<S: TokenStore> {
    http: Client,
    user_id: String,
    client_id: String,
    client_secret: String,
    api_base: String,
    token_endpoint: String,
    tokens: RwLock<OAuthTokens>,
    refresh_lock: Mutex<()>,
    token_store: Arc<S>,
}

impl<S: TokenStore> GmailClient<S> {
    pub fn new(
        http: Client,
        user_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        initial_tokens: OAuthTokens,
        token_store: Arc<S>,
    ) -> Self {
        Self {
            http,
            user_id: user_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            tokens: RwLock::new(initial_tokens),
            refresh_lock: Mutex::new(()),
            token_store,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_token_endpoint(mut self, token_endpoint: impl Into<String>) -> Self {
        self.token_endpoint = token_endpoint.into();
        self
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Message, GmailClientError> {
        let url = format!("{}/{}/messages/{}", self.api_base, self.user_id, message_id);
        self.send_json(|| self.http.get(&url).query(&[("format", "full")]))
            .await
    }

    pub async fn list_messages(
        &self,
        query: Option<&str>,
        label_ids: &[String],
        page_token: Option<&str>,
        max_results: Option<u32>,
    ) -> Result<ListMessagesResponse, GmailClientError> {
        let url = format!("{}/{}/messages", self.api_base, self.user_id);
        self.send_json(|| {
            let mut builder = self.http.get(&url);
            if let Some(q) = query {
                builder = builder.query(&[("q", q)]);
            }
            for label in label_ids {
                builder = builder.query(&[("labelIds", label.as_str())]);
            }
            if let Some(token) = page_token {
                builder = builder.query(&[("pageToken", token)]);
            }
            if let Some(max) = max_results {
                builder = builder.query(&[("maxResults", max)]);
            }
            builder
        })
        .await
    }

    pub async fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
        max_results: Option<u32>,
    ) -> Result<ListHistoryResponse, GmailClientError> {
        let url = format!("{}/{}/history", self.api_base, self.user_id);
        self.send_json(|| {
            let mut builder = self
                .http
                .get(&url)
                .query(&[("startHistoryId", start_history_id)]);
            if let Some(token) = page_token {
                builder = builder.query(&[("pageToken", token)]);
            }
            if let Some(max) = max_results {
                builder = builder.query(&[("maxResults", max)]);
            }
            builder
        })
        .await
    }

    /// Fetches the user's Gmail profile, including the current historyId.
    pub async fn get_profile(&self) -> Result<Profile, GmailClientError> {
        let url = format!("{}/{}/profile", self.api_base, self.user_id);
        self.send_json(|| self.http.get(&url)).await
    }

    pub async fn list_labels(&self) -> Result<ListLabelsResponse, GmailClientError> {
        let url = format!("{}/{}/labels", self.api_base, self.user_id);
        self.send_json(|| self.http.get(&url)).await
    }

    /// Applies a label delta to a message. A delta that adds and removes
    /// nothing is a local no-op and never reaches the wire.
    pub async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: Vec<String>,
        remove_label_ids: Vec<String>,
    ) -> Result<(), GmailClientError> {
        if add_label_ids.is_empty() && remove_label_ids.is_empty() {
            return Ok(());
        }

        let url = format!(
            "{}/{}/messages/{}/modify",
            self.api_base, self.user_id, message_id
        );
        let body = ModifyMessageRequest {
            add_label_ids,
            remove_label_ids,
        };
        let _: Message = self.send_json(|| self.http.post(&url).json(&body)).await?;
        Ok(())
    }

    /// Sends a base64url-encoded RFC 5322 message, returning the provider id.
    pub async fn send_message(
        &self,
        raw: String,
        thread_id: Option<String>,
    ) -> Result<String, GmailClientError> {
        let url = format!("{}/{}/messages/send", self.api_base, self.user_id);
        let body = SendMessageRequest { raw, thread_id };
        let response: SendMessageResponse =
            self.send_json(|| self.http.post(&url).json(&body)).await?;
        Ok(response.id)
    }

    pub async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<AttachmentBody, GmailClientError> {
        let url = format!(
            "{}/{}/messages/{}/attachments/{}",
            self.api_base, self.user_id, message_id, attachment_id
        );
        self.send_json(|| self.http.get(&url)).await
    }

    async fn send_json<T, B>(&self, build: B) -> Result<T, GmailClientError>
    where
        T: DeserializeOwned,
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let response = self.perform_authenticated(build).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(GmailClientError::Decode)
    }

    async fn perform_authenticated<B>(
        &self,
        build: B,
    ) -> Result<reqwest::Response, GmailClientError>
    where
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let tokens = self.ensure_fresh_token(false).await?;
        let mut response = build().bearer_auth(&tokens.access_token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let tokens = self.ensure_fresh_token(true).await?;
            response = build().bearer_auth(&tokens.access_token).send().await?;
        }

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(GmailClientError::Unauthorized);
        }

        Ok(response.error_for_status()?)
    }

    async fn ensure_fresh_token(
        &self,
        force_refresh: bool,
    ) -> Result<OAuthTokens, GmailClientError> {
        {
            let tokens = self.tokens.read().await;
            if !force_refresh && !tokens.needs_refresh(Utc::now(), ON_DEMAND_REFRESH_HORIZON) {
                return Ok(tokens.clone());
            }
        }

        let _guard = self.refresh_lock.lock().await;

        {
            let tokens = self.tokens.read().await;
            if !force_refresh && !tokens.needs_refresh(Utc::now(), ON_DEMAND_REFRESH_HORIZON) {
                return Ok(tokens.clone());
            }
        }

        let current = { self.tokens.read().await.clone() };
        let refreshed = refresh_access_token_with_endpoint(
            &self.http,
            &self.client_id,
            &self.client_secret,
            &current,
            &self.token_endpoint,
        )
        .await?;

        {
            let mut tokens = self.tokens.write().await;
            *tokens = refreshed.clone();
        }

        self.token_store
            .save_tokens(&refreshed)
            .await
            .map_err(|err| GmailClientError::TokenStore(err.to_string()))?;

        Ok(refreshed)
    }
}
