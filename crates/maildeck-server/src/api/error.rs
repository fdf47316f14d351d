use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use maildeck_core::ai::AiError;
use maildeck_core::attachments::AttachmentError;
use maildeck_core::columns::ColumnError;
use maildeck_core::connector::ConnectorError;
use maildeck_core::gmail::client::GmailClientError;
use maildeck_core::gmail::mime_builder::MimeBuildError;
use maildeck_core::gmail::oauth::OAuthError;
use maildeck_core::mailboxes::MailboxError;
use maildeck_core::messages::MessageError;
use maildeck_core::moves::MoveError;
use maildeck_core::search::SearchError;
use maildeck_core::semantic::SemanticSearchError;
use maildeck_core::users::UserError;

/// API error surfaced to clients. Ownership failures are reported as plain
/// not-found so callers cannot probe for foreign resources.
#[derive(Debug)]
pub enum ApiError {
    NotFound,
    Conflict(String),
    Unauthorized(String),
    Validation(String),
    Provider(String),
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Validation(_) => "validation",
            ApiError::Provider(_) => "provider_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::NotFound => "resource not found".to_string(),
            ApiError::Conflict(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Validation(msg)
            | ApiError::Provider(msg) => msg.clone(),
            // Internal details stay in the logs.
            ApiError::Internal(_) => "internal error".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(detail, "request failed");
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<MailboxError> for ApiError {
    fn from(err: MailboxError) -> Self {
        match err {
            MailboxError::NotFound(_) => ApiError::NotFound,
            MailboxError::Duplicate(email) => {
                ApiError::Conflict(format!("mailbox already connected: {email}"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<MessageError> for ApiError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::NotFound(_) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AttachmentError> for ApiError {
    fn from(err: AttachmentError) -> Self {
        match err {
            AttachmentError::NotFound(_) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ColumnError> for ApiError {
    fn from(err: ColumnError) -> Self {
        match err {
            ColumnError::NotFound(_) => ApiError::NotFound,
            ColumnError::DuplicateTitle(title) => {
                ApiError::Conflict(format!("column title already in use: {title}"))
            }
            ColumnError::DefaultUndeletable => {
                ApiError::Conflict("default columns cannot be deleted".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::NotFound(_) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<MoveError> for ApiError {
    fn from(err: MoveError) -> Self {
        match err {
            MoveError::MessageNotFound | MoveError::ColumnNotFound => ApiError::NotFound,
            MoveError::Provider(err) => ApiError::Provider(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<GmailClientError> for ApiError {
    fn from(err: GmailClientError) -> Self {
        ApiError::Provider(err.to_string())
    }
}

impl From<ConnectorError> for ApiError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::OAuth(err) => ApiError::Provider(err.to_string()),
            ConnectorError::Mailbox(err) => err.into(),
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::TokenEndpoint { .. } | OAuthError::NoRefreshTokenGranted => {
                ApiError::Unauthorized("authorization code was rejected".to_string())
            }
            other => ApiError::Provider(other.to_string()),
        }
    }
}

impl From<MimeBuildError> for ApiError {
    fn from(err: MimeBuildError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Store(err) => err.into(),
        }
    }
}

impl From<SemanticSearchError> for ApiError {
    fn from(err: SemanticSearchError) -> Self {
        match err {
            SemanticSearchError::Store(err) => err.into(),
            SemanticSearchError::Ai(err) => err.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        ApiError::Provider(err.to_string())
    }
}

impl From<maildeck_core::sync::enrichment::EnrichmentError> for ApiError {
    fn from(err: maildeck_core::sync::enrichment::EnrichmentError) -> Self {
        use maildeck_core::sync::enrichment::EnrichmentError;
        match err {
            EnrichmentError::Store(err) => err.into(),
            EnrichmentError::Ai(err) => err.into(),
        }
    }
}
