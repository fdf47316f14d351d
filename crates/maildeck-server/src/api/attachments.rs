use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::Response;
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

use maildeck_core::attachments::AttachmentRepository;
use maildeck_core::gmail::oauth::ON_DEMAND_REFRESH_HORIZON;
use maildeck_core::mailboxes::MailboxRepository;
use maildeck_core::messages::MessageRepository;

use crate::AppState;
use crate::api::error::ApiError;
use crate::auth::AuthUser;

pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", get(download_attachment))
}

/// Binary download proxied from the provider. The payload is fetched on
/// demand; only the metadata lives locally.
async fn download_attachment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let attachments = AttachmentRepository::new(state.db.clone());
    let attachment = attachments.get_owned(user_id, id).await?;

    let messages = MessageRepository::new(state.db.clone());
    let message = messages.get_by_id(attachment.message_id).await?;

    let mailboxes = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    let mailbox = mailboxes.get_owned(user_id, message.mailbox_id).await?;
    let mailbox = state
        .connector
        .refresh_if_expiring(mailbox, ON_DEMAND_REFRESH_HORIZON)
        .await?;

    let client = state.connector.client_for(&mailbox);
    let body = client
        .get_attachment(
            &message.provider_message_id,
            &attachment.provider_attachment_id,
        )
        .await?;

    let data = body
        .data
        .ok_or_else(|| ApiError::Provider("attachment payload missing".to_string()))?;
    let bytes = decode_attachment_data(&data)
        .ok_or_else(|| ApiError::Provider("attachment payload not decodable".to_string()))?;

    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&attachment.filename)
    );

    Response::builder()
        .header(CONTENT_TYPE, attachment.mime_type.as_str())
        .header(CONTENT_LENGTH, bytes.len())
        .header(CONTENT_DISPOSITION, disposition)
        .header(CACHE_CONTROL, "private, max-age=3600")
        .body(Body::from(bytes))
        .map_err(|err| ApiError::Internal(err.to_string()))
}

fn decode_attachment_data(data: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .or_else(|_| STANDARD.decode(data))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_base64url_and_standard_payloads() {
        let url_safe = URL_SAFE_NO_PAD.encode(b"binary payload");
        assert_eq!(
            decode_attachment_data(&url_safe).expect("url-safe"),
            b"binary payload"
        );

        let standard = STANDARD.encode(b"binary payload");
        assert_eq!(
            decode_attachment_data(&standard).expect("standard"),
            b"binary payload"
        );

        assert!(decode_attachment_data("!!not base64!!").is_none());
    }
}
