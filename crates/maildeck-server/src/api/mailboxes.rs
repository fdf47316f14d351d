use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use maildeck_core::MailboxResponse;
use maildeck_core::gmail::oauth::{ON_DEMAND_REFRESH_HORIZON, exchange_code_with_endpoint};
use maildeck_core::gmail::types::Label;
use maildeck_core::mailboxes::MailboxRepository;
use maildeck_core::messages::MessageRepository;

use crate::AppState;
use crate::api::error::ApiError;
use crate::auth::AuthUser;

/// System labels exposed to clients; everything else that is not a user
/// label stays internal.
const VISIBLE_SYSTEM_LABELS: &[&str] = &[
    "INBOX",
    "SENT",
    "DRAFT",
    "TRASH",
    "SPAM",
    "STARRED",
    "IMPORTANT",
    "CATEGORY_PERSONAL",
    "CATEGORY_SOCIAL",
    "CATEGORY_PROMOTIONS",
    "CATEGORY_UPDATES",
    "CATEGORY_FORUMS",
];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_mailboxes))
        .route("/connect", post(connect_mailbox))
        .route("/{id}", get(get_mailbox).delete(delete_mailbox))
        .route("/{id}/sync", post(sync_mailbox))
        .route("/{id}/stats", get(mailbox_stats))
        .route("/{id}/labels", get(mailbox_labels))
}

async fn list_mailboxes(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<MailboxResponse>>, ApiError> {
    let repo = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    let mailboxes = repo.list_for_user(user_id).await?;
    Ok(Json(mailboxes.iter().map(MailboxResponse::from).collect()))
}

async fn get_mailbox(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MailboxResponse>, ApiError> {
    let repo = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    let mailbox = repo.get_owned(user_id, id).await?;
    Ok(Json(MailboxResponse::from(&mailbox)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    code: String,
    code_verifier: String,
}

async fn connect_mailbox(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<ConnectRequest>,
) -> Result<(StatusCode, Json<MailboxResponse>), ApiError> {
    if body.code.trim().is_empty() {
        return Err(ApiError::validation("code is required"));
    }

    let tokens = exchange_code_with_endpoint(
        state.connector.http(),
        &state.google.client_id,
        &state.google.client_secret,
        &state.google.redirect_uri,
        &body.code,
        &body.code_verifier,
        state.connector.token_endpoint(),
    )
    .await?;

    // The connected address comes from the provider profile, not the caller.
    let client = state.connector.client_for_tokens("me", tokens.clone());
    let profile = client.get_profile().await?;

    let repo = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    let mailbox = repo
        .create(user_id, &profile.email_address, tokens)
        .await?;

    info!(mailbox_id = mailbox.id, "mailbox connected, starting import");
    let engine = state.engine.clone();
    let mailbox_id = mailbox.id;
    tokio::spawn(async move {
        engine.full_sync(mailbox_id, None).await;
    });

    Ok((StatusCode::CREATED, Json(MailboxResponse::from(&mailbox))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncQuery {
    #[serde(default)]
    force_full: Option<bool>,
}

#[derive(Serialize)]
struct SyncAccepted {
    status: &'static str,
}

async fn sync_mailbox(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Query(query): Query<SyncQuery>,
) -> Result<(StatusCode, Json<SyncAccepted>), ApiError> {
    let repo = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    let mailbox = repo.get_owned(user_id, id).await?;

    let engine = state.engine.clone();
    let force_full = query.force_full.unwrap_or(false);
    tokio::spawn(async move {
        engine.sync_on_demand(mailbox.id, force_full).await;
    });

    Ok((StatusCode::ACCEPTED, Json(SyncAccepted { status: "accepted" })))
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct LabelCount {
    total: i64,
    unread: i64,
}

#[derive(Debug, Serialize)]
struct MailboxStats {
    inbox: LabelCount,
    starred: LabelCount,
    drafts: LabelCount,
    sent: LabelCount,
    spam: LabelCount,
    trash: LabelCount,
}

async fn mailbox_stats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MailboxStats>, ApiError> {
    let mailboxes = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    let mailbox = mailboxes.get_owned(user_id, id).await?;
    let messages = MessageRepository::new(state.db.clone());

    let count_for = |label: &'static str| {
        let messages = messages.clone();
        let mailbox_id = mailbox.id;
        async move {
            let (total, unread) = messages.label_counts(mailbox_id, label).await?;
            Ok::<LabelCount, ApiError>(LabelCount { total, unread })
        }
    };

    Ok(Json(MailboxStats {
        inbox: count_for("INBOX").await?,
        starred: count_for("STARRED").await?,
        drafts: count_for("DRAFT").await?,
        sent: count_for("SENT").await?,
        spam: count_for("SPAM").await?,
        trash: count_for("TRASH").await?,
    }))
}

#[derive(Debug, Serialize)]
struct LabelResponse {
    id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<String>,
}

#[derive(Debug, Serialize)]
struct MailboxLabels {
    system: Vec<LabelResponse>,
    user: Vec<LabelResponse>,
}

async fn mailbox_labels(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MailboxLabels>, ApiError> {
    let repo = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    let mailbox = repo.get_owned(user_id, id).await?;
    let mailbox = state
        .connector
        .refresh_if_expiring(mailbox, ON_DEMAND_REFRESH_HORIZON)
        .await?;

    let client = state.connector.client_for(&mailbox);
    let response = client.list_labels().await?;

    let mut system = Vec::new();
    let mut user = Vec::new();
    for label in response.labels {
        if VISIBLE_SYSTEM_LABELS.contains(&label.id.as_str()) {
            system.push(to_label_response(label));
        } else if label.label_type.as_deref() == Some("user") {
            user.push(to_label_response(label));
        }
        // Everything else is provider-internal and hidden.
    }

    Ok(Json(MailboxLabels { system, user }))
}

fn to_label_response(label: Label) -> LabelResponse {
    LabelResponse {
        color: label
            .color
            .as_ref()
            .and_then(|c| c.background_color.clone()),
        id: label.id,
        name: label.name,
    }
}

async fn delete_mailbox(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let repo = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    let mailbox = repo.get_owned(user_id, id).await?;
    repo.soft_delete(mailbox.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;
    use chrono::{Duration, Utc};
    use maildeck_core::gmail::oauth::OAuthTokens;
    use maildeck_core::messages::MessageRepository;
    use crate::test_support::sample_parsed;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_tokens() -> OAuthTokens {
        OAuthTokens {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    async fn mount_connect_mocks(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "granted",
                "refresh_token": "granted_refresh",
                "expires_in": 3600,
            })))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "emailAddress": "connected@example.com",
                "historyId": "H1"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn connect_stores_mailbox_and_conflicts_on_repeat() {
        let server = MockServer::start().await;
        let ctx = test_context(Some(&server.uri())).await;
        mount_connect_mocks(&server).await;

        let (status, Json(mailbox)) = connect_mailbox(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Json(ConnectRequest {
                code: "auth-code".into(),
                code_verifier: "verifier".into(),
            }),
        )
        .await
        .expect("connect succeeds");

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(mailbox.email, "connected@example.com");
        assert_eq!(mailbox.sync_status, "pending");

        let err = connect_mailbox(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Json(ConnectRequest {
                code: "auth-code".into(),
                code_verifier: "verifier".into(),
            }),
        )
        .await
        .expect_err("second connect conflicts");
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn connect_rejects_empty_code() {
        let server = MockServer::start().await;
        let ctx = test_context(Some(&server.uri())).await;

        let err = connect_mailbox(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Json(ConnectRequest {
                code: "  ".into(),
                code_verifier: "verifier".into(),
            }),
        )
        .await
        .expect_err("empty code is invalid");
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn stats_count_per_label() {
        let ctx = test_context(None).await;
        let mailboxes =
            MailboxRepository::new(ctx.state.db.clone(), ctx.state.secrets.clone());
        let mailbox = mailboxes
            .create(ctx.user_id, "inbox@example.com", sample_tokens())
            .await
            .expect("create mailbox");

        let messages = MessageRepository::new(ctx.state.db.clone());
        let mut unread = sample_parsed("m1");
        unread.labels = vec!["INBOX".into(), "UNREAD".into()];
        messages.ingest(mailbox.id, &unread).await.expect("ingest");
        let mut sent = sample_parsed("m2");
        sent.labels = vec!["SENT".into()];
        sent.is_read = true;
        messages.ingest(mailbox.id, &sent).await.expect("ingest");

        let Json(stats) = mailbox_stats(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Path(mailbox.id),
        )
        .await
        .expect("stats");

        assert_eq!(stats.inbox, LabelCount { total: 1, unread: 1 });
        assert_eq!(stats.sent, LabelCount { total: 1, unread: 0 });
        assert_eq!(stats.trash, LabelCount { total: 0, unread: 0 });
    }

    #[tokio::test]
    async fn delete_hides_mailbox_from_listing() {
        let ctx = test_context(None).await;
        let mailboxes =
            MailboxRepository::new(ctx.state.db.clone(), ctx.state.secrets.clone());
        let mailbox = mailboxes
            .create(ctx.user_id, "inbox@example.com", sample_tokens())
            .await
            .expect("create mailbox");

        let status = delete_mailbox(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Path(mailbox.id),
        )
        .await
        .expect("delete");
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(listed) = list_mailboxes(State(ctx.state.clone()), AuthUser(ctx.user_id))
            .await
            .expect("list");
        assert!(listed.is_empty());

        let err = get_mailbox(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Path(mailbox.id),
        )
        .await
        .expect_err("deleted mailbox is gone");
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn labels_classify_system_and_user() {
        let server = MockServer::start().await;
        let ctx = test_context(Some(&server.uri())).await;
        let mailboxes =
            MailboxRepository::new(ctx.state.db.clone(), ctx.state.secrets.clone());
        let mailbox = mailboxes
            .create(ctx.user_id, "inbox@example.com", sample_tokens())
            .await
            .expect("create mailbox");

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/inbox@example.com/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "labels": [
                    { "id": "INBOX", "name": "INBOX", "type": "system" },
                    { "id": "CHAT", "name": "CHAT", "type": "system" },
                    { "id": "Label_1", "name": "Receipts", "type": "user",
                      "color": { "backgroundColor": "#ff0000" } }
                ]
            })))
            .mount(&server)
            .await;

        let Json(labels) = mailbox_labels(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Path(mailbox.id),
        )
        .await
        .expect("labels");

        assert_eq!(labels.system.len(), 1, "CHAT is internal and hidden");
        assert_eq!(labels.system[0].id, "INBOX");
        assert_eq!(labels.user.len(), 1);
        assert_eq!(labels.user[0].name, "Receipts");
        assert_eq!(labels.user[0].color.as_deref(), Some("#ff0000"));
    }
}
