use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use maildeck_core::api::{MessageDetail, MessageSummary, PaginatedResponse, PaginationMeta};
use maildeck_core::attachments::AttachmentRepository;
use maildeck_core::gmail::mime_builder::{EmailAddress, MimeMessage};
use maildeck_core::gmail::oauth::ON_DEMAND_REFRESH_HORIZON;
use maildeck_core::mailboxes::MailboxRepository;
use maildeck_core::messages::{
    Category, MessageListFilter, MessagePatch, MessageRepository, SortBy, SortOrder, TaskStatus,
};
use maildeck_core::search::{FuzzySearchParams, SearchScope, SearchWeights};
use maildeck_core::semantic::SemanticSearchParams;

use crate::AppState;
use crate::api::error::ApiError;
use crate::auth::AuthUser;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_emails))
        .route("/send", post(send_email))
        .route("/search/fuzzy", get(fuzzy_search))
        .route("/search/semantic", get(semantic_search))
        .route("/search/suggestions", get(search_suggestions))
        .route("/generate-embeddings", post(generate_embeddings))
        .route(
            "/{id}",
            get(get_email).patch(patch_email).delete(delete_email),
        )
        .route("/{id}/summarize", post(summarize_email))
        .route("/{id}/move-to-column", post(move_email_to_column))
        .route("/{id}/generate-embedding", post(generate_embedding))
}

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListEmailsQuery {
    mailbox_id: Option<i64>,
    search: Option<String>,
    is_read: Option<bool>,
    is_starred: Option<bool>,
    has_attachments: Option<bool>,
    category: Option<Category>,
    task_status: Option<TaskStatus>,
    from_email: Option<String>,
    label: Option<String>,
    exclude_label: Option<String>,
    is_snoozed: Option<bool>,
    sort_by: Option<SortBy>,
    sort_order: Option<SortOrder>,
    page: Option<u32>,
    limit: Option<u32>,
}

fn validated_page_and_limit(
    page: Option<u32>,
    limit: Option<u32>,
) -> Result<(u32, u32), ApiError> {
    let page = page.unwrap_or(1);
    if page < 1 {
        return Err(ApiError::validation("page must be at least 1"));
    }
    let limit = limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::validation("limit must be between 1 and 100"));
    }
    Ok((page, limit))
}

async fn list_emails(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListEmailsQuery>,
) -> Result<Json<PaginatedResponse<MessageSummary>>, ApiError> {
    let (page, limit) = validated_page_and_limit(query.page, query.limit)?;

    if let Some(mailbox_id) = query.mailbox_id {
        let mailboxes = MailboxRepository::new(state.db.clone(), state.secrets.clone());
        mailboxes.get_owned(user_id, mailbox_id).await?;
    }

    let filter = MessageListFilter {
        mailbox_id: query.mailbox_id,
        search: query.search,
        is_read: query.is_read,
        is_starred: query.is_starred,
        has_attachments: query.has_attachments,
        category: query.category,
        task_status: query.task_status,
        from_email: query.from_email,
        label: query.label,
        exclude_label: query.exclude_label,
        is_snoozed: query.is_snoozed,
        sort_by: query.sort_by.unwrap_or_default(),
        sort_order: query.sort_order.unwrap_or_default(),
        page,
        limit,
    };

    let messages = MessageRepository::new(state.db.clone());
    let (rows, total) = messages.list(user_id, &filter).await?;

    let data = rows.iter().map(MessageSummary::from).collect();
    let meta = PaginationMeta::new(page, limit, total);
    Ok(Json(PaginatedResponse::new(
        data,
        meta,
        format!("/v1/emails?page={page}&limit={limit}"),
    )))
}

async fn get_email(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MessageDetail>, ApiError> {
    let messages = MessageRepository::new(state.db.clone());
    let message = messages.get_owned(user_id, id).await?;

    let attachments = AttachmentRepository::new(state.db.clone())
        .list_for_message(message.id)
        .await?;
    Ok(Json(MessageDetail::new(&message, &attachments)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PatchEmailRequest {
    is_read: Option<bool>,
    is_starred: Option<bool>,
    is_pinned: Option<bool>,
    task_status: Option<TaskStatus>,
    #[serde(deserialize_with = "double_option")]
    task_deadline: Option<Option<DateTime<Utc>>>,
    #[serde(deserialize_with = "double_option")]
    snoozed_until: Option<Option<DateTime<Utc>>>,
}

async fn patch_email(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<PatchEmailRequest>,
) -> Result<Json<MessageSummary>, ApiError> {
    let messages = MessageRepository::new(state.db.clone());
    let message = messages.get_owned(user_id, id).await?;

    let patched = messages
        .patch(
            message.id,
            MessagePatch {
                is_read: body.is_read,
                is_starred: body.is_starred,
                is_pinned: body.is_pinned,
                task_status: body.task_status,
                task_deadline: body.task_deadline,
                snoozed_until: body.snoozed_until,
            },
        )
        .await?;

    let mailboxes = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    mailboxes.recount(patched.mailbox_id).await?;

    Ok(Json(MessageSummary::from(&patched)))
}

async fn delete_email(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let messages = MessageRepository::new(state.db.clone());
    let message = messages.get_owned(user_id, id).await?;
    messages.soft_delete(message.id).await?;

    let mailboxes = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    mailboxes.recount(message.mailbox_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailRequest {
    mailbox_id: i64,
    to: Vec<String>,
    #[serde(default)]
    cc: Vec<String>,
    #[serde(default)]
    bcc: Vec<String>,
    subject: String,
    body: String,
    body_html: Option<String>,
    in_reply_to: Option<String>,
    thread_id: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SendEmailResponse {
    message_id: String,
}

async fn send_email(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<SendEmailRequest>,
) -> Result<Json<SendEmailResponse>, ApiError> {
    if body.to.is_empty() {
        return Err(ApiError::validation("at least one recipient is required"));
    }

    let mailboxes = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    let mailbox = mailboxes.get_owned(user_id, body.mailbox_id).await?;
    let mailbox = state
        .connector
        .refresh_if_expiring(mailbox, ON_DEMAND_REFRESH_HORIZON)
        .await?;

    let mime = MimeMessage {
        from: EmailAddress::from(mailbox.email.clone()),
        to: body.to.into_iter().map(EmailAddress::from).collect(),
        cc: body.cc.into_iter().map(EmailAddress::from).collect(),
        bcc: body.bcc.into_iter().map(EmailAddress::from).collect(),
        subject: Some(body.subject),
        body_plain: Some(body.body),
        body_html: body.body_html,
        in_reply_to: body.in_reply_to,
        references: Vec::new(),
        attachments: Vec::new(),
    };
    let raw = mime.to_base64_url()?;

    let client = state.connector.client_for(&mailbox);
    let message_id = client.send_message(raw, body.thread_id).await?;

    Ok(Json(SendEmailResponse { message_id }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummarizeResponse {
    email_id: i64,
    summary: String,
    saved: bool,
}

async fn summarize_email(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<SummarizeResponse>, ApiError> {
    let messages = MessageRepository::new(state.db.clone());
    let message = messages.get_owned(user_id, id).await?;

    let content = maildeck_core::ai::plain_text_body(
        message.body_text.as_deref(),
        message.body_html.as_deref(),
    )
    .or_else(|| message.snippet.clone())
    .ok_or_else(|| ApiError::validation("message has no content to summarize"))?;

    let summary = state
        .ai
        .summarize(message.subject.as_deref(), &content)
        .await?;
    messages.set_summary(message.id, &summary).await?;

    Ok(Json(SummarizeResponse {
        email_id: message.id,
        summary,
        saved: true,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveToColumnRequest {
    column_id: i64,
    #[serde(default)]
    archive_from_inbox: bool,
}

async fn move_email_to_column(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<MoveToColumnRequest>,
) -> Result<Json<MessageSummary>, ApiError> {
    let moved = state
        .mover
        .move_message_to_column(user_id, id, body.column_id, body.archive_from_inbox)
        .await?;
    Ok(Json(MessageSummary::from(&moved)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FuzzySearchQuery {
    q: Option<String>,
    threshold: Option<f64>,
    fields: Option<SearchScope>,
    mailbox_id: Option<i64>,
    label: Option<String>,
    ws: Option<f64>,
    wsender: Option<f64>,
    wb: Option<f64>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Serialize, Debug)]
struct ScoredMessage {
    #[serde(flatten)]
    message: MessageSummary,
    relevance: f64,
}

async fn fuzzy_search(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<FuzzySearchQuery>,
) -> Result<Json<PaginatedResponse<ScoredMessage>>, ApiError> {
    let (page, limit) = validated_page_and_limit(query.page, query.limit)?;
    let threshold = query.threshold.unwrap_or(0.2);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ApiError::validation("threshold must be within [0, 1]"));
    }

    let defaults = SearchWeights::default();
    let params = FuzzySearchParams {
        query: query.q.unwrap_or_default(),
        threshold,
        scope: query.fields.unwrap_or_default(),
        mailbox_id: query.mailbox_id,
        label: query.label,
        weights: SearchWeights {
            subject: query.ws.unwrap_or(defaults.subject),
            sender: query.wsender.unwrap_or(defaults.sender),
            body: query.wb.unwrap_or(defaults.body),
        },
        page,
        limit,
    };

    let results = state.search.fuzzy(user_id, &params).await?;

    let messages = MessageRepository::new(state.db.clone());
    let ids: Vec<i64> = results.hits.iter().map(|hit| hit.message_id).collect();
    let rows = messages.get_many(&ids).await?;

    let data = rows
        .iter()
        .zip(results.hits.iter())
        .map(|(message, hit)| ScoredMessage {
            message: MessageSummary::from(message),
            relevance: hit.relevance,
        })
        .collect();

    let meta = PaginationMeta::new(page, limit, results.total);
    Ok(Json(PaginatedResponse::new(
        data,
        meta,
        format!("/v1/emails/search/fuzzy?page={page}&limit={limit}"),
    )))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SemanticSearchQuery {
    q: Option<String>,
    min_similarity: Option<f32>,
    mailbox_id: Option<i64>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct SimilarMessage {
    #[serde(flatten)]
    message: MessageSummary,
    similarity: f32,
}

async fn semantic_search(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<SemanticSearchQuery>,
) -> Result<Json<PaginatedResponse<SimilarMessage>>, ApiError> {
    let (page, limit) = validated_page_and_limit(query.page, query.limit)?;
    let min_similarity = query.min_similarity.unwrap_or(0.5);
    if !(0.0..=1.0).contains(&min_similarity) {
        return Err(ApiError::validation("minSimilarity must be within [0, 1]"));
    }

    let params = SemanticSearchParams {
        query: query.q.unwrap_or_default(),
        min_similarity,
        mailbox_id: query.mailbox_id,
        page,
        limit,
    };

    let results = state.semantic.search(user_id, &params).await?;

    let messages = MessageRepository::new(state.db.clone());
    let ids: Vec<i64> = results.hits.iter().map(|hit| hit.message_id).collect();
    let rows = messages.get_many(&ids).await?;

    let data = rows
        .iter()
        .zip(results.hits.iter())
        .map(|(message, hit)| SimilarMessage {
            message: MessageSummary::from(message),
            similarity: hit.similarity,
        })
        .collect();

    let meta = PaginationMeta::new(page, limit, results.total);
    Ok(Json(PaginatedResponse::new(
        data,
        meta,
        format!("/v1/emails/search/semantic?page={page}&limit={limit}"),
    )))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SuggestionsQuery {
    q: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuggestionsResponse {
    contacts: Vec<String>,
    keywords: Vec<String>,
    recent_searches: Vec<String>,
}

async fn search_suggestions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<SuggestionsQuery>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let suggestions = state
        .search
        .suggestions(user_id, query.q.as_deref().unwrap_or(""))
        .await?;
    Ok(Json(SuggestionsResponse {
        contacts: suggestions.contacts,
        keywords: suggestions.keywords,
        recent_searches: Vec::new(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddingGenerated {
    email_id: i64,
    generated: bool,
}

async fn generate_embedding(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<EmbeddingGenerated>, ApiError> {
    let messages = MessageRepository::new(state.db.clone());
    let message = messages.get_owned(user_id, id).await?;

    state.enrichment.enrich_message(message.id).await?;
    Ok(Json(EmbeddingGenerated {
        email_id: message.id,
        generated: true,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateEmbeddingsQuery {
    limit: Option<u32>,
}

#[derive(Serialize)]
struct EmbeddingsGenerated {
    generated: u64,
}

async fn generate_embeddings(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<GenerateEmbeddingsQuery>,
) -> Result<Json<EmbeddingsGenerated>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let mailboxes = MailboxRepository::new(state.db.clone(), state.secrets.clone());
    let messages = MessageRepository::new(state.db.clone());

    let mut generated = 0u64;
    for mailbox in mailboxes.list_for_user(user_id).await? {
        for message in messages.list_missing_embeddings(mailbox.id, limit).await? {
            match state.enrichment.enrich_message(message.id).await {
                Ok(()) => generated += 1,
                Err(err) => {
                    warn!(message_id = message.id, error = %err, "embedding generation failed");
                }
            }
        }
    }

    Ok(Json(EmbeddingsGenerated { generated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;
    use chrono::Duration;
    use maildeck_core::gmail::oauth::OAuthTokens;
    use maildeck_core::mailboxes::Mailbox;
    use crate::test_support::sample_parsed;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn seed_mailbox(ctx: &crate::test_support::TestContext) -> Mailbox {
        MailboxRepository::new(ctx.state.db.clone(), ctx.state.secrets.clone())
            .create(
                ctx.user_id,
                "inbox@example.com",
                OAuthTokens {
                    access_token: "access".into(),
                    refresh_token: "refresh".into(),
                    expires_at: Utc::now() + Duration::hours(1),
                },
            )
            .await
            .expect("create mailbox")
    }

    #[tokio::test]
    async fn listing_returns_pagination_envelope() {
        let ctx = test_context(None).await;
        let mailbox = seed_mailbox(&ctx).await;
        let messages = MessageRepository::new(ctx.state.db.clone());

        for i in 0..3 {
            messages
                .ingest(mailbox.id, &sample_parsed(&format!("m{i}")))
                .await
                .expect("ingest");
        }

        let Json(page) = list_emails(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Query(ListEmailsQuery {
                limit: Some(2),
                ..Default::default()
            }),
        )
        .await
        .expect("list");

        assert_eq!(page.data.len(), 2);
        assert_eq!(page.meta.total_items, 3);
        assert_eq!(page.meta.total_pages, 2);
        assert_eq!(page.meta.current_page, 1);
        assert!(page.links.current.contains("/v1/emails"));
    }

    #[tokio::test]
    async fn listing_rejects_out_of_range_limit() {
        let ctx = test_context(None).await;

        let err = list_emails(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Query(ListEmailsQuery {
                limit: Some(500),
                ..Default::default()
            }),
        )
        .await
        .expect_err("limit above 100 is invalid");
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn listing_hides_other_users_mailboxes() {
        let ctx = test_context(None).await;
        let mailbox = seed_mailbox(&ctx).await;

        let err = list_emails(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id + 999),
            Query(ListEmailsQuery {
                mailbox_id: Some(mailbox.id),
                ..Default::default()
            }),
        )
        .await
        .expect_err("foreign mailbox filter is a 404");
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn patch_updates_flags_and_recounts() {
        let ctx = test_context(None).await;
        let mailbox = seed_mailbox(&ctx).await;
        let messages = MessageRepository::new(ctx.state.db.clone());
        let message = messages
            .ingest(mailbox.id, &sample_parsed("m1"))
            .await
            .expect("ingest");

        let Json(updated) = patch_email(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Path(message.id),
            Json(PatchEmailRequest {
                is_read: Some(true),
                is_starred: Some(true),
                ..Default::default()
            }),
        )
        .await
        .expect("patch");

        assert!(updated.is_read);
        assert!(updated.is_starred);
        assert!(!updated.labels.contains(&"UNREAD".to_string()));

        let mailboxes =
            MailboxRepository::new(ctx.state.db.clone(), ctx.state.secrets.clone());
        let reloaded = mailboxes.get_by_id(mailbox.id).await.expect("mailbox");
        assert_eq!(reloaded.unread_count, 0, "counter recomputed");
    }

    #[tokio::test]
    async fn patch_snooze_null_unsnoozes() {
        let ctx = test_context(None).await;
        let mailbox = seed_mailbox(&ctx).await;
        let messages = MessageRepository::new(ctx.state.db.clone());
        let message = messages
            .ingest(mailbox.id, &sample_parsed("m1"))
            .await
            .expect("ingest");

        let Json(snoozed) = patch_email(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Path(message.id),
            Json(PatchEmailRequest {
                snoozed_until: Some(Some(Utc::now() + Duration::hours(3))),
                ..Default::default()
            }),
        )
        .await
        .expect("snooze");
        assert!(snoozed.is_snoozed);

        // An explicit null clears the snooze.
        let body: PatchEmailRequest =
            serde_json::from_value(json!({ "snoozedUntil": null })).expect("parse patch");
        assert_eq!(body.snoozed_until, Some(None));

        let Json(unsnoozed) = patch_email(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Path(message.id),
            Json(body),
        )
        .await
        .expect("unsnooze");
        assert!(!unsnoozed.is_snoozed);
        assert!(unsnoozed.snoozed_until.is_none());
    }

    #[tokio::test]
    async fn send_email_builds_mime_and_returns_provider_id() {
        let server = MockServer::start().await;
        let ctx = test_context(Some(&server.uri())).await;
        let mailbox = seed_mailbox(&ctx).await;

        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/inbox@example.com/messages/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "sent-123",
                "threadId": "t1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let Json(response) = send_email(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Json(SendEmailRequest {
                mailbox_id: mailbox.id,
                to: vec!["friend@example.com".into()],
                cc: vec![],
                bcc: vec![],
                subject: "Hi".into(),
                body: "Hello there".into(),
                body_html: None,
                in_reply_to: None,
                thread_id: Some("t1".into()),
            }),
        )
        .await
        .expect("send");

        assert_eq!(response.message_id, "sent-123");
    }

    #[tokio::test]
    async fn send_email_requires_recipients() {
        let ctx = test_context(None).await;
        let mailbox = seed_mailbox(&ctx).await;

        let err = send_email(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Json(SendEmailRequest {
                mailbox_id: mailbox.id,
                to: vec![],
                cc: vec![],
                bcc: vec![],
                subject: "Hi".into(),
                body: "Hello".into(),
                body_html: None,
                in_reply_to: None,
                thread_id: None,
            }),
        )
        .await
        .expect_err("no recipients");
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn summarize_persists_the_summary() {
        let ctx = test_context(None).await;
        let mailbox = seed_mailbox(&ctx).await;
        let messages = MessageRepository::new(ctx.state.db.clone());
        let message = messages
            .ingest(mailbox.id, &sample_parsed("m1"))
            .await
            .expect("ingest");

        ctx.ai.push_summary(Ok("Alice says hi."));

        let Json(response) = summarize_email(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Path(message.id),
        )
        .await
        .expect("summarize");

        assert_eq!(response.email_id, message.id);
        assert_eq!(response.summary, "Alice says hi.");
        assert!(response.saved);

        let reloaded = messages.get_by_id(message.id).await.expect("reload");
        assert_eq!(reloaded.ai_summary.as_deref(), Some("Alice says hi."));
    }

    #[tokio::test]
    async fn move_to_column_archives_via_provider() {
        let server = MockServer::start().await;
        let ctx = test_context(Some(&server.uri())).await;
        let mailbox = seed_mailbox(&ctx).await;
        let messages = MessageRepository::new(ctx.state.db.clone());

        let mut parsed = sample_parsed("m1");
        parsed.labels = vec!["INBOX".into(), "UNREAD".into()];
        let message = messages.ingest(mailbox.id, &parsed).await.expect("ingest");

        let column = maildeck_core::columns::ColumnRepository::new(ctx.state.db.clone())
            .create(ctx.user_id, "Done", None, None, None)
            .await
            .expect("create column");

        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/inbox@example.com/messages/m1/modify"))
            .and(body_json(json!({ "removeLabelIds": ["INBOX"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m1",
                "labelIds": ["UNREAD"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let Json(moved) = move_email_to_column(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Path(message.id),
            Json(MoveToColumnRequest {
                column_id: column.id,
                archive_from_inbox: true,
            }),
        )
        .await
        .expect("move");

        assert_eq!(moved.column_id, Some(column.id));
        assert!(!moved.labels.contains(&"INBOX".to_string()));
    }

    #[tokio::test]
    async fn fuzzy_search_returns_scored_messages() {
        let ctx = test_context(None).await;
        let mailbox = seed_mailbox(&ctx).await;
        let messages = MessageRepository::new(ctx.state.db.clone());

        let mut parsed = sample_parsed("m1");
        parsed.subject = Some("Marketing Campaign Q4".into());
        messages.ingest(mailbox.id, &parsed).await.expect("ingest");

        let Json(page) = fuzzy_search(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Query(FuzzySearchQuery {
                q: Some("markting".into()),
                threshold: Some(0.3),
                ..Default::default()
            }),
        )
        .await
        .expect("search");

        assert_eq!(page.data.len(), 1);
        assert!(page.data[0].relevance > 0.0);
        assert_eq!(
            page.data[0].message.subject.as_deref(),
            Some("Marketing Campaign Q4")
        );
    }

    #[tokio::test]
    async fn fuzzy_search_validates_threshold() {
        let ctx = test_context(None).await;

        let err = fuzzy_search(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Query(FuzzySearchQuery {
                q: Some("x".into()),
                threshold: Some(1.5),
                ..Default::default()
            }),
        )
        .await
        .expect_err("threshold out of range");
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn generate_embedding_stores_vector() {
        let ctx = test_context(None).await;
        let mailbox = seed_mailbox(&ctx).await;
        let messages = MessageRepository::new(ctx.state.db.clone());
        let message = messages
            .ingest(mailbox.id, &sample_parsed("m1"))
            .await
            .expect("ingest");

        let Json(response) = generate_embedding(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Path(message.id),
        )
        .await
        .expect("generate");

        assert!(response.generated);
        let reloaded = messages.get_by_id(message.id).await.expect("reload");
        assert!(reloaded.embedding.is_some());
    }

    #[tokio::test]
    async fn suggestions_include_empty_recent_searches() {
        let ctx = test_context(None).await;
        let mailbox = seed_mailbox(&ctx).await;
        let messages = MessageRepository::new(ctx.state.db.clone());

        let mut parsed = sample_parsed("m1");
        parsed.from_name = Some("Marketing Team".into());
        messages.ingest(mailbox.id, &parsed).await.expect("ingest");

        let Json(response) = search_suggestions(
            State(ctx.state.clone()),
            AuthUser(ctx.user_id),
            Query(SuggestionsQuery {
                q: Some("market".into()),
            }),
        )
        .await
        .expect("suggestions");

        assert!(response.contacts.contains(&"Marketing Team".to_string()));
        assert!(response.recent_searches.is_empty());
    }
}
