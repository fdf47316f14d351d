pub mod ai;
pub mod api;
pub mod attachments;
pub mod columns;
pub mod config;
pub mod connector;
pub mod db;
pub mod gmail;
pub mod mailboxes;
pub mod messages;
pub mod migrations;
pub mod moves;
pub mod search;
pub mod secrets;
pub mod semantic;
pub mod sync;
pub mod telemetry;
pub mod users;

pub use ai::{AiClient, AiError, GenaiAiClient, MockAiClient};
pub use api::{
    AttachmentResponse, ColumnResponse, MailboxResponse, MessageDetail, MessageSummary,
    PaginatedResponse, PaginationMeta,
};
pub use attachments::{Attachment, AttachmentError, AttachmentRepository};
pub use columns::{Column, ColumnError, ColumnRepository, ColumnUpdate};
pub use config::{Config, SyncConfig};
pub use connector::{ConnectorError, GmailConnector};
pub use db::Database;
pub use gmail::{
    GmailClient, GmailClientError, HistoryDelta, LabelDelta, MimeAttachment, MimeBuildError,
    MimeMessage, OAuthError, OAuthTokens, ParsedMessage,
};
pub use mailboxes::{Mailbox, MailboxError, MailboxRepository, SyncStatus};
pub use messages::{
    Category, Message as StoredMessage, MessageError, MessageListFilter, MessagePatch,
    MessageRepository, SortBy, SortOrder, TaskStatus,
};
pub use moves::{MoveCoordinator, MoveError};
pub use search::{
    FuzzyResults, FuzzySearchParams, SearchError, SearchScope, SearchService, SearchWeights,
    Suggestions,
};
pub use secrets::{SecretBox, SecretBoxError};
pub use semantic::{SemanticResults, SemanticSearchError, SemanticSearchParams, SemanticSearchService};
pub use sync::{EnrichmentWorker, SyncEngine, SyncOutcome, run_snooze_scheduler, run_sync_engine};
pub use sync::enrichment::run_enrichment_worker;
pub use telemetry::{TelemetryError, TelemetryGuard, init_telemetry};
pub use users::{AuthProvider, User, UserError, UserRepository};
