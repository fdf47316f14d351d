pub mod adapter;
pub mod client;
pub mod mime_builder;
pub mod oauth;
pub mod parser;
pub mod types;

pub use adapter::{HistoryDelta, LabelDelta};
pub use client::{GmailClient, GmailClientError};
pub use mime_builder::{EmailAddress, MimeAttachment, MimeBuildError, MimeMessage};
pub use oauth::{
    ON_DEMAND_REFRESH_HORIZON, OAuthError, OAuthTokens, SCHEDULED_REFRESH_HORIZON, TokenStore,
    NoopTokenStore, exchange_code_with_endpoint, refresh_access_token_with_endpoint,
};
pub use parser::{ParsedAttachment, ParsedMessage, Recipient, parse_message};
