//! Collaborator traits for the scan loop.
//!
//! Every external system the reconciliation cycle touches sits behind one of
//! these traits, so the cycle's failure-isolation behavior can be exercised
//! in tests with in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::Credential;

use super::{InboxMessage, ScanError};
use crate::models::NewActivityRecord;

/// Read/refresh access to stored mailbox credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All accounts the scan loop should visit (those holding a usable
    /// refresh token).
    async fn list_connected(&self) -> Result<Vec<Credential>, ScanError>;

    /// Persist a freshly minted access token for an account.
    async fn save_access_token(
        &self,
        email: &str,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), ScanError>;
}

/// Append-only audit log of reply attempts.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append(&self, record: NewActivityRecord) -> Result<(), ScanError>;
}

/// One authenticated session against a single mailbox.
#[async_trait]
pub trait Mailbox: Send + Sync {
    fn account_email(&self) -> &str;

    /// IDs of unread inbox messages, bounded by `max`.
    async fn list_unread(&self, max: u32) -> Result<Vec<String>, ScanError>;

    async fn fetch(&self, message_id: &str) -> Result<InboxMessage, ScanError>;

    /// Deliver `body` as a reply within the original message's thread.
    async fn send_reply(&self, original: &InboxMessage, body: &str) -> Result<(), ScanError>;

    /// Clear the provider-side unread flag.
    async fn mark_read(&self, message_id: &str) -> Result<(), ScanError>;
}

/// Builds a [`Mailbox`] session from a stored credential, refreshing and
/// persisting the access token when it has gone stale.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn Mailbox>, ScanError>;
}

/// Stateless text-completion collaborator: prompt in, reply draft out.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ScanError>;
}
