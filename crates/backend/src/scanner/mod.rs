//! Inbox scan-and-reply reconciliation.
//!
//! A tokio background task periodically walks every connected mailbox,
//! drafts replies to unread messages, appends one audit record per attempt,
//! and marks each handled message read. The manual trigger endpoint drives
//! the same [`Scanner`] instance, so both paths share one run lock and one
//! code path.

mod gmail;
mod ports;
mod scan;
mod stores;

pub use gmail::GmailConnector;
pub use ports::{ActivityLog, CredentialStore, Mailbox, MailboxConnector, ReplyGenerator};
pub use scan::{CycleOutcome, CycleReport, Scanner};
pub use stores::{PgActivityLog, PgCredentialStore};

use thiserror::Error;

/// Classified failure of a single scan step.
///
/// Nothing here propagates to an interactive caller; each variant decides
/// how much of the cycle is skipped and what lands in the activity log.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Stored credential rejected outright, even after a refresh attempt.
    /// The account is skipped for this cycle but never removed.
    #[error("credential rejected by mail provider")]
    CredentialInvalid,

    /// Network failure, rate limit, 5xx, or per-call timeout. The affected
    /// message or account is skipped and the cycle continues.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The reply generator is unreachable or returned an error.
    #[error("reply generator unavailable: {0}")]
    GenerationUnavailable(String),

    /// A reply was generated but could not be delivered.
    #[error("reply delivery failed: {0}")]
    DeliveryFailed(String),

    /// Credential or activity store unreachable. Aborts the cycle when hit
    /// at the top; mid-cycle, records already written stand.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Unread message pulled from the provider. Lives only for the duration of
/// one processing attempt; the provider keeps the authoritative copy.
#[derive(Debug, Clone)]
pub struct InboxMessage {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    /// Raw From header, e.g. `"Jane Doe <jane@example.com>"`
    pub from: String,
    /// RFC 2822 Message-ID header, used to thread the reply
    pub message_id_header: Option<String>,
    /// Truncated plain-text excerpt used as generation input
    pub snippet: String,
}
