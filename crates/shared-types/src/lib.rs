use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Language used for generated replies when the account has no stored preference.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Tone used for generated replies when the account has no stored preference.
pub const DEFAULT_TONE: &str = "professional";

/// Credential struct matching database column order exactly
///
/// One row per connected mailbox. Re-authorization upserts tokens in place,
/// keyed on `email_address`; the scan loop never deletes rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct Credential {
    pub id: Uuid,
    pub email_address: String,
    pub access_token: Option<String>,
    pub refresh_token: String,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub preferred_language: Option<String>,
    pub preferred_tone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Reply language for this account, falling back to [`DEFAULT_LANGUAGE`].
    pub fn language(&self) -> &str {
        match self.preferred_language.as_deref() {
            Some(lang) if !lang.trim().is_empty() => lang,
            _ => DEFAULT_LANGUAGE,
        }
    }

    /// Reply tone for this account, falling back to [`DEFAULT_TONE`].
    pub fn tone(&self) -> &str {
        match self.preferred_tone.as_deref() {
            Some(tone) if !tone.trim().is_empty() => tone,
            _ => DEFAULT_TONE,
        }
    }

    /// Whether the stored access token is missing or past its expiry.
    pub fn access_token_stale(&self, now: DateTime<Utc>) -> bool {
        match self.access_token.as_deref() {
            None | Some("") => true,
            Some(_) => match self.token_expires_at {
                Some(expires_at) => expires_at <= now,
                None => false,
            },
        }
    }
}

/// Terminal outcome of one reply attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Reply generated and delivered into the original thread
    Sent,
    /// Reply generated but not delivered (auto-send disabled)
    Drafted,
    /// Reply generation failed; the message stays unread and is retried
    Failed,
    /// Reply generated but delivery was rejected; the message is not retried
    DeliveryFailed,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Sent => "sent",
            ActivityStatus::Drafted => "drafted",
            ActivityStatus::Failed => "failed",
            ActivityStatus::DeliveryFailed => "delivery_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(ActivityStatus::Sent),
            "drafted" => Some(ActivityStatus::Drafted),
            "failed" => Some(ActivityStatus::Failed),
            "delivery_failed" => Some(ActivityStatus::DeliveryFailed),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ActivityRecord struct matching database column order exactly
///
/// Append-only audit row, one per reply attempt. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct ActivityRecord {
    pub id: Uuid,
    pub account_email: String,
    pub message_id: String,
    pub subject: String,
    pub reply_text: Option<String>,
    pub status: String, // stored as VARCHAR, see ActivityStatus
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn status(&self) -> Option<ActivityStatus> {
        ActivityStatus::parse(&self.status)
    }
}

/// Connected account as exposed over the API. Tokens never leave the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub email_address: String,
    pub preferred_language: String,
    pub preferred_tone: String,
    pub connected_at: DateTime<Utc>,
}

impl From<Credential> for AccountResponse {
    fn from(credential: Credential) -> Self {
        AccountResponse {
            preferred_language: credential.language().to_string(),
            preferred_tone: credential.tone().to_string(),
            id: credential.id,
            email_address: credential.email_address,
            connected_at: credential.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectAccountResponse {
    pub auth_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePreferencesRequest {
    pub preferred_language: Option<String>,
    pub preferred_tone: Option<String>,
}

/// Per-status counts over the activity log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStatsResponse {
    pub sent: i64,
    pub drafted: i64,
    pub failed: i64,
    pub delivery_failed: i64,
    pub total: i64,
}

impl ActivityStatsResponse {
    /// Fold (status, count) rows from a grouped query into the response shape.
    /// Unknown status strings still count toward the total.
    pub fn from_counts(counts: &[(String, i64)]) -> Self {
        let mut stats = ActivityStatsResponse::default();
        for (status, count) in counts {
            stats.total += count;
            match ActivityStatus::parse(status) {
                Some(ActivityStatus::Sent) => stats.sent += count,
                Some(ActivityStatus::Drafted) => stats.drafted += count,
                Some(ActivityStatus::Failed) => stats.failed += count,
                Some(ActivityStatus::DeliveryFailed) => stats.delivery_failed += count,
                None => {}
            }
        }
        stats
    }
}
