//! Gmail REST client for the scan loop.
//!
//! Talks to the Gmail API directly over reqwest so token handling stays
//! explicit: every call is attempted with the stored access token, and an
//! expired-token response mints a replacement from the refresh token,
//! persists it, and retries the call exactly once. A rejection after that
//! classifies the credential as invalid for the cycle.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::ports::{CredentialStore, Mailbox, MailboxConnector};
use super::{InboxMessage, ScanError};
use shared_types::Credential;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

fn transient(e: impl std::fmt::Display) -> ScanError {
    ScanError::Transient(e.to_string())
}

/// OAuth client identity shared by every mailbox session.
#[derive(Clone)]
struct OAuthClient {
    client_id: String,
    client_secret: String,
}

/// Builds Gmail sessions from stored credentials.
pub struct GmailConnector {
    http: reqwest::Client,
    oauth: OAuthClient,
    store: Arc<dyn CredentialStore>,
}

impl GmailConnector {
    pub fn new(client_id: String, client_secret: String, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            oauth: OAuthClient {
                client_id,
                client_secret,
            },
            store,
        }
    }
}

#[async_trait]
impl MailboxConnector for GmailConnector {
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn Mailbox>, ScanError> {
        let mut access_token = credential.access_token.clone().unwrap_or_default();

        if credential.access_token_stale(Utc::now()) {
            let minted =
                refresh_access_token(&self.http, &self.oauth, &credential.refresh_token).await?;
            self.store
                .save_access_token(&credential.email_address, &minted.token, minted.expires_at)
                .await?;
            access_token = minted.token;
        }

        Ok(Box::new(GmailMailbox {
            http: self.http.clone(),
            oauth: self.oauth.clone(),
            store: self.store.clone(),
            email: credential.email_address.clone(),
            refresh_token: credential.refresh_token.clone(),
            access_token: Mutex::new(access_token),
        }))
    }
}

struct MintedToken {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

async fn refresh_access_token(
    http: &reqwest::Client,
    oauth: &OAuthClient,
    refresh_token: &str,
) -> Result<MintedToken, ScanError> {
    #[derive(Deserialize)]
    struct TokenResponse {
        access_token: String,
        expires_in: Option<i64>,
    }

    let response = http
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await
        .map_err(transient)?;

    let status = response.status();
    if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
        // invalid_grant: the refresh token itself was revoked or expired
        return Err(ScanError::CredentialInvalid);
    }
    if !status.is_success() {
        return Err(transient(format!("token endpoint returned {status}")));
    }

    let tokens: TokenResponse = response.json().await.map_err(transient)?;
    let expires_at = tokens
        .expires_in
        .map(|secs| Utc::now() + Duration::seconds(secs));

    Ok(MintedToken {
        token: tokens.access_token,
        expires_at,
    })
}

/// One authenticated Gmail session.
pub struct GmailMailbox {
    http: reqwest::Client,
    oauth: OAuthClient,
    store: Arc<dyn CredentialStore>,
    email: String,
    refresh_token: String,
    access_token: Mutex<String>,
}

impl GmailMailbox {
    /// Issue a request, refreshing the access token and retrying once on an
    /// expired-token response.
    async fn execute<F>(&self, build: F) -> Result<reqwest::Response, ScanError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.access_token.lock().await.clone();
        let response = build(&token).send().await.map_err(transient)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response);
        }

        tracing::debug!("Access token for {} rejected, refreshing", self.email);
        let minted = refresh_access_token(&self.http, &self.oauth, &self.refresh_token).await?;
        self.store
            .save_access_token(&self.email, &minted.token, minted.expires_at)
            .await?;
        *self.access_token.lock().await = minted.token.clone();

        let retry = build(&minted.token).send().await.map_err(transient)?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(ScanError::CredentialInvalid);
        }
        check_status(retry)
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ScanError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        // 429s, 5xx, and scope problems all land here; the cycle skips the
        // affected message or account and moves on.
        Err(transient(format!("provider returned {status}")))
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    fn account_email(&self) -> &str {
        &self.email
    }

    async fn list_unread(&self, max: u32) -> Result<Vec<String>, ScanError> {
        let url = format!("{GMAIL_API_BASE}/messages");
        let max = max.to_string();
        let response = self
            .execute(|token| {
                self.http
                    .get(&url)
                    .query(&[
                        ("labelIds", "UNREAD"),
                        ("labelIds", "INBOX"),
                        ("maxResults", max.as_str()),
                    ])
                    .bearer_auth(token)
            })
            .await?;

        let list: MessageList = response.json().await.map_err(transient)?;
        Ok(list
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    async fn fetch(&self, message_id: &str) -> Result<InboxMessage, ScanError> {
        let url = format!("{GMAIL_API_BASE}/messages/{message_id}");
        let response = self
            .execute(|token| {
                self.http
                    .get(&url)
                    .query(&[
                        ("format", "metadata"),
                        ("metadataHeaders", "Subject"),
                        ("metadataHeaders", "From"),
                        ("metadataHeaders", "Message-ID"),
                    ])
                    .bearer_auth(token)
            })
            .await?;

        let detail: MessageDetail = response.json().await.map_err(transient)?;
        Ok(message_from_detail(detail))
    }

    async fn send_reply(&self, original: &InboxMessage, body: &str) -> Result<(), ScanError> {
        let raw = URL_SAFE_NO_PAD.encode(build_reply_rfc822(original, body));
        let url = format!("{GMAIL_API_BASE}/messages/send");
        let payload = serde_json::json!({
            "raw": raw,
            "threadId": original.thread_id,
        });

        self.execute(|token| self.http.post(&url).json(&payload).bearer_auth(token))
            .await
            .map_err(|e| match e {
                ScanError::CredentialInvalid => ScanError::CredentialInvalid,
                other => ScanError::DeliveryFailed(other.to_string()),
            })?;

        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), ScanError> {
        let url = format!("{GMAIL_API_BASE}/messages/{message_id}/modify");
        let payload = serde_json::json!({ "removeLabelIds": ["UNREAD"] });

        self.execute(|token| self.http.post(&url).json(&payload).bearer_auth(token))
            .await?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MessageList {
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    id: String,
    thread_id: String,
    snippet: Option<String>,
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    headers: Option<Vec<MessageHeader>>,
}

#[derive(Debug, Deserialize)]
struct MessageHeader {
    name: Option<String>,
    value: Option<String>,
}

fn message_from_detail(detail: MessageDetail) -> InboxMessage {
    let mut subject = String::new();
    let mut from = String::new();
    let mut message_id_header = None;

    if let Some(payload) = &detail.payload {
        if let Some(headers) = &payload.headers {
            for header in headers {
                let value = || header.value.clone().unwrap_or_default();
                match header.name.as_deref() {
                    Some(name) if name.eq_ignore_ascii_case("Subject") => subject = value(),
                    Some(name) if name.eq_ignore_ascii_case("From") => from = value(),
                    Some(name) if name.eq_ignore_ascii_case("Message-ID") => {
                        message_id_header = header.value.clone()
                    }
                    _ => {}
                }
            }
        }
    }

    InboxMessage {
        id: detail.id,
        thread_id: detail.thread_id,
        subject,
        from,
        message_id_header,
        snippet: detail.snippet.unwrap_or_default(),
    }
}

/// Parse a "From" header like "John Doe <john@example.com>" into (address, name)
fn parse_from_header(from: &str) -> (String, Option<String>) {
    let from = from.trim();

    if let Some(bracket_start) = from.rfind('<') {
        if let Some(bracket_end) = from.rfind('>') {
            let address = from[bracket_start + 1..bracket_end].trim().to_string();
            let name = from[..bracket_start].trim().trim_matches('"').trim();
            let name = if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            };
            return (address, name);
        }
    }

    (from.to_string(), None)
}

fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.is_empty() {
        "Re: (no subject)".to_string()
    } else if trimmed.to_ascii_lowercase().starts_with("re:") {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Assemble the RFC 2822 reply the Gmail send endpoint expects as `raw`.
fn build_reply_rfc822(original: &InboxMessage, body: &str) -> String {
    let (reply_to, _) = parse_from_header(&original.from);
    let mut message = format!(
        "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n",
        reply_to,
        reply_subject(&original.subject)
    );
    if let Some(mid) = &original.message_id_header {
        message.push_str(&format!("In-Reply-To: {mid}\r\nReferences: {mid}\r\n"));
    }
    message.push_str("\r\n");
    message.push_str(body);
    message
}
