//! Reply drafting through the Google Generative Language API.
//!
//! The generator is a stateless text-completion collaborator: prompt in,
//! reply body out. Any failure surfaces as `GenerationUnavailable` and is
//! absorbed per-message by the scan loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::Credential;

use crate::scanner::{InboxMessage, ReplyGenerator, ScanError};

const GENERATE_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

fn unavailable(e: impl std::fmt::Display) -> ScanError {
    ScanError::GenerationUnavailable(e.to_string())
}

/// Client for the `models/{model}:generateContent` endpoint.
pub struct GeminiGenerator {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiGenerator {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

fn first_candidate_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates?
        .into_iter()
        .next()?
        .content?
        .parts?
        .into_iter()
        .find_map(|part| part.text)
        .filter(|text| !text.trim().is_empty())
}

#[async_trait]
impl ReplyGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, ScanError> {
        let url = format!("{GENERATE_BASE}/{}:generateContent", self.model);
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("generator returned {status}")));
        }

        let parsed: GenerateResponse = response.json().await.map_err(unavailable)?;
        first_candidate_text(parsed).ok_or_else(|| unavailable("empty completion"))
    }
}

/// Build the generation prompt for one unread message, folding in the
/// account's reply preferences (with their documented fallbacks).
pub fn build_reply_prompt(credential: &Credential, message: &InboxMessage) -> String {
    format!(
        "You are an email assistant replying on behalf of {account}.\n\
         Write a reply in a {tone} tone, in the language \"{language}\".\n\
         Respond with the reply body only: no subject line, no signature placeholders.\n\
         \n\
         Original message:\n\
         Subject: {subject}\n\
         From: {from}\n\
         \n\
         {snippet}",
        account = credential.email_address,
        tone = credential.tone(),
        language = credential.language(),
        subject = message.subject,
        from = message.from,
        snippet = message.snippet,
    )
}
