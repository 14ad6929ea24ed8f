use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
};
use serde::{Deserialize, Serialize};
use shared_types::{
    AccountResponse, ActivityRecord, ActivityStatsResponse, ActivityStatus,
    ConnectAccountResponse, UpdatePreferencesRequest,
};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{self, DbPool};
use crate::error::{ApiError, ApiResult};
use crate::scanner::{CycleOutcome, Scanner};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub scanner: Arc<Scanner>,
}

// Account handlers
pub async fn list_accounts(State(state): State<AppState>) -> ApiResult<Json<Vec<AccountResponse>>> {
    let mut conn = state.pool.get().await?;

    let rows = db::credentials::list_all(&mut conn).await?;
    let responses: Vec<AccountResponse> = rows.into_iter().map(Into::into).collect();

    Ok(Json(responses))
}

pub async fn delete_account(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult<StatusCode> {
    let mut conn = state.pool.get().await?;

    db::credentials::delete(&mut conn, &email).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_preferences(
    State(state): State<AppState>,
    Path(email): Path<String>,
    Json(payload): Json<UpdatePreferencesRequest>,
) -> ApiResult<Json<AccountResponse>> {
    let mut conn = state.pool.get().await?;

    if db::credentials::get_by_email(&mut conn, &email).await?.is_none() {
        return Err(ApiError::not_found("Account"));
    }

    let updated = db::credentials::update_preferences(
        &mut conn,
        &email,
        payload.preferred_language.as_deref(),
        payload.preferred_tone.as_deref(),
    )
    .await?;

    Ok(Json(updated.into()))
}

// OAuth flow - Step 1: hand the browser the Google consent URL
pub async fn connect_account(
    State(state): State<AppState>,
) -> ApiResult<Json<ConnectAccountResponse>> {
    let config = &state.config;

    let scope = "https://www.googleapis.com/auth/gmail.modify \
                 https://www.googleapis.com/auth/gmail.send \
                 https://www.googleapis.com/auth/userinfo.email";

    let auth_url = format!(
        "https://accounts.google.com/o/oauth2/v2/auth?\
         client_id={}&\
         redirect_uri={}&\
         response_type=code&\
         scope={}&\
         access_type=offline&\
         prompt=consent",
        urlencoding::encode(&config.google_client_id),
        urlencoding::encode(&config.oauth_redirect_uri),
        urlencoding::encode(scope),
    );

    Ok(Json(ConnectAccountResponse { auth_url }))
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackParams {
    pub code: String,
}

// OAuth flow - Step 2: exchange the code, resolve the account email, upsert
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<OAuthCallbackParams>,
) -> impl IntoResponse {
    let config = &state.config;

    #[derive(Serialize)]
    struct TokenRequest {
        code: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        grant_type: String,
    }

    #[derive(Deserialize, Debug)]
    struct TokenResponse {
        access_token: String,
        refresh_token: Option<String>,
        expires_in: i64,
    }

    let client = reqwest::Client::new();
    let token_response = match client
        .post("https://oauth2.googleapis.com/token")
        .form(&TokenRequest {
            code: params.code.clone(),
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_uri: config.oauth_redirect_uri.clone(),
            grant_type: "authorization_code".to_string(),
        })
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(_) => return Redirect::to("/oauth/error?msg=token_exchange_failed").into_response(),
    };

    let tokens: TokenResponse = match token_response.json().await {
        Ok(t) => t,
        Err(_) => return Redirect::to("/oauth/error?msg=invalid_token_response").into_response(),
    };

    // Without offline access there is nothing for the scan loop to work with
    let refresh_token = match tokens.refresh_token {
        Some(rt) => rt,
        None => return Redirect::to("/oauth/error?msg=no_refresh_token").into_response(),
    };

    #[derive(Deserialize)]
    struct UserInfo {
        email: String,
    }

    let user_info: UserInfo = match client
        .get("https://www.googleapis.com/oauth2/v2/userinfo")
        .bearer_auth(&tokens.access_token)
        .send()
        .await
    {
        Ok(resp) => match resp.json().await {
            Ok(info) => info,
            Err(_) => return Redirect::to("/oauth/error?msg=failed_to_get_email").into_response(),
        },
        Err(_) => return Redirect::to("/oauth/error?msg=failed_to_get_email").into_response(),
    };

    let mut conn = match state.pool.get().await {
        Ok(c) => c,
        Err(_) => return Redirect::to("/oauth/error?msg=db_error").into_response(),
    };

    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(tokens.expires_in);

    match db::credentials::upsert(
        &mut conn,
        &user_info.email,
        &tokens.access_token,
        &refresh_token,
        expires_at,
    )
    .await
    {
        Ok(_) => {}
        Err(_) => return Redirect::to("/oauth/error?msg=db_update_failed").into_response(),
    };

    Redirect::to("/oauth/success").into_response()
}

// Activity handlers
#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Json<Vec<ActivityRecord>>> {
    let status_filter = match query.status.as_deref() {
        Some(s) => {
            if ActivityStatus::parse(s).is_none() {
                return Err(ApiError::bad_request(format!("unknown status '{}'", s)));
            }
            Some(s)
        }
        None => None,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let mut conn = state.pool.get().await?;
    let rows = db::activity::list_recent(&mut conn, status_filter, limit).await?;

    Ok(Json(rows))
}

pub async fn activity_stats(
    State(state): State<AppState>,
) -> ApiResult<Json<ActivityStatsResponse>> {
    let mut conn = state.pool.get().await?;

    let counts = db::activity::count_by_status(&mut conn).await?;

    Ok(Json(ActivityStatsResponse::from_counts(&counts)))
}

// Manual scan trigger
#[derive(Debug, Deserialize)]
pub struct TriggerScanParams {
    pub token: Option<String>,
}

/// Run a scan cycle on demand. Shares the scheduler's `Scanner` instance and
/// run lock, so a timer tick in flight wins and this trigger becomes a no-op.
/// The caller is redirected either way; outcomes show up in the activity log.
pub async fn trigger_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TriggerScanParams>,
) -> ApiResult<Redirect> {
    let presented = params.token.clone().or_else(|| bearer_token(&headers));
    if presented.as_deref() != Some(state.config.admin_token.as_str()) {
        return Err(ApiError::unauthorized("valid admin token required"));
    }

    match state.scanner.run_cycle().await {
        Ok(CycleOutcome::Completed(report)) => {
            tracing::info!("Manual scan complete: {report}");
        }
        Ok(CycleOutcome::AlreadyRunning) => {
            tracing::info!("Manual scan skipped: a cycle is already running");
        }
        Err(e) => {
            tracing::error!("Manual scan failed: {}", e);
        }
    }

    Ok(Redirect::to("/"))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}
