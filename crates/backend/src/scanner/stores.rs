//! Postgres-backed implementations of the scan loop's store ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::Credential;
use std::fmt;

use super::ports::{ActivityLog, CredentialStore};
use super::ScanError;
use crate::db::{self, DbPool};
use crate::models::NewActivityRecord;

fn store_unavailable(e: impl fmt::Display) -> ScanError {
    ScanError::StoreUnavailable(e.to_string())
}

/// Credential store over the `credentials` table.
pub struct PgCredentialStore {
    pool: DbPool,
}

impl PgCredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn list_connected(&self) -> Result<Vec<Credential>, ScanError> {
        let mut conn = self.pool.get().await.map_err(store_unavailable)?;
        db::credentials::list_connected(&mut conn)
            .await
            .map_err(store_unavailable)
    }

    async fn save_access_token(
        &self,
        email: &str,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), ScanError> {
        let mut conn = self.pool.get().await.map_err(store_unavailable)?;
        db::credentials::update_access_token(&mut conn, email, access_token, expires_at)
            .await
            .map_err(store_unavailable)
    }
}

/// Activity log over the append-only `activity_log` table.
pub struct PgActivityLog {
    pool: DbPool,
}

impl PgActivityLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityLog for PgActivityLog {
    async fn append(&self, record: NewActivityRecord) -> Result<(), ScanError> {
        let mut conn = self.pool.get().await.map_err(store_unavailable)?;
        db::activity::insert(&mut conn, record)
            .await
            .map_err(store_unavailable)
    }
}
