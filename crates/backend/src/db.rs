use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager, ManagerConfig},
    AsyncPgConnection, RunQueryDsl,
};
use shared_types::{ActivityRecord, Credential};

use crate::models::NewActivityRecord;

pub type DbPool = Pool<AsyncPgConnection>;

async fn establish_tls_connection(config: String) -> diesel::ConnectionResult<AsyncPgConnection> {
    // The hosted Postgres requires TLS; diesel-async delegates the handshake
    // to tokio-postgres with a rustls connector.
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let (client, connection) = tokio_postgres::connect(&config, tls)
        .await
        .map_err(|e| diesel::ConnectionError::BadConnection(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    AsyncPgConnection::try_from(client).await
}

pub fn establish_connection_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let mut manager_config = ManagerConfig::default();
    manager_config.custom_setup =
        Box::new(|url| Box::pin(establish_tls_connection(url.to_string())));

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
        database_url,
        manager_config,
    );
    let pool = Pool::builder(config).build()?;

    Ok(pool)
}

// Credential database operations
pub mod credentials {
    use super::*;

    pub async fn list_all(conn: &mut AsyncPgConnection) -> anyhow::Result<Vec<Credential>> {
        use crate::schema::credentials::dsl::*;

        let rows = credentials
            .order_by(created_at.desc())
            .load::<Credential>(conn)
            .await?;

        Ok(rows)
    }

    /// Accounts the scan loop can act on: a usable refresh token is the
    /// criterion, access tokens are minted from it as needed.
    pub async fn list_connected(conn: &mut AsyncPgConnection) -> anyhow::Result<Vec<Credential>> {
        use crate::schema::credentials::dsl::*;

        let rows = credentials
            .filter(refresh_token.ne(""))
            .order_by(created_at.asc())
            .load::<Credential>(conn)
            .await?;

        Ok(rows)
    }

    pub async fn get_by_email(
        conn: &mut AsyncPgConnection,
        email: &str,
    ) -> anyhow::Result<Option<Credential>> {
        use crate::schema::credentials::dsl::*;

        let row = credentials
            .filter(email_address.eq(email))
            .first::<Credential>(conn)
            .await
            .optional()?;

        Ok(row)
    }

    /// Insert-or-update keyed on the account email. A re-authorization
    /// replaces the token set in place and never duplicates the row.
    pub async fn upsert(
        conn: &mut AsyncPgConnection,
        email: &str,
        access: &str,
        refresh: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<Credential> {
        use crate::schema::credentials::dsl::*;

        let row = diesel::insert_into(credentials)
            .values((
                email_address.eq(email),
                access_token.eq(Some(access)),
                refresh_token.eq(refresh),
                token_expires_at.eq(Some(expires_at)),
            ))
            .on_conflict(email_address)
            .do_update()
            .set((
                access_token.eq(Some(access)),
                refresh_token.eq(refresh),
                token_expires_at.eq(Some(expires_at)),
                updated_at.eq(Utc::now()),
            ))
            .get_result::<Credential>(conn)
            .await?;

        Ok(row)
    }

    /// Persist a freshly minted access token so later cycles reuse it.
    pub async fn update_access_token(
        conn: &mut AsyncPgConnection,
        email: &str,
        access: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        use crate::schema::credentials::dsl::*;

        diesel::update(credentials.filter(email_address.eq(email)))
            .set((
                access_token.eq(Some(access)),
                token_expires_at.eq(expires_at),
                updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;

        Ok(())
    }

    pub async fn update_preferences(
        conn: &mut AsyncPgConnection,
        email: &str,
        language: Option<&str>,
        tone: Option<&str>,
    ) -> anyhow::Result<Credential> {
        use crate::schema::credentials::dsl::*;

        let row = diesel::update(credentials.filter(email_address.eq(email)))
            .set((
                preferred_language.eq(language),
                preferred_tone.eq(tone),
                updated_at.eq(Utc::now()),
            ))
            .get_result::<Credential>(conn)
            .await?;

        Ok(row)
    }

    pub async fn delete(conn: &mut AsyncPgConnection, email: &str) -> anyhow::Result<()> {
        use crate::schema::credentials::dsl::*;

        diesel::delete(credentials.filter(email_address.eq(email)))
            .execute(conn)
            .await?;

        Ok(())
    }
}

// Activity log database operations (append-only)
pub mod activity {
    use super::*;

    pub async fn insert(
        conn: &mut AsyncPgConnection,
        record: NewActivityRecord,
    ) -> anyhow::Result<()> {
        use crate::schema::activity_log::dsl::*;

        diesel::insert_into(activity_log)
            .values(record)
            .execute(conn)
            .await?;

        Ok(())
    }

    pub async fn list_recent(
        conn: &mut AsyncPgConnection,
        status_filter: Option<&str>,
        limit: i64,
    ) -> anyhow::Result<Vec<ActivityRecord>> {
        use crate::schema::activity_log::dsl::*;

        let mut query = activity_log.into_boxed();
        if let Some(wanted) = status_filter {
            query = query.filter(status.eq(wanted.to_string()));
        }

        let rows = query
            .order_by(created_at.desc())
            .limit(limit)
            .load::<ActivityRecord>(conn)
            .await?;

        Ok(rows)
    }

    pub async fn count_by_status(
        conn: &mut AsyncPgConnection,
    ) -> anyhow::Result<Vec<(String, i64)>> {
        use crate::schema::activity_log::dsl::*;

        let counts = activity_log
            .group_by(status)
            .select((status, diesel::dsl::count_star()))
            .load::<(String, i64)>(conn)
            .await?;

        Ok(counts)
    }
}
