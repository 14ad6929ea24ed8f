// Database models for Diesel
use diesel::prelude::*;

/// Insertable struct for new activity records.
///
/// `id` and `created_at` come from column defaults so insertion order and
/// row identity are assigned by the database.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::activity_log)]
pub struct NewActivityRecord {
    pub account_email: String,
    pub message_id: String,
    pub subject: String,
    pub reply_text: Option<String>,
    pub status: String,
    pub detail: Option<String>,
}
