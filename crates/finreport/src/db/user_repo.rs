//! User repository: maps external identity ids onto durable users.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_rfc3339, Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: String,
    pub external_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    /// Created by a sync before the identity provider told us about the user.
    pub is_placeholder: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            email: row.get("email")?,
            display_name: row.get("display_name")?,
            is_placeholder: row.get::<_, i64>("is_placeholder")? != 0,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Returns the durable user for `external_id`, creating a placeholder row
/// when none exists. Runs on the caller's connection so it can join a
/// surrounding transaction.
pub fn ensure_placeholder(conn: &Connection, external_id: &str) -> Result<UserRow, DatabaseError> {
    let now = now_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO users (id, external_id, is_placeholder, created_at, updated_at)
         VALUES (?1, ?2, 1, ?3, ?3)
         ON CONFLICT(external_id) DO NOTHING",
        params![uuid::Uuid::new_v4().to_string(), external_id, now],
    )?;
    if inserted == 1 {
        log::info!("Created placeholder user for external id {}", external_id);
    }

    let row = conn.query_row(
        "SELECT * FROM users WHERE external_id = ?1",
        params![external_id],
        UserRow::from_row,
    )?;
    Ok(row)
}

/// Creates or completes a user from identity-provider data. Clears the
/// placeholder flag.
pub fn upsert_profile(
    db: &Database,
    external_id: &str,
    email: Option<&str>,
    display_name: Option<&str>,
) -> Result<UserRow, DatabaseError> {
    db.with_conn(|conn| {
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO users (id, external_id, email, display_name, is_placeholder, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
             ON CONFLICT(external_id) DO UPDATE SET
               email = COALESCE(excluded.email, users.email),
               display_name = COALESCE(excluded.display_name, users.display_name),
               is_placeholder = 0,
               updated_at = excluded.updated_at",
            params![
                uuid::Uuid::new_v4().to_string(),
                external_id,
                email,
                display_name,
                now
            ],
        )?;
        let row = conn.query_row(
            "SELECT * FROM users WHERE external_id = ?1",
            params![external_id],
            UserRow::from_row,
        )?;
        Ok(row)
    })
}

pub fn find_by_external_id(
    db: &Database,
    external_id: &str,
) -> Result<Option<UserRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM users WHERE external_id = ?1",
                params![external_id],
                UserRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}
