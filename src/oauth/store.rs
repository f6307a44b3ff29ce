//! SQLite persistence for OAuth states and workspace installations.
//!
//! States are single-use rows with an issue timestamp; consumption is a
//! conditional `DELETE`, so exactly one caller can ever consume a given
//! state. Installations are upserted keyed by workspace — a later install
//! replaces the stored token rather than versioning it.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::store::{decode_ts, encode_ts};

use super::Credential;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS oauth_states (
    state     TEXT PRIMARY KEY,
    issued_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS installations (
    team_id      TEXT PRIMARY KEY,
    bot_token    TEXT NOT NULL,
    bot_user_id  TEXT,
    app_id       TEXT,
    scopes       TEXT NOT NULL DEFAULT '',
    installed_at TEXT NOT NULL
);
";

/// Create the state and installation tables if absent.
pub(super) async fn ensure_schema(db: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
        sqlx::query(statement).execute(db).await?;
    }
    Ok(())
}

/// Record a freshly issued state token.
pub(super) async fn issue_state(
    db: &SqlitePool,
    state: &str,
    issued_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO oauth_states (state, issued_at) VALUES (?1, ?2)")
        .bind(state)
        .bind(encode_ts(issued_at))
        .execute(db)
        .await?;
    Ok(())
}

/// Atomically consume a state token.
///
/// Deletes the row only if it exists and was issued at or after `cutoff`;
/// returns whether exactly one row was removed. An expired state is left for
/// the sweep and reported as not consumed, identical to an unknown one.
pub(super) async fn consume_state(
    db: &SqlitePool,
    state: &str,
    cutoff: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM oauth_states WHERE state = ?1 AND issued_at >= ?2")
        .bind(state)
        .bind(encode_ts(cutoff))
        .execute(db)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Remove states issued before `cutoff`.
pub(super) async fn sweep_expired_states(
    db: &SqlitePool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM oauth_states WHERE issued_at < ?1")
        .bind(encode_ts(cutoff))
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

/// Insert or replace the installation for a workspace.
pub(super) async fn upsert_installation(
    db: &SqlitePool,
    credential: &Credential,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO installations (team_id, bot_token, bot_user_id, app_id, scopes, installed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(team_id) DO UPDATE SET \
             bot_token = excluded.bot_token, \
             bot_user_id = excluded.bot_user_id, \
             app_id = excluded.app_id, \
             scopes = excluded.scopes, \
             installed_at = excluded.installed_at",
    )
    .bind(&credential.team_id)
    .bind(&credential.bot_token)
    .bind(&credential.bot_user_id)
    .bind(&credential.app_id)
    .bind(credential.scopes.join(","))
    .bind(encode_ts(credential.installed_at))
    .execute(db)
    .await?;
    Ok(())
}

/// The most recently installed credential, if any.
pub(super) async fn latest_installation(
    db: &SqlitePool,
) -> Result<Option<Credential>, sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct InstallationRow {
        team_id: String,
        bot_token: String,
        bot_user_id: Option<String>,
        app_id: Option<String>,
        scopes: String,
        installed_at: String,
    }

    let row: Option<InstallationRow> = sqlx::query_as(
        "SELECT team_id, bot_token, bot_user_id, app_id, scopes, installed_at \
         FROM installations ORDER BY installed_at DESC LIMIT 1",
    )
    .fetch_optional(db)
    .await?;

    Ok(row.map(|r| Credential {
        team_id: r.team_id,
        bot_token: r.bot_token,
        bot_user_id: r.bot_user_id,
        app_id: r.app_id,
        scopes: r
            .scopes
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        // A malformed stored timestamp falls back to now rather than hiding
        // the credential from delivery.
        installed_at: decode_ts("installed_at", &r.installed_at).unwrap_or_else(|_| Utc::now()),
    }))
}
