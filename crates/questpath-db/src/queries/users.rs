//! Database query functions for the `users` table.
//!
//! Entitlement writes are absolute single-row assignments; none of them
//! read-modify-write the previous value.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::models::User;

/// Insert a new user row with free entitlement.
pub async fn insert_user(pool: &PgPool, email: &str) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (email) \
         VALUES ($1) \
         RETURNING *",
    )
    .bind(email)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert user {email:?}"))?;

    Ok(user)
}

/// Fetch a user by ID.
pub async fn get_user(pool: &PgPool, id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch user {id}"))?;

    Ok(user)
}

/// Fetch a user and hold its row lock until the surrounding transaction
/// ends. Goal inserts for the same user serialize on this lock.
pub async fn lock_user(conn: &mut PgConnection, id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("failed to lock user {id}"))?;

    Ok(user)
}

/// Fetch a user by email address (exact match).
pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("failed to fetch user by email")?;

    Ok(user)
}

/// Assign both entitlement fields of a user.
///
/// Returns the updated row, or `None` when the user does not exist.
pub async fn set_entitlement(
    pool: &PgPool,
    id: i64,
    is_premium: bool,
    premium_expiry: Option<DateTime<Utc>>,
) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "UPDATE users \
         SET is_premium = $2, premium_expiry = $3 \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(is_premium)
    .bind(premium_expiry)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to set entitlement for user {id}"))?;

    Ok(user)
}

/// Clear the premium flag of a user whose premium has lapsed as of `now`.
///
/// The guard on `premium_expiry` keeps a renewal that committed after the
/// caller's read from being overwritten. Returns `true` when a row changed.
pub async fn clear_lapsed_premium(pool: &PgPool, id: i64, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE users \
         SET is_premium = false \
         WHERE id = $1 \
           AND is_premium \
           AND premium_expiry IS NOT NULL \
           AND premium_expiry <= $2",
    )
    .bind(id)
    .bind(now)
    .execute(pool)
    .await
    .with_context(|| format!("failed to clear lapsed premium for user {id}"))?;

    Ok(result.rows_affected() > 0)
}
