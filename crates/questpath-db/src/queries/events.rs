//! Database query functions for the `events` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;

use crate::models::DomainEvent;

/// Parameters for inserting a new domain event row.
#[derive(Debug, Clone)]
pub struct NewDomainEvent<'a> {
    pub event_type: &'a str,
    pub user_id: Option<i64>,
    pub payload: Value,
}

/// Insert a domain event. Returns the row with server-generated id and
/// timestamp.
pub async fn insert_event(pool: &PgPool, new: &NewDomainEvent<'_>) -> Result<DomainEvent> {
    let event = sqlx::query_as::<_, DomainEvent>(
        "INSERT INTO events (event_type, user_id, payload) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(new.event_type)
    .bind(new.user_id)
    .bind(&new.payload)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert event of type {}", new.event_type))?;

    Ok(event)
}

/// List events for a user, oldest first.
pub async fn list_events_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<DomainEvent>> {
    let events = sqlx::query_as::<_, DomainEvent>(
        "SELECT * FROM events \
         WHERE user_id = $1 \
         ORDER BY id ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list events for user {user_id}"))?;

    Ok(events)
}

/// List events of one type, oldest first.
pub async fn list_events_by_type(pool: &PgPool, event_type: &str) -> Result<Vec<DomainEvent>> {
    let events = sqlx::query_as::<_, DomainEvent>(
        "SELECT * FROM events \
         WHERE event_type = $1 \
         ORDER BY id ASC",
    )
    .bind(event_type)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list events of type {event_type}"))?;

    Ok(events)
}
