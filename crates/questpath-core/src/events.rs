//! Best-effort domain event sink.
//!
//! Appends never return an error: a failed append is logged and dropped so
//! it cannot undo or fail the operation that produced the event.

use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, warn};

use questpath_db::queries::events::{NewDomainEvent, insert_event};

pub const GOAL_CREATED: &str = "goal_created";
pub const PREMIUM_EXPIRED: &str = "premium_expired";
pub const PREMIUM_PURCHASED: &str = "premium_purchased";
pub const PREMIUM_RENEWED: &str = "premium_renewed";
pub const PREMIUM_CANCELLED: &str = "premium_cancelled";
pub const PAYMENT_FAILED: &str = "payment_failed";
pub const NOTIFICATION_IGNORED: &str = "notification_ignored";
pub const NOTIFICATION_PROCESSING_ERROR: &str = "notification_processing_error";
pub const TOPIC_COMPLETED: &str = "topic_completed";

#[derive(Debug, Clone)]
pub struct EventSink {
    pool: PgPool,
}

impl EventSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an event. Returns `true` when it was stored.
    pub async fn append(&self, event_type: &str, user_id: Option<i64>, payload: Value) -> bool {
        let new = NewDomainEvent {
            event_type,
            user_id,
            payload,
        };
        match insert_event(&self.pool, &new).await {
            Ok(event) => {
                debug!(event_id = event.id, event_type, ?user_id, "event appended");
                true
            }
            Err(e) => {
                warn!(event_type, ?user_id, error = %format!("{e:#}"), "failed to append event");
                false
            }
        }
    }
}
