//! Topic checklist progress.

use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use questpath_db::models::Topic;
use questpath_db::queries::stages;

use crate::events::{self, EventSink};

#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    #[error("stage {0} not found")]
    StageNotFound(Uuid),

    #[error("invalid topic index {index} for a stage with {len} topics")]
    InvalidTopicIndex { index: i64, len: usize },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Flip `completed` on one topic of a stage owned by `user_id`.
///
/// The topic list is rewritten as a whole. A `topic_completed` event is
/// recorded only when the topic becomes completed.
pub async fn toggle_topic(
    pool: &PgPool,
    sink: &EventSink,
    user_id: i64,
    stage_id: Uuid,
    index: i64,
) -> Result<Topic, TopicError> {
    let stage = stages::get_stage_for_user(pool, stage_id, user_id)
        .await?
        .ok_or(TopicError::StageNotFound(stage_id))?;

    let mut topics = stage.topics.0;
    let len = topics.len();
    let slot = usize::try_from(index)
        .ok()
        .filter(|i| *i < len)
        .ok_or(TopicError::InvalidTopicIndex { index, len })?;

    topics[slot].completed = !topics[slot].completed;
    stages::replace_topics(pool, stage_id, &topics).await?;

    let topic = topics.swap_remove(slot);
    debug!(user_id, %stage_id, index, completed = topic.completed, "topic toggled");

    if topic.completed {
        info!(user_id, %stage_id, index, "topic completed");
        sink
            .append(
                events::TOPIC_COMPLETED,
                Some(user_id),
                json!({
                    "stage_id": stage_id,
                    "stage_title": stage.title,
                    "topic_index": index,
                    "topic_name": topic.name,
                }),
            )
            .await;
    }

    Ok(topic)
}
