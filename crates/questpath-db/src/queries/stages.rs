//! Database query functions for the `stages` table.

use anyhow::{Context, Result};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{Stage, StageStatus, Topic};

/// Parameters for inserting a new stage row.
#[derive(Debug, Clone)]
pub struct NewStage<'a> {
    pub plan_id: Uuid,
    pub order: i32,
    pub title: &'a str,
    pub description: &'a str,
    pub topics: &'a [Topic],
    pub xp_reward: i32,
    pub status: StageStatus,
}

/// Insert a stage on an open connection.
pub async fn insert_stage(conn: &mut PgConnection, new: &NewStage<'_>) -> Result<Stage> {
    let stage = sqlx::query_as::<_, Stage>(
        "INSERT INTO stages (plan_id, stage_order, title, description, topics, xp_reward, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(new.plan_id)
    .bind(new.order)
    .bind(new.title)
    .bind(new.description)
    .bind(Json(new.topics))
    .bind(new.xp_reward)
    .bind(new.status)
    .fetch_one(conn)
    .await
    .with_context(|| {
        format!(
            "failed to insert stage {} ({:?}) for plan {}",
            new.order, new.title, new.plan_id
        )
    })?;

    Ok(stage)
}

/// List the stages of a plan in ascending order.
pub async fn list_stages_for_plan(pool: &PgPool, plan_id: Uuid) -> Result<Vec<Stage>> {
    let stages = sqlx::query_as::<_, Stage>(
        "SELECT * FROM stages \
         WHERE plan_id = $1 \
         ORDER BY stage_order ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list stages for plan {plan_id}"))?;

    Ok(stages)
}

/// Fetch a stage only if the goal it belongs to is owned by `user_id`.
pub async fn get_stage_for_user(
    pool: &PgPool,
    stage_id: Uuid,
    user_id: i64,
) -> Result<Option<Stage>> {
    let stage = sqlx::query_as::<_, Stage>(
        "SELECT s.* FROM stages s \
         JOIN plans p ON p.id = s.plan_id \
         JOIN goals g ON g.id = p.goal_id \
         WHERE s.id = $1 AND g.user_id = $2",
    )
    .bind(stage_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch stage {stage_id}"))?;

    Ok(stage)
}

/// Replace the whole topic list of a stage.
///
/// The JSONB column is always written as one value; there is no in-place
/// update of a single element.
pub async fn replace_topics(pool: &PgPool, stage_id: Uuid, topics: &[Topic]) -> Result<()> {
    let result = sqlx::query("UPDATE stages SET topics = $1 WHERE id = $2")
        .bind(Json(topics))
        .bind(stage_id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to replace topics for stage {stage_id}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("stage {stage_id} not found");
    }

    Ok(())
}
