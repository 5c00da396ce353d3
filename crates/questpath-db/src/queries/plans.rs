//! Database query functions for the `plans` table.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::Plan;

/// Insert the plan for a goal on an open connection.
pub async fn insert_plan(conn: &mut PgConnection, goal_id: Uuid, name: &str) -> Result<Plan> {
    let plan = sqlx::query_as::<_, Plan>(
        "INSERT INTO plans (goal_id, name) \
         VALUES ($1, $2) \
         RETURNING *",
    )
    .bind(goal_id)
    .bind(name)
    .fetch_one(conn)
    .await
    .with_context(|| format!("failed to insert plan for goal {goal_id}"))?;

    Ok(plan)
}

/// Fetch the plan owned by a goal.
pub async fn get_plan_for_goal(pool: &PgPool, goal_id: Uuid) -> Result<Option<Plan>> {
    let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE goal_id = $1")
        .bind(goal_id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch plan for goal {goal_id}"))?;

    Ok(plan)
}
