//! Database query functions for the `goals` table.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{Difficulty, Goal};

/// Parameters for inserting a new goal row.
#[derive(Debug, Clone)]
pub struct NewGoal<'a> {
    pub user_id: i64,
    pub title: &'a str,
    pub description: &'a str,
    pub category: &'a str,
    pub difficulty_level: Difficulty,
}

/// Insert a goal on an open connection (usually a transaction). Returns the
/// row with its server-generated id, status and timestamp.
pub async fn insert_goal(conn: &mut PgConnection, new: &NewGoal<'_>) -> Result<Goal> {
    let goal = sqlx::query_as::<_, Goal>(
        "INSERT INTO goals (user_id, title, description, category, difficulty_level) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(new.user_id)
    .bind(new.title)
    .bind(new.description)
    .bind(new.category)
    .bind(new.difficulty_level)
    .fetch_one(conn)
    .await
    .with_context(|| format!("failed to insert goal for user {}", new.user_id))?;

    Ok(goal)
}

/// Count the goals owned by a user, on a pool or inside a transaction.
pub async fn count_goals_for_user<'e, E>(executor: E, user_id: i64) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM goals WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(executor)
        .await
        .with_context(|| format!("failed to count goals for user {user_id}"))?;

    Ok(row.0)
}

/// List a user's goals, newest first.
pub async fn list_goals_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Goal>> {
    let goals = sqlx::query_as::<_, Goal>(
        "SELECT * FROM goals \
         WHERE user_id = $1 \
         ORDER BY created_at DESC, id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list goals for user {user_id}"))?;

    Ok(goals)
}

/// Fetch a goal only if it belongs to `user_id`.
pub async fn get_goal_for_user(pool: &PgPool, goal_id: Uuid, user_id: i64) -> Result<Option<Goal>> {
    let goal = sqlx::query_as::<_, Goal>("SELECT * FROM goals WHERE id = $1 AND user_id = $2")
        .bind(goal_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch goal {goal_id}"))?;

    Ok(goal)
}
