//! Read-side goal queries scoped to an owner.

use anyhow::{Result, anyhow};
use sqlx::PgPool;
use uuid::Uuid;

use questpath_db::models::Goal;
use questpath_db::queries::{goals, plans, stages};

use super::GoalTree;

/// The user's goals, newest first, without plans or stages.
pub async fn list_goals(pool: &PgPool, user_id: i64) -> Result<Vec<Goal>> {
    goals::list_goals_for_user(pool, user_id).await
}

/// A goal with its full tree. `None` when the goal does not exist or
/// belongs to someone else.
pub async fn get_goal_tree(pool: &PgPool, user_id: i64, goal_id: Uuid) -> Result<Option<GoalTree>> {
    let Some(goal) = goals::get_goal_for_user(pool, goal_id, user_id).await? else {
        return Ok(None);
    };
    let plan = plans::get_plan_for_goal(pool, goal.id)
        .await?
        .ok_or_else(|| anyhow!("goal {} has no plan", goal.id))?;
    let stages = stages::list_stages_for_plan(pool, plan.id).await?;

    Ok(Some(GoalTree { goal, plan, stages }))
}
