//! Goals: quota-gated creation, reads, and topic progress.

pub mod pipeline;
pub mod service;
pub mod topics;

use serde::Serialize;

use questpath_db::models::{Goal, Plan, Stage};

pub use pipeline::{CreateGoalError, CreationPipeline, QuotaCause, QuotaPolicy};
pub use service::{get_goal_tree, list_goals};
pub use topics::{TopicError, toggle_topic};

/// A goal with its plan and stages in ascending order.
#[derive(Debug, Clone, Serialize)]
pub struct GoalTree {
    #[serde(flatten)]
    pub goal: Goal,
    pub plan: Plan,
    pub stages: Vec<Stage>,
}
