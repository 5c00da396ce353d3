//! Quota-gated goal creation.
//!
//! Steps, strictly in order:
//!
//! 1. Lazy entitlement correction: a lapsed premium flag is cleared and
//!    committed on its own.
//! 2. Quota check against the corrected entitlement.
//! 3. Plan generation under a timeout, then validation.
//! 4. Goal, plan and stages inserted in one transaction, after the quota
//!    is checked again under the user's row lock.
//!
//! Nothing from steps 3-4 survives a failure. The correction from step 1
//! does.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};

use questpath_db::models::StageStatus;
use questpath_db::queries::goals::{self, NewGoal};
use questpath_db::queries::stages::{self, NewStage};
use questpath_db::queries::{plans, users};

use super::GoalTree;
use crate::entitlement::Entitlement;
use crate::events::{self, EventSink};
use crate::metrics::BusinessMetrics;
use crate::producer::{PlanDraft, PlanProducer, ProducerConfig, ProducerError, validate_generated_plan};

/// How many goals a user without active premium may own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub free_goal_limit: i64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self { free_goal_limit: 2 }
    }
}

/// Why a quota refusal happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCause {
    /// Premium lapsed and was cleared by this request.
    PremiumExpired,
    FreeTier,
}

impl QuotaCause {
    pub fn code(self) -> &'static str {
        match self {
            Self::PremiumExpired => "PREMIUM_EXPIRED",
            Self::FreeTier => "GOAL_LIMIT_REACHED",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CreateGoalError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("user {0} not found")]
    UserNotFound(i64),

    #[error("goal limit reached ({current}/{max})")]
    QuotaExceeded {
        current: i64,
        max: i64,
        cause: QuotaCause,
    },

    #[error("malformed plan: {0}")]
    MalformedOutput(String),

    #[error("plan producer unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl From<ProducerError> for CreateGoalError {
    fn from(err: ProducerError) -> Self {
        match err {
            ProducerError::MalformedOutput(m) => Self::MalformedOutput(m),
            ProducerError::UpstreamUnavailable(m) => Self::UpstreamUnavailable(m),
            ProducerError::Unknown(m) => Self::Unknown(anyhow!("plan producer failed: {m}")),
        }
    }
}

pub struct CreationPipeline {
    pool: PgPool,
    producer: Arc<dyn PlanProducer>,
    quota: QuotaPolicy,
    generation_timeout: Duration,
    events: EventSink,
    metrics: Arc<BusinessMetrics>,
}

impl CreationPipeline {
    pub fn new(
        pool: PgPool,
        producer: Arc<dyn PlanProducer>,
        quota: QuotaPolicy,
        metrics: Arc<BusinessMetrics>,
    ) -> Self {
        let events = EventSink::new(pool.clone());
        Self {
            pool,
            producer,
            quota,
            generation_timeout: ProducerConfig::DEFAULT_TIMEOUT,
            events,
            metrics,
        }
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn quota(&self) -> QuotaPolicy {
        self.quota
    }

    pub async fn create_goal(&self, user_id: i64, description: &str) -> Result<GoalTree, CreateGoalError> {
        self.create_goal_at(user_id, description, Utc::now()).await
    }

    /// [`create_goal`](Self::create_goal) with an explicit clock.
    pub async fn create_goal_at(
        &self,
        user_id: i64,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<GoalTree, CreateGoalError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(CreateGoalError::InvalidRequest("description must not be empty".into()));
        }

        let entitlement = self.corrected_entitlement(user_id, now).await?;

        // Early check so an over-quota request never reaches the producer.
        // `persist` repeats it under the user's row lock.
        if !entitlement.entitlement.is_active(now) {
            let current = goals::count_goals_for_user(&self.pool, user_id).await?;
            if current >= self.quota.free_goal_limit {
                return Err(self.quota_exceeded(user_id, current, entitlement.lapsed));
            }
        }

        let generated = tokio::time::timeout(self.generation_timeout, self.producer.generate(description))
            .await
            .map_err(|_| {
                warn!(user_id, timeout = ?self.generation_timeout, "plan generation timed out");
                CreateGoalError::UpstreamUnavailable(format!(
                    "plan generation timed out after {}s",
                    self.generation_timeout.as_secs()
                ))
            })?
            .inspect_err(|e| warn!(user_id, error = %e, "plan generation failed"))?;
        let draft = validate_generated_plan(generated)
            .inspect_err(|e| warn!(user_id, error = %e, "generated plan rejected"))?;

        let (tree, is_premium) = self
            .persist(user_id, description, &draft, now, entitlement.lapsed)
            .await?;

        self.metrics.goal_created();
        info!(user_id, goal_id = %tree.goal.id, stages = tree.stages.len(), "goal created");
        self.events
            .append(
                events::GOAL_CREATED,
                Some(user_id),
                json!({
                    "goal_id": tree.goal.id,
                    "title": tree.goal.title,
                    "is_premium": is_premium,
                }),
            )
            .await;

        Ok(tree)
    }

    /// Load the user's entitlement, clearing a lapsed premium flag first.
    async fn corrected_entitlement(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CorrectedEntitlement, CreateGoalError> {
        let user = users::get_user(&self.pool, user_id)
            .await?
            .ok_or(CreateGoalError::UserNotFound(user_id))?;
        let entitlement = Entitlement::of(&user);
        if !entitlement.is_lapsed(now) {
            return Ok(CorrectedEntitlement {
                entitlement,
                lapsed: false,
            });
        }

        if users::clear_lapsed_premium(&self.pool, user_id, now).await? {
            info!(user_id, expiry = ?user.premium_expiry, "cleared lapsed premium");
            self.events
                .append(
                    events::PREMIUM_EXPIRED,
                    Some(user_id),
                    json!({ "premium_expiry": user.premium_expiry }),
                )
                .await;
            return Ok(CorrectedEntitlement {
                entitlement: Entitlement {
                    is_premium: false,
                    premium_expiry: user.premium_expiry,
                },
                lapsed: true,
            });
        }

        // A renewal or cancellation landed between the read and the guarded
        // write; use whatever is stored now.
        let fresh = users::get_user(&self.pool, user_id)
            .await?
            .ok_or(CreateGoalError::UserNotFound(user_id))?;
        Ok(CorrectedEntitlement {
            entitlement: Entitlement::of(&fresh),
            lapsed: false,
        })
    }

    fn quota_exceeded(&self, user_id: i64, current: i64, lapsed: bool) -> CreateGoalError {
        let cause = if lapsed {
            QuotaCause::PremiumExpired
        } else {
            QuotaCause::FreeTier
        };
        info!(user_id, current, max = self.quota.free_goal_limit, code = cause.code(), "goal quota reached");
        CreateGoalError::QuotaExceeded {
            current,
            max: self.quota.free_goal_limit,
            cause,
        }
    }

    /// Insert the hierarchy in one transaction. Returns the tree and whether
    /// the user was premium when the goal was written.
    ///
    /// The user row is locked first and the quota re-checked, so concurrent
    /// creations for one user cannot all slip under the limit. The lock is
    /// only held for the inserts, never across the producer call.
    async fn persist(
        &self,
        user_id: i64,
        description: &str,
        draft: &PlanDraft,
        now: DateTime<Utc>,
        lapsed: bool,
    ) -> Result<(GoalTree, bool), CreateGoalError> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let user = users::lock_user(&mut *tx, user_id)
            .await?
            .ok_or(CreateGoalError::UserNotFound(user_id))?;
        let is_premium = Entitlement::of(&user).is_active(now);
        if !is_premium {
            let current = goals::count_goals_for_user(&mut *tx, user_id).await?;
            if current >= self.quota.free_goal_limit {
                return Err(self.quota_exceeded(user_id, current, lapsed));
            }
        }

        let goal = goals::insert_goal(
            &mut *tx,
            &NewGoal {
                user_id,
                title: &draft.title,
                description,
                category: &draft.category,
                difficulty_level: draft.difficulty,
            },
        )
        .await?;

        let plan = plans::insert_plan(&mut *tx, goal.id, &draft.roadmap_name).await?;

        let mut created = Vec::with_capacity(draft.stages.len());
        for stage in &draft.stages {
            let row = stages::insert_stage(
                &mut *tx,
                &NewStage {
                    plan_id: plan.id,
                    order: stage.order,
                    title: &stage.title,
                    description: &stage.description,
                    topics: &stage.topics,
                    xp_reward: stage.xp_reward,
                    status: StageStatus::initial_for_order(stage.order),
                },
            )
            .await?;
            created.push(row);
        }

        tx.commit().await.context("failed to commit goal")?;

        Ok((
            GoalTree {
                goal,
                plan,
                stages: created,
            },
            is_premium,
        ))
    }
}

struct CorrectedEntitlement {
    entitlement: Entitlement,
    /// The flag was lapsed and this request cleared it.
    lapsed: bool,
}
