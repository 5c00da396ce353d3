//! In-memory fakes for the producer and payment gateway seams, plus a few
//! assertions shared by the core integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use questpath_core::billing::{
    CheckoutRequest, Customer, PaymentGateway, Subscription, sign_payload,
};
use questpath_core::producer::{
    GeneratedLevel, GeneratedPlan, GeneratedRoadmap, GeneratedTopic, PlanProducer, ProducerError,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

pub enum ProducerBehavior {
    Plan(GeneratedPlan),
    Fail(ProducerError),
    /// Returns the plan after sleeping, so concurrent requests overlap.
    Slow(GeneratedPlan, std::time::Duration),
    /// Never completes.
    Hang,
}

pub struct FakeProducer {
    behavior: ProducerBehavior,
    calls: AtomicUsize,
}

impl FakeProducer {
    pub fn returning(plan: GeneratedPlan) -> Self {
        Self::with(ProducerBehavior::Plan(plan))
    }

    pub fn failing(err: ProducerError) -> Self {
        Self::with(ProducerBehavior::Fail(err))
    }

    pub fn slow(plan: GeneratedPlan, delay: std::time::Duration) -> Self {
        Self::with(ProducerBehavior::Slow(plan, delay))
    }

    pub fn hanging() -> Self {
        Self::with(ProducerBehavior::Hang)
    }

    fn with(behavior: ProducerBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlanProducer for FakeProducer {
    async fn generate(&self, _description: &str) -> Result<GeneratedPlan, ProducerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            ProducerBehavior::Plan(plan) => Ok(plan.clone()),
            ProducerBehavior::Fail(err) => Err(err.clone()),
            ProducerBehavior::Slow(plan, delay) => {
                tokio::time::sleep(*delay).await;
                Ok(plan.clone())
            }
            ProducerBehavior::Hang => std::future::pending().await,
        }
    }
}

pub fn level(order: i64, title: &str) -> GeneratedLevel {
    GeneratedLevel {
        order,
        title: title.to_owned(),
        description: format!("{title} description"),
        topics: vec![
            GeneratedTopic::Name(format!("{title} topic A")),
            GeneratedTopic::Detailed {
                name: format!("{title} topic B"),
                explanation: "why it matters".to_owned(),
            },
        ],
        xp_reward: 100 * order,
    }
}

pub fn plan_with_levels(levels: Vec<GeneratedLevel>) -> GeneratedPlan {
    GeneratedPlan {
        title: "Learn Rust".to_owned(),
        category: "Programming".to_owned(),
        difficulty: "beginner".to_owned(),
        roadmap: GeneratedRoadmap {
            name: "Rust roadmap".to_owned(),
            levels,
        },
    }
}

/// Two levels, order 1 and 2.
pub fn sample_plan() -> GeneratedPlan {
    plan_with_levels(vec![level(1, "Basics"), level(2, "Ownership")])
}

// ---------------------------------------------------------------------------
// Payment gateway
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeGateway {
    pub customers: Mutex<HashMap<String, Customer>>,
    pub subscriptions: Mutex<HashMap<String, Subscription>>,
    /// customer id -> active subscription ids
    pub active: Mutex<HashMap<String, Vec<String>>>,
    pub fail_subscription_lookup: bool,
    pub checkouts: Mutex<Vec<(i64, String)>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_customer(self, id: &str, email: Option<&str>) -> Self {
        self.customers.lock().unwrap().insert(
            id.to_owned(),
            Customer {
                id: id.to_owned(),
                email: email.map(str::to_owned),
            },
        );
        self
    }

    pub fn with_subscription(self, id: &str, period_end: Option<DateTime<Utc>>) -> Self {
        self.subscriptions.lock().unwrap().insert(
            id.to_owned(),
            Subscription {
                id: id.to_owned(),
                current_period_end: period_end,
            },
        );
        self
    }

    pub fn with_active(self, customer_id: &str, subscription_id: &str) -> Self {
        self.active
            .lock()
            .unwrap()
            .entry(customer_id.to_owned())
            .or_default()
            .push(subscription_id.to_owned());
        self
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(&self, request: &CheckoutRequest<'_>) -> Result<String> {
        self.checkouts
            .lock()
            .unwrap()
            .push((request.user_id, request.email.to_owned()));
        Ok(format!("https://checkout.test/session/{}", request.user_id))
    }

    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>> {
        Ok(self
            .customers
            .lock()
            .unwrap()
            .values()
            .find(|c| c.email.as_deref() == Some(email))
            .cloned())
    }

    async fn retrieve_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        Ok(self.customers.lock().unwrap().get(customer_id).cloned())
    }

    async fn list_active_subscriptions(&self, customer_id: &str) -> Result<Vec<Subscription>> {
        let ids = self
            .active
            .lock()
            .unwrap()
            .get(customer_id)
            .cloned()
            .unwrap_or_default();
        let subs = self.subscriptions.lock().unwrap();
        Ok(ids.iter().filter_map(|id| subs.get(id).cloned()).collect())
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<Subscription> {
        self.cancelled.lock().unwrap().push(subscription_id.to_owned());
        match self.subscriptions.lock().unwrap().get(subscription_id) {
            Some(sub) => Ok(sub.clone()),
            None => bail!("no such subscription {subscription_id}"),
        }
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<Subscription> {
        if self.fail_subscription_lookup {
            bail!("provider unreachable");
        }
        match self.subscriptions.lock().unwrap().get(subscription_id) {
            Some(sub) => Ok(sub.clone()),
            None => bail!("no such subscription {subscription_id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Serialize `value` and sign it with [`WEBHOOK_SECRET`] at the current time.
pub fn signed(value: &Value) -> (Vec<u8>, String) {
    let payload = value.to_string().into_bytes();
    let header = sign_payload(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
    (payload, header)
}

pub async fn count_rows(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Postgres keeps microseconds; compare instants at millisecond precision.
pub fn assert_same_instant(actual: DateTime<Utc>, expected: DateTime<Utc>) {
    let drift = (actual - expected).num_milliseconds().abs();
    assert!(drift <= 1, "expected {expected}, got {actual}");
}
