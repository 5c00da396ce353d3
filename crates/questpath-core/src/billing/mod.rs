//! Billing: the payment provider seam, inbound notification handling, and
//! account-level subscription operations.

pub mod account;
pub mod notification;
pub mod reconciler;
pub mod signature;
pub mod stripe;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use account::{CancelError, CancellationReceipt, CheckoutError, cancel_subscription, start_checkout};
pub use notification::{Notification, NotificationKind};
pub use reconciler::{NotificationError, ReconcileOutcome, Reconciler};
pub use signature::{SignatureError, sign_payload, verify_signature};
pub use stripe::StripeGateway;

/// Billing configuration passed to the gateway and the reconciler.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Secret API key for outbound provider calls.
    pub api_key: String,
    /// Shared secret used to sign inbound notifications.
    pub webhook_secret: String,
    /// Base URL of the provider REST API.
    pub api_base: String,
    /// Where checkout success/cancel redirects land.
    pub frontend_url: String,
    /// Monthly price in the smallest currency unit.
    pub price_cents: i64,
    pub currency: String,
    pub product_name: String,
    /// Maximum accepted age of a notification signature, in seconds.
    pub signature_tolerance_secs: i64,
}

impl BillingConfig {
    pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
    pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
    pub const DEFAULT_PRICE_CENTS: i64 = 500;
    pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

    pub fn new(api_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            webhook_secret: webhook_secret.into(),
            api_base: Self::DEFAULT_API_BASE.to_owned(),
            frontend_url: Self::DEFAULT_FRONTEND_URL.to_owned(),
            price_cents: Self::DEFAULT_PRICE_CENTS,
            currency: "usd".to_owned(),
            product_name: "QuestPath Premium Subscription".to_owned(),
            signature_tolerance_secs: Self::DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn success_url(&self) -> String {
        format!("{}/dashboard?premium=success", self.frontend_url.trim_end_matches('/'))
    }

    pub fn cancel_url(&self) -> String {
        format!("{}/pricing?checkout=cancelled", self.frontend_url.trim_end_matches('/'))
    }
}

/// A provider customer, resolved at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
}

/// A provider subscription, resolved at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: String,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// What the gateway needs to open a checkout for a user.
#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub user_id: i64,
    pub email: &'a str,
}

/// Outbound interface to the payment provider.
///
/// Implementations convert provider responses into [`Customer`] and
/// [`Subscription`] records; nothing provider-shaped leaks past this trait.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a subscription checkout session and return its URL.
    async fn create_checkout_session(&self, request: &CheckoutRequest<'_>) -> Result<String>;

    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>>;

    /// Fetch a customer by id. `None` when it does not exist or was deleted.
    async fn retrieve_customer(&self, customer_id: &str) -> Result<Option<Customer>>;

    async fn list_active_subscriptions(&self, customer_id: &str) -> Result<Vec<Subscription>>;

    /// Schedule cancellation at the end of the current period.
    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<Subscription>;

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<Subscription>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn PaymentGateway) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_urls_tolerate_trailing_slash() {
        let mut cfg = BillingConfig::new("sk_test", "whsec_test");
        cfg.frontend_url = "https://questpath.app/".into();
        assert_eq!(cfg.success_url(), "https://questpath.app/dashboard?premium=success");
        assert_eq!(cfg.cancel_url(), "https://questpath.app/pricing?checkout=cancelled");
    }

    #[test]
    fn defaults() {
        let cfg = BillingConfig::new("sk_test", "whsec_test");
        assert_eq!(cfg.price_cents, 500);
        assert_eq!(cfg.signature_tolerance_secs, 300);
        assert_eq!(cfg.api_base, "https://api.stripe.com");
    }
}
