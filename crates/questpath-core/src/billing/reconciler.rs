//! Entitlement reconciler: authenticated provider notifications in,
//! absolute entitlement assignments out.
//!
//! ```text
//!   checkout completed ──────────────► PREMIUM_ACTIVE (expiry = period end)
//!   payment succeeded  ──────────────► PREMIUM_ACTIVE (expiry = new period end)
//!   subscription deleted ────────────► FREE (expiry = now)
//!   payment failed / unknown type ───► no change, event only
//! ```
//!
//! Every transition overwrites entitlement with a value derived from
//! provider state, so redelivery and reordering converge.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::{error, info, warn};

use questpath_db::queries::users;

use super::notification::{CheckoutSession, Invoice, Notification, NotificationKind, SubscriptionObject};
use super::signature::{SignatureError, verify_signature};
use super::{BillingConfig, PaymentGateway};
use crate::events::{self, EventSink};
use crate::metrics::BusinessMetrics;

/// Days of access granted when the provider cannot tell us the period end.
pub const FALLBACK_PERIOD_DAYS: i64 = 30;

/// Reasons a notification is refused at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("unauthentic notification: {0}")]
    Unauthentic(#[from] SignatureError),

    #[error("notification payload is not an event object: {0}")]
    MalformedPayload(String),
}

/// What handling an accepted notification did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Activated {
        user_id: i64,
        premium_expiry: DateTime<Utc>,
    },
    Renewed {
        user_id: i64,
        premium_expiry: DateTime<Utc>,
    },
    Revoked {
        user_id: i64,
    },
    PaymentFailureRecorded,
    Ignored {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

pub struct Reconciler {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    config: BillingConfig,
    events: EventSink,
    metrics: Arc<BusinessMetrics>,
}

impl Reconciler {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        config: BillingConfig,
        metrics: Arc<BusinessMetrics>,
    ) -> Self {
        let events = EventSink::new(pool.clone());
        Self {
            pool,
            gateway,
            config,
            events,
            metrics,
        }
    }

    /// Verify and apply one notification.
    ///
    /// Only authenticity and envelope failures are returned as errors.
    /// Processing failures are logged, recorded as an event, and reported as
    /// [`ReconcileOutcome::Failed`] so the caller still acknowledges.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, NotificationError> {
        self.handle_at(payload, signature, Utc::now()).await
    }

    /// [`handle`](Self::handle) with an explicit clock.
    pub async fn handle_at(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, NotificationError> {
        if let Err(e) = verify_signature(
            payload,
            signature,
            &self.config.webhook_secret,
            self.config.signature_tolerance_secs,
            now,
        ) {
            self.metrics.notification_rejected();
            warn!(error = %e, "rejected notification");
            return Err(e.into());
        }

        let notification = Notification::from_slice(payload).map_err(|e| {
            self.metrics.notification_rejected();
            warn!(error = %e, "rejected notification with undecodable body");
            NotificationError::MalformedPayload(e.to_string())
        })?;

        info!(
            notification_id = %notification.id,
            event_type = %notification.event_type,
            "processing notification"
        );

        let outcome = match self.process(&notification, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!("{e:#}");
                error!(
                    notification_id = %notification.id,
                    event_type = %notification.event_type,
                    error = %reason,
                    "notification processing failed"
                );
                self.metrics.notification_failed();
                self.events
                    .append(
                        events::NOTIFICATION_PROCESSING_ERROR,
                        None,
                        json!({
                            "notification_id": notification.id,
                            "event_type": notification.event_type,
                            "error": reason,
                        }),
                    )
                    .await;
                ReconcileOutcome::Failed { reason }
            }
        };

        Ok(outcome)
    }

    async fn process(&self, notification: &Notification, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
        let kind = notification
            .kind()
            .with_context(|| format!("failed to decode {} object", notification.event_type))?;

        match kind {
            NotificationKind::CheckoutCompleted(session) => {
                self.on_checkout_completed(notification, &session, now).await
            }
            NotificationKind::PaymentSucceeded(invoice) => {
                self.on_payment_succeeded(notification, &invoice).await
            }
            NotificationKind::SubscriptionDeleted(subscription) => {
                self.on_subscription_deleted(notification, &subscription, now)
                    .await
            }
            NotificationKind::PaymentFailed(invoice) => {
                self.on_payment_failed(notification, &invoice).await
            }
            NotificationKind::Unrecognized => {
                info!(event_type = %notification.event_type, "ignoring unhandled notification type");
                Ok(self
                    .ignored(notification, format!("unhandled event type {}", notification.event_type))
                    .await)
            }
        }
    }

    /// Record a harmless no-op so it stays visible in the event log.
    async fn ignored(&self, notification: &Notification, reason: String) -> ReconcileOutcome {
        self.events
            .append(
                events::NOTIFICATION_IGNORED,
                None,
                json!({
                    "notification_id": notification.id,
                    "event_type": notification.event_type,
                    "reason": reason,
                }),
            )
            .await;
        ReconcileOutcome::Ignored { reason }
    }

    async fn on_checkout_completed(
        &self,
        notification: &Notification,
        session: &CheckoutSession,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let Some(reference) = session.user_reference() else {
            warn!(session_id = ?session.id, "checkout session carries no user reference");
            return Ok(self
                .ignored(notification, "checkout session has no user reference".into())
                .await);
        };
        let user_id: i64 = reference
            .trim()
            .parse()
            .map_err(|_| anyhow!("checkout user reference {reference:?} is not a user id"))?;
        users::get_user(&self.pool, user_id)
            .await?
            .ok_or_else(|| anyhow!("user {user_id} not found for checkout"))?;

        let premium_expiry = match session.subscription.as_deref() {
            Some(subscription_id) => self.period_end_or_fallback(subscription_id, now).await,
            None => {
                info!(user_id, "checkout has no subscription, using fallback period");
                now + Duration::days(FALLBACK_PERIOD_DAYS)
            }
        };

        users::set_entitlement(&self.pool, user_id, true, Some(premium_expiry))
            .await?
            .ok_or_else(|| anyhow!("user {user_id} disappeared during checkout"))?;

        self.metrics.premium_activated();
        info!(user_id, %premium_expiry, "premium activated");
        self.events
            .append(
                events::PREMIUM_PURCHASED,
                Some(user_id),
                json!({
                    "notification_id": notification.id,
                    "subscription_id": session.subscription,
                    "premium_expiry": premium_expiry,
                }),
            )
            .await;

        Ok(ReconcileOutcome::Activated {
            user_id,
            premium_expiry,
        })
    }

    async fn period_end_or_fallback(&self, subscription_id: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.gateway.retrieve_subscription(subscription_id).await {
            Ok(sub) => sub.current_period_end.unwrap_or_else(|| {
                warn!(subscription_id, "subscription has no period end, using fallback period");
                now + Duration::days(FALLBACK_PERIOD_DAYS)
            }),
            Err(e) => {
                warn!(subscription_id, error = %format!("{e:#}"), "subscription lookup failed, using fallback period");
                now + Duration::days(FALLBACK_PERIOD_DAYS)
            }
        }
    }

    async fn on_payment_succeeded(
        &self,
        notification: &Notification,
        invoice: &Invoice,
    ) -> Result<ReconcileOutcome> {
        let email = invoice
            .customer_email
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| anyhow!("invoice has no customer email"))?;
        let user = users::get_user_by_email(&self.pool, email)
            .await?
            .ok_or_else(|| anyhow!("no user with billing email {email}"))?;

        let Some(subscription_id) = invoice.subscription_id() else {
            return Ok(self
                .ignored(notification, "invoice is not for a subscription".into())
                .await);
        };
        let subscription = self
            .gateway
            .retrieve_subscription(subscription_id)
            .await
            .with_context(|| format!("failed to retrieve subscription {subscription_id} for renewal"))?;
        let Some(premium_expiry) = subscription.current_period_end else {
            warn!(user_id = user.id, subscription_id, "renewal without a period end");
            return Ok(self
                .ignored(notification, format!("subscription {subscription_id} has no period end"))
                .await);
        };

        users::set_entitlement(&self.pool, user.id, true, Some(premium_expiry))
            .await?
            .ok_or_else(|| anyhow!("user {} disappeared during renewal", user.id))?;

        self.metrics.premium_renewed();
        info!(user_id = user.id, %premium_expiry, "premium renewed");
        self.events
            .append(
                events::PREMIUM_RENEWED,
                Some(user.id),
                json!({
                    "notification_id": notification.id,
                    "subscription_id": subscription_id,
                    "premium_expiry": premium_expiry,
                }),
            )
            .await;

        Ok(ReconcileOutcome::Renewed {
            user_id: user.id,
            premium_expiry,
        })
    }

    async fn on_subscription_deleted(
        &self,
        notification: &Notification,
        subscription: &SubscriptionObject,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let customer_id = subscription
            .customer
            .as_deref()
            .ok_or_else(|| anyhow!("subscription has no customer"))?;
        let customer = self
            .gateway
            .retrieve_customer(customer_id)
            .await
            .with_context(|| format!("failed to retrieve customer {customer_id}"))?
            .ok_or_else(|| anyhow!("customer {customer_id} not found"))?;
        let email = customer
            .email
            .as_deref()
            .ok_or_else(|| anyhow!("customer {customer_id} has no email"))?;
        let user = users::get_user_by_email(&self.pool, email)
            .await?
            .ok_or_else(|| anyhow!("no user with billing email {email}"))?;

        users::set_entitlement(&self.pool, user.id, false, Some(now))
            .await?
            .ok_or_else(|| anyhow!("user {} disappeared during cancellation", user.id))?;

        self.metrics.premium_revoked();
        info!(user_id = user.id, "premium revoked");
        self.events
            .append(
                events::PREMIUM_CANCELLED,
                Some(user.id),
                json!({
                    "notification_id": notification.id,
                    "subscription_id": subscription.id,
                    "customer_id": customer_id,
                }),
            )
            .await;

        Ok(ReconcileOutcome::Revoked { user_id: user.id })
    }

    async fn on_payment_failed(
        &self,
        notification: &Notification,
        invoice: &Invoice,
    ) -> Result<ReconcileOutcome> {
        let user_id = match invoice.customer_email.as_deref() {
            Some(email) => users::get_user_by_email(&self.pool, email)
                .await?
                .map(|u| u.id),
            None => None,
        };
        warn!(
            ?user_id,
            invoice_id = ?invoice.id,
            email = ?invoice.customer_email,
            "subscription payment failed"
        );
        self.events
            .append(
                events::PAYMENT_FAILED,
                user_id,
                json!({
                    "notification_id": notification.id,
                    "invoice_id": invoice.id,
                    "customer_email": invoice.customer_email,
                }),
            )
            .await;
        Ok(ReconcileOutcome::PaymentFailureRecorded)
    }
}
