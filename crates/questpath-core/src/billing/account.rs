//! User-initiated subscription operations: starting a checkout and
//! scheduling a cancellation.
//!
//! Neither touches entitlement. It changes only when the provider reports
//! the outcome through a notification.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use questpath_db::models::User;

use super::reconciler::FALLBACK_PERIOD_DAYS;
use super::{CheckoutRequest, PaymentGateway};

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("premium is already active until {expiry}")]
    AlreadyPremium { expiry: DateTime<Utc> },

    #[error(transparent)]
    Gateway(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("user does not have an active premium subscription")]
    NotPremium,

    #[error("no billing customer found for this user")]
    NoCustomer,

    #[error("no active subscription found")]
    NoActiveSubscription,

    #[error(transparent)]
    Gateway(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancellationReceipt {
    pub subscription_id: String,
    /// Premium access remains until this instant.
    pub access_until: DateTime<Utc>,
}

/// Open a subscription checkout session for `user` and return its URL.
pub async fn start_checkout(
    gateway: &dyn PaymentGateway,
    user: &User,
    now: DateTime<Utc>,
) -> Result<String, CheckoutError> {
    if user.is_premium {
        if let Some(expiry) = user.premium_expiry.filter(|e| *e > now) {
            return Err(CheckoutError::AlreadyPremium { expiry });
        }
    }

    let url = gateway
        .create_checkout_session(&CheckoutRequest {
            user_id: user.id,
            email: &user.email,
        })
        .await?;
    info!(user_id = user.id, "checkout session created");
    Ok(url)
}

/// Cancel the user's first active subscription at the end of its period.
pub async fn cancel_subscription(
    gateway: &dyn PaymentGateway,
    user: &User,
    now: DateTime<Utc>,
) -> Result<CancellationReceipt, CancelError> {
    if !user.is_premium {
        return Err(CancelError::NotPremium);
    }

    let customer = gateway
        .find_customer_by_email(&user.email)
        .await?
        .ok_or(CancelError::NoCustomer)?;
    let subscriptions = gateway.list_active_subscriptions(&customer.id).await?;
    let first = subscriptions
        .into_iter()
        .next()
        .ok_or(CancelError::NoActiveSubscription)?;

    let cancelled = gateway.cancel_at_period_end(&first.id).await?;
    let access_until = cancelled
        .current_period_end
        .unwrap_or_else(|| now + Duration::days(FALLBACK_PERIOD_DAYS));

    info!(
        user_id = user.id,
        subscription_id = %cancelled.id,
        %access_until,
        "subscription scheduled for cancellation"
    );
    Ok(CancellationReceipt {
        subscription_id: cancelled.id,
        access_until,
    })
}
