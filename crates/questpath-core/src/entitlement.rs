//! Premium entitlement state.
//!
//! A user is entitled iff `is_premium` is set and the expiry is either
//! absent or in the future. Both writers (billing reconciliation and the
//! lazy correction in goal creation) derive their decisions from
//! [`Entitlement::state`].

use chrono::{DateTime, Utc};
use serde::Serialize;

use questpath_db::models::User;

/// Observable entitlement state at an instant.
///
/// ```text
/// Free          -> PremiumActive   (checkout completed, renewal)
/// PremiumActive -> PremiumActive   (renewal extends expiry)
/// PremiumActive -> Free            (subscription deleted)
/// PremiumActive -> PremiumLapsed   (time passes expiry)
/// PremiumLapsed -> Free            (lazy correction on next goal creation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementState {
    Free,
    PremiumActive,
    PremiumLapsed,
}

/// The entitlement field group of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entitlement {
    pub is_premium: bool,
    pub premium_expiry: Option<DateTime<Utc>>,
}

impl Entitlement {
    pub fn free() -> Self {
        Self {
            is_premium: false,
            premium_expiry: None,
        }
    }

    pub fn of(user: &User) -> Self {
        Self {
            is_premium: user.is_premium,
            premium_expiry: user.premium_expiry,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> EntitlementState {
        match (self.is_premium, self.premium_expiry) {
            (false, _) => EntitlementState::Free,
            (true, None) => EntitlementState::PremiumActive,
            (true, Some(expiry)) if expiry > now => EntitlementState::PremiumActive,
            (true, Some(_)) => EntitlementState::PremiumLapsed,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == EntitlementState::PremiumActive
    }

    /// True when the flag still says premium but the expiry has passed.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == EntitlementState::PremiumLapsed
    }
}
