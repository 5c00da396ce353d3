//! Process-local business counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters shared by all request tasks. Lock-free.
#[derive(Debug, Default)]
pub struct BusinessMetrics {
    goals_created: AtomicU64,
    premium_activated: AtomicU64,
    premium_renewed: AtomicU64,
    premium_revoked: AtomicU64,
    notifications_rejected: AtomicU64,
    notifications_failed: AtomicU64,
}

/// A point-in-time copy of [`BusinessMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub goals_created: u64,
    pub premium_activated: u64,
    pub premium_renewed: u64,
    pub premium_revoked: u64,
    pub notifications_rejected: u64,
    pub notifications_failed: u64,
}

impl BusinessMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn goal_created(&self) {
        self.goals_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn premium_activated(&self) {
        self.premium_activated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn premium_renewed(&self) {
        self.premium_renewed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn premium_revoked(&self) {
        self.premium_revoked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_rejected(&self) {
        self.notifications_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            goals_created: self.goals_created.load(Ordering::Relaxed),
            premium_activated: self.premium_activated.load(Ordering::Relaxed),
            premium_renewed: self.premium_renewed.load(Ordering::Relaxed),
            premium_revoked: self.premium_revoked.load(Ordering::Relaxed),
            notifications_rejected: self.notifications_rejected.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }
}
