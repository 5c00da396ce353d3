//! Domain logic: premium entitlement, billing reconciliation, plan
//! generation, and the quota-gated goal creation pipeline.

pub mod billing;
pub mod entitlement;
pub mod events;
pub mod goal;
pub mod metrics;
pub mod producer;
