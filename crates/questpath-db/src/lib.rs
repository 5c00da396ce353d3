//! Persistence layer: schema migrations, row models, and query functions
//! for users, the goal/plan/stage hierarchy, and the domain event log.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
