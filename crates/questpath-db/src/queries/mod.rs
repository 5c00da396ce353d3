pub mod events;
pub mod goals;
pub mod plans;
pub mod stages;
pub mod users;
