// Core moderation module - automod decision engine and enforcement.
// Following the same pattern as the other core modules: models, service, ports.

pub mod enforcement;
pub mod join_monitor;
pub mod moderation_models;
pub mod moderation_policy;
pub mod moderation_service;
pub mod policy_checks;

pub use enforcement::*;
pub use join_monitor::*;
pub use moderation_models::*;
pub use moderation_policy::*;
pub use moderation_service::*;
