// Discord adapters for the automod engine.

pub mod audit_log;
pub mod automod_handler;
pub mod message_adapter;
pub mod serenity_gateway;

pub use audit_log::ChannelAuditSink;
pub use automod_handler::{handle_member_join, handle_message_for_automod};
pub use serenity_gateway::SerenityGateway;
