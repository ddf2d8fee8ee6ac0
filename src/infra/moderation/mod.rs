// Moderation infra - strike stores and policy loading.

pub mod in_memory;
pub mod policy_loader;
pub mod sqlite_strike_store;

pub use in_memory::InMemoryStrikeStore;
pub use policy_loader::{load_policy, load_policy_from};
pub use sqlite_strike_store::SqliteStrikeStore;
