pub mod charm;
pub mod types;

pub use charm::{CharmConfig, ConfigValue};
pub use types::CharmEnv;
