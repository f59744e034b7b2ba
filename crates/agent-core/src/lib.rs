pub mod domain;
pub mod error;
pub mod settings;
pub mod wire;

pub use domain::*;
pub use settings::{AgentSettings, SettingsOverrides};
