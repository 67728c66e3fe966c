//! Agent loop for tendril.
//!
//! This crate ties the gateway and the tools together:
//! - Configuration management (multi-source, JSONC support)
//! - [`Interaction`] and [`Turn`], the conversation state machine
//! - History building and the context-window battery
//! - Usage summaries and the render boundary
//! - [`Conversation`], the persisted history log

pub mod agent;
pub mod battery;
pub mod config;
pub mod conversation;
pub mod error;
pub mod history;
pub mod interaction;
pub mod prompts;
pub mod render;
pub mod stats;
pub mod turn;

pub use agent::{AgentEnv, RegistryFactory};
pub use battery::Battery;
pub use config::{Config, Limits};
pub use conversation::Conversation;
pub use error::{ConfigError, CoreError, CoreResult};
pub use history::HistoryMode;
pub use interaction::Interaction;
pub use prompts::Prompts;
pub use render::{CollectingSink, RenderSink};
pub use turn::Turn;
