// Public modules
pub mod chat;
pub mod collaborator;
pub mod config;
pub mod conversation;
pub mod error;
pub mod export;
pub mod filter;
pub mod observability;
pub mod orchestrator;
pub mod render;
pub mod server;
pub mod session;
pub mod share;
pub mod upload;
pub mod utils;

// Re-exports
pub use config::{AppConfig, CapacityPolicy};
pub use conversation::{Conversation, Role, Turn};
pub use error::{Error, ErrorKind, Result};
pub use export::ExportFormat;
pub use filter::{ContentFilter, FilterRule, Verdict};
pub use observability::register_biometrics;
pub use orchestrator::{Orchestrator, TurnReply, UserInput};
pub use session::{ChatMode, TurnState};
pub use share::{ShareLink, ShareManager};
