//! # convo-core
//!
//! Core types for conversation persistence: conversation, message and summary
//! models, the error taxonomy, runtime settings, and tracing initialization.
//! Storage-agnostic; used by convo-storage and convo-manager.

pub mod error;
pub mod logger;
pub mod settings;
pub mod types;

pub use error::{ConvoError, Result};
pub use logger::init_tracing;
pub use settings::Settings;
pub use types::{
    ContextWindow, Conversation, ConversationSummary, HealthReport, MessageRole, StoredMessage,
    UserStats,
};
