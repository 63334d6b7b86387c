//! # convo-storage
//!
//! Durable conversation storage behind one contract, two backends.
//!
//! ## Modules
//!
//! - [`store`] – the `ConversationStore` trait
//! - [`json_store`] – one JSON document per user, atomic replace-on-write
//! - [`sqlite_store`] – conversations/messages relations via sqlx
//! - [`sqlite_pool`] – SQLite connection pool wrapper
//! - [`factory`] – `Backend`, the tagged choice selected from settings
//! - [`migration`] – copy every user between backends

pub mod factory;
pub mod json_store;
pub mod migration;
pub mod sqlite_pool;
pub mod sqlite_store;
pub mod store;

pub use factory::Backend;
pub use json_store::JsonStore;
pub use migration::migrate;
pub use sqlite_pool::SqlitePoolManager;
pub use sqlite_store::SqliteStore;
pub use store::ConversationStore;
