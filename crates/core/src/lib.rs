//! `sellerdesk-core`: domain building blocks.
//!
//! This crate contains **pure domain** types (no infrastructure concerns).

pub mod account;
pub mod conversation;
pub mod error;
pub mod id;
pub mod retention;
pub mod task;

pub use account::{AutoReplySettings, LinkedAccount, NewLinkedAccount, SealedTokens};
pub use conversation::{IdempotencyLogEntry, MessageMetadata};
pub use error::DomainError;
pub use id::{ConversationId, LinkedAccountId, TaskId, TenantId};
pub use retention::RetentionPolicy;
pub use task::{Task, TaskStatus};
