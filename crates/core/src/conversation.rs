//! Conversation bookkeeping: idempotency markers and audit metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ConversationId, LinkedAccountId};

/// Marks a conversation as already acted upon for a given account.
///
/// Existence of an entry for `(conversation_id, account_id)` means "never act on
/// this pair again" until the retention sweep removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyLogEntry {
    pub conversation_id: ConversationId,
    pub account_id: LinkedAccountId,
    pub handled_at: DateTime<Utc>,
}

impl IdempotencyLogEntry {
    pub fn new(
        conversation_id: ConversationId,
        account_id: LinkedAccountId,
        handled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id,
            account_id,
            handled_at,
        }
    }

    pub fn key(&self) -> (ConversationId, LinkedAccountId) {
        (self.conversation_id.clone(), self.account_id)
    }
}

/// Informational audit record of a handled conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub account_id: LinkedAccountId,
    pub conversation_id: ConversationId,
    /// Id of the most recent message at handling time, when known.
    pub message_id: Option<String>,
    /// Marketplace role of that message's author (e.g. `BUYER`).
    pub author_role: String,
    pub notified: bool,
    pub replied: bool,
    pub recorded_at: DateTime<Utc>,
}
