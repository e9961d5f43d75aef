//! "Conversation X on account Y was already handled."

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sellerdesk_core::{ConversationId, LinkedAccountId};

use crate::error::StoreError;

/// Check-then-act marker log, read before acting and written after.
///
/// Runs inside a work scope; writes become durable when the scope completes.
#[async_trait]
pub trait IdempotencyLog: Send {
    async fn is_handled(
        &mut self,
        conversation_id: &ConversationId,
        account_id: LinkedAccountId,
    ) -> Result<bool, StoreError>;

    /// Insert the marker; an existing marker is left as is.
    async fn mark_handled(
        &mut self,
        conversation_id: &ConversationId,
        account_id: LinkedAccountId,
        handled_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
