//! Request and response shapes of the wrapped marketplace endpoints.
//!
//! Only the fields the service reads are modelled; unknown fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Interlocutor {
    pub login: String,
}

/// A buyer-seller conversation as listed by `/messaging/threads`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub read: bool,
    #[serde(default)]
    pub last_message_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interlocutor: Option<Interlocutor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadsPage {
    pub threads: Vec<Thread>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Who wrote a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorRole {
    Seller,
    Buyer,
    /// Marketplace staff, system messages and anything newer than this client.
    #[serde(other)]
    Other,
}

impl AuthorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorRole::Seller => "SELLER",
            AuthorRole::Buyer => "BUYER",
            AuthorRole::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageAuthor {
    #[serde(default)]
    pub login: Option<String>,
    pub role: AuthorRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub author: MessageAuthor,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessagesPage {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentRef {
    pub id: String,
}

/// Body of a message post. `type` is always `REGULAR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub attachment: Option<AttachmentRef>,
}

impl NewMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: "REGULAR",
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment_id: impl Into<String>) -> Self {
        self.attachment = Some(AttachmentRef {
            id: attachment_id.into(),
        });
        self
    }
}

/// Declares an upload before its bytes are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDeclaration {
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Attachment {
    pub id: String,
}

/// A post-sale dispute or claim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Issue {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub buyer: Option<Interlocutor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssuesPage {
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueChatMessage {
    pub id: String,
    pub author: MessageAuthor,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssueChat {
    pub chat: Vec<IssueChatMessage>,
}

/// The authenticated marketplace user (`/me`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarketplaceUser {
    pub id: String,
    pub login: String,
}
