//! Versioned media types.
//!
//! The marketplace negotiates API versions through vendor media types, and each
//! endpoint family only answers to its own.

/// Vendor media type sent as `Accept` (and `Content-Type` when there is a body).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MediaType {
    PublicV1,
    BetaV1,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::PublicV1 => "application/vnd.allegro.public.v1+json",
            MediaType::BetaV1 => "application/vnd.allegro.beta.v1+json",
        }
    }
}

/// Endpoint families with distinct media types.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EndpointFamily {
    /// `/messaging/...` and `/me`
    Messaging,
    /// `/sale/issues/...` (disputes and claims)
    Issues,
}

impl EndpointFamily {
    pub fn media_type(&self) -> MediaType {
        match self {
            EndpointFamily::Messaging => MediaType::PublicV1,
            EndpointFamily::Issues => MediaType::BetaV1,
        }
    }

    pub(crate) fn attachments_path(&self) -> &'static str {
        match self {
            EndpointFamily::Messaging => "/messaging/message-attachments",
            EndpointFamily::Issues => "/sale/issues/attachments",
        }
    }
}
