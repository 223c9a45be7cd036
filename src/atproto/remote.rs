// SPDX-License-Identifier: MPL-2.0

use crate::atproto::views::{
    ConvosResponse, FeedGeneratorsResponse, FeedResponse, LabelerServicesResponse,
    MessagesResponse, NotificationsResponse, ThreadResponse,
};
use crate::ids::{AtUri, ConvoId, Did};
use crate::timeline::FeedSource;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("not authenticated")]
    NotAuthenticated,
}

impl ClientError {
    /// Human-readable detail for display, when the failure carried one.
    pub fn message(&self) -> Option<&str> {
        match self {
            ClientError::Auth(msg) | ClientError::Network(msg) | ClientError::InvalidResponse(msg) => {
                Some(msg.as_str()).filter(|m| !m.is_empty())
            }
            ClientError::NotAuthenticated => None,
        }
    }
}

/// The AppView as seen by the sync engine: decoded pages plus an opaque
/// continuation token that is passed back verbatim and never parsed.
#[async_trait]
pub trait Remote: Send + Sync {
    async fn feed(
        &self,
        source: &FeedSource,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<FeedResponse, ClientError>;

    async fn post_thread(
        &self,
        uri: &AtUri,
        depth: u16,
        parent_height: u16,
    ) -> Result<ThreadResponse, ClientError>;

    async fn notifications(
        &self,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<NotificationsResponse, ClientError>;

    async fn conversations(
        &self,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<ConvosResponse, ClientError>;

    async fn messages(
        &self,
        convo: &ConvoId,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<MessagesResponse, ClientError>;

    async fn feed_generators(&self, uris: &[AtUri]) -> Result<FeedGeneratorsResponse, ClientError>;

    async fn labeler_services(&self, dids: &[Did]) -> Result<LabelerServicesResponse, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message() {
        assert_eq!(
            ClientError::Network("timed out".into()).message(),
            Some("timed out")
        );
        assert_eq!(ClientError::Network(String::new()).message(), None);
        assert_eq!(ClientError::NotAuthenticated.message(), None);
    }
}
