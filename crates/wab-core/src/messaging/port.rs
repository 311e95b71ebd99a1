use async_trait::async_trait;

use crate::{
    domain::{Jid, MessageRef},
    messaging::types::{MediaRef, OutgoingMessage},
    Result,
};

/// Send primitive of one live connection.
///
/// The bridge adapter is the production implementation; tests use recording fakes.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send(&self, chat: &Jid, message: OutgoingMessage) -> Result<MessageRef>;

    /// Download the bytes of inline media carried by an inbound message.
    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>>;

    async fn send_text(&self, chat: &Jid, text: &str) -> Result<MessageRef> {
        self.send(chat, OutgoingMessage::text(text)).await
    }
}
