use crate::domain::{Jid, MessageId};

/// One delivered inbound message.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub id: MessageId,
    pub chat: Jid,
    pub sender: Jid,
    pub from_me: bool,
    pub payload: MessagePayload,
}

/// The parts of a message payload the bot understands.
#[derive(Clone, Debug, Default)]
pub struct MessagePayload {
    /// Plain text message.
    pub conversation: Option<String>,
    /// Extended text (replies, link previews, quoted text).
    pub extended_text: Option<String>,
    /// Inline image, if the message carries one.
    pub image: Option<MediaRef>,
}

/// Reference to inline media; the bytes are fetched on demand through the port.
#[derive(Clone, Debug)]
pub struct MediaRef {
    pub message_id: MessageId,
    pub caption: Option<String>,
}

impl InboundMessage {
    /// Text used for command matching: plain text, then extended text, then an
    /// image caption. Blank strings count as absent.
    pub fn text(&self) -> Option<&str> {
        let p = &self.payload;
        [
            p.conversation.as_deref(),
            p.extended_text.as_deref(),
            p.image.as_ref().and_then(|m| m.caption.as_deref()),
        ]
        .into_iter()
        .flatten()
        .find(|t| !t.trim().is_empty())
    }

    pub fn image(&self) -> Option<&MediaRef> {
        self.payload.image.as_ref()
    }
}

/// A set of messages delivered together in one upsert event.
#[derive(Clone, Debug, Default)]
pub struct MessageBatch {
    pub messages: Vec<InboundMessage>,
}

/// Outbound message content.
#[derive(Clone, Debug, PartialEq)]
pub enum OutgoingMessage {
    Text { text: String, mentions: Vec<Jid> },
    Sticker { data: Vec<u8> },
    Audio { data: Vec<u8>, mime_type: String },
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            mentions: Vec::new(),
        }
    }

    pub fn text_with_mentions(text: impl Into<String>, mentions: Vec<Jid>) -> Self {
        Self::Text {
            text: text.into(),
            mentions,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Sticker { .. } => "sticker",
            Self::Audio { .. } => "audio",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(payload: MessagePayload) -> InboundMessage {
        InboundMessage {
            id: MessageId("m1".to_string()),
            chat: Jid::new("123@s"),
            sender: Jid::new("123@s"),
            from_me: false,
            payload,
        }
    }

    #[test]
    fn text_prefers_conversation_then_extended_then_caption() {
        let m = msg(MessagePayload {
            conversation: Some("plain".to_string()),
            extended_text: Some("extended".to_string()),
            image: None,
        });
        assert_eq!(m.text(), Some("plain"));

        let m = msg(MessagePayload {
            conversation: None,
            extended_text: Some("extended".to_string()),
            image: None,
        });
        assert_eq!(m.text(), Some("extended"));

        let m = msg(MessagePayload {
            image: Some(MediaRef {
                message_id: MessageId("m1".to_string()),
                caption: Some("#sticker".to_string()),
            }),
            ..Default::default()
        });
        assert_eq!(m.text(), Some("#sticker"));
    }

    #[test]
    fn blank_payload_has_no_text() {
        let m = msg(MessagePayload {
            conversation: Some("   ".to_string()),
            ..Default::default()
        });
        assert_eq!(m.text(), None);
        assert_eq!(msg(MessagePayload::default()).text(), None);
    }
}
