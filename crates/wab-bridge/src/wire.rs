//! Newline-delimited JSON spoken with the bridge process.
//!
//! The bridge is any program that holds a WhatsApp multi-device session and
//! speaks this protocol on stdio. Event names follow the Baileys
//! (`@whiskeysockets/baileys`) socket events, so a bridge is a thin loop around
//! `makeWASocket` that forwards `connection.update`, `creds.update` and
//! `messages.upsert`, and answers commands. Every line is one JSON object with a
//! `type` tag; binary payloads are standard base64.
//!
//! # Bot → bridge (stdin)
//!
//! The first line is always `auth`, carrying whatever the session store holds
//! (`creds` is `null` before pairing):
//!
//! ```text
//! {"type":"auth","creds":{...},"keys":{"pre-key:1":{...}}}
//! {"type":"send","request_id":1,"chat":"123@s.whatsapp.net","text":"Hola @123","mentions":["123@s.whatsapp.net"]}
//! {"type":"send","request_id":2,"chat":"123@s.whatsapp.net","sticker":"UklGR...","mimetype":"image/webp"}
//! {"type":"send","request_id":3,"chat":"123@s.whatsapp.net","audio":"SUQz...","mimetype":"audio/mpeg"}
//! {"type":"download_media","request_id":4,"message_id":"3EB0C0FFEE"}
//! ```
//!
//! # Bridge → bot (stdout)
//!
//! ```text
//! {"type":"connection.update","qr":"2@..."}
//! {"type":"connection.update","connection":"open"}
//! {"type":"connection.update","connection":"close","status_code":401}
//! {"type":"creds.update","creds":{...},"keys":{"pre-key:1":{...},"pre-key:2":null}}
//! {"type":"messages.upsert","messages":[{"id":"3EB0C0FFEE","chat":"g@g.us","sender":"123@s.whatsapp.net","from_me":false,"conversation":"hola"}]}
//! {"type":"sent","request_id":1,"id":"3EB0BEEF"}
//! {"type":"media","request_id":4,"data":"iVBORw0..."}
//! {"type":"error","request_id":2,"message":"not connected"}
//! ```
//!
//! `connection` is one of `connecting`, `open`, `close`; `status_code` is the
//! Baileys disconnect code (401 means logged out). A `null` key in `creds.update`
//! deletes that key. Messages may carry `conversation`, `extended_text` and
//! `image` (`{"caption": ...}`); `sender` defaults to `chat`. `error` without a
//! `request_id` is logged. Unknown `type`s are ignored. The bridge exits when
//! stdin closes.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use wab_core::{
    connection::{ConnectionState, ConnectionUpdate, DisconnectReason, SessionEvent},
    domain::{Jid, MessageId},
    errors::Error,
    messaging::types::{InboundMessage, MediaRef, MessageBatch, MessagePayload, OutgoingMessage},
    session::{Credentials, CredentialsUpdate},
    Result,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "connection.update")]
    ConnectionUpdate {
        connection: Option<String>,
        qr: Option<String>,
        status_code: Option<u16>,
    },
    #[serde(rename = "creds.update")]
    CredsUpdate {
        creds: Option<serde_json::Value>,
        #[serde(default)]
        keys: BTreeMap<String, Option<serde_json::Value>>,
    },
    #[serde(rename = "messages.upsert")]
    MessagesUpsert {
        #[serde(default)]
        messages: Vec<WireMessage>,
    },
    #[serde(rename = "sent")]
    Sent { request_id: u64, id: String },
    #[serde(rename = "media")]
    Media { request_id: u64, data: String },
    #[serde(rename = "error")]
    Error {
        request_id: Option<u64>,
        message: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    chat: String,
    /// Group participant; direct chats omit it.
    sender: Option<String>,
    #[serde(default)]
    from_me: bool,
    conversation: Option<String>,
    extended_text: Option<String>,
    image: Option<WireImage>,
}

#[derive(Debug, Deserialize)]
struct WireImage {
    caption: Option<String>,
}

/// Reply to a correlated request.
#[derive(Debug)]
pub enum Response {
    Sent(MessageId),
    Media(Vec<u8>),
    Failed(String),
}

#[derive(Debug)]
pub enum Decoded {
    Event(SessionEvent),
    Response { request_id: u64, response: Response },
    /// Bridge-level error without a request to attach to.
    Notice(String),
    Ignored,
}

pub fn decode_line(line: &str) -> Result<Decoded> {
    let ev: WireEvent = serde_json::from_str(line)?;
    Ok(match ev {
        WireEvent::ConnectionUpdate {
            connection,
            qr,
            status_code,
        } => {
            let state = match connection.as_deref() {
                None => None,
                Some("connecting") => Some(ConnectionState::Connecting),
                Some("open") => Some(ConnectionState::Open),
                Some("close") => Some(ConnectionState::Closed(
                    DisconnectReason::from_status_code(status_code),
                )),
                Some(other) => {
                    return Err(Error::External(format!(
                        "unknown connection state from bridge: {other}"
                    )))
                }
            };
            Decoded::Event(SessionEvent::Connection(ConnectionUpdate { state, qr }))
        }
        WireEvent::CredsUpdate { creds, keys } => {
            Decoded::Event(SessionEvent::Credentials(CredentialsUpdate { creds, keys }))
        }
        WireEvent::MessagesUpsert { messages } => Decoded::Event(SessionEvent::Messages(
            MessageBatch {
                messages: messages.into_iter().map(into_inbound).collect(),
            },
        )),
        WireEvent::Sent { request_id, id } => Decoded::Response {
            request_id,
            response: Response::Sent(MessageId(id)),
        },
        WireEvent::Media { request_id, data } => {
            let response = match STANDARD.decode(data.as_bytes()) {
                Ok(bytes) => Response::Media(bytes),
                Err(e) => Response::Failed(format!("invalid media payload: {e}")),
            };
            Decoded::Response {
                request_id,
                response,
            }
        }
        WireEvent::Error {
            request_id: Some(request_id),
            message,
        } => Decoded::Response {
            request_id,
            response: Response::Failed(message),
        },
        WireEvent::Error {
            request_id: None,
            message,
        } => Decoded::Notice(message),
        WireEvent::Unknown => Decoded::Ignored,
    })
}

fn into_inbound(m: WireMessage) -> InboundMessage {
    let chat = Jid::new(m.chat);
    let sender = m.sender.map(Jid::new).unwrap_or_else(|| chat.clone());
    let id = MessageId(m.id);
    let image = m.image.map(|img| MediaRef {
        message_id: id.clone(),
        caption: img.caption,
    });
    InboundMessage {
        id,
        chat,
        sender,
        from_me: m.from_me,
        payload: MessagePayload {
            conversation: m.conversation,
            extended_text: m.extended_text,
            image,
        },
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireCommand<'a> {
    Auth {
        creds: &'a Option<serde_json::Value>,
        keys: &'a BTreeMap<String, serde_json::Value>,
    },
    Send {
        request_id: u64,
        chat: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<&'a str>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        mentions: Vec<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sticker: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        mimetype: Option<&'a str>,
    },
    DownloadMedia {
        request_id: u64,
        message_id: &'a str,
    },
}

pub fn encode_auth(credentials: &Credentials) -> Result<String> {
    line(&WireCommand::Auth {
        creds: &credentials.creds,
        keys: &credentials.keys,
    })
}

pub fn encode_send(request_id: u64, chat: &Jid, message: &OutgoingMessage) -> Result<String> {
    let cmd = match message {
        OutgoingMessage::Text { text, mentions } => WireCommand::Send {
            request_id,
            chat: chat.as_str(),
            text: Some(text),
            mentions: mentions.iter().map(Jid::as_str).collect(),
            sticker: None,
            audio: None,
            mimetype: None,
        },
        OutgoingMessage::Sticker { data } => WireCommand::Send {
            request_id,
            chat: chat.as_str(),
            text: None,
            mentions: Vec::new(),
            sticker: Some(STANDARD.encode(data)),
            audio: None,
            mimetype: Some("image/webp"),
        },
        OutgoingMessage::Audio { data, mime_type } => WireCommand::Send {
            request_id,
            chat: chat.as_str(),
            text: None,
            mentions: Vec::new(),
            sticker: None,
            audio: Some(STANDARD.encode(data)),
            mimetype: Some(mime_type),
        },
    };
    line(&cmd)
}

pub fn encode_download(request_id: u64, media: &MediaRef) -> Result<String> {
    line(&WireCommand::DownloadMedia {
        request_id,
        message_id: &media.message_id.0,
    })
}

fn line(cmd: &WireCommand<'_>) -> Result<String> {
    let mut s = serde_json::to_string(cmd)?;
    s.push('\n');
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(line: &str) -> SessionEvent {
        match decode_line(line).unwrap() {
            Decoded::Event(ev) => ev,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn connection_updates_carry_state_and_qr() {
        let ev = event(r#"{"type":"connection.update","qr":"2@abc"}"#);
        let SessionEvent::Connection(u) = ev else {
            panic!("wrong kind");
        };
        assert_eq!(u.state, None);
        assert_eq!(u.qr.as_deref(), Some("2@abc"));

        let ev = event(r#"{"type":"connection.update","connection":"close","status_code":401}"#);
        let SessionEvent::Connection(u) = ev else {
            panic!("wrong kind");
        };
        assert_eq!(
            u.state,
            Some(ConnectionState::Closed(DisconnectReason::LoggedOut))
        );
    }

    #[test]
    fn unknown_connection_state_is_an_error() {
        assert!(decode_line(r#"{"type":"connection.update","connection":"weird"}"#).is_err());
    }

    #[test]
    fn creds_update_keeps_deletions() {
        let ev = event(r#"{"type":"creds.update","creds":{"me":1},"keys":{"a":{"k":1},"b":null}}"#);
        let SessionEvent::Credentials(u) = ev else {
            panic!("wrong kind");
        };
        assert_eq!(u.creds, Some(json!({"me": 1})));
        assert_eq!(u.keys.get("a"), Some(&Some(json!({"k": 1}))));
        assert_eq!(u.keys.get("b"), Some(&None));
    }

    #[test]
    fn messages_default_sender_to_chat() {
        let ev = event(
            r##"{"type":"messages.upsert","messages":[
                {"id":"1","chat":"123@s","conversation":"hola"},
                {"id":"2","chat":"g@g.us","sender":"456@s","from_me":true,"image":{"mimetype":"image/jpeg","caption":"#sticker"}}
            ]}"##,
        );
        let SessionEvent::Messages(batch) = ev else {
            panic!("wrong kind");
        };
        assert_eq!(batch.messages.len(), 2);
        assert_eq!(batch.messages[0].sender, Jid::new("123@s"));
        assert_eq!(batch.messages[0].text(), Some("hola"));
        assert!(batch.messages[1].from_me);
        assert_eq!(batch.messages[1].sender, Jid::new("456@s"));
        let img = batch.messages[1].image().unwrap();
        assert_eq!(img.message_id, MessageId("2".to_string()));
        assert_eq!(batch.messages[1].text(), Some("#sticker"));
    }

    #[test]
    fn responses_are_correlated() {
        match decode_line(r#"{"type":"sent","request_id":7,"id":"ABC"}"#).unwrap() {
            Decoded::Response {
                request_id: 7,
                response: Response::Sent(id),
            } => assert_eq!(id.0, "ABC"),
            other => panic!("{other:?}"),
        }
        match decode_line(r#"{"type":"media","request_id":8,"data":"aGk="}"#).unwrap() {
            Decoded::Response {
                request_id: 8,
                response: Response::Media(bytes),
            } => assert_eq!(bytes, b"hi"),
            other => panic!("{other:?}"),
        }
        assert!(matches!(
            decode_line(r#"{"type":"error","message":"boom"}"#).unwrap(),
            Decoded::Notice(_)
        ));
        assert!(matches!(
            decode_line(r#"{"type":"presence.update"}"#).unwrap(),
            Decoded::Ignored
        ));
    }

    #[test]
    fn send_commands_encode_each_content_kind() {
        let chat = Jid::new("123@s");
        let text = encode_send(
            1,
            &chat,
            &OutgoingMessage::text_with_mentions("Hola @123", vec![Jid::new("123@s")]),
        )
        .unwrap();
        assert!(text.ends_with('\n'));
        let v: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(
            v,
            json!({"type":"send","request_id":1,"chat":"123@s","text":"Hola @123","mentions":["123@s"]})
        );

        let audio = encode_send(
            2,
            &chat,
            &OutgoingMessage::Audio {
                data: b"hi".to_vec(),
                mime_type: "audio/mpeg".to_string(),
            },
        )
        .unwrap();
        let v: serde_json::Value = serde_json::from_str(&audio).unwrap();
        assert_eq!(v["audio"], "aGk=");
        assert_eq!(v["mimetype"], "audio/mpeg");
        assert!(v.get("text").is_none());
    }

    #[test]
    fn documented_stdout_lines_decode() {
        let lines = [
            r#"{"type":"connection.update","qr":"2@abc"}"#,
            r#"{"type":"connection.update","connection":"open"}"#,
            r#"{"type":"connection.update","connection":"close","status_code":401}"#,
            r#"{"type":"creds.update","creds":{"me":1},"keys":{"pre-key:1":{"k":1},"pre-key:2":null}}"#,
            r#"{"type":"messages.upsert","messages":[{"id":"3EB0C0FFEE","chat":"g@g.us","sender":"123@s.whatsapp.net","from_me":false,"conversation":"hola"}]}"#,
            r#"{"type":"sent","request_id":1,"id":"3EB0BEEF"}"#,
            r#"{"type":"media","request_id":4,"data":"aGk="}"#,
            r#"{"type":"error","request_id":2,"message":"not connected"}"#,
        ];
        let decoded: Vec<Decoded> = lines.iter().map(|l| decode_line(l).unwrap()).collect();
        assert!(decoded[..5].iter().all(|d| matches!(d, Decoded::Event(_))));
        assert!(matches!(
            decoded[7],
            Decoded::Response {
                request_id: 2,
                response: Response::Failed(_)
            }
        ));
    }

    #[test]
    fn download_command_names_the_message() {
        let media = MediaRef {
            message_id: MessageId("3EB0C0FFEE".to_string()),
            caption: None,
        };
        let v: serde_json::Value = serde_json::from_str(&encode_download(4, &media).unwrap()).unwrap();
        assert_eq!(
            v,
            json!({"type":"download_media","request_id":4,"message_id":"3EB0C0FFEE"})
        );
    }

    #[test]
    fn auth_line_carries_credentials() {
        let mut creds = Credentials {
            creds: Some(json!({"me": "x"})),
            ..Default::default()
        };
        creds.keys.insert("k".to_string(), json!(1));
        let v: serde_json::Value = serde_json::from_str(&encode_auth(&creds).unwrap()).unwrap();
        assert_eq!(v, json!({"type":"auth","creds":{"me":"x"},"keys":{"k":1}}));
    }
}
