use std::fmt;

use serde::{Deserialize, Serialize};

/// WhatsApp address (`<user>@<server>`), used for both chats and senders.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(pub String);

impl Jid {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The user part before `@` (and before any `:device` suffix).
    pub fn user(&self) -> &str {
        let user = self.0.split('@').next().unwrap_or(&self.0);
        user.split(':').next().unwrap_or(user)
    }

    /// `user@server` without the `:device` suffix, the form mentions expect.
    pub fn without_device(&self) -> Jid {
        match self.0.split_once('@') {
            Some((_, server)) => Jid(format!("{}@{server}", self.user())),
            None => self.clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend message id (opaque string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

/// A stable reference to a sent or received message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat: Jid,
    pub message_id: MessageId,
}
