use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{Jid, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{MediaRef, OutgoingMessage},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* two sends.
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Nothing is pending once the next slot is already due.
    fn is_idle(&self, now: Instant) -> bool {
        self.next <= now
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that paces outbound sends.
///
/// Bursty replies (several handlers firing on one message, a batch of commands)
/// are spread out so the account does not look like a spam source. Media downloads
/// are not throttled.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<Jid, IntervalLimiter>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a slot for `chat`, dropping limiters of chats that went quiet.
    async fn reserve_chat(&self, chat: &Jid) -> Duration {
        let mut map = self.per_chat.lock().await;
        let now = Instant::now();
        map.retain(|_, lim| !lim.is_idle(now));
        map.entry(chat.clone())
            .or_insert_with(|| IntervalLimiter::new(self.cfg.per_chat_min_interval))
            .reserve()
    }

    async fn throttle_chat(&self, chat: &Jid) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = self.reserve_chat(chat).await;

        let wait = global_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    async fn send(&self, chat: &Jid, message: OutgoingMessage) -> Result<MessageRef> {
        self.throttle_chat(chat).await;
        self.inner.send(chat, message).await
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        self.inner.download_media(media).await
    }
}
