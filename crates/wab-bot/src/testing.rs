//! Fakes for the ports, shared by the crate's tests.

use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use wab_core::{
    config::Config,
    domain::{Jid, MessageId, MessageRef},
    download::{DownloadConfig, DownloadPipeline},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{
            InboundMessage, MediaRef, MessageBatch, MessagePayload, OutgoingMessage,
        },
    },
    ports::{ImageFetcher, MediaSource, MediaStream, StickerTransform, VideoResult, VideoSearch},
    Result,
};

use crate::router::{dispatch_batch, AppState, MediaServices, RouteTable};

/// Records every send. Sends of a kind listed in `fail_kinds` fail.
#[derive(Default)]
pub struct FakeMessenger {
    pub sent: Mutex<Vec<(Jid, OutgoingMessage)>>,
    pub fail_kinds: Vec<&'static str>,
    pub media: Option<Vec<u8>>,
}

impl FakeMessenger {
    pub fn failing(kinds: &[&'static str]) -> Self {
        Self {
            fail_kinds: kinds.to_vec(),
            ..Default::default()
        }
    }

    pub fn with_media(bytes: &[u8]) -> Self {
        Self {
            media: Some(bytes.to_vec()),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(Jid, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|(_, m)| match m {
                OutgoingMessage::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send(&self, chat: &Jid, message: OutgoingMessage) -> Result<MessageRef> {
        if self.fail_kinds.contains(&message.kind()) {
            return Err(Error::External(format!("{} rejected", message.kind())));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat.clone(), message));
        Ok(MessageRef {
            chat: chat.clone(),
            message_id: MessageId(format!("out-{}", sent.len())),
        })
    }

    async fn download_media(&self, _media: &MediaRef) -> Result<Vec<u8>> {
        self.media
            .clone()
            .ok_or_else(|| Error::External("no media".to_string()))
    }
}

pub struct FakeSearch {
    pub results: std::result::Result<Vec<VideoResult>, String>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn hits(urls: &[&str]) -> Self {
        Self {
            results: Ok(urls
                .iter()
                .map(|u| VideoResult {
                    title: format!("title of {u}"),
                    url: u.to_string(),
                })
                .collect()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            results: Err("search backend down".to_string()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoSearch for FakeSearch {
    async fn search(&self, query: &str) -> Result<Vec<VideoResult>> {
        self.queries.lock().unwrap().push(query.to_string());
        self.results.clone().map_err(Error::External)
    }
}

/// Serves `chunks`, sleeping `delay` before each one; `fail_at_end` turns the
/// end of stream into an error.
#[derive(Clone, Default)]
pub struct FakeSource {
    pub chunks: Vec<Vec<u8>>,
    pub delay: Duration,
    pub fail_at_end: bool,
}

struct FakeStream {
    chunks: std::vec::IntoIter<Vec<u8>>,
    delay: Duration,
    fail_at_end: bool,
}

#[async_trait]
impl MediaStream for FakeStream {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.chunks.next() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                Ok(n)
            }
            None if self.fail_at_end => Err(Error::External("stream reset".to_string())),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    fn extension(&self) -> &str {
        "mp3"
    }

    async fn open(&self, _locator: &str) -> Result<Box<dyn MediaStream>> {
        Ok(Box::new(FakeStream {
            chunks: self.chunks.clone().into_iter(),
            delay: self.delay,
            fail_at_end: self.fail_at_end,
        }))
    }
}

pub struct FakeImages {
    pub result: std::result::Result<Vec<u8>, String>,
    pub urls: Mutex<Vec<String>>,
}

impl FakeImages {
    pub fn ok(bytes: &[u8]) -> Self {
        Self {
            result: Ok(bytes.to_vec()),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err("404".to_string()),
            urls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ImageFetcher for FakeImages {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.urls.lock().unwrap().push(url.to_string());
        self.result.clone().map_err(Error::External)
    }
}

/// Prefixes the input with `webp:`; fails on empty input.
pub struct FakeStickers;

impl StickerTransform for FakeStickers {
    fn to_sticker(&self, image: &[u8]) -> Result<Vec<u8>> {
        if image.is_empty() {
            return Err(Error::External("empty image".to_string()));
        }
        let mut out = b"webp:".to_vec();
        out.extend_from_slice(image);
        Ok(out)
    }
}

/// Builder for an [`AppState`] wired to fakes.
pub struct Fakes {
    pub search: Arc<FakeSearch>,
    pub audio: FakeSource,
    pub images: Arc<FakeImages>,
    pub stickers: Arc<dyn StickerTransform>,
    pub deadline: Duration,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            search: Arc::new(FakeSearch::hits(&["https://x/y"])),
            audio: FakeSource {
                chunks: vec![b"ID3".to_vec(), b"audio".to_vec()],
                ..Default::default()
            },
            images: Arc::new(FakeImages::ok(b"png")),
            stickers: Arc::new(FakeStickers),
            deadline: Duration::from_secs(5),
        }
    }
}

impl Fakes {
    pub fn state(&self, temp_dir: &Path) -> AppState {
        let cfg = Config::default();
        AppState {
            routes: Arc::new(RouteTable::from_config(&cfg)),
            media: Arc::new(MediaServices {
                search: self.search.clone(),
                audio: Arc::new(self.audio.clone()),
                images: self.images.clone(),
                stickers: self.stickers.clone(),
                downloads: DownloadPipeline::new(DownloadConfig {
                    temp_dir: temp_dir.to_path_buf(),
                    file_prefix: "audio".to_string(),
                    deadline: self.deadline,
                    buffer_bytes: 64,
                    max_bytes: 1024,
                }),
                audio_mime_type: cfg.audio_mime_type,
            }),
            cancel: CancellationToken::new(),
        }
    }
}

pub fn text_message(chat: &str, text: &str) -> InboundMessage {
    InboundMessage {
        id: MessageId(format!("in-{text}")),
        chat: Jid::new(chat),
        sender: Jid::new(chat),
        from_me: false,
        payload: MessagePayload {
            conversation: Some(text.to_string()),
            ..Default::default()
        },
    }
}

pub fn image_message(chat: &str, caption: &str) -> InboundMessage {
    let id = MessageId("img-1".to_string());
    InboundMessage {
        id: id.clone(),
        chat: Jid::new(chat),
        sender: Jid::new(chat),
        from_me: false,
        payload: MessagePayload {
            image: Some(MediaRef {
                message_id: id,
                caption: Some(caption.to_string()),
            }),
            ..Default::default()
        },
    }
}

pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Dispatch a single-message batch against a recording messenger.
pub async fn dispatch_one(
    state: &AppState,
    messenger: &Arc<FakeMessenger>,
    message: InboundMessage,
) -> usize {
    let port: Arc<dyn MessagingPort> = messenger.clone();
    dispatch_batch(
        state,
        &port,
        &MessageBatch {
            messages: vec![message],
        },
    )
    .await
}
