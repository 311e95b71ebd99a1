use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use wab_core::{
    config::Config,
    download::DownloadPipeline,
    messaging::{
        port::MessagingPort,
        types::{InboundMessage, MessageBatch},
    },
    ports::{ImageFetcher, MediaSource, StickerTransform, VideoSearch},
};

use crate::handlers;

/// Media collaborators shared by every handler.
pub struct MediaServices {
    pub search: Arc<dyn VideoSearch>,
    pub audio: Arc<dyn MediaSource>,
    pub images: Arc<dyn ImageFetcher>,
    pub stickers: Arc<dyn StickerTransform>,
    pub downloads: DownloadPipeline,
    pub audio_mime_type: String,
}

#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub media: Arc<MediaServices>,
    /// Cancelled on shutdown; in-flight downloads stop early.
    pub cancel: CancellationToken,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intent {
    Sticker,
    YtAudio,
    YtVideo,
    Greeting,
    Thanks,
    HowAreYou,
    LinkWarning,
}

impl Intent {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sticker => "sticker",
            Self::YtAudio => "ytaudio",
            Self::YtVideo => "ytvideo",
            Self::Greeting => "greeting",
            Self::Thanks => "thanks",
            Self::HowAreYou => "how_are_you",
            Self::LinkWarning => "link_warning",
        }
    }
}

/// A matched route: what to run and the command argument (original case).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub intent: Intent,
    pub argument: String,
}

const COMMANDS: [(&str, Intent); 3] = [
    ("#sticker", Intent::Sticker),
    ("#ytaudio", Intent::YtAudio),
    ("#ytvideo", Intent::YtVideo),
];

/// Ordered route table. Commands match by prefix, canned replies by substring.
#[derive(Clone, Debug)]
pub struct RouteTable {
    substring_routes: Vec<(Intent, Vec<String>)>,
}

impl RouteTable {
    pub fn new(
        greeting_words: Vec<String>,
        thanks_words: Vec<String>,
        how_are_you_phrases: Vec<String>,
        link_words: Vec<String>,
    ) -> Self {
        let lower = |v: Vec<String>| -> Vec<String> {
            v.into_iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            substring_routes: vec![
                (Intent::Greeting, lower(greeting_words)),
                (Intent::Thanks, lower(thanks_words)),
                (Intent::HowAreYou, lower(how_are_you_phrases)),
                (Intent::LinkWarning, lower(link_words)),
            ],
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.greeting_words.clone(),
            cfg.thanks_words.clone(),
            cfg.how_are_you_phrases.clone(),
            cfg.link_words.clone(),
        )
    }

    /// Every route the text matches, in table order, each at most once.
    pub fn classify(&self, text: &str) -> Vec<Route> {
        let mut routes = Vec::new();

        for (command, intent) in COMMANDS {
            if let Some(rest) = strip_command(text, command) {
                routes.push(Route {
                    intent,
                    argument: rest.trim().to_string(),
                });
            }
        }

        let lower = text.to_lowercase();
        for (intent, words) in &self.substring_routes {
            if words.iter().any(|w| lower.contains(w.as_str())) {
                routes.push(Route {
                    intent: *intent,
                    argument: String::new(),
                });
            }
        }

        routes
    }
}

/// Case-insensitive prefix match that hands back the rest of the original text.
fn strip_command<'a>(text: &'a str, command: &str) -> Option<&'a str> {
    let head = text.get(..command.len())?;
    head.eq_ignore_ascii_case(command)
        .then(|| &text[command.len()..])
}

/// Route every message of a batch and wait for all handlers to finish.
///
/// Handlers start in arrival order (message order, then route order) and run
/// concurrently from their first suspension point. Returns the number of
/// handler invocations.
pub async fn dispatch_batch(
    state: &AppState,
    messenger: &Arc<dyn MessagingPort>,
    batch: &MessageBatch,
) -> usize {
    let invocations: Vec<(&InboundMessage, Route)> = batch
        .messages
        .iter()
        .filter(|m| !m.from_me)
        .filter_map(|m| m.text().map(|t| (m, t)))
        .flat_map(|(m, text)| {
            state
                .routes
                .classify(text)
                .into_iter()
                .map(move |r| (m, r))
        })
        .collect();

    if invocations.is_empty() {
        return 0;
    }
    debug!(
        messages = batch.messages.len(),
        invocations = invocations.len(),
        "dispatching batch"
    );

    let count = invocations.len();
    join_all(invocations.iter().map(|(message, route)| {
        handlers::handle(
            handlers::HandlerContext {
                state,
                messenger: messenger.as_ref(),
                message: *message,
            },
            route,
        )
    }))
    .await;
    count
}
