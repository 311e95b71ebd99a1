//! Command and canned-reply handlers.
//!
//! Each handler returns `anyhow::Result`; [`handle`] is the boundary that logs a
//! failure and turns it into the family's generic reply. Nothing propagates past
//! it.

use tracing::warn;

use wab_core::messaging::{port::MessagingPort, types::InboundMessage};

use crate::router::{AppState, Intent, Route};

pub(crate) mod canned;
pub(crate) mod sticker;
pub(crate) mod youtube;

/// Everything a handler needs for one message.
pub struct HandlerContext<'a> {
    pub state: &'a AppState,
    pub messenger: &'a dyn MessagingPort,
    pub message: &'a InboundMessage,
}

impl HandlerContext<'_> {
    pub async fn reply(&self, text: &str) -> wab_core::Result<()> {
        self.messenger
            .send_text(&self.message.chat, text)
            .await
            .map(|_| ())
    }
}

pub async fn handle(ctx: HandlerContext<'_>, route: &Route) {
    let result = match route.intent {
        Intent::Sticker => sticker::handle_sticker(&ctx, &route.argument).await,
        Intent::YtAudio => youtube::handle_audio(&ctx, &route.argument).await,
        Intent::YtVideo => youtube::handle_video(&ctx, &route.argument).await,
        Intent::Greeting | Intent::Thanks | Intent::HowAreYou | Intent::LinkWarning => {
            canned::handle_canned(&ctx, route.intent).await
        }
    };

    let Err(e) = result else {
        return;
    };
    warn!(
        intent = route.intent.name(),
        chat = %ctx.message.chat,
        message_id = %ctx.message.id.0,
        "handler failed: {e:#}"
    );

    if let Some(reply) = failure_reply(route.intent) {
        if let Err(e) = ctx.reply(reply).await {
            warn!(intent = route.intent.name(), chat = %ctx.message.chat, "failure reply not sent: {e}");
        }
    }
}

fn failure_reply(intent: Intent) -> Option<&'static str> {
    match intent {
        Intent::Sticker => Some(sticker::STICKER_FAILED),
        Intent::YtAudio => Some(youtube::AUDIO_FAILED),
        Intent::YtVideo => Some(youtube::VIDEO_FAILED),
        Intent::Greeting | Intent::Thanks | Intent::HowAreYou | Intent::LinkWarning => None,
    }
}
