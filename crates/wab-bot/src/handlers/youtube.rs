use anyhow::Context;
use tracing::{info, warn};

use wab_core::{
    download::DownloadOutcome, messaging::types::OutgoingMessage, ports::VideoResult,
};

use super::HandlerContext;

pub const VIDEO_NOT_FOUND: &str = "No se encontró video 😔";
pub const VIDEO_FAILED: &str = "Ocurrió un error buscando video 😔";
pub const AUDIO_NOT_FOUND: &str = "No se encontró audio 😔";
pub const AUDIO_TIMED_OUT: &str = "La descarga tardó demasiado y fue cancelada ⏱️";
pub const AUDIO_FETCH_FAILED: &str = "Error descargando el audio 😔";
pub const AUDIO_SEND_FAILED: &str = "Error enviando audio 😔";
pub const AUDIO_FAILED: &str = "Ocurrió un error descargando el audio 😔";

/// First search hit, or `None` for a miss. An empty query is a miss.
async fn first_hit(ctx: &HandlerContext<'_>, query: &str) -> anyhow::Result<Option<VideoResult>> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(None);
    }
    let hits = ctx
        .state
        .media
        .search
        .search(query)
        .await
        .with_context(|| format!("search {query:?}"))?;
    Ok(hits.into_iter().next())
}

pub async fn handle_video(ctx: &HandlerContext<'_>, query: &str) -> anyhow::Result<()> {
    match first_hit(ctx, query).await? {
        Some(hit) => ctx.reply(&format!("Video link: {}", hit.url)).await?,
        None => ctx.reply(VIDEO_NOT_FOUND).await?,
    }
    Ok(())
}

pub async fn handle_audio(ctx: &HandlerContext<'_>, query: &str) -> anyhow::Result<()> {
    let Some(hit) = first_hit(ctx, query).await? else {
        ctx.reply(AUDIO_NOT_FOUND).await?;
        return Ok(());
    };

    let media = &ctx.state.media;
    let chat = &ctx.message.chat;
    let messenger = ctx.messenger;
    let mime_type = media.audio_mime_type.clone();

    info!(%chat, title = %hit.title, url = %hit.url, "downloading audio");
    let outcome = media
        .downloads
        .run(media.audio.as_ref(), &hit.url, &ctx.state.cancel, |data| async move {
            messenger
                .send(chat, OutgoingMessage::Audio { data, mime_type })
                .await
                .map(|_| ())
        })
        .await;

    let reply = match &outcome {
        DownloadOutcome::Delivered { bytes } => {
            info!(%chat, bytes, "audio delivered");
            None
        }
        DownloadOutcome::Cancelled => None,
        DownloadOutcome::TimedOut => Some(AUDIO_TIMED_OUT),
        DownloadOutcome::FetchFailed(e) => {
            warn!(%chat, url = %hit.url, "audio download failed: {e}");
            Some(AUDIO_FETCH_FAILED)
        }
        DownloadOutcome::DeliveryFailed(e) => {
            warn!(%chat, "audio send failed: {e}");
            Some(AUDIO_SEND_FAILED)
        }
    };
    if let Some(reply) = reply {
        // Already a failure reply; a failed send here is only logged.
        if let Err(e) = ctx.reply(reply).await {
            warn!(%chat, outcome = outcome.label(), "failure reply not sent: {e}");
        }
    }
    Ok(())
}
