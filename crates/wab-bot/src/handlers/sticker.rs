use anyhow::Context;
use tracing::info;

use wab_core::messaging::types::OutgoingMessage;

use super::HandlerContext;

pub const MISSING_URL: &str = "Debes enviar una URL de imagen.";
pub const STICKER_FAILED: &str = "Error al crear sticker.";

/// Inline image first, otherwise the first token of the argument as a URL.
pub async fn handle_sticker(ctx: &HandlerContext<'_>, argument: &str) -> anyhow::Result<()> {
    let media = &ctx.state.media;

    let image = if let Some(inline) = ctx.message.image() {
        ctx.messenger
            .download_media(inline)
            .await
            .context("download inline image")?
    } else {
        let Some(url) = argument.split_whitespace().next() else {
            ctx.reply(MISSING_URL).await?;
            return Ok(());
        };
        media
            .images
            .fetch(url)
            .await
            .with_context(|| format!("fetch image {url}"))?
    };

    // Resize and WebP encode are CPU-bound.
    let stickers = media.stickers.clone();
    let sticker = tokio::task::spawn_blocking(move || stickers.to_sticker(&image))
        .await
        .context("sticker encoder task")?
        .context("encode sticker")?;
    info!(chat = %ctx.message.chat, bytes = sticker.len(), "sending sticker");
    ctx.messenger
        .send(&ctx.message.chat, OutgoingMessage::Sticker { data: sticker })
        .await
        .context("send sticker")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::{dispatch_one, image_message, text_message, FakeImages, FakeMessenger, Fakes};

    fn stickers(messenger: &FakeMessenger) -> Vec<Vec<u8>> {
        messenger
            .sent()
            .into_iter()
            .filter_map(|(_, m)| match m {
                OutgoingMessage::Sticker { data } => Some(data),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn url_argument_is_fetched_and_converted() {
        let tmp = tempfile::tempdir().unwrap();
        let fakes = Fakes::default();
        let state = fakes.state(tmp.path());
        let messenger = Arc::new(FakeMessenger::default());

        dispatch_one(
            &state,
            &messenger,
            text_message("1@s", "#sticker https://Img.example/Cat.png extra words"),
        )
        .await;

        assert_eq!(
            *fakes.images.urls.lock().unwrap(),
            vec!["https://Img.example/Cat.png".to_string()]
        );
        assert_eq!(stickers(&messenger), vec![b"webp:png".to_vec()]);
        assert!(messenger.texts().is_empty());
    }

    #[tokio::test]
    async fn inline_image_wins_over_url() {
        let tmp = tempfile::tempdir().unwrap();
        let fakes = Fakes::default();
        let state = fakes.state(tmp.path());
        let messenger = Arc::new(FakeMessenger::with_media(b"jpeg"));

        dispatch_one(&state, &messenger, image_message("1@s", "#sticker")).await;

        assert!(fakes.images.urls.lock().unwrap().is_empty());
        assert_eq!(stickers(&messenger), vec![b"webp:jpeg".to_vec()]);
    }

    #[tokio::test]
    async fn fetch_failure_gets_the_generic_reply() {
        let tmp = tempfile::tempdir().unwrap();
        let fakes = Fakes {
            images: Arc::new(FakeImages::failing()),
            ..Fakes::default()
        };
        let state = fakes.state(tmp.path());
        let messenger = Arc::new(FakeMessenger::default());

        dispatch_one(&state, &messenger, text_message("1@s", "#sticker https://x/a.png")).await;
        assert_eq!(messenger.texts(), vec![STICKER_FAILED.to_string()]);
        assert!(stickers(&messenger).is_empty());
    }

    #[tokio::test]
    async fn transform_and_send_failures_get_the_generic_reply() {
        let tmp = tempfile::tempdir().unwrap();
        let fakes = Fakes {
            images: Arc::new(FakeImages::ok(b"")),
            ..Fakes::default()
        };
        let state = fakes.state(tmp.path());
        let messenger = Arc::new(FakeMessenger::default());
        dispatch_one(&state, &messenger, text_message("1@s", "#sticker https://x/a.png")).await;
        assert_eq!(messenger.texts(), vec![STICKER_FAILED.to_string()]);

        let state = Fakes::default().state(tmp.path());
        let messenger = Arc::new(FakeMessenger::failing(&["sticker"]));
        dispatch_one(&state, &messenger, text_message("1@s", "#sticker https://x/a.png")).await;
        assert_eq!(messenger.texts(), vec![STICKER_FAILED.to_string()]);
    }

    /// Blocks the calling thread for a while, like a real encoder on a large image.
    struct SlowStickers(std::time::Duration);

    impl wab_core::ports::StickerTransform for SlowStickers {
        fn to_sticker(&self, image: &[u8]) -> wab_core::Result<Vec<u8>> {
            std::thread::sleep(self.0);
            Ok(image.to_vec())
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn encoding_does_not_stall_the_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let fakes = Fakes {
            stickers: Arc::new(SlowStickers(std::time::Duration::from_millis(500))),
            ..Fakes::default()
        };
        let state = fakes.state(tmp.path());
        let messenger = Arc::new(FakeMessenger::default());

        let started = std::time::Instant::now();
        let (timer_fired_after, _) = tokio::join!(
            async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                started.elapsed()
            },
            dispatch_one(&state, &messenger, text_message("1@s", "#sticker https://x/a.png")),
        );

        assert!(timer_fired_after < std::time::Duration::from_millis(400));
        assert_eq!(stickers(&messenger), vec![b"png".to_vec()]);
    }

    #[tokio::test]
    async fn failed_failure_reply_is_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let fakes = Fakes {
            images: Arc::new(FakeImages::failing()),
            ..Fakes::default()
        };
        let state = fakes.state(tmp.path());
        let messenger = Arc::new(FakeMessenger::failing(&["text", "sticker"]));

        assert_eq!(
            dispatch_one(&state, &messenger, text_message("1@s", "#sticker https://x/a.png")).await,
            1
        );
        assert!(messenger.sent().is_empty());
    }
}
