use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wab_bot::{http, AppState, MediaServices, RouteTable, Runner, RunnerConfig, RunnerExit};
use wab_bridge::{BridgeConfig, BridgeConnector};
use wab_core::{
    config::Config,
    download::{DownloadConfig, DownloadPipeline},
    pairing::PairingState,
    session::FileSessionStore,
    Error,
};
use wab_media::{HttpImageFetcher, StickerEncoder, YtDlp, YtDlpAudioSource, YtDlpSearch};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    wab_core::logging::init("wab")?;

    let cfg = Arc::new(Config::load()?);
    let cancel = CancellationToken::new();
    let pairing = Arc::new(PairingState::default());

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    let http_task = {
        let host = cfg.http_host.clone();
        let port = cfg.http_port;
        let pairing = pairing.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let res = http::serve(&host, port, pairing, cancel.clone()).await;
            if let Err(e) = &res {
                error!("HTTP server failed: {e}");
                cancel.cancel();
            }
            res
        })
    };

    let ytdlp = YtDlp::new(cfg.ytdlp_path.clone());
    let media = MediaServices {
        search: Arc::new(YtDlpSearch::new(
            ytdlp.clone(),
            cfg.search_limit,
            cfg.search_timeout,
        )),
        audio: Arc::new(YtDlpAudioSource::new(ytdlp)),
        images: Arc::new(HttpImageFetcher::new(
            cfg.image_fetch_timeout,
            cfg.image_max_bytes,
        )?),
        stickers: Arc::new(StickerEncoder::new(cfg.sticker_size)),
        downloads: DownloadPipeline::new(DownloadConfig {
            temp_dir: cfg.temp_dir.clone(),
            file_prefix: "audio".to_string(),
            deadline: cfg.download_timeout,
            buffer_bytes: cfg.download_buffer_bytes,
            max_bytes: cfg.download_max_bytes,
        }),
        audio_mime_type: cfg.audio_mime_type.clone(),
    };

    let state = AppState {
        routes: Arc::new(RouteTable::from_config(&cfg)),
        media: Arc::new(media),
        cancel: cancel.clone(),
    };

    let runner = Runner::new(
        Arc::new(BridgeConnector::new(BridgeConfig::from_config(&cfg))),
        FileSessionStore::new(cfg.session_dir.clone()),
        pairing,
        state,
        RunnerConfig::from_config(&cfg),
    );

    let exit = runner
        .run()
        .await
        .map_err(|e| Error::External(format!("session runner failed: {e:#}")))?;
    if exit != RunnerExit::Shutdown {
        warn!(?exit, "bot stopped; HTTP stays up until Ctrl-C");
    }

    match http_task.await {
        Ok(res) => res,
        Err(e) => Err(Error::External(format!("HTTP task failed: {e}"))),
    }
}
