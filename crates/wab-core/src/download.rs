//! Bounded-time, cancellable fetch → disk → deliver pipeline.
//!
//! Every job owns a uniquely named file in the temp dir. The file is created
//! before the fetch races the deadline, so a cancelled fetch can only touch the
//! orphaned descriptor, never recreate the path. All terminal paths remove the
//! file; a drop guard covers the job future itself being dropped.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use tokio::{fs::File, io::AsyncWriteExt, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    errors::Error,
    ports::{MediaSource, MediaStream},
    Result,
};

static JOB_COUNTER: AtomicUsize = AtomicUsize::new(1);

#[derive(Clone, Debug)]
pub struct DownloadConfig {
    pub temp_dir: PathBuf,
    pub file_prefix: String,
    pub deadline: Duration,
    pub buffer_bytes: usize,
    pub max_bytes: u64,
}

#[derive(Debug)]
pub enum DownloadOutcome {
    Delivered { bytes: u64 },
    FetchFailed(Error),
    DeliveryFailed(Error),
    TimedOut,
    Cancelled,
}

impl DownloadOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::FetchFailed(_) => "fetch_failed",
            Self::DeliveryFailed(_) => "delivery_failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One in-flight download and the file it owns.
#[derive(Debug)]
pub struct DownloadJob {
    pub locator: String,
    pub path: PathBuf,
    pub deadline: Duration,
    released: bool,
}

impl DownloadJob {
    fn new(cfg: &DownloadConfig, locator: &str, extension: &str) -> Self {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let n = JOB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = cfg
            .temp_dir
            .join(format!("{}_{ts}_{n}.{extension}", cfg.file_prefix));
        Self {
            locator: locator.to_string(),
            path,
            deadline: cfg.deadline,
            released: false,
        }
    }

    async fn release(mut self) {
        self.released = true;
        remove_quietly(&self.path).await;
    }
}

impl Drop for DownloadJob {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed abandoned download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), "failed to remove abandoned download: {e}"),
        }
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "failed to remove download file: {e}"),
    }
}

enum FetchEnd {
    Done(Result<u64>),
    TimedOut,
    Cancelled,
}

pub struct DownloadPipeline {
    cfg: DownloadConfig,
}

impl DownloadPipeline {
    pub fn new(cfg: DownloadConfig) -> Self {
        Self { cfg }
    }

    /// Fetch `locator` into a fresh file, then hand the complete bytes to `deliver`.
    ///
    /// The deadline covers the fetch only; delivery starts after the timer is gone.
    pub async fn run<F, Fut>(
        &self,
        source: &dyn MediaSource,
        locator: &str,
        cancel: &CancellationToken,
        deliver: F,
    ) -> DownloadOutcome
    where
        F: FnOnce(Vec<u8>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let job = DownloadJob::new(&self.cfg, locator, source.extension());
        tracing::debug!(path = %job.path.display(), locator, "download started");

        let mut file = match tokio::fs::create_dir_all(&self.cfg.temp_dir).await {
            Ok(()) => match File::create(&job.path).await {
                Ok(f) => f,
                Err(e) => {
                    job.release().await;
                    return DownloadOutcome::FetchFailed(Error::Io(e));
                }
            },
            Err(e) => {
                job.release().await;
                return DownloadOutcome::FetchFailed(Error::Io(e));
            }
        };

        let end = tokio::select! {
            biased;
            _ = cancel.cancelled() => FetchEnd::Cancelled,
            _ = sleep(job.deadline) => FetchEnd::TimedOut,
            r = fetch_to_file(source, locator, &mut file, self.cfg.buffer_bytes, self.cfg.max_bytes) => FetchEnd::Done(r),
        };
        // The losing fetch future (and its stream) is gone; close our handle too.
        drop(file);

        match end {
            FetchEnd::Cancelled => {
                tracing::info!(locator, "download cancelled");
                job.release().await;
                DownloadOutcome::Cancelled
            }
            FetchEnd::TimedOut => {
                tracing::warn!(locator, deadline = ?job.deadline, "download exceeded deadline");
                job.release().await;
                DownloadOutcome::TimedOut
            }
            FetchEnd::Done(Err(e)) => {
                tracing::warn!(locator, "download failed: {e}");
                job.release().await;
                DownloadOutcome::FetchFailed(e)
            }
            FetchEnd::Done(Ok(bytes)) => {
                let outcome = match tokio::fs::read(&job.path).await {
                    Ok(data) => match deliver(data).await {
                        Ok(()) => DownloadOutcome::Delivered { bytes },
                        Err(e) => DownloadOutcome::DeliveryFailed(e),
                    },
                    Err(e) => DownloadOutcome::FetchFailed(Error::Io(e)),
                };
                job.release().await;
                outcome
            }
        }
    }
}

async fn fetch_to_file(
    source: &dyn MediaSource,
    locator: &str,
    file: &mut File,
    buffer_bytes: usize,
    max_bytes: u64,
) -> Result<u64> {
    let mut stream: Box<dyn MediaStream> = source.open(locator).await?;
    let mut buf = vec![0u8; buffer_bytes.max(1)];
    let mut total: u64 = 0;

    loop {
        let n = stream.read_chunk(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if max_bytes > 0 && total > max_bytes {
            return Err(Error::External(format!(
                "download exceeds {max_bytes} bytes"
            )));
        }
        file.write_all(&buf[..n]).await?;
    }

    file.flush().await?;
    Ok(total)
}
