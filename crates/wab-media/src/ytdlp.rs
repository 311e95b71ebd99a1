//! `yt-dlp` subprocess adapters: search and audio streaming.

use std::{
    path::PathBuf,
    process::Stdio,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, ChildStdout, Command},
};
use tracing::{debug, warn};

use wab_core::{
    errors::Error,
    ports::{MediaSource, MediaStream, VideoResult, VideoSearch},
    Result,
};

const STDERR_KEEP_BYTES: usize = 2048;
const AUDIO_EXTENSION: &str = "mp3";

/// How to invoke `yt-dlp`. `prefix_args` go before the per-call arguments.
#[derive(Clone, Debug)]
pub struct YtDlp {
    pub program: PathBuf,
    pub prefix_args: Vec<String>,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[derive(Clone, Debug)]
pub struct YtDlpSearch {
    ytdlp: YtDlp,
    limit: usize,
    timeout: Duration,
}

impl YtDlpSearch {
    pub fn new(ytdlp: YtDlp, limit: usize, timeout: Duration) -> Self {
        Self {
            ytdlp,
            limit: limit.max(1),
            timeout,
        }
    }
}

#[async_trait]
impl VideoSearch for YtDlpSearch {
    async fn search(&self, query: &str) -> Result<Vec<VideoResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = self.ytdlp.command();
        cmd.args([
            "--dump-json",
            "--flat-playlist",
            "--no-warnings",
            "--skip-download",
        ])
        .arg(format!("ytsearch{}:{query}", self.limit));

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
            .map_err(|e| Error::External(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::External(format!(
                "yt-dlp search exited with {}: {}",
                output.status,
                tail(stderr.trim(), 500)
            )));
        }

        let results = parse_search_output(&String::from_utf8_lossy(&output.stdout));
        debug!(query, hits = results.len(), "video search finished");
        Ok(results)
    }
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    id: Option<String>,
    title: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
}

/// One JSON object per line; entries without a usable link are skipped.
fn parse_search_output(stdout: &str) -> Vec<VideoResult> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match serde_json::from_str::<SearchEntry>(l) {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(error = %e, "skipping malformed yt-dlp entry");
                None
            }
        })
        .filter_map(|e| {
            let url = match e.id.as_deref().filter(|id| !id.is_empty()) {
                Some(id) => format!("https://www.youtube.com/watch?v={id}"),
                None => e.webpage_url.or(e.url)?,
            };
            Some(VideoResult {
                title: e.title.unwrap_or_default(),
                url,
            })
        })
        .collect()
}

/// Streams the best audio track of a video to stdout.
#[derive(Clone, Debug)]
pub struct YtDlpAudioSource {
    ytdlp: YtDlp,
}

impl YtDlpAudioSource {
    pub fn new(ytdlp: YtDlp) -> Self {
        Self { ytdlp }
    }
}

#[async_trait]
impl MediaSource for YtDlpAudioSource {
    fn extension(&self) -> &str {
        AUDIO_EXTENSION
    }

    async fn open(&self, locator: &str) -> Result<Box<dyn MediaStream>> {
        let mut cmd = self.ytdlp.command();
        cmd.args([
            "--quiet",
            "--no-progress",
            "--no-playlist",
            "-f",
            "bestaudio",
            "-o",
            "-",
            "--",
        ])
        .arg(locator);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::External(format!("failed to run yt-dlp: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::External("yt-dlp stdout was not captured".to_string()))?;

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let keep = stderr_tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    if let Ok(mut s) = keep.lock() {
                        s.push_str(&line);
                        s.push('\n');
                        if s.len() > STDERR_KEEP_BYTES {
                            let cut = s.len() - STDERR_KEEP_BYTES;
                            let cut = (cut..s.len()).find(|i| s.is_char_boundary(*i)).unwrap_or(0);
                            s.drain(..cut);
                        }
                    }
                }
            });
        }

        Ok(Box::new(YtDlpStream {
            child,
            stdout,
            stderr_tail,
        }))
    }
}

/// Child stdout as a [`MediaStream`]. Dropping it kills the process.
struct YtDlpStream {
    child: Child,
    stdout: ChildStdout,
    stderr_tail: Arc<Mutex<String>>,
}

#[async_trait]
impl MediaStream for YtDlpStream {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.stdout.read(buf).await?;
        if n > 0 {
            return Ok(n);
        }

        let status = self.child.wait().await?;
        if status.success() {
            return Ok(0);
        }
        let stderr = self
            .stderr_tail
            .lock()
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        Err(Error::External(format!(
            "yt-dlp exited with {status}: {}",
            tail(&stderr, 500)
        )))
    }
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
