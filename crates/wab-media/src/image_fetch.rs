use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use wab_core::{errors::Error, ports::ImageFetcher, Result};

/// Fetches remote images for stickers over plain HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpImageFetcher {
    http: reqwest::Client,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self { http, max_bytes })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = Url::parse(url).map_err(|e| Error::External(format!("invalid URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::External(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let mut resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::External(format!("image request error: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "image fetch failed: {}",
                resp.status()
            )));
        }
        if let Some(len) = resp.content_length() {
            if len > self.max_bytes as u64 {
                return Err(Error::External(format!(
                    "image too large: {len} bytes (max {})",
                    self.max_bytes
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| Error::External(format!("image body error: {e}")))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(Error::External(format!(
                    "image too large (max {} bytes)",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}
