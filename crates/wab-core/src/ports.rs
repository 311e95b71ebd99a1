//! Ports for the media collaborators (search, stream fetch, image fetch, sticker
//! encoding). Concrete implementations live in `wab-media`.

use async_trait::async_trait;

use crate::Result;

/// One search hit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoResult {
    pub title: String,
    /// Canonical, shareable link.
    pub url: String,
}

#[async_trait]
pub trait VideoSearch: Send + Sync {
    /// Results in relevance order; an empty vec is a lookup miss, not an error.
    async fn search(&self, query: &str) -> Result<Vec<VideoResult>>;
}

/// A pull-based byte stream. Dropping it must release the underlying resource
/// (socket, child process).
#[async_trait]
pub trait MediaStream: Send {
    /// Fill `buf` with the next bytes. `Ok(0)` is a clean end of stream; a source
    /// that ends abnormally must return `Err` instead.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// File extension for the downloaded payload (without dot).
    fn extension(&self) -> &str;

    async fn open(&self, locator: &str) -> Result<Box<dyn MediaStream>>;
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Pure transform: image bytes in, sticker bytes out.
pub trait StickerTransform: Send + Sync {
    fn to_sticker(&self, image: &[u8]) -> Result<Vec<u8>>;
}
