//! Media adapters: video search and audio streaming via `yt-dlp`, remote image
//! fetch via `reqwest`, sticker encoding via `image`.

pub mod image_fetch;
pub mod sticker;
pub mod ytdlp;

pub use image_fetch::HttpImageFetcher;
pub use sticker::StickerEncoder;
pub use ytdlp::{YtDlp, YtDlpAudioSource, YtDlpSearch};
