use std::io::Cursor;

use image::{imageops, imageops::FilterType, ImageFormat, Rgba, RgbaImage};

use wab_core::{errors::Error, ports::StickerTransform, Result};

/// Square WebP stickers: the image is scaled to fit and centered on a
/// transparent canvas.
#[derive(Clone, Copy, Debug)]
pub struct StickerEncoder {
    size: u32,
}

impl StickerEncoder {
    pub fn new(size: u32) -> Self {
        Self { size }
    }
}

impl StickerTransform for StickerEncoder {
    fn to_sticker(&self, image: &[u8]) -> Result<Vec<u8>> {
        let img = image::load_from_memory(image)
            .map_err(|e| Error::External(format!("unreadable image: {e}")))?;

        let fitted = img.resize(self.size, self.size, FilterType::Lanczos3).to_rgba8();
        let mut canvas = RgbaImage::from_pixel(self.size, self.size, Rgba([0, 0, 0, 0]));
        let x = (self.size - fitted.width()) / 2;
        let y = (self.size - fitted.height()) / 2;
        imageops::overlay(&mut canvas, &fitted, i64::from(x), i64::from(y));

        let mut out = Cursor::new(Vec::new());
        canvas
            .write_to(&mut out, ImageFormat::WebP)
            .map_err(|e| Error::External(format!("WebP encoding failed: {e}")))?;
        Ok(out.into_inner())
    }
}
