//! Pairing QR state shared between the runner and the HTTP surface.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageBuffer, ImageFormat, Luma};
use qrcode::{Color, EcLevel, QrCode};
use tokio::sync::RwLock;

use crate::{errors::Error, Result};

const MODULE_PX: u32 = 8;
const QUIET_ZONE: u32 = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct PairingQr {
    pub data_uri: String,
}

/// Latest pairing QR, owned by the runner and read by `/qr`.
#[derive(Debug, Default)]
pub struct PairingState {
    latest: RwLock<Option<PairingQr>>,
}

impl PairingState {
    pub async fn latest(&self) -> Option<PairingQr> {
        self.latest.read().await.clone()
    }

    /// Render and store a new QR payload. The previous one is replaced only if
    /// rendering succeeds.
    pub async fn publish(&self, payload: &str) -> Result<PairingQr> {
        let qr = PairingQr {
            data_uri: render_qr_data_uri(payload)?,
        };
        *self.latest.write().await = Some(qr.clone());
        Ok(qr)
    }

    /// Forget the QR once paired (or logged out).
    pub async fn clear(&self) {
        *self.latest.write().await = None;
    }
}

/// Encode a QR payload as a `data:image/png;base64,...` URI.
pub fn render_qr_data_uri(payload: &str) -> Result<String> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::L)
        .map_err(|e| Error::External(format!("QR generation failed: {e}")))?;

    let modules = code.width() as u32;
    let colors = code.into_colors();
    let img_size = (modules + QUIET_ZONE * 2) * MODULE_PX;

    let img = ImageBuffer::from_fn(img_size, img_size, |x, y| {
        let (mx, my) = (x / MODULE_PX, y / MODULE_PX);
        if mx < QUIET_ZONE || my < QUIET_ZONE {
            return Luma([255u8]);
        }
        let (mx, my) = (mx - QUIET_ZONE, my - QUIET_ZONE);
        if mx >= modules || my >= modules {
            return Luma([255u8]);
        }
        match colors[(my * modules + mx) as usize] {
            Color::Dark => Luma([0u8]),
            Color::Light => Luma([255u8]),
        }
    });

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| Error::External(format!("PNG encoding failed: {e}")))?;

    Ok(format!(
        "data:image/png;base64,{}",
        STANDARD.encode(buf.into_inner())
    ))
}

/// Compact terminal rendering using half-block characters (two module rows per line).
pub fn render_qr_terminal(payload: &str) -> Result<String> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::L)
        .map_err(|e| Error::External(format!("QR generation failed: {e}")))?;

    let width = code.width();
    let colors = code.into_colors();
    let is_dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::new();
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (is_dark(row, col), is_dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}
