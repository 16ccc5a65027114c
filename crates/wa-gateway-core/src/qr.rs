// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QR payload rendering.
//!
//! Sessions report the raw pairing string (`2@...`). The CMS displays the QR
//! as an image, so the payload is rendered to a PNG data URL before it is
//! cached or stored.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use thiserror::Error;

/// Prefix of every rendered payload.
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

const MIN_DIMENSION: u32 = 256;

/// Errors from rendering a QR payload.
#[derive(Debug, Error)]
pub enum QrRenderError {
    /// The payload does not fit in a QR code.
    #[error("QR payload cannot be encoded: {0}")]
    Encode(#[from] qrcode::types::QrError),

    /// PNG encoding failed.
    #[error("QR image cannot be encoded: {0}")]
    Image(#[from] image::ImageError),
}

/// Turn a session's QR payload into a PNG data URL.
///
/// Payloads that already are a data URL are returned unchanged.
pub fn to_data_url(payload: &str) -> Result<String, QrRenderError> {
    if payload.starts_with("data:") {
        return Ok(payload.to_string());
    }

    let image = QrCode::new(payload.as_bytes())?
        .render::<Luma<u8>>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .build();

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    Ok(format!("{}{}", PNG_DATA_URL_PREFIX, STANDARD.encode(&png)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_payload_renders_to_png() {
        let url = to_data_url("2@AbCdEf,ghIjK=,LmNoP=,1").unwrap();
        assert!(url.starts_with(PNG_DATA_URL_PREFIX));

        let png = STANDARD
            .decode(&url[PNG_DATA_URL_PREFIX.len()..])
            .unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert!(decoded.width() >= MIN_DIMENSION);
    }

    #[test]
    fn test_data_url_passes_through() {
        let url = "data:image/png;base64,AAAA";
        assert_eq!(to_data_url(url).unwrap(), url);
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let payload = "x".repeat(8000);
        assert!(matches!(
            to_data_url(&payload),
            Err(QrRenderError::Encode(_))
        ));
    }
}
