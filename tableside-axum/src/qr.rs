//! QR rendering for session URLs.

use base64::{Engine, engine::general_purpose::STANDARD};
use qrcode::{QrCode, render::svg};

use crate::error::ApiError;

/// Render `payload` as a QR code and return it as an `image/svg+xml` data URL.
pub fn svg_data_url(payload: &str) -> Result<String, ApiError> {
    let code = QrCode::new(payload.as_bytes()).map_err(|e| {
        ApiError::InternalError(format!("Failed to encode QR payload: {e}"))
    })?;

    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build();

    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renders_svg_data_url() {
        let url = svg_data_url("http://localhost:5173/s/abc/4").unwrap();
        let encoded = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }
}
