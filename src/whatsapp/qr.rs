//! Pairing QR rendering

use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;

/// Render a pairing QR as unicode half blocks for a terminal.
///
/// Returns `None` for payloads that are already images (data URLs) or that
/// don't fit in a QR code.
pub fn render_terminal(data: &str) -> Option<String> {
    if data.starts_with("data:image/") {
        return None;
    }
    let code = QrCode::new(data.as_bytes()).ok()?;
    Some(
        code.render::<Dense1x2>()
            .dark_color(Dense1x2::Light)
            .light_color(Dense1x2::Dark)
            .quiet_zone(true)
            .build(),
    )
}
