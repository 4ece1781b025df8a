//! QR pairing payloads.
//!
//! Content format: `{ref},{noisePublic},{identityPublic},{advSecret}`, every
//! part standard base64. The `ref` is generated locally on each refresh, so
//! these codes only pair against a peer that speaks this crate's framing.

use crate::auth::AuthCreds;
use crate::error::{WhatsAppError, WhatsAppResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use qrcode::render::unicode;
use qrcode::QrCode;
use rand::RngCore;

/// Random pairing reference.
pub fn new_reference() -> String {
    let mut ref_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut ref_bytes);
    STANDARD.encode(ref_bytes)
}

/// Build the string the phone scans.
pub fn pairing_payload(reference: &str, creds: &AuthCreds) -> String {
    format!(
        "{},{},{},{}",
        reference,
        STANDARD.encode(&creds.noise_key.public),
        STANDARD.encode(&creds.signed_identity_key.public),
        STANDARD.encode(&creds.adv_secret_key),
    )
}

/// Render QR content as half-block text for a terminal.
pub fn render_terminal(content: &str) -> WhatsAppResult<String> {
    let code = QrCode::new(content.as_bytes())
        .map_err(|e| WhatsAppError::internal(format!("QR code generation failed: {}", e)))?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}
