//! Phone number normalization.
//!
//! The messaging provider addresses WhatsApp participants as
//! `whatsapp:+15551234567`. Everything inside the system — session keys,
//! conversation log rows — uses the bare `+15551234567` form, and the
//! provider prefix is re-added only at the delivery boundary.

const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Strip the provider prefix (case-insensitive) and surrounding whitespace,
/// yielding the canonical identifier used as the session key.
pub fn canonical_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() >= WHATSAPP_PREFIX.len()
        && trimmed[..WHATSAPP_PREFIX.len()].eq_ignore_ascii_case(WHATSAPP_PREFIX)
    {
        trimmed[WHATSAPP_PREFIX.len()..].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Provider-facing address for a canonical phone number.
pub fn whatsapp_address(canonical: &str) -> String {
    format!("{}{}", WHATSAPP_PREFIX, canonical)
}
