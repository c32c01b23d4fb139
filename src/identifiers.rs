//! Canonical identifier normalisation for all provider kinds.
//!
//! Every sender or recipient string entering the gateway is reduced to one
//! canonical form before it is used for routing, whitelisting, or session
//! keys: E.164 with a leading `+` for the WhatsApp kinds, a lowercased
//! `@username` or decimal user id for Telegram. Normalisation is total:
//! any input is either reducible to canonical form or rejected.

use crate::providers::ProviderKind;

/// WhatsApp JID suffix for direct chats.
pub const JID_USER_SUFFIX: &str = "@s.whatsapp.net";

/// WhatsApp JID suffix for group chats.
pub const JID_GROUP_SUFFIX: &str = "@g.us";

/// WhatsApp JID suffix for linked-id (lid) addresses.
pub const JID_LID_SUFFIX: &str = "@lid";

/// Errors from identifier normalisation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// The input could not be reduced to any canonical form.
    #[error("unrecognised identifier: {0:?}")]
    Unrecognised(String),

    /// The input was empty after trimming.
    #[error("empty identifier")]
    Empty,
}

/// Normalise an identifier into the canonical form for a provider kind.
///
/// WhatsApp kinds accept `+E164` with arbitrary separators, a bare digit
/// string, a `whatsapp:` prefix, or a JID (`<digits>@s.whatsapp.net` with an
/// optional `:<device>` suffix). Group JIDs (`…@g.us`) pass through
/// unchanged. Telegram accepts `@username`, a decimal user id, or either
/// with a `telegram:` namespace prefix, which is stripped.
///
/// The result is idempotent: `normalize(normalize(x)) == normalize(x)`.
///
/// # Errors
///
/// Returns [`IdentifierError`] when the input cannot be reduced.
pub fn normalize(raw: &str, kind: ProviderKind) -> Result<String, IdentifierError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdentifierError::Empty);
    }

    match kind {
        ProviderKind::WaWeb | ProviderKind::WaTwilio => normalize_whatsapp(trimmed),
        ProviderKind::Telegram => normalize_telegram(trimmed),
    }
}

/// Normalise a WhatsApp identifier to `+E164` (or a group JID verbatim).
fn normalize_whatsapp(input: &str) -> Result<String, IdentifierError> {
    let stripped = input.strip_prefix("whatsapp:").unwrap_or(input).trim();

    if stripped.ends_with(JID_GROUP_SUFFIX) {
        return Ok(stripped.to_owned());
    }
    if let Some(e164) = jid_to_e164(stripped) {
        return Ok(e164);
    }
    if stripped.ends_with(JID_LID_SUFFIX) {
        // Lid JIDs need the on-disk reverse mapping; callers translate first.
        return Err(IdentifierError::Unrecognised(input.to_owned()));
    }

    let digits: String = stripped
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(IdentifierError::Unrecognised(input.to_owned()));
    }
    if !(5..=15).contains(&digits.len()) {
        return Err(IdentifierError::Unrecognised(input.to_owned()));
    }

    Ok(format!("+{digits}"))
}

/// Normalise a Telegram identifier to `@username` (lowercased) or a decimal id.
fn normalize_telegram(input: &str) -> Result<String, IdentifierError> {
    let stripped = input.strip_prefix("telegram:").unwrap_or(input).trim();
    if stripped.is_empty() {
        return Err(IdentifierError::Empty);
    }

    if let Some(name) = stripped.strip_prefix('@') {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(IdentifierError::Unrecognised(input.to_owned()));
        }
        return Ok(format!("@{}", name.to_ascii_lowercase()));
    }

    if stripped.chars().all(|c| c.is_ascii_digit()) {
        return Ok(stripped.to_owned());
    }

    // Phone numbers are accepted as send targets; resolution happens later.
    if let Some(rest) = stripped.strip_prefix('+') {
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
            return Ok(format!("+{rest}"));
        }
    }

    Err(IdentifierError::Unrecognised(input.to_owned()))
}

/// Prefix a canonical Telegram identifier with its `telegram:` namespace.
///
/// Used when Telegram senders are stored in maps shared with the WhatsApp
/// kinds, so `telegram:@alice` and `+491234` can never collide.
pub fn telegram_namespaced(canonical: &str) -> String {
    if canonical.starts_with("telegram:") {
        canonical.to_owned()
    } else {
        format!("telegram:{canonical}")
    }
}

// ---------------------------------------------------------------------------
// JID translation
// ---------------------------------------------------------------------------

/// Translate a canonical `+E164` identifier into the backend JID form.
pub fn e164_to_jid(e164: &str) -> String {
    let digits = e164.strip_prefix('+').unwrap_or(e164);
    format!("{digits}{JID_USER_SUFFIX}")
}

/// Translate a user JID back into `+E164`, if it carries a phone number.
///
/// Handles device suffixes (`4912345:17@s.whatsapp.net`). Group and lid
/// JIDs return `None`; lid addresses need the on-disk reverse mapping.
pub fn jid_to_e164(jid: &str) -> Option<String> {
    let local = jid.strip_suffix(JID_USER_SUFFIX)?;
    let local = local.split(':').next().unwrap_or(local);
    if local.is_empty() || !local.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("+{local}"))
}

/// Whether a JID addresses a group chat.
pub fn is_group_jid(jid: &str) -> bool {
    jid.ends_with(JID_GROUP_SUFFIX)
}

/// Whether a JID is a linked-id address that needs reverse mapping.
pub fn is_lid_jid(jid: &str) -> bool {
    jid.ends_with(JID_LID_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whatsapp_strips_prefix_and_separators() {
        let n = normalize("whatsapp:+49 (151) 234-56.78", ProviderKind::WaTwilio);
        assert_eq!(n, Ok("+491512345678".to_owned()));
    }

    #[test]
    fn whatsapp_accepts_bare_digits() {
        assert_eq!(
            normalize("4915123456789", ProviderKind::WaWeb),
            Ok("+4915123456789".to_owned())
        );
    }

    #[test]
    fn whatsapp_accepts_jid_with_device_suffix() {
        assert_eq!(
            normalize("4915123456789:12@s.whatsapp.net", ProviderKind::WaWeb),
            Ok("+4915123456789".to_owned())
        );
    }

    #[test]
    fn whatsapp_group_jid_passes_through() {
        assert_eq!(
            normalize("12345-678@g.us", ProviderKind::WaWeb),
            Ok("12345-678@g.us".to_owned())
        );
    }

    #[test]
    fn whatsapp_rejects_lid_without_mapping() {
        assert!(normalize("98765@lid", ProviderKind::WaWeb).is_err());
    }

    #[test]
    fn telegram_lowercases_usernames() {
        assert_eq!(
            normalize("telegram:@Alice_B", ProviderKind::Telegram),
            Ok("@alice_b".to_owned())
        );
    }

    #[test]
    fn telegram_keeps_numeric_ids() {
        assert_eq!(
            normalize("123456789", ProviderKind::Telegram),
            Ok("123456789".to_owned())
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        for (raw, kind) in [
            ("whatsapp:+49 151 2345678", ProviderKind::WaTwilio),
            ("telegram:@Bob", ProviderKind::Telegram),
            ("4915123456789@s.whatsapp.net", ProviderKind::WaWeb),
        ] {
            let once = normalize(raw, kind).expect("first pass");
            let twice = normalize(&once, kind).expect("second pass");
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn jid_round_trip() {
        let jid = e164_to_jid("+4915123456789");
        assert_eq!(jid, "4915123456789@s.whatsapp.net");
        assert_eq!(jid_to_e164(&jid), Some("+4915123456789".to_owned()));
    }

    #[test]
    fn rejects_garbage() {
        assert!(normalize("not a number", ProviderKind::WaWeb).is_err());
        assert!(normalize("  ", ProviderKind::Telegram).is_err());
        assert!(normalize("@!!", ProviderKind::Telegram).is_err());
    }
}
