//! Canonical-form normalisation and JID translation.

use warelay::identifiers::{e164_to_jid, jid_to_e164, normalize, telegram_namespaced};
use warelay::providers::ProviderKind;

#[test]
fn whatsapp_prefix_and_formatting_are_stripped() {
    assert_eq!(
        normalize("whatsapp:+1 (555) 123-4567", ProviderKind::WaTwilio),
        Ok("+15551234567".to_owned())
    );
    assert_eq!(
        normalize("  +49 151 2345678 ", ProviderKind::WaWeb),
        Ok("+491512345678".to_owned())
    );
}

#[test]
fn jid_forms_reduce_to_e164() {
    assert_eq!(
        normalize("15551234567@s.whatsapp.net", ProviderKind::WaWeb),
        Ok("+15551234567".to_owned())
    );
    // Device suffixes are part of the JID, not the number.
    assert_eq!(
        normalize("15551234567:23@s.whatsapp.net", ProviderKind::WaWeb),
        Ok("+15551234567".to_owned())
    );
}

#[test]
fn group_jids_are_canonical_as_themselves() {
    assert_eq!(
        normalize("12345-678@g.us", ProviderKind::WaWeb),
        Ok("12345-678@g.us".to_owned())
    );
}

#[test]
fn telegram_usernames_lowercase_and_strip_namespace() {
    assert_eq!(
        normalize("telegram:@Alice", ProviderKind::Telegram),
        Ok("@alice".to_owned())
    );
    assert_eq!(
        normalize("@Bob_99", ProviderKind::Telegram),
        Ok("@bob_99".to_owned())
    );
    assert_eq!(
        normalize("telegram:123456", ProviderKind::Telegram),
        Ok("123456".to_owned())
    );
}

#[test]
fn namespacing_is_idempotent() {
    assert_eq!(telegram_namespaced("@alice"), "telegram:@alice");
    assert_eq!(telegram_namespaced("telegram:@alice"), "telegram:@alice");
}

#[test]
fn normalisation_is_idempotent_for_all_kinds() {
    let cases = [
        ("whatsapp:+15551234567", ProviderKind::WaTwilio),
        ("15551234567@s.whatsapp.net", ProviderKind::WaWeb),
        ("12345-678@g.us", ProviderKind::WaWeb),
        ("telegram:@Carol", ProviderKind::Telegram),
        ("998877", ProviderKind::Telegram),
    ];
    for (raw, kind) in cases {
        let once = normalize(raw, kind).expect("first normalisation");
        assert_eq!(normalize(&once, kind), Ok(once.clone()), "input {raw:?}");
    }
}

#[test]
fn jid_round_trip_is_stable() {
    let jid = e164_to_jid("+15551234567");
    let back = jid_to_e164(&jid).expect("back to E.164");
    assert_eq!(back, "+15551234567");
    assert_eq!(e164_to_jid(&back), jid);
}

#[test]
fn unreducible_inputs_are_rejected() {
    assert!(normalize("", ProviderKind::WaWeb).is_err());
    assert!(normalize("hello world", ProviderKind::WaWeb).is_err());
    assert!(normalize("+12", ProviderKind::WaWeb).is_err());
    assert!(normalize("@-bad-", ProviderKind::Telegram).is_err());
    // Lid JIDs need the reverse mapping first.
    assert!(normalize("5554443@lid", ProviderKind::WaWeb).is_err());
}
