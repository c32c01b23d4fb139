//! Allow-list membership: exact on canonical form.

use warelay::engine::allow_list_permits;
use warelay::providers::ProviderKind;

#[test]
fn exact_match_on_canonical_form() {
    let list = vec!["+15551234567".to_owned()];
    assert!(allow_list_permits(
        &list,
        "whatsapp:+1 (555) 123-4567",
        ProviderKind::WaTwilio
    ));
}

#[test]
fn jid_with_device_suffix_matches_its_number() {
    let list = vec!["+15551234567".to_owned()];
    assert!(allow_list_permits(
        &list,
        "15551234567:9@s.whatsapp.net",
        ProviderKind::WaWeb
    ));
}

#[test]
fn different_number_is_rejected() {
    // A sender whose digits differ from every allow-list entry is not
    // forwarded, device suffix or not.
    let list = vec!["+15551234567".to_owned()];
    assert!(!allow_list_permits(
        &list,
        "1234567890@s.whatsapp.net",
        ProviderKind::WaWeb
    ));
}

#[test]
fn empty_list_denies_everyone() {
    assert!(!allow_list_permits(&[], "+15551234567", ProviderKind::WaWeb));
}

#[test]
fn telegram_entries_match_across_namespace_and_case() {
    let list = vec!["@Alice".to_owned()];
    assert!(allow_list_permits(
        &list,
        "telegram:@alice",
        ProviderKind::Telegram
    ));
    assert!(!allow_list_permits(
        &list,
        "telegram:@bob",
        ProviderKind::Telegram
    ));
}
