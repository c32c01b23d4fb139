//! Provider kind parsing and display names.

use warelay::providers::ProviderKind;

#[test]
fn canonical_tags_parse() {
    assert_eq!(ProviderKind::parse("wa-web"), Ok(ProviderKind::WaWeb));
    assert_eq!(ProviderKind::parse("wa-twilio"), Ok(ProviderKind::WaTwilio));
    assert_eq!(ProviderKind::parse("telegram"), Ok(ProviderKind::Telegram));
}

#[test]
fn legacy_aliases_parse_with_warning() {
    assert_eq!(ProviderKind::parse("web"), Ok(ProviderKind::WaWeb));
    assert_eq!(ProviderKind::parse("twilio"), Ok(ProviderKind::WaTwilio));
}

#[test]
fn unknown_kind_fails_loudly() {
    assert_eq!(ProviderKind::parse("signal"), Err("signal".to_owned()));
}

#[test]
fn display_round_trips_through_parse() {
    for kind in ProviderKind::ALL {
        assert_eq!(ProviderKind::parse(kind.as_str()), Ok(kind));
    }
}

#[test]
fn detailed_names_for_providers_placeholder() {
    assert_eq!(ProviderKind::WaWeb.detailed_name(), "WhatsApp Web");
    assert_eq!(ProviderKind::WaTwilio.detailed_name(), "WhatsApp (Twilio)");
    assert_eq!(ProviderKind::Telegram.detailed_name(), "Telegram");
}

#[test]
fn messenger_names_merge_the_whatsapp_kinds() {
    assert_eq!(ProviderKind::WaWeb.messenger_name(), "WhatsApp");
    assert_eq!(ProviderKind::WaTwilio.messenger_name(), "WhatsApp");
    assert_eq!(ProviderKind::Telegram.messenger_name(), "Telegram");
}
