//! Static capability records and the Telegram media-limit override.

use warelay::providers::{telegram_max_media_size, ProviderCapabilities, ProviderKind};

#[test]
fn media_ceilings_per_kind() {
    assert_eq!(
        ProviderCapabilities::for_kind(ProviderKind::WaTwilio).max_media_size,
        5 * 1024 * 1024
    );
    assert_eq!(
        ProviderCapabilities::for_kind(ProviderKind::WaWeb).max_media_size,
        64 * 1024 * 1024
    );
}

#[test]
fn typing_indicator_only_on_waweb() {
    assert!(ProviderCapabilities::for_kind(ProviderKind::WaWeb).typing_indicator);
    assert!(!ProviderCapabilities::for_kind(ProviderKind::WaTwilio).typing_indicator);
    assert!(!ProviderCapabilities::for_kind(ProviderKind::Telegram).typing_indicator);
}

#[test]
fn delivery_receipts_only_on_twilio() {
    assert!(ProviderCapabilities::for_kind(ProviderKind::WaTwilio).delivery_receipts);
    assert!(!ProviderCapabilities::for_kind(ProviderKind::WaWeb).delivery_receipts);
}

#[test]
fn telegram_override_in_whole_megabytes() {
    assert_eq!(
        telegram_max_media_size(|_| Some("1".to_owned())),
        1024 * 1024
    );
    assert_eq!(
        telegram_max_media_size(|_| Some("2048".to_owned())),
        2_147_483_648
    );
}

#[test]
fn telegram_override_clamps_and_falls_back() {
    // Above the 2 GiB ceiling: clamped.
    assert_eq!(
        telegram_max_media_size(|_| Some("999999".to_owned())),
        2_147_483_648
    );
    // Not a number, zero, negative: default with a warning.
    for bad in ["abc", "0", "-5", ""] {
        assert_eq!(
            telegram_max_media_size(|_| Some(bad.to_owned())),
            2_147_483_648,
            "input {bad:?}"
        );
    }
}
