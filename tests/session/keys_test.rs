//! Session-key derivation across scopes, providers, and chat types.

use warelay::config::SessionScope;
use warelay::session::derive_session_key;

#[test]
fn global_scope_collapses_everyone() {
    assert_eq!(
        derive_session_key(SessionScope::Global, "+15551234567"),
        "global"
    );
    assert_eq!(
        derive_session_key(SessionScope::Global, "telegram:@alice"),
        "global"
    );
}

#[test]
fn per_sender_keys_follow_the_table() {
    let per = SessionScope::PerSender;
    assert_eq!(derive_session_key(per, "+15551234567"), "+15551234567");
    assert_eq!(
        derive_session_key(per, "whatsapp:+15551234567"),
        "+15551234567"
    );
    assert_eq!(
        derive_session_key(per, "12345-678@g.us"),
        "group:12345-678@g.us"
    );
    assert_eq!(derive_session_key(per, "telegram:@alice"), "telegram:@alice");
    assert_eq!(derive_session_key(per, "telegram:998877"), "telegram:998877");
    assert_eq!(derive_session_key(per, ""), "unknown");
}

#[test]
fn telegram_namespace_isolates_cross_provider_senders() {
    let per = SessionScope::PerSender;
    let telegram_key = derive_session_key(per, "telegram:@alice");
    let whatsapp_key = derive_session_key(per, "+15551234567");
    assert_eq!(telegram_key, "telegram:@alice");
    assert_eq!(whatsapp_key, "+15551234567");
    assert_ne!(telegram_key, whatsapp_key);
}

#[test]
fn group_key_is_distinct_from_member_keys() {
    let per = SessionScope::PerSender;
    let group = derive_session_key(per, "12345-678@g.us");
    let member = derive_session_key(per, "+15551234567");
    assert!(group.starts_with("group:"));
    assert_ne!(group, member);
}

#[test]
fn key_of_canonical_alias_matches_key_of_raw_form() {
    // session-key(per-sender, X) == session-key(per-sender, canonical(X)).
    let per = SessionScope::PerSender;
    assert_eq!(
        derive_session_key(per, "whatsapp:+15551234567"),
        derive_session_key(per, "+15551234567")
    );
}
