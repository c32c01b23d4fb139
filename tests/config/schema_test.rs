//! User configuration schema parsing.

use warelay::config::{Config, ReplyMode, SessionScope};
use warelay::providers::ProviderKind;

#[test]
fn full_config_parses() {
    let config = Config::from_json(
        r#"{
            "logging": {"level": "debug"},
            "inbound": {
                "allowFrom": ["+15551234567", "whatsapp:+49151234567"],
                "reply": {
                    "mode": "command",
                    "command": ["my-agent", "--prompt", "{{Body}}"],
                    "session": {"scope": "per-sender", "idleMinutes": 120},
                    "heartbeatMinutes": 30,
                    "sessionIntro": "You speak via {{PROVIDERS}}."
                },
                "transcribe": {"command": ["transcriber", "{{MediaPath}}"]}
            },
            "waweb": {"bridgeUrl": "http://127.0.0.1:4001", "allowGroups": ["g1@g.us"]},
            "telegram": {"allowFrom": ["@alice"]}
        }"#,
    )
    .expect("parse");

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.inbound.reply.mode, ReplyMode::Command);
    assert_eq!(config.inbound.reply.session.scope, SessionScope::PerSender);
    assert_eq!(config.inbound.reply.session.idle_minutes, 120);
    assert_eq!(config.inbound.reply.heartbeat_minutes, 30);
    assert_eq!(config.waweb.bridge_url, "http://127.0.0.1:4001");
    assert_eq!(config.waweb.allow_groups, vec!["g1@g.us".to_owned()]);
    assert!(config.inbound.transcribe.is_some());
}

#[test]
fn provider_allow_list_overrides_global() {
    let config = Config::from_json(
        r#"{
            "inbound": {"allowFrom": ["+1555"]},
            "telegram": {"allowFrom": ["@alice"]}
        }"#,
    )
    .expect("parse");
    assert_eq!(
        config.allow_from(ProviderKind::Telegram),
        Some(&["@alice".to_owned()][..])
    );
    assert_eq!(
        config.allow_from(ProviderKind::WaWeb),
        Some(&["+1555".to_owned()][..])
    );
}

#[test]
fn absent_allow_list_means_allow_all() {
    let config = Config::from_json("{}").expect("parse");
    assert!(config.allow_from(ProviderKind::WaTwilio).is_none());
}

#[test]
fn empty_allow_list_means_deny_all() {
    let config = Config::from_json(r#"{"inbound": {"allowFrom": []}}"#).expect("parse");
    assert_eq!(config.allow_from(ProviderKind::WaTwilio), Some(&[][..]));
}

#[test]
fn text_mode_parses() {
    let config = Config::from_json(
        r#"{"inbound": {"reply": {"mode": "text", "text": "away, back soon"}}}"#,
    )
    .expect("parse");
    assert_eq!(config.inbound.reply.mode, ReplyMode::Text);
    assert_eq!(config.inbound.reply.text, "away, back soon");
}

#[test]
fn malformed_json_is_an_error() {
    assert!(Config::from_json("{not json").is_err());
}
