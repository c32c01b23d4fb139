//! Environment credential validation: precise issue lists.

use warelay::config::{TelegramEnv, TwilioAuth, TwilioEnv};

fn env_of<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    move |key| {
        pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| (*v).to_owned())
    }
}

#[test]
fn complete_token_set_is_accepted() {
    let env = TwilioEnv::from_lookup(env_of(&[
        ("TWILIO_ACCOUNT_SID", "AC123"),
        ("TWILIO_AUTH_TOKEN", "token"),
        ("TWILIO_WHATSAPP_FROM", "whatsapp:+15551234567"),
    ]))
    .expect("valid set");
    assert_eq!(env.account_sid, "AC123");
    assert!(matches!(env.auth, TwilioAuth::Token(_)));
    assert!(env.sender_sid.is_none());
}

#[test]
fn api_key_pair_is_accepted() {
    let env = TwilioEnv::from_lookup(env_of(&[
        ("TWILIO_ACCOUNT_SID", "AC123"),
        ("TWILIO_API_KEY", "SK123"),
        ("TWILIO_API_SECRET", "shh"),
        ("TWILIO_WHATSAPP_FROM", "whatsapp:+15551234567"),
        ("TWILIO_SENDER_SID", "MG123"),
    ]))
    .expect("valid set");
    assert!(matches!(env.auth, TwilioAuth::ApiKey { .. }));
    assert_eq!(env.sender_sid.as_deref(), Some("MG123"));
}

#[test]
fn key_without_secret_is_a_precise_issue() {
    let issues = TwilioEnv::from_lookup(env_of(&[
        ("TWILIO_ACCOUNT_SID", "AC123"),
        ("TWILIO_API_KEY", "SK123"),
        ("TWILIO_WHATSAPP_FROM", "whatsapp:+15551234567"),
    ]))
    .err()
    .expect("must fail");
    assert!(issues.iter().any(|i| i.contains("TWILIO_API_SECRET")));
}

#[test]
fn token_and_key_together_are_rejected() {
    let issues = TwilioEnv::from_lookup(env_of(&[
        ("TWILIO_ACCOUNT_SID", "AC123"),
        ("TWILIO_AUTH_TOKEN", "token"),
        ("TWILIO_API_KEY", "SK123"),
        ("TWILIO_API_SECRET", "shh"),
        ("TWILIO_WHATSAPP_FROM", "whatsapp:+15551234567"),
    ]))
    .err()
    .expect("must fail");
    assert!(issues.iter().any(|i| i.contains("mutually exclusive")));
}

#[test]
fn malformed_from_is_flagged() {
    let issues = TwilioEnv::from_lookup(env_of(&[
        ("TWILIO_ACCOUNT_SID", "AC123"),
        ("TWILIO_AUTH_TOKEN", "token"),
        ("TWILIO_WHATSAPP_FROM", "+15551234567"),
    ]))
    .err()
    .expect("must fail");
    assert!(issues.iter().any(|i| i.contains("whatsapp:+E164")));
}

#[test]
fn empty_environment_reports_every_missing_variable() {
    let issues = TwilioEnv::from_lookup(|_| None).err().expect("must fail");
    assert_eq!(issues.len(), 3, "{issues:?}");
}

#[test]
fn telegram_pair_must_appear_together() {
    let issues = TelegramEnv::from_lookup(env_of(&[("TELEGRAM_API_ID", "12345")]))
        .err()
        .expect("must fail");
    assert!(issues.iter().any(|i| i.contains("together")));

    let issues = TelegramEnv::from_lookup(env_of(&[("TELEGRAM_API_HASH", "abc")]))
        .err()
        .expect("must fail");
    assert!(issues.iter().any(|i| i.contains("together")));
}

#[test]
fn telegram_id_must_be_numeric() {
    let issues = TelegramEnv::from_lookup(env_of(&[
        ("TELEGRAM_API_ID", "not-a-number"),
        ("TELEGRAM_API_HASH", "abc"),
    ]))
    .err()
    .expect("must fail");
    assert!(issues.iter().any(|i| i.contains("decimal integer")));
}

#[test]
fn complete_telegram_set_is_accepted() {
    let env = TelegramEnv::from_lookup(env_of(&[
        ("TELEGRAM_API_ID", "12345"),
        ("TELEGRAM_API_HASH", "abcdef"),
    ]))
    .expect("valid set");
    assert_eq!(env.api_id, 12_345);
    assert_eq!(env.api_hash, "abcdef");
}
