//! Placeholder expansion semantics.

use warelay::template::{context_from_pairs, expand, TemplateContext};

#[test]
fn known_keys_expand() {
    let ctx = context_from_pairs([
        ("Body", "ping".to_owned()),
        ("From", "+15551234567".to_owned()),
    ]);
    assert_eq!(
        expand("{{From}} says {{Body}}", &ctx),
        "+15551234567 says ping"
    );
}

#[test]
fn whitespace_inside_braces_is_tolerated() {
    let ctx = context_from_pairs([("SessionId", "+49".to_owned())]);
    assert_eq!(expand("{{  SessionId  }}", &ctx), "+49");
}

#[test]
fn empty_context_leaves_literal_text_unchanged() {
    let ctx = TemplateContext::new();
    let literal = "no placeholders, just { braces } and text";
    assert_eq!(expand(literal, &ctx), literal);
}

#[test]
fn unknown_and_missing_placeholders_expand_to_empty() {
    let ctx = context_from_pairs([("Body", "x".to_owned())]);
    // Unknown key and known-but-missing key behave the same: empty.
    assert_eq!(expand("[{{NoSuchKey}}][{{Transcript}}]", &ctx), "[][]");
}

#[test]
fn repeated_placeholders_all_expand() {
    let ctx = context_from_pairs([("X", "a".to_owned())]);
    assert_eq!(expand("{{X}}{{X}}{{X}}", &ctx), "aaa");
}
