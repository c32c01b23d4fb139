//! Streaming-parse fragments: text, MEDIA markers, tool events.

use std::path::PathBuf;

use warelay::engine::agent::{parse_line, ReplyFragment};

#[test]
fn media_marker_lines_become_attachments() {
    assert_eq!(
        parse_line("MEDIA:/home/user/out.png"),
        ReplyFragment::Media(PathBuf::from("/home/user/out.png"))
    );
}

#[test]
fn media_marker_must_be_absolute() {
    assert!(matches!(
        parse_line("MEDIA:relative/path.png"),
        ReplyFragment::Text(_)
    ));
}

#[test]
fn media_text_inline_is_not_a_marker() {
    // The marker is recognised on its own line only; text mentioning the
    // convention stays text.
    assert!(matches!(
        parse_line("I will send MEDIA:/tmp/x.png later"),
        ReplyFragment::Text(_)
    ));
}

#[test]
fn tool_emojis_route_to_the_observer() {
    assert!(matches!(parse_line("🔧 ran cargo fmt"), ReplyFragment::Tool(_)));
    assert!(matches!(parse_line("  📖 reading notes"), ReplyFragment::Tool(_)));
}

#[test]
fn plain_lines_are_text() {
    assert_eq!(
        parse_line("plain reply"),
        ReplyFragment::Text("plain reply".to_owned())
    );
}
