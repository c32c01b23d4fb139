//! `{{Name}}` placeholder expansion for config strings and agent prompts.
//!
//! Placeholders tolerate surrounding whitespace inside the braces. Unknown
//! placeholders and known placeholders missing from the context both expand
//! to the empty string; literal text is left untouched.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// Context map for template expansion.
///
/// Recognised keys include `Body`, `BodyStripped`, `From`, `To`,
/// `MessageSid`, `MediaPath`, `MediaUrl`, `MediaType`, `Transcript`,
/// `ChatType`, `GroupSubject`, `GroupMembers`, `SenderName`, `SenderE164`,
/// `SessionId`, `IsNewSession`, and `PROVIDERS`. Any other key is carried
/// verbatim; expansion does not restrict the key set.
pub type TemplateContext = HashMap<String, String>;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap_or_else(|e| {
            // The pattern is a compile-time constant; this cannot fail.
            unreachable!("invalid placeholder regex: {e}")
        })
    })
}

/// Expand all `{{Name}}` placeholders in `input` against `ctx`.
///
/// Missing or unknown keys expand to `""`.
pub fn expand(input: &str, ctx: &TemplateContext) -> String {
    placeholder_re()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let key = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            ctx.get(key).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Build a context pre-populated from an inbound message's fields.
pub fn context_from_pairs<'a>(
    pairs: impl IntoIterator<Item = (&'a str, String)>,
) -> TemplateContext {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_placeholders() {
        let ctx = context_from_pairs([("From", "+491234".to_owned())]);
        assert_eq!(expand("msg from {{From}}", &ctx), "msg from +491234");
    }

    #[test]
    fn tolerates_inner_whitespace() {
        let ctx = context_from_pairs([("Body", "hi".to_owned())]);
        assert_eq!(expand("{{ Body }} / {{Body}}", &ctx), "hi / hi");
    }

    #[test]
    fn unknown_and_missing_keys_expand_empty() {
        let ctx = TemplateContext::new();
        assert_eq!(expand("a {{Nope}} b {{Body}} c", &ctx), "a  b  c");
    }

    #[test]
    fn literal_text_unchanged_with_empty_context() {
        let ctx = TemplateContext::new();
        assert_eq!(expand("no placeholders here", &ctx), "no placeholders here");
    }
}
