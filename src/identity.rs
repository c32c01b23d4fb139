//! Provider-aware identity prompt for freshly spawned agent sessions.
//!
//! A new session's agent is told, once, which messenger it is speaking
//! through, how large outbound media may be, where its scratchpad lives,
//! and the two output conventions it must honour (`MEDIA:` lines and
//! `HEARTBEAT_OK`). The operator can replace the whole prompt via
//! `inbound.reply.sessionIntro`, in which case only template expansion is
//! applied.

use std::fmt::Write as _;
use std::path::Path;

use crate::providers::{ProviderCapabilities, ProviderKind};
use crate::template::{expand, TemplateContext};

/// Expand `{{PROVIDERS}}` source: comma-separated detailed names of the
/// active providers ("WhatsApp Web, Telegram").
pub fn providers_placeholder(active: &[ProviderKind]) -> String {
    active
        .iter()
        .map(|k| k.detailed_name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the identity prompt for a new session.
///
/// With a `sessionIntro` override the text is template-expanded and
/// returned as-is; otherwise the default prompt is rendered from the
/// provider's capability record.
pub fn build_identity(
    kind: ProviderKind,
    caps: &ProviderCapabilities,
    active: &[ProviderKind],
    scratch_dir: &Path,
    override_intro: Option<&str>,
    extra_ctx: &TemplateContext,
) -> String {
    let mut ctx = extra_ctx.clone();
    ctx.insert("PROVIDERS".to_owned(), providers_placeholder(active));

    if let Some(intro) = override_intro {
        return expand(intro, &ctx);
    }

    let mut doc = String::with_capacity(1024);
    let _ = writeln!(
        doc,
        "You are replying on behalf of the operator over {}.",
        kind.messenger_name()
    );
    let _ = writeln!(
        doc,
        "Active providers: {}.",
        providers_placeholder(active)
    );
    let _ = writeln!(
        doc,
        "Outbound media is limited to {} on this channel.",
        format_size(caps.max_media_size)
    );
    let _ = writeln!(
        doc,
        "Your scratchpad directory is {}.",
        scratch_dir.display()
    );
    doc.push_str(
        "To attach a file to your reply, put MEDIA:/absolute/path on its own line.\n",
    );
    doc.push_str(
        "When a heartbeat poll arrives and there is nothing worth saying, reply with exactly HEARTBEAT_OK.\n",
    );
    doc
}

/// Format a byte count as B/KB/MB/GB, trimming a trailing `.0`.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1_024;
    const MB: u64 = 1_048_576;
    const GB: u64 = 1_073_741_824;

    let (value_x10, unit) = if bytes >= GB {
        (bytes.saturating_mul(10).checked_div(GB).unwrap_or(0), "GB")
    } else if bytes >= MB {
        (bytes.saturating_mul(10).checked_div(MB).unwrap_or(0), "MB")
    } else if bytes >= KB {
        (bytes.saturating_mul(10).checked_div(KB).unwrap_or(0), "KB")
    } else {
        (bytes.saturating_mul(10), "B")
    };

    let whole = value_x10.checked_div(10).unwrap_or(0);
    let tenth = value_x10.checked_rem(10).unwrap_or(0);
    if tenth == 0 {
        format!("{whole} {unit}")
    } else {
        format!("{whole}.{tenth} {unit}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateContext;

    #[test]
    fn formats_sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(5_242_880), "5 MB");
        assert_eq!(format_size(67_108_864), "64 MB");
        assert_eq!(format_size(2_147_483_648), "2 GB");
        assert_eq!(format_size(1_572_864), "1.5 MB");
    }

    #[test]
    fn default_identity_names_messenger_and_limit() {
        let caps = ProviderCapabilities::for_kind(ProviderKind::WaTwilio);
        let doc = build_identity(
            ProviderKind::WaTwilio,
            &caps,
            &[ProviderKind::WaTwilio, ProviderKind::Telegram],
            Path::new("/tmp/scratch"),
            None,
            &TemplateContext::new(),
        );
        assert!(doc.contains("WhatsApp"));
        assert!(doc.contains("5 MB"));
        assert!(doc.contains("MEDIA:"));
        assert!(doc.contains("HEARTBEAT_OK"));
        assert!(doc.contains("WhatsApp (Twilio), Telegram"));
    }

    #[test]
    fn override_intro_expands_providers() {
        let caps = ProviderCapabilities::for_kind(ProviderKind::Telegram);
        let doc = build_identity(
            ProviderKind::Telegram,
            &caps,
            &[ProviderKind::Telegram],
            Path::new("/tmp"),
            Some("channels: {{PROVIDERS}}"),
            &TemplateContext::new(),
        );
        assert_eq!(doc, "channels: Telegram");
    }
}
