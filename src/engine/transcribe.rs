//! Optional audio transcription via an external command.
//!
//! When configured, a single audio or voice attachment is transcribed
//! before session dispatch and a `Transcript:` block is appended to the
//! message body. Failures log and omit the transcript; they never block the
//! message.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::warn;

use crate::config::TranscribeConfig;
use crate::template::{expand, TemplateContext};

/// Upper bound on a transcription run.
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(120);

/// Run the configured transcriber over an audio file.
///
/// The argv is template-expanded; `{{MediaPath}}` receives the audio path.
/// Returns the trimmed stdout, or `None` on any failure.
pub async fn transcribe(config: &TranscribeConfig, audio_path: &Path) -> Option<String> {
    let mut ctx = TemplateContext::new();
    ctx.insert(
        "MediaPath".to_owned(),
        audio_path.to_string_lossy().into_owned(),
    );
    let argv: Vec<String> = config.command.iter().map(|arg| expand(arg, &ctx)).collect();

    let (program, args) = argv.split_first()?;
    if program.is_empty() {
        return None;
    }

    let run = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    let output = match tokio::time::timeout(TRANSCRIBE_TIMEOUT, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(error = %e, "transcription command failed to run");
            return None;
        }
        Err(_) => {
            warn!("transcription timed out");
            return None;
        }
    };

    if !output.status.success() {
        warn!(status = %output.status, "transcription command failed");
        return None;
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if text.is_empty() {
        warn!("transcription produced no text");
        return None;
    }
    Some(text)
}

/// Append a transcript block to a message body.
pub fn append_transcript(body: &str, transcript: &str) -> String {
    if body.trim().is_empty() {
        format!("Transcript:\n{transcript}")
    } else {
        format!("{body}\n\nTranscript:\n{transcript}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_appends_after_body() {
        assert_eq!(
            append_transcript("hello", "one two"),
            "hello\n\nTranscript:\none two"
        );
    }

    #[test]
    fn transcript_stands_alone_for_empty_body() {
        assert_eq!(append_transcript("  ", "one two"), "Transcript:\none two");
    }
}
