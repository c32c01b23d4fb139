//! Agent subprocess: spawn, feed stdin, and parse the streamed stdout.
//!
//! The agent's stdout is a lazy sequence of reply fragments: text chunks,
//! `MEDIA:/absolute/path` markers on their own lines, and tool-streaming
//! markers (display emojis announcing file reads, edits, and similar).
//! A small line-level state machine folds the stream into the reply body
//! plus attachments; the child handle is shared with the owning session so
//! idle expiry can kill an in-flight invocation.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Shared handle to a running agent child, owned by the session.
pub type SharedChild = Arc<StdMutex<Option<Child>>>;

/// Emoji prefixes the agent uses to announce tool activity.
const TOOL_MARKERS: &[&str] = &["🔧", "🛠", "📖", "✏️", "📝", "🔍", "🌐", "💾"];

/// Errors from an agent invocation.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The subprocess could not be spawned.
    #[error("failed to spawn agent {command:?}: {source}")]
    Spawn {
        /// The argv[0] that failed.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Pipe I/O against the running agent failed.
    #[error("agent I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The agent exited with a failure status.
    #[error("agent exited with {status}: {stderr_tail}")]
    Crashed {
        /// Exit status description.
        status: String,
        /// Tail of the agent's stderr for diagnosis.
        stderr_tail: String,
    },

    /// The agent was killed (session destroyed or shutdown).
    #[error("agent was terminated")]
    Killed,
}

/// One fragment of the streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyFragment {
    /// A line of reply text.
    Text(String),
    /// An attachment the agent wants sent (`MEDIA:` marker).
    Media(PathBuf),
    /// A tool-streaming marker for the observer channel.
    Tool(String),
}

/// Classify one stdout line.
pub fn parse_line(line: &str) -> ReplyFragment {
    if let Some(rest) = line.trim_end().strip_prefix("MEDIA:") {
        let path = rest.trim();
        if path.starts_with('/') {
            return ReplyFragment::Media(PathBuf::from(path));
        }
    }
    let trimmed = line.trim_start();
    if TOOL_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
        return ReplyFragment::Tool(trimmed.to_owned());
    }
    ReplyFragment::Text(line.to_owned())
}

/// Assembled outcome of a completed invocation.
#[derive(Debug, Default)]
pub struct AgentReply {
    /// Reply body (text fragments joined with newlines).
    pub body: String,
    /// Attachment paths from `MEDIA:` markers, in stream order.
    pub media: Vec<PathBuf>,
}

/// Run one agent invocation: spawn `argv`, write `stdin_payload`, stream
/// stdout through `on_fragment`, and wait for exit.
///
/// The spawned child is parked in `shared` before any I/O so the session
/// that owns it can kill it at any time; the slot is emptied again before
/// returning.
///
/// # Errors
///
/// Returns [`AgentError::Killed`] when the child disappeared from the
/// shared slot (killed by expiry or shutdown) and [`AgentError::Crashed`]
/// for non-zero exits.
pub async fn run_agent(
    argv: &[String],
    stdin_payload: &str,
    shared: &SharedChild,
    mut on_fragment: impl FnMut(ReplyFragment),
) -> Result<AgentReply, AgentError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AgentError::Spawn {
            command: "<empty>".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty agent command"),
        })?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| AgentError::Spawn {
            command: program.clone(),
            source,
        })?;

    let mut stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Park the child where the session can reach it.
    if let Ok(mut slot) = shared.lock() {
        *slot = Some(child);
    }

    // Collect a stderr tail concurrently for crash diagnostics.
    let stderr_task = tokio::spawn(async move {
        let mut tail = String::new();
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "agent", "{line}");
                tail.push_str(&line);
                tail.push('\n');
                if tail.len() > 2_000 {
                    let cut = tail.len().saturating_sub(2_000);
                    tail.drain(..cut);
                }
            }
        }
        tail
    });

    // Feed the prompt and close stdin so the agent knows input is complete.
    if let Some(mut pipe) = stdin.take() {
        pipe.write_all(stdin_payload.as_bytes()).await?;
        pipe.write_all(b"\n").await?;
        pipe.shutdown().await?;
    }

    // Fold the stdout stream into the reply.
    let mut reply = AgentReply::default();
    let mut body_lines: Vec<String> = Vec::new();
    if let Some(stdout) = stdout {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            let fragment = parse_line(&line);
            match &fragment {
                ReplyFragment::Text(text) => body_lines.push(text.clone()),
                ReplyFragment::Media(path) => reply.media.push(path.clone()),
                ReplyFragment::Tool(_) => {}
            }
            on_fragment(fragment);
        }
    }
    reply.body = body_lines.join("\n").trim().to_owned();

    // Reclaim the child to reap it; an empty slot means we were killed.
    let reclaimed = shared.lock().ok().and_then(|mut slot| slot.take());
    let Some(mut child) = reclaimed else {
        return Err(AgentError::Killed);
    };
    let status = child.wait().await?;
    let stderr_tail = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(AgentError::Crashed {
            status: status.to_string(),
            stderr_tail,
        });
    }
    if reply.body.is_empty() && reply.media.is_empty() {
        warn!("agent produced an empty reply");
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_marker_on_own_line() {
        assert_eq!(
            parse_line("MEDIA:/tmp/out.png"),
            ReplyFragment::Media(PathBuf::from("/tmp/out.png"))
        );
        assert_eq!(
            parse_line("MEDIA: /tmp/with space.png"),
            ReplyFragment::Media(PathBuf::from("/tmp/with space.png"))
        );
    }

    #[test]
    fn relative_media_path_is_text() {
        assert_eq!(
            parse_line("MEDIA:not/absolute.png"),
            ReplyFragment::Text("MEDIA:not/absolute.png".to_owned())
        );
    }

    #[test]
    fn tool_markers_are_tool_fragments() {
        assert!(matches!(parse_line("🔧 running tests"), ReplyFragment::Tool(_)));
        assert!(matches!(parse_line("📖 reading src/main.rs"), ReplyFragment::Tool(_)));
    }

    #[test]
    fn ordinary_lines_are_text() {
        assert_eq!(
            parse_line("hello there"),
            ReplyFragment::Text("hello there".to_owned())
        );
    }
}
