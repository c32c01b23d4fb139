//! Auto-reply engine: the pipeline between a normalised inbound message and
//! the reply that goes back through the same provider.
//!
//! Pipeline per inbound: whitelist, group policy, optional transcription,
//! session resolve, agent spawn/reuse under the per-session lock, streaming
//! parse of the agent's stdout, reply send (with typing pre-indicator and
//! `HEARTBEAT_OK` suppression), session bookkeeping. Handler invocations
//! for different sessions run concurrently; the per-session gate serialises
//! everything inside one session.

pub mod agent;
pub mod transcribe;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{Config, ReplyMode};
use crate::identifiers;
use crate::identity;
use crate::paths::StatePaths;
use crate::providers::{
    ChatContext, InboundHandler, InboundMessage, MediaAttachment, MediaKind, Provider,
    ProviderKind, SendOptions,
};
use crate::session::heartbeat::{HeartbeatCallback, HEARTBEAT_OK, HEARTBEAT_PROMPT};
use crate::session::{Session, SessionManager};
use crate::template::{expand, TemplateContext};

use agent::{AgentError, ReplyFragment, SharedChild};

/// Apology sent when the agent subprocess dies mid-conversation.
const AGENT_CRASH_APOLOGY: &str =
    "Sorry, something went wrong on my side handling your message. Please try again.";

/// The auto-reply engine. One instance serves every provider in a relay
/// run; replies are routed back through the provider the message came from.
pub struct AutoReplyEngine {
    config: Arc<Config>,
    paths: StatePaths,
    sessions: Arc<SessionManager>,
    providers: StdMutex<HashMap<ProviderKind, Arc<dyn Provider>>>,
    active: StdMutex<Vec<ProviderKind>>,
    allow_warned: StdMutex<HashSet<ProviderKind>>,
    observer: StdMutex<Option<mpsc::Sender<String>>>,
}

impl AutoReplyEngine {
    /// Create the engine.
    pub fn new(config: Arc<Config>, paths: StatePaths, sessions: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            config,
            paths,
            sessions,
            providers: StdMutex::new(HashMap::new()),
            active: StdMutex::new(Vec::new()),
            allow_warned: StdMutex::new(HashSet::new()),
            observer: StdMutex::new(None),
        })
    }

    /// Register a provider for reply routing and the `{{PROVIDERS}}` list.
    pub fn register_provider(&self, provider: Arc<dyn Provider>) {
        let kind = provider.kind();
        if let Ok(mut providers) = self.providers.lock() {
            providers.insert(kind, provider);
        }
        if let Ok(mut active) = self.active.lock() {
            if !active.contains(&kind) {
                active.push(kind);
            }
        }
        // The absent-allow-list warning fires once per provider start.
        if self.config.allow_from(kind).is_none() {
            let first = self
                .allow_warned
                .lock()
                .map(|mut warned| warned.insert(kind))
                .unwrap_or(false);
            if first {
                warn!(
                    provider = %kind,
                    "no allowFrom configured: every sender will reach the agent"
                );
            }
        }
    }

    /// Subscribe an observer channel for tool-streaming markers.
    pub fn set_observer(&self, tx: mpsc::Sender<String>) {
        if let Ok(mut observer) = self.observer.lock() {
            *observer = Some(tx);
        }
    }

    fn provider(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        self.providers
            .lock()
            .ok()
            .and_then(|providers| providers.get(&kind).cloned())
    }

    fn active_kinds(&self) -> Vec<ProviderKind> {
        self.active.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Build the inbound handler installed on every provider.
    pub fn handler(self: &Arc<Self>) -> InboundHandler {
        let engine = Arc::clone(self);
        Arc::new(move |msg: InboundMessage| {
            let engine = Arc::clone(&engine);
            Box::pin(async move {
                engine.handle_inbound(msg).await;
            })
        })
    }

    /// Build the callback the heartbeat scheduler fires for due sessions.
    pub fn heartbeat_callback(self: &Arc<Self>) -> HeartbeatCallback {
        let engine = Arc::clone(self);
        Arc::new(move |session: Arc<Session>| {
            let engine = Arc::clone(&engine);
            Box::pin(async move {
                engine.fire_heartbeat(session).await;
            })
        })
    }

    // -----------------------------------------------------------------
    // Inbound pipeline
    // -----------------------------------------------------------------

    /// Run the full pipeline for one inbound message. Errors are contained
    /// here: a failure for one message never stops the provider's stream.
    pub async fn handle_inbound(self: Arc<Self>, mut msg: InboundMessage) {
        let kind = msg.provider;
        debug!(provider = %kind, from = %msg.from, "inbound message");

        if !self.sender_allowed(&msg) {
            info!(provider = %kind, from = %msg.from, "sender not in allow-list, discarding");
            return;
        }
        if msg.is_group() && !self.group_allowed(&msg) {
            info!(provider = %kind, from = %msg.from, "group message without mention or allow-list entry, discarding");
            return;
        }

        // Media preprocessing: one audio/voice attachment plus a configured
        // transcriber yields a Transcript block.
        let mut transcript: Option<String> = None;
        if let Some(transcriber) = &self.config.inbound.transcribe {
            let audio: Vec<&MediaAttachment> = msg
                .media
                .iter()
                .filter(|att| matches!(att.kind, MediaKind::Audio | MediaKind::Voice))
                .collect();
            if let [single] = audio.as_slice() {
                if let crate::providers::MediaSource::Path(path) = &single.source {
                    transcript = transcribe::transcribe(transcriber, path).await;
                    if let Some(text) = &transcript {
                        msg.body = transcribe::append_transcript(&msg.body, text);
                    }
                }
            }
        }

        let (session, is_new) = self.sessions.resolve(&msg.from);
        let reply_target = msg.from.clone();
        session.touch(
            Some((kind, reply_target.clone())),
            self.sessions.heartbeat_interval(),
        );

        let ctx = self.build_context(&msg, &session.key, is_new, transcript.as_deref());
        let prompt = msg.body.clone();

        self.run_reply(
            &session,
            kind,
            &reply_target,
            &prompt,
            is_new,
            &ctx,
            false,
        )
        .await;

        // A zero idle expiry destroys the session right after the reply.
        if self.sessions.idle_expiry().is_zero() {
            self.sessions.destroy(&session.key);
        }
    }

    /// Whitelist test on the canonical sender. Group messages defer to the
    /// group policy.
    fn sender_allowed(&self, msg: &InboundMessage) -> bool {
        if msg.is_group() {
            return true;
        }
        let Some(list) = self.config.allow_from(msg.provider) else {
            return true;
        };
        allow_list_permits(list, &msg.from, msg.provider)
    }

    /// Group policy: processed only when the operator is mentioned or the
    /// group is separately allow-listed.
    fn group_allowed(&self, msg: &InboundMessage) -> bool {
        let ChatContext::Group {
            chat_id, mentioned, ..
        } = &msg.chat
        else {
            return true;
        };
        if self
            .config
            .waweb
            .allow_groups
            .iter()
            .any(|g| g == chat_id)
        {
            return true;
        }
        !msg.to.is_empty() && mentioned.iter().any(|m| m == &msg.to)
    }

    fn build_context(
        &self,
        msg: &InboundMessage,
        session_key: &str,
        is_new: bool,
        transcript: Option<&str>,
    ) -> TemplateContext {
        let mut ctx = TemplateContext::new();
        ctx.insert("Body".to_owned(), msg.body.clone());
        ctx.insert(
            "BodyStripped".to_owned(),
            msg.body.split_whitespace().collect::<Vec<_>>().join(" "),
        );
        ctx.insert("From".to_owned(), msg.from.clone());
        ctx.insert("To".to_owned(), msg.to.clone());
        ctx.insert("MessageSid".to_owned(), msg.id.clone());
        ctx.insert("SessionId".to_owned(), session_key.to_owned());
        ctx.insert("IsNewSession".to_owned(), is_new.to_string());
        ctx.insert(
            "SenderName".to_owned(),
            msg.sender_name.clone().unwrap_or_default(),
        );
        ctx.insert(
            "SenderE164".to_owned(),
            identifiers::normalize(&msg.from, msg.provider).unwrap_or_default(),
        );
        ctx.insert(
            "Transcript".to_owned(),
            transcript.unwrap_or_default().to_owned(),
        );
        match &msg.chat {
            ChatContext::Direct => {
                ctx.insert("ChatType".to_owned(), "direct".to_owned());
                ctx.insert("GroupSubject".to_owned(), String::new());
                ctx.insert("GroupMembers".to_owned(), String::new());
            }
            ChatContext::Group {
                subject, mentioned, ..
            } => {
                ctx.insert("ChatType".to_owned(), "group".to_owned());
                ctx.insert(
                    "GroupSubject".to_owned(),
                    subject.clone().unwrap_or_default(),
                );
                ctx.insert("GroupMembers".to_owned(), mentioned.join(", "));
            }
        }
        if let Some(att) = msg.media.first() {
            let (path, url) = match &att.source {
                crate::providers::MediaSource::Path(p) => {
                    (p.to_string_lossy().into_owned(), String::new())
                }
                crate::providers::MediaSource::Url(u) => (String::new(), u.clone()),
                crate::providers::MediaSource::Bytes(_) => (String::new(), String::new()),
            };
            ctx.insert("MediaPath".to_owned(), path);
            ctx.insert("MediaUrl".to_owned(), url);
            ctx.insert(
                "MediaType".to_owned(),
                att.mime.clone().unwrap_or_default(),
            );
        } else {
            ctx.insert("MediaPath".to_owned(), String::new());
            ctx.insert("MediaUrl".to_owned(), String::new());
            ctx.insert("MediaType".to_owned(), String::new());
        }
        ctx.insert(
            "PROVIDERS".to_owned(),
            identity::providers_placeholder(&self.active_kinds()),
        );
        ctx
    }

    // -----------------------------------------------------------------
    // Reply production
    // -----------------------------------------------------------------

    /// Produce and deliver a reply for `prompt` inside the session's gate.
    #[allow(clippy::too_many_arguments)]
    async fn run_reply(
        self: &Arc<Self>,
        session: &Arc<Session>,
        kind: ProviderKind,
        reply_target: &str,
        prompt: &str,
        is_new: bool,
        ctx: &TemplateContext,
        is_heartbeat: bool,
    ) {
        // One in-flight agent invocation per session; later inbound queues
        // here in arrival order.
        let _gate = session.gate.lock().await;

        match self.config.inbound.reply.mode {
            ReplyMode::Text => {
                if is_heartbeat {
                    return;
                }
                let body = expand(&self.config.inbound.reply.text, ctx);
                if !body.trim().is_empty() {
                    self.send_reply(kind, reply_target, &body, &[]).await;
                    session.rearm_heartbeat(self.sessions.heartbeat_interval());
                }
            }
            ReplyMode::Command => {
                self.run_agent_reply(session, kind, reply_target, prompt, is_new, ctx, is_heartbeat)
                    .await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_agent_reply(
        self: &Arc<Self>,
        session: &Arc<Session>,
        kind: ProviderKind,
        reply_target: &str,
        prompt: &str,
        is_new: bool,
        ctx: &TemplateContext,
        is_heartbeat: bool,
    ) {
        let argv: Vec<String> = self
            .config
            .inbound
            .reply
            .command
            .iter()
            .map(|arg| expand(arg, ctx))
            .collect();
        if argv.is_empty() {
            warn!("reply mode is command but inbound.reply.command is empty");
            return;
        }

        // A new session's agent is introduced to its channel first.
        let payload = if is_new {
            let caps = self
                .provider(kind)
                .map(|p| p.capabilities().clone())
                .unwrap_or_else(|| crate::providers::ProviderCapabilities::for_kind(kind));
            let intro = identity::build_identity(
                kind,
                &caps,
                &self.active_kinds(),
                &self.scratch_dir(),
                self.config.inbound.reply.session_intro.as_deref(),
                ctx,
            );
            format!("{intro}\n{prompt}")
        } else {
            prompt.to_owned()
        };

        let shared = SharedChild::default();
        session.set_agent(shared.clone());

        // Streaming hooks: tool markers to the observer channel, paragraph
        // chunks to the peer as they form when chunked delivery is
        // configured.
        let observer = self
            .observer
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().cloned());
        let forward_tools = self.config.inbound.reply.forward_tool_events;
        let chunk_min = self.config.inbound.reply.chunk_min_chars;
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();
        let mut pending = String::new();
        let mut chunks_flushed = 0_usize;
        let mut forwarded_tools: Vec<String> = Vec::new();

        let drain = {
            let engine = Arc::clone(self);
            let target = reply_target.to_owned();
            tokio::spawn(async move {
                while let Some(chunk) = chunk_rx.recv().await {
                    engine.send_reply(kind, &target, chunk.trim(), &[]).await;
                }
            })
        };

        let outcome = agent::run_agent(&argv, &payload, &shared, |fragment| match fragment {
            ReplyFragment::Tool(line) => {
                if let Some(observer) = &observer {
                    let _ = observer.try_send(line.clone());
                }
                if forward_tools {
                    forwarded_tools.push(line);
                }
            }
            ReplyFragment::Text(line) => {
                if let Some(min) = chunk_min {
                    if line.trim().is_empty() && pending.len() >= min {
                        let _ = chunk_tx.send(std::mem::take(&mut pending));
                        chunks_flushed = chunks_flushed.saturating_add(1);
                    } else {
                        if !pending.is_empty() {
                            pending.push('\n');
                        }
                        pending.push_str(&line);
                    }
                }
            }
            ReplyFragment::Media(_) => {}
        })
        .await;

        session.clear_agent();
        drop(chunk_tx);
        if let Err(e) = drain.await {
            warn!(error = %e, "chunk drain task failed");
        }

        match outcome {
            Ok(reply) => {
                // With chunking, everything flushed is already delivered;
                // only the unflushed remainder (plus media) is left.
                let mut body = if chunk_min.is_some() {
                    std::mem::take(&mut pending)
                } else {
                    reply.body
                };
                if !forwarded_tools.is_empty() {
                    let tools = forwarded_tools.join("\n");
                    body = if body.is_empty() {
                        tools
                    } else {
                        format!("{tools}\n{body}")
                    };
                }

                let suppressed = body.trim() == HEARTBEAT_OK && reply.media.is_empty();
                if suppressed {
                    debug!(session_key = %session.key, "heartbeat acknowledgement suppressed");
                } else if body.trim().is_empty() && reply.media.is_empty() {
                    if chunks_flushed == 0 && !is_heartbeat {
                        debug!(session_key = %session.key, "agent produced nothing to send");
                    }
                } else {
                    self.send_reply(kind, reply_target, body.trim(), &reply.media)
                        .await;
                }
                session.rearm_heartbeat(self.sessions.heartbeat_interval());
            }
            Err(AgentError::Killed) => {
                debug!(session_key = %session.key, "agent invocation terminated");
            }
            Err(e) => {
                warn!(session_key = %session.key, error = %e, "agent failed, closing session");
                if !is_heartbeat {
                    self.send_reply(kind, reply_target, AGENT_CRASH_APOLOGY, &[])
                        .await;
                }
                self.sessions.destroy(&session.key);
            }
        }
    }

    /// Send a reply through the originating provider, with a typing
    /// pre-indicator where supported and one retry on failure.
    async fn send_reply(
        &self,
        kind: ProviderKind,
        to: &str,
        body: &str,
        media_paths: &[std::path::PathBuf],
    ) {
        let Some(provider) = self.provider(kind) else {
            warn!(provider = %kind, "no provider registered for reply");
            return;
        };

        if provider.capabilities().typing_indicator {
            provider.send_typing(to).await;
        }

        let options = SendOptions {
            media: media_paths
                .iter()
                .map(|path| attachment_for_path(path))
                .collect(),
            reply_to: None,
            typing: false,
        };

        let result = provider.send(to, body, &options).await;
        if result.is_ok() {
            debug!(provider = %kind, to, message_id = %result.message_id, "reply sent");
            return;
        }
        warn!(
            provider = %kind,
            to,
            error = ?result.error,
            "reply send failed, retrying once"
        );
        let retry = provider.send(to, body, &options).await;
        if retry.is_ok() {
            debug!(provider = %kind, to, message_id = %retry.message_id, "reply sent on retry");
        } else {
            warn!(provider = %kind, to, error = ?retry.error, "reply send failed after retry");
        }
    }

    // -----------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------

    /// Fire a heartbeat poll for a due session: the agent is prompted and
    /// its reply is processed exactly like a normal inbound, except that a
    /// body of exactly `HEARTBEAT_OK` is suppressed.
    pub async fn fire_heartbeat(self: Arc<Self>, session: Arc<Session>) {
        let Some((kind, reply_target)) = session.origin() else {
            debug!(session_key = %session.key, "heartbeat skipped: no reply origin yet");
            return;
        };

        let mut ctx = TemplateContext::new();
        ctx.insert("Body".to_owned(), HEARTBEAT_PROMPT.to_owned());
        ctx.insert("From".to_owned(), reply_target.clone());
        ctx.insert("SessionId".to_owned(), session.key.clone());
        ctx.insert("IsNewSession".to_owned(), "false".to_owned());
        ctx.insert(
            "PROVIDERS".to_owned(),
            identity::providers_placeholder(&self.active_kinds()),
        );

        self.run_reply(
            &session,
            kind,
            &reply_target,
            HEARTBEAT_PROMPT,
            false,
            &ctx,
            true,
        )
        .await;
    }

    fn scratch_dir(&self) -> std::path::PathBuf {
        self.paths.config_dir.join("scratch")
    }
}

/// Membership test for an allow-list: both sides are normalised to
/// canonical form and compared exactly. An empty list denies everyone.
pub fn allow_list_permits(list: &[String], from: &str, kind: ProviderKind) -> bool {
    let canonical = identifiers::normalize(from, kind).unwrap_or_else(|_| from.to_owned());
    list.iter().any(|entry| {
        identifiers::normalize(entry, kind)
            .map(|e| e == canonical)
            .unwrap_or(false)
    })
}

/// Attachment for a `MEDIA:` path, kind inferred from the extension.
fn attachment_for_path(path: &Path) -> MediaAttachment {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let kind = match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" => MediaKind::Image,
        "mp4" | "mov" | "webm" | "mkv" | "avi" => MediaKind::Video,
        "ogg" | "opus" => MediaKind::Voice,
        "mp3" | "wav" | "m4a" | "flac" | "aac" => MediaKind::Audio,
        _ => MediaKind::Document,
    };
    MediaAttachment::from_path(kind, path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_kind_from_extension() {
        assert_eq!(
            attachment_for_path(Path::new("/tmp/a.png")).kind,
            MediaKind::Image
        );
        assert_eq!(
            attachment_for_path(Path::new("/tmp/a.mp4")).kind,
            MediaKind::Video
        );
        assert_eq!(
            attachment_for_path(Path::new("/tmp/a.ogg")).kind,
            MediaKind::Voice
        );
        assert_eq!(
            attachment_for_path(Path::new("/tmp/a.mp3")).kind,
            MediaKind::Audio
        );
        assert_eq!(
            attachment_for_path(Path::new("/tmp/a.pdf")).kind,
            MediaKind::Document
        );
        assert_eq!(
            attachment_for_path(Path::new("/tmp/noext")).kind,
            MediaKind::Document
        );
    }
}
