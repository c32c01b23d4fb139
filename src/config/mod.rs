//! User configuration loading and environment validation.
//!
//! The user config is a JSON file (`clawdis.json`, legacy `warelay.json`)
//! under the resolved config directory. A missing file yields defaults; a
//! malformed file is fatal at startup. Environment credentials for the
//! Twilio and Telegram backends are validated separately with a precise
//! list of issues.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::providers::ProviderKind;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level user configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Inbound handling: whitelist and auto-reply.
    pub inbound: InboundConfig,
    /// WA-Web provider overrides.
    pub waweb: WaWebConfig,
    /// Twilio provider overrides.
    pub watwilio: ProviderOverrides,
    /// Telegram provider overrides.
    pub telegram: ProviderOverrides,
}

impl Config {
    /// Load configuration from the given file.
    ///
    /// A missing file returns defaults. A present but malformed file is an
    /// error: silently ignoring a typo'd config would change whitelist
    /// behaviour.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                info!(path = %path.display(), "loading config");
                let config: Config = serde_json::from_str(&contents)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no config file found, using defaults");
                Ok(Config::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Parse a JSON string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse config JSON")
    }

    /// Effective allow-list for a provider kind.
    ///
    /// A provider section's `allowFrom` overrides the global
    /// `inbound.allowFrom`. `None` means "allow all"; an empty list means
    /// "deny all".
    pub fn allow_from(&self, kind: ProviderKind) -> Option<&[String]> {
        let per_provider = match kind {
            ProviderKind::WaWeb => self.waweb.overrides.allow_from.as_deref(),
            ProviderKind::WaTwilio => self.watwilio.allow_from.as_deref(),
            ProviderKind::Telegram => self.telegram.allow_from.as_deref(),
        };
        per_provider.or(self.inbound.allow_from.as_deref())
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Tracing level filter (`error`..`trace`).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound / reply
// ---------------------------------------------------------------------------

/// Inbound handling configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InboundConfig {
    /// Global whitelist of canonical sender identifiers. Absent = allow all
    /// (with a loud warning at startup); empty = deny all.
    pub allow_from: Option<Vec<String>>,
    /// Auto-reply settings.
    pub reply: ReplyConfig,
    /// Optional transcription command for audio/voice attachments. The argv
    /// is template-expanded; `{{MediaPath}}` receives the audio file path.
    pub transcribe: Option<TranscribeConfig>,
}

/// How the engine produces replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    /// Spawn the configured agent subprocess and stream its stdout.
    Command,
    /// Reply with a fixed template-expanded text.
    Text,
}

/// Auto-reply configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplyConfig {
    /// Reply mode.
    pub mode: ReplyMode,
    /// Agent subprocess argv for [`ReplyMode::Command`]. Each element is
    /// template-expanded per inbound message.
    pub command: Vec<String>,
    /// Static reply text for [`ReplyMode::Text`].
    pub text: String,
    /// Session settings.
    pub session: SessionConfig,
    /// Heartbeat interval in minutes; 0 disables heartbeats.
    pub heartbeat_minutes: u32,
    /// Override for the identity prompt fed to a new session's agent.
    pub session_intro: Option<String>,
    /// Forward tool-streaming markers to the peer instead of only to the
    /// observer channel.
    pub forward_tool_events: bool,
    /// Chunked delivery: flush a partial reply at each paragraph boundary
    /// once at least this many characters have accumulated. Absent disables
    /// chunking.
    pub chunk_min_chars: Option<usize>,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            mode: ReplyMode::Command,
            command: Vec::new(),
            text: String::new(),
            session: SessionConfig::default(),
            heartbeat_minutes: 0,
            session_intro: None,
            forward_tool_events: false,
            chunk_min_chars: None,
        }
    }
}

/// Session scoping configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Session scope.
    pub scope: SessionScope,
    /// Idle expiry in minutes; 0 destroys the session right after a reply.
    pub idle_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scope: SessionScope::PerSender,
            idle_minutes: 1_440,
        }
    }
}

/// Session scope: one shared session, or one per sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionScope {
    /// One session shared by every sender.
    Global,
    /// One session per canonical sender identifier.
    PerSender,
}

/// External transcription command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeConfig {
    /// Transcriber argv; template-expanded, prints the transcript on stdout.
    pub command: Vec<String>,
}

// ---------------------------------------------------------------------------
// Per-provider sections
// ---------------------------------------------------------------------------

/// Overrides common to all provider sections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderOverrides {
    /// Provider-specific whitelist overriding `inbound.allowFrom`.
    pub allow_from: Option<Vec<String>>,
}

/// WA-Web provider section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaWebConfig {
    /// Common overrides.
    #[serde(flatten)]
    pub overrides: ProviderOverrides,
    /// Base URL of the protocol bridge.
    pub bridge_url: String,
    /// Groups whose traffic is processed without a mention of the operator.
    pub allow_groups: Vec<String>,
}

impl Default for WaWebConfig {
    fn default() -> Self {
        Self {
            overrides: ProviderOverrides::default(),
            bridge_url: "http://127.0.0.1:3001".to_owned(),
            allow_groups: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment credentials
// ---------------------------------------------------------------------------

/// Twilio credentials assembled from the environment.
#[derive(Clone)]
pub struct TwilioEnv {
    /// Account identifier.
    pub account_sid: String,
    /// Authentication: token, or API key + secret.
    pub auth: TwilioAuth,
    /// Sender identity, `whatsapp:+E164`.
    pub whatsapp_from: String,
    /// Optional messaging-service identifier used instead of `From`.
    pub sender_sid: Option<String>,
}

/// Twilio authentication material.
#[derive(Clone)]
pub enum TwilioAuth {
    /// Classic auth token paired with the account SID.
    Token(String),
    /// API key + secret pair.
    ApiKey {
        /// API key SID.
        key: String,
        /// API key secret.
        secret: String,
    },
}

impl std::fmt::Debug for TwilioEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioEnv")
            .field("account_sid", &self.account_sid)
            .field("auth", &"[REDACTED]")
            .field("whatsapp_from", &self.whatsapp_from)
            .field("sender_sid", &self.sender_sid)
            .finish()
    }
}

impl TwilioEnv {
    /// Assemble Twilio credentials from the environment.
    ///
    /// # Errors
    ///
    /// Returns every problem found, not just the first.
    pub fn from_env() -> Result<Self, Vec<String>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Assemble from a custom lookup (for testing).
    ///
    /// # Errors
    ///
    /// Returns the full list of issues.
    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, Vec<String>> {
        let mut issues = Vec::new();

        let account_sid = env("TWILIO_ACCOUNT_SID");
        if account_sid.is_none() {
            issues.push("TWILIO_ACCOUNT_SID is not set".to_owned());
        }

        let token = env("TWILIO_AUTH_TOKEN");
        let api_key = env("TWILIO_API_KEY");
        let api_secret = env("TWILIO_API_SECRET");
        let auth = match (token, api_key, api_secret) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                issues.push(
                    "TWILIO_AUTH_TOKEN and TWILIO_API_KEY/TWILIO_API_SECRET are mutually exclusive"
                        .to_owned(),
                );
                None
            }
            (Some(token), None, None) => Some(TwilioAuth::Token(token)),
            (None, Some(key), Some(secret)) => Some(TwilioAuth::ApiKey { key, secret }),
            (None, Some(_), None) => {
                issues.push("TWILIO_API_KEY is set but TWILIO_API_SECRET is missing".to_owned());
                None
            }
            (None, None, Some(_)) => {
                issues.push("TWILIO_API_SECRET is set but TWILIO_API_KEY is missing".to_owned());
                None
            }
            (None, None, None) => {
                issues.push(
                    "neither TWILIO_AUTH_TOKEN nor TWILIO_API_KEY+TWILIO_API_SECRET is set"
                        .to_owned(),
                );
                None
            }
        };

        let whatsapp_from = env("TWILIO_WHATSAPP_FROM");
        match whatsapp_from.as_deref() {
            None => issues.push("TWILIO_WHATSAPP_FROM is not set".to_owned()),
            Some(v) if !v.starts_with("whatsapp:+") => issues.push(format!(
                "TWILIO_WHATSAPP_FROM must have the form whatsapp:+E164, got {v:?}"
            )),
            Some(_) => {}
        }

        let sender_sid = env("TWILIO_SENDER_SID");

        if !issues.is_empty() {
            return Err(issues);
        }

        // All None cases pushed an issue above.
        match (account_sid, auth, whatsapp_from) {
            (Some(account_sid), Some(auth), Some(whatsapp_from)) => Ok(Self {
                account_sid,
                auth,
                whatsapp_from,
                sender_sid,
            }),
            _ => Err(vec!["incomplete Twilio environment".to_owned()]),
        }
    }

    /// Whether the environment carries a complete Twilio credential set.
    pub fn is_complete() -> bool {
        Self::from_env().is_ok()
    }
}

/// Telegram API credentials assembled from the environment.
#[derive(Clone)]
pub struct TelegramEnv {
    /// Developer API id.
    pub api_id: i32,
    /// Developer API hash.
    pub api_hash: String,
}

impl std::fmt::Debug for TelegramEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramEnv")
            .field("api_id", &self.api_id)
            .field("api_hash", &"[REDACTED]")
            .finish()
    }
}

impl TelegramEnv {
    /// Assemble Telegram credentials from the environment.
    ///
    /// # Errors
    ///
    /// Returns every problem found; `TELEGRAM_API_ID` and
    /// `TELEGRAM_API_HASH` must appear together.
    pub fn from_env() -> Result<Self, Vec<String>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Assemble from a custom lookup (for testing).
    ///
    /// # Errors
    ///
    /// Returns the full list of issues.
    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, Vec<String>> {
        let mut issues = Vec::new();

        let api_id = env("TELEGRAM_API_ID");
        let api_hash = env("TELEGRAM_API_HASH");

        if api_id.is_some() != api_hash.is_some() {
            issues.push(
                "TELEGRAM_API_ID and TELEGRAM_API_HASH must be set together".to_owned(),
            );
        }
        if api_id.is_none() && api_hash.is_none() {
            issues.push("TELEGRAM_API_ID and TELEGRAM_API_HASH are not set".to_owned());
        }

        let parsed_id = match api_id.as_deref().map(str::parse::<i32>) {
            Some(Ok(id)) => Some(id),
            Some(Err(_)) => {
                issues.push(format!(
                    "TELEGRAM_API_ID must be a decimal integer, got {:?}",
                    api_id.unwrap_or_default()
                ));
                None
            }
            None => None,
        };

        match (parsed_id, api_hash, issues.is_empty()) {
            (Some(api_id), Some(api_hash), true) => Ok(Self { api_id, api_hash }),
            _ => Err(issues),
        }
    }

    /// Whether the environment carries a complete Telegram credential set.
    pub fn is_complete() -> bool {
        Self::from_env().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_allow_all_with_no_list() {
        let config = Config::default();
        assert!(config.allow_from(ProviderKind::WaWeb).is_none());
        assert_eq!(config.inbound.reply.session.idle_minutes, 1_440);
    }

    #[test]
    fn provider_section_overrides_global_allow_list() {
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
            config.allow_from(ProviderKind::WaTwilio),
            Some(&["+1555".to_owned()][..])
        );
    }

    #[test]
    fn empty_allow_list_is_preserved_as_deny_all() {
        let config = Config::from_json(r#"{"inbound": {"allowFrom": []}}"#).expect("parse");
        assert_eq!(config.allow_from(ProviderKind::WaWeb), Some(&[][..]));
    }

    #[test]
    fn reply_config_parses_command_mode() {
        let config = Config::from_json(
            r#"{
                "inbound": {
                    "reply": {
                        "mode": "command",
                        "command": ["agent", "--prompt", "{{Body}}"],
                        "session": {"scope": "per-sender", "idleMinutes": 30},
                        "heartbeatMinutes": 15
                    }
                }
            }"#,
        )
        .expect("parse");
        assert_eq!(config.inbound.reply.mode, ReplyMode::Command);
        assert_eq!(config.inbound.reply.session.idle_minutes, 30);
        assert_eq!(config.inbound.reply.heartbeat_minutes, 15);
    }

    #[test]
    fn twilio_env_reports_all_issues() {
        let err = TwilioEnv::from_lookup(|_| None).err().unwrap_or_default();
        assert_eq!(err.len(), 3);
    }

    #[test]
    fn twilio_env_rejects_key_without_secret() {
        let err = TwilioEnv::from_lookup(|key| match key {
            "TWILIO_ACCOUNT_SID" => Some("AC123".to_owned()),
            "TWILIO_API_KEY" => Some("SK123".to_owned()),
            "TWILIO_WHATSAPP_FROM" => Some("whatsapp:+1555".to_owned()),
            _ => None,
        })
        .err()
        .unwrap_or_default();
        assert!(err.iter().any(|i| i.contains("TWILIO_API_SECRET")));
    }

    #[test]
    fn twilio_env_rejects_token_and_key_together() {
        let err = TwilioEnv::from_lookup(|key| match key {
            "TWILIO_ACCOUNT_SID" => Some("AC123".to_owned()),
            "TWILIO_AUTH_TOKEN" => Some("tok".to_owned()),
            "TWILIO_API_KEY" => Some("SK123".to_owned()),
            "TWILIO_WHATSAPP_FROM" => Some("whatsapp:+1555".to_owned()),
            _ => None,
        })
        .err()
        .unwrap_or_default();
        assert!(err.iter().any(|i| i.contains("mutually exclusive")));
    }

    #[test]
    fn telegram_env_requires_pair() {
        let err = TelegramEnv::from_lookup(|key| {
            (key == "TELEGRAM_API_ID").then(|| "12345".to_owned())
        })
        .err()
        .unwrap_or_default();
        assert!(err.iter().any(|i| i.contains("together")));

        let ok = TelegramEnv::from_lookup(|key| match key {
            "TELEGRAM_API_ID" => Some("12345".to_owned()),
            "TELEGRAM_API_HASH" => Some("abcdef".to_owned()),
            _ => None,
        });
        assert!(ok.is_ok());
    }
}
