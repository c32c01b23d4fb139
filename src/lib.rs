//! warelay: a personal messaging gateway.
//!
//! Relays inbound messages from WhatsApp Web (protocol bridge), WhatsApp
//! Business (Twilio REST), and Telegram (native client protocol) into an
//! external AI agent subprocess, streams the agent's reply back as text and
//! media, keeps per-sender conversational sessions, and pokes the agent
//! with heartbeat prompts between messages. A single-user butler, not a
//! server: the operator's own account is the identity, and non-whitelisted
//! peers are ignored.

pub mod config;
pub mod engine;
pub mod identifiers;
pub mod identity;
pub mod logging;
pub mod paths;
pub mod providers;
pub mod relay;
pub mod session;
pub mod telegram;
pub mod tempstore;
pub mod template;
pub mod watwilio;
pub mod waweb;
