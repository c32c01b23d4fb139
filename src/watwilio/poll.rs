//! Inbound poll loop for the Twilio provider.
//!
//! Twilio has no push channel here, so inbound messages are discovered by
//! polling the message collection at a configurable interval with a
//! configurable lookback window. A `(date, sid)` watermark of the newest
//! message observed deduplicates across iterations: anything at or before
//! the watermark is skipped, and each iteration processes survivors
//! oldest-first to preserve causal order. A failed iteration is logged and
//! the loop continues.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::identifiers;
use crate::providers::{
    ChatContext, InboundMessage, ListenOptions, MediaAttachment, MediaKind, ProviderError,
    ProviderKind,
};

use super::{auth_pair, own_number, PollDeps, TwilioMessage, API_BASE};

/// Dedup watermark: the newest `(date, sid)` pair observed so far.
type Watermark = Option<(DateTime<Utc>, String)>;

/// Spawn the poll loop as a background task.
///
/// The task settles only after the in-flight handler invocation of the
/// current iteration has completed, so awaiting the handle drains cleanly.
pub(crate) fn spawn_poll_loop(
    deps: Arc<PollDeps>,
    options: ListenOptions,
    mut stop_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(options.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut watermark: Watermark = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match poll_iteration(&deps, &options, &mut watermark).await {
                        Ok(count) if count > 0 => {
                            debug!(count, "Twilio poll iteration dispatched messages");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "Twilio poll iteration failed, continuing");
                        }
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        debug!("Twilio poll loop stopping");
                        break;
                    }
                }
            }
        }
    })
}

/// One poll iteration: list, dedup against the watermark, dispatch
/// oldest-first. Returns the number of messages dispatched.
async fn poll_iteration(
    deps: &PollDeps,
    options: &ListenOptions,
    watermark: &mut Watermark,
) -> Result<usize, ProviderError> {
    let lookback = chrono::Duration::from_std(options.lookback)
        .unwrap_or_else(|_| chrono::Duration::seconds(600));
    let sent_after = Utc::now()
        .checked_sub_signed(lookback)
        .unwrap_or_else(Utc::now);

    let messages = list_inbound(deps, sent_after).await?;

    // Oldest-first within the iteration.
    let mut dated: Vec<(DateTime<Utc>, TwilioMessage)> = messages
        .into_iter()
        .filter(|m| {
            m.direction
                .as_deref()
                .is_some_and(|d| d.starts_with("inbound"))
        })
        .filter_map(|m| {
            let ts = m
                .date_sent
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                .map(|d| d.with_timezone(&Utc))?;
            Some((ts, m))
        })
        .collect();
    dated.sort_by(|a, b| (a.0, &a.1.sid).cmp(&(b.0, &b.1.sid)));

    let mut dispatched = 0_usize;
    let mut newest: Watermark = watermark.clone();

    for (ts, msg) in dated {
        let key = (ts, msg.sid.clone());
        if newest.as_ref().map_or(true, |wm| key > *wm) {
            newest = Some(key.clone());
        }
        if watermark.as_ref().is_some_and(|wm| key <= *wm) {
            continue;
        }

        match build_inbound(deps, ts, &msg).await {
            Some(inbound) => {
                (deps.handler)(inbound).await;
                dispatched = dispatched.saturating_add(1);
            }
            None => {
                debug!(sid = %msg.sid, "skipping Twilio message with unusable sender");
            }
        }
    }

    *watermark = newest;
    Ok(dispatched)
}

/// List messages addressed to the operator's number since `sent_after`.
async fn list_inbound(
    deps: &PollDeps,
    sent_after: DateTime<Utc>,
) -> Result<Vec<TwilioMessage>, ProviderError> {
    #[derive(serde::Deserialize)]
    struct MessageList {
        messages: Vec<TwilioMessage>,
    }

    let url = format!("{API_BASE}/Accounts/{}/Messages.json", deps.env.account_sid);
    let (user, pass) = auth_pair(&deps.env);
    let query: Vec<(String, String)> = vec![
        ("To".to_owned(), deps.env.whatsapp_from.clone()),
        (
            "DateSent>".to_owned(),
            sent_after.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        ),
        ("PageSize".to_owned(), "100".to_owned()),
    ];
    let resp = deps
        .client
        .get(&url)
        .query(&query)
        .basic_auth(user, Some(pass))
        .send()
        .await?;
    if !resp.status().is_success() {
        let status = resp.status();
        return Err(ProviderError::Transport(format!(
            "Twilio message list returned {status}"
        )));
    }
    let list: MessageList = resp.json().await?;
    Ok(list.messages)
}

/// Translate a Twilio message resource into the normalised inbound type.
async fn build_inbound(
    deps: &PollDeps,
    ts: DateTime<Utc>,
    msg: &TwilioMessage,
) -> Option<InboundMessage> {
    let from_raw = msg.from.as_deref()?;
    let from = identifiers::normalize(from_raw, ProviderKind::WaTwilio).ok()?;
    let to = msg
        .to
        .as_deref()
        .and_then(|t| identifiers::normalize(t, ProviderKind::WaTwilio).ok())
        .unwrap_or_else(|| own_number(&deps.env));

    let media = match msg.num_media.as_deref().and_then(|n| n.parse::<u32>().ok()) {
        Some(n) if n > 0 => fetch_media(deps, &msg.sid).await,
        _ => Vec::new(),
    };

    Some(InboundMessage {
        id: msg.sid.clone(),
        from,
        to,
        body: msg.body.clone().unwrap_or_default(),
        timestamp_ms: ts.timestamp_millis(),
        sender_name: None,
        media,
        provider: ProviderKind::WaTwilio,
        chat: ChatContext::Direct,
        raw: serde_json::to_value(msg).ok(),
    })
}

/// Fetch the media subresources of a message as URL attachments.
async fn fetch_media(deps: &PollDeps, message_sid: &str) -> Vec<MediaAttachment> {
    #[derive(serde::Deserialize)]
    struct MediaItem {
        sid: String,
        content_type: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct MediaList {
        media_list: Vec<MediaItem>,
    }

    let url = format!(
        "{API_BASE}/Accounts/{}/Messages/{message_sid}/Media.json",
        deps.env.account_sid
    );
    let (user, pass) = auth_pair(&deps.env);
    let resp = match deps
        .client
        .get(&url)
        .basic_auth(user, Some(pass))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            warn!(message_sid, status = %resp.status(), "media list fetch failed");
            return Vec::new();
        }
        Err(e) => {
            warn!(message_sid, error = %e, "media list fetch failed");
            return Vec::new();
        }
    };

    let list: MediaList = match resp.json().await {
        Ok(list) => list,
        Err(e) => {
            warn!(message_sid, error = %e, "media list unreadable");
            return Vec::new();
        }
    };

    list.media_list
        .into_iter()
        .map(|item| {
            let kind = item
                .content_type
                .as_deref()
                .map(media_kind_for)
                .unwrap_or(MediaKind::Document);
            let content_url = format!(
                "{API_BASE}/Accounts/{}/Messages/{message_sid}/Media/{}",
                deps.env.account_sid, item.sid
            );
            let mut att = MediaAttachment::from_url(kind, content_url);
            att.mime = item.content_type;
            att
        })
        .collect()
}

/// Attachment kind for a MIME type.
fn media_kind_for(content_type: &str) -> MediaKind {
    if content_type.starts_with("image/") {
        MediaKind::Image
    } else if content_type.starts_with("video/") {
        MediaKind::Video
    } else if content_type.starts_with("audio/") {
        MediaKind::Audio
    } else {
        MediaKind::Document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_classification() {
        assert_eq!(media_kind_for("image/jpeg"), MediaKind::Image);
        assert_eq!(media_kind_for("video/mp4"), MediaKind::Video);
        assert_eq!(media_kind_for("audio/ogg"), MediaKind::Audio);
        assert_eq!(media_kind_for("application/pdf"), MediaKind::Document);
    }
}
