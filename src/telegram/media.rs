//! Telegram media handling: inbound classification and download, outbound
//! staging with size enforcement.
//!
//! Inbound attachments are downloaded in-process to the streaming temp
//! directory; a failed download degrades to an attachment-less message
//! upstream. Outbound media referenced by URL is streamed through the temp
//! store, which enforces the media ceiling via a HEAD probe and an inline
//! byte count; the staged file is released on every exit path.

use std::path::{Path, PathBuf};

use grammers_client::types::{Downloadable, Media};
use grammers_client::Client;
use grammers_tl_types::enums::DocumentAttribute;
use tracing::{debug, warn};

use crate::providers::{MediaAttachment, MediaKind, MediaSource};
use crate::tempstore::{self, TempDownload};

/// Classify a Telegram document by its attribute set.
///
/// A voice-flagged audio attribute wins, then a video attribute, then a
/// plain audio attribute; a document carrying only a filename attribute, or
/// no attribute at all, stays a plain document.
pub fn classify_document(attributes: &[DocumentAttribute]) -> MediaKind {
    let mut has_video = false;
    let mut has_audio = false;
    for attr in attributes {
        match attr {
            DocumentAttribute::Audio(audio) if audio.voice => return MediaKind::Voice,
            DocumentAttribute::Audio(_) => has_audio = true,
            DocumentAttribute::Video(_) => has_video = true,
            _ => {}
        }
    }
    if has_video {
        MediaKind::Video
    } else if has_audio {
        MediaKind::Audio
    } else {
        MediaKind::Document
    }
}

/// Download an inbound media item to `dir` and build its attachment.
///
/// Returns `None` on download failure so the caller can degrade gracefully.
pub async fn download_inbound(
    client: &Client,
    media: &Media,
    dir: &Path,
) -> Option<MediaAttachment> {
    let (kind, mime, file_name, size) = match media {
        Media::Photo(_) => (MediaKind::Image, Some("image/jpeg".to_owned()), None, None),
        Media::Document(doc) => {
            let name = doc.name().to_owned();
            let mime = doc.mime_type().map(str::to_owned);
            let attributes: &[DocumentAttribute] = match doc.raw.document.as_ref() {
                Some(grammers_tl_types::enums::Document::Document(document)) => {
                    &document.attributes
                }
                _ => &[],
            };
            let kind = classify_document(attributes);
            let size = u64::try_from(doc.size()).ok();
            let file_name = (!name.is_empty()).then_some(name);
            (kind, mime, file_name, size)
        }
        _ => {
            debug!("ignoring unsupported inbound media type");
            return None;
        }
    };

    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!(error = %e, "failed to create media download directory");
        return None;
    }
    let path = dir.join(format!(
        "{}{}.bin",
        tempstore::DOWNLOAD_PREFIX,
        uuid::Uuid::new_v4()
    ));

    if let Err(e) = client
        .download_media(&Downloadable::Media(media.clone()), &path)
        .await
    {
        warn!(error = %e, "inbound media download failed, continuing without attachment");
        let _ = tokio::fs::remove_file(&path).await;
        return None;
    }

    debug!(path = %path.display(), "inbound media downloaded");
    Some(MediaAttachment {
        kind,
        source: MediaSource::Path(path),
        mime,
        file_name,
        size,
        thumbnail: None,
    })
}

/// An outbound media item staged on disk, ready for upload.
///
/// Holds the temp handle (if any) so the staged file lives exactly as long
/// as the send that created it.
pub struct StagedMedia {
    /// Local file to upload.
    pub path: PathBuf,
    /// Attachment kind.
    pub kind: MediaKind,
    /// File name to present to the backend.
    pub file_name: Option<String>,
    /// Temp handle released (deleting the file) when the staging is dropped.
    temp: Option<TempDownload>,
}

impl StagedMedia {
    /// Release the staged temp file, if one was created.
    pub fn release(mut self) {
        if let Some(temp) = self.temp.take() {
            temp.release();
        }
    }
}

/// Stage an outbound attachment on disk, enforcing `max_size`.
///
/// URL sources stream through the temp store (HEAD probe + inline count);
/// byte buffers are written to a temp file; path sources are checked
/// against the ceiling via metadata and used in place.
///
/// # Errors
///
/// Returns a human-readable rejection reason; no staged file survives a
/// failure.
pub async fn stage_outbound(
    att: &MediaAttachment,
    http: &reqwest::Client,
    temp_dir: &Path,
    max_size: u64,
) -> Result<StagedMedia, String> {
    if att.size.is_some_and(|s| s > max_size) {
        return Err(format!("media exceeds Telegram limit of {max_size} bytes"));
    }

    match &att.source {
        MediaSource::Url(url) => {
            let download = tempstore::download_to_temp(http, url, temp_dir, max_size)
                .await
                .map_err(|e| e.to_string())?;
            Ok(StagedMedia {
                path: download.path.clone(),
                kind: att.kind,
                file_name: att.file_name.clone(),
                temp: Some(download),
            })
        }
        MediaSource::Bytes(bytes) => {
            if u64::try_from(bytes.len()).unwrap_or(u64::MAX) > max_size {
                return Err(format!("media exceeds Telegram limit of {max_size} bytes"));
            }
            if let Err(e) = tokio::fs::create_dir_all(temp_dir).await {
                return Err(format!("temp directory unavailable: {e}"));
            }
            let path = temp_dir.join(format!(
                "{}{}.tmp",
                tempstore::DOWNLOAD_PREFIX,
                uuid::Uuid::new_v4()
            ));
            if let Err(e) = tokio::fs::write(&path, bytes).await {
                return Err(format!("failed to stage media buffer: {e}"));
            }
            let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
            Ok(StagedMedia {
                path: path.clone(),
                kind: att.kind,
                file_name: att.file_name.clone(),
                temp: Some(TempDownload::adopt(path, size, att.mime.clone())),
            })
        }
        MediaSource::Path(path) => {
            let size = tokio::fs::metadata(path)
                .await
                .map(|m| m.len())
                .map_err(|e| format!("media file unreadable: {e}"))?;
            if size > max_size {
                return Err(format!("media exceeds Telegram limit of {max_size} bytes"));
            }
            Ok(StagedMedia {
                path: path.clone(),
                kind: att.kind,
                file_name: att.file_name.clone(),
                temp: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grammers_tl_types::types;

    fn audio(voice: bool) -> DocumentAttribute {
        DocumentAttribute::Audio(types::DocumentAttributeAudio {
            voice,
            duration: 3,
            title: None,
            performer: None,
            waveform: None,
        })
    }

    fn filename(name: &str) -> DocumentAttribute {
        DocumentAttribute::Filename(types::DocumentAttributeFilename {
            file_name: name.to_owned(),
        })
    }

    #[test]
    fn voice_attribute_wins() {
        assert_eq!(classify_document(&[audio(true)]), MediaKind::Voice);
        // The voice flag beats a filename riding along.
        assert_eq!(
            classify_document(&[filename("note.ogg"), audio(true)]),
            MediaKind::Voice
        );
    }

    #[test]
    fn plain_audio_attribute_is_audio() {
        assert_eq!(classify_document(&[audio(false)]), MediaKind::Audio);
        assert_eq!(
            classify_document(&[audio(false), filename("song.mp3")]),
            MediaKind::Audio
        );
    }

    #[test]
    fn filename_attribute_or_none_is_document() {
        assert_eq!(
            classify_document(&[filename("report.pdf")]),
            MediaKind::Document
        );
        assert_eq!(classify_document(&[]), MediaKind::Document);
    }
}
