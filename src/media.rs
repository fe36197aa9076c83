//! Audio/video submissions attached to registrations.
//!
//! A submission is stored at `{kind}/{event_id}_{student_id}.{ext}`; the
//! formatting and parsing of that key are [`MediaKey::path`] and
//! [`MediaKey::parse`].

use std::fmt;

use axum::body::Bytes;

use crate::storage::{ObjectStore, StorageError};

/// Largest accepted media file (50 MiB).
pub const MAX_MEDIA_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    pub fn dir(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MediaKind::Audio => "Audio",
            MediaKind::Video => "Video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

/// A file received from a form.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Bytes,
}

/// The extension of `filename`, lowercased and stripped of anything that is
/// not an ASCII letter or digit. Falls back to `bin`.
pub fn sanitize_extension(filename: &str) -> String {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            ext.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .unwrap_or_default();

    if ext.is_empty() { "bin".to_string() } else { ext }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaKey {
    pub kind: MediaKind,
    pub event_id: String,
    pub student_id: String,
    pub extension: String,
}

impl MediaKey {
    pub fn new(
        kind: MediaKind,
        event_id: &str,
        student_id: &str,
        filename: &str,
    ) -> Self {
        Self {
            kind,
            event_id: event_id.to_string(),
            student_id: student_id.to_string(),
            extension: sanitize_extension(filename),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.{}", self.event_id, self.student_id, self.extension)
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.kind.dir(), self.file_name())
    }

    /// Parses a file name listed under `kind`'s directory. The event id is
    /// everything before the first `_` and the student id runs up to the
    /// next `.`.
    pub fn parse(kind: MediaKind, file_name: &str) -> Option<Self> {
        let (event_id, rest) = file_name.split_once('_')?;
        let (student_id, extension) = rest.split_once('.')?;
        if event_id.is_empty() || student_id.is_empty() || extension.is_empty()
        {
            return None;
        }
        Some(Self {
            kind,
            event_id: event_id.to_string(),
            student_id: student_id.to_string(),
            extension: extension.to_string(),
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    #[error("{} file must be smaller than 50MB", .kind.label())]
    TooLarge { kind: MediaKind },
    #[error("failed to upload {kind} file: {source}")]
    Upload {
        kind: MediaKind,
        #[source]
        source: StorageError,
    },
}

pub fn check_size(kind: MediaKind, file: &Upload) -> Result<(), MediaError> {
    if file.bytes.len() > MAX_MEDIA_BYTES {
        Err(MediaError::TooLarge { kind })
    } else {
        Ok(())
    }
}

/// Stores a submission, replacing any earlier one with the same key.
#[tracing::instrument(skip(store, file), fields(size = file.bytes.len()))]
pub async fn upload(
    store: &dyn ObjectStore,
    kind: MediaKind,
    event_id: &str,
    student_id: &str,
    file: &Upload,
) -> Result<MediaKey, MediaError> {
    check_size(kind, file)?;

    let key = MediaKey::new(kind, event_id, student_id, &file.filename);
    store
        .upload(&key.path(), file.bytes.clone())
        .await
        .map_err(|source| MediaError::Upload { kind, source })?;

    tracing::info!("stored {kind} submission at {}", key.path());
    Ok(key)
}

#[derive(Debug, Clone)]
pub struct MediaFile {
    pub key: MediaKey,
    pub url: url::Url,
}

/// All submissions for `event_id`, across both kinds.
pub async fn list_for_event(
    store: &dyn ObjectStore,
    event_id: &str,
) -> Result<Vec<MediaFile>, StorageError> {
    let prefix = format!("{event_id}_");
    let mut files = Vec::new();
    for kind in MediaKind::ALL {
        for object in store.list(kind.dir()).await? {
            if !object.name.starts_with(&prefix) {
                continue;
            }
            match MediaKey::parse(kind, &object.name) {
                Some(key) => files.push(MediaFile {
                    url: store.public_url(&key.path()),
                    key,
                }),
                None => {
                    tracing::debug!("skipping malformed media object {}", object.name)
                }
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn upload_of(name: &str, len: usize) -> Upload {
        Upload {
            filename: name.to_string(),
            bytes: Bytes::from(vec![0u8; len]),
        }
    }

    #[test]
    fn extension_is_sanitized() {
        assert_eq!(sanitize_extension("song.MP3"), "mp3");
        assert_eq!(sanitize_extension("clip.tar.GZ"), "gz");
        assert_eq!(sanitize_extension("weird.m p-4"), "mp4");
        assert_eq!(sanitize_extension("noext"), "bin");
        assert_eq!(sanitize_extension("dots.."), "bin");
    }

    #[test]
    fn key_format_and_parse_agree() {
        let key = MediaKey::new(MediaKind::Video, "ev1", "st-9", "a.MOV");
        assert_eq!(key.path(), "video/ev1_st-9.mov");
        assert_eq!(
            MediaKey::parse(MediaKind::Video, &key.file_name()),
            Some(key)
        );
    }

    #[test]
    fn parse_splits_on_first_underscore() {
        let key = MediaKey::parse(MediaKind::Audio, "e_s_x.mp3").unwrap();
        assert_eq!(key.event_id, "e");
        assert_eq!(key.student_id, "s_x");
        assert!(MediaKey::parse(MediaKind::Audio, "noseparator.mp3").is_none());
        assert!(MediaKey::parse(MediaKind::Audio, "e_noext").is_none());
    }

    #[tokio::test]
    async fn too_large_never_touches_storage() {
        let store = MemoryStore::new();
        let err = upload(
            &store,
            MediaKind::Audio,
            "e",
            "s",
            &upload_of("big.mp3", MAX_MEDIA_BYTES + 1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::TooLarge { kind: MediaKind::Audio }));
        assert!(store.paths().is_empty());
    }

    #[tokio::test]
    async fn exactly_the_limit_is_accepted() {
        let store = MemoryStore::new();
        let key = upload(
            &store,
            MediaKind::Audio,
            "e",
            "s",
            &upload_of("ok.wav", MAX_MEDIA_BYTES),
        )
        .await
        .unwrap();
        assert_eq!(store.paths(), vec![key.path()]);
    }

    #[tokio::test]
    async fn listing_filters_by_event() {
        let store = MemoryStore::new();
        for (kind, event) in [
            (MediaKind::Audio, "e1"),
            (MediaKind::Video, "e1"),
            (MediaKind::Audio, "e2"),
        ] {
            upload(&store, kind, event, "s1", &upload_of("f.mp4", 4))
                .await
                .unwrap();
        }

        let files = list_for_event(&store, "e1").await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.key.event_id == "e1"));
        assert!(files[0].url.as_str().ends_with("audio/e1_s1.mp4"));
    }
}
