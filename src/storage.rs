//! The `event-image` bucket.
//!
//! Event images live at the bucket root (`{event_id}.{ext}`) and media
//! submissions under `audio/` and `video/`. [`FsStore`] keeps objects on
//! disk (served by the router under `/storage/event-image`), [`MemoryStore`]
//! keeps them in memory for tests.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::{async_trait, body::Bytes};
use url::Url;

pub type Bucket = Arc<dyn ObjectStore>;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid object path `{0}`")]
    InvalidPath(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Name relative to the listed prefix.
    pub name: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists the objects directly under `prefix` (one level, no recursion).
    /// A prefix that does not exist lists as empty.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError>;

    /// Stores `bytes` at `path`, replacing whatever was there.
    async fn upload(&self, path: &str, bytes: Bytes)
    -> Result<(), StorageError>;

    /// Removes the given objects. Paths which do not exist are ignored.
    async fn remove(&self, paths: &[String]) -> Result<(), StorageError>;

    fn public_url(&self, path: &str) -> Url;
}

/// Rejects anything that could escape the bucket.
fn check_path(path: &str) -> Result<(), StorageError> {
    let ok = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidPath(path.to_string()))
    }
}

fn check_prefix(prefix: &str) -> Result<(), StorageError> {
    if prefix.is_empty() {
        Ok(())
    } else {
        check_path(prefix.trim_end_matches('/'))
    }
}

fn join_url(base: &Url, path: &str) -> Url {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path).unwrap_or(base)
}

pub struct FsStore {
    root: PathBuf,
    public_base: Url,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, public_base: Url) -> Self {
        Self {
            root: root.into(),
            public_base,
        }
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        check_prefix(prefix)?;
        let dir = self.root.join(prefix.trim_end_matches('/'));

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut ret = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            // half-written uploads
            if name.starts_with(".tmp-") {
                continue;
            }
            ret.push(ObjectMeta {
                name,
                size: meta.len(),
            });
        }
        ret.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ret)
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Bytes,
    ) -> Result<(), StorageError> {
        check_path(path)?;
        let target = self.root.join(path);
        let parent = target
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(".tmp-{}", uuid::Uuid::now_v7()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!("stored {} bytes at {path}", bytes.len());
        Ok(())
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        for path in paths {
            check_path(path)?;
            match tokio::fs::remove_file(self.root.join(path)).await {
                Ok(()) => (),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn public_url(&self, path: &str) -> Url {
        join_url(&self.public_base, path)
    }
}

/// In-memory bucket. Uploads can be made to fail, which lets tests check
/// that nothing reaches the database when storage is down.
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    fail_uploads: AtomicBool,
    public_base: Url,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            objects: Mutex::default(),
            fail_uploads: AtomicBool::new(false),
            public_base: Url::parse("http://localhost/storage/event-image/")
                .expect("hard-coded url is valid"),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.objects.lock().ok()?.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Bytes>>, StorageError>
    {
        self.objects
            .lock()
            .map_err(|_| StorageError::Unavailable("lock poisoned".to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        check_prefix(prefix)?;
        let prefix = match prefix.trim_end_matches('/') {
            "" => String::new(),
            p => format!("{p}/"),
        };

        let objects = self.lock()?;
        Ok(objects
            .iter()
            .filter_map(|(path, bytes)| {
                let rest = path.strip_prefix(&prefix)?;
                (!rest.contains('/')).then(|| ObjectMeta {
                    name: rest.to_string(),
                    size: bytes.len() as u64,
                })
            })
            .collect())
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Bytes,
    ) -> Result<(), StorageError> {
        check_path(path)?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "uploads are disabled".to_string(),
            ));
        }
        self.lock()?.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        let mut objects = self.lock()?;
        for path in paths {
            objects.remove(path);
        }
        Ok(())
    }

    fn public_url(&self, path: &str) -> Url {
        join_url(&self.public_base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_escaping_paths() {
        assert!(check_path("audio/e_s.mp3").is_ok());
        assert!(check_path("../etc/passwd").is_err());
        assert!(check_path("/abs").is_err());
        assert!(check_path("audio//x").is_err());
        assert!(check_path("").is_err());
    }

    #[test]
    fn public_url_joins_under_base() {
        let base = Url::parse("http://host/storage/event-image").unwrap();
        assert_eq!(
            join_url(&base, "audio/a_b.mp3").as_str(),
            "http://host/storage/event-image/audio/a_b.mp3"
        );
    }

    #[tokio::test]
    async fn memory_list_is_one_level() {
        let store = MemoryStore::new();
        store.upload("e1.png", Bytes::from_static(b"img")).await.unwrap();
        store
            .upload("audio/e1_s1.mp3", Bytes::from_static(b"aud"))
            .await
            .unwrap();

        let root = store.list("").await.unwrap();
        assert_eq!(
            root,
            vec![ObjectMeta {
                name: "e1.png".to_string(),
                size: 3
            }]
        );
        let audio = store.list("audio").await.unwrap();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].name, "e1_s1.mp3");
        assert!(store.list("video").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_upload_upserts() {
        let store = MemoryStore::new();
        store.upload("a.png", Bytes::from_static(b"1")).await.unwrap();
        store.upload("a.png", Bytes::from_static(b"22")).await.unwrap();
        assert_eq!(store.get("a.png").unwrap(), Bytes::from_static(b"22"));
        assert_eq!(store.paths().len(), 1);
    }

    #[tokio::test]
    async fn fs_store_round_trip() {
        let root = std::env::temp_dir()
            .join(format!("freshers-store-{}", uuid::Uuid::now_v7()));
        let store = FsStore::new(
            &root,
            Url::parse("http://localhost/storage/event-image/").unwrap(),
        );

        assert!(store.list("video").await.unwrap().is_empty());
        store
            .upload("video/e_s.mp4", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        let listed = store.list("video").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 3);

        store
            .remove(&["video/e_s.mp4".to_string(), "video/gone.mp4".to_string()])
            .await
            .unwrap();
        assert!(store.list("video").await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(root);
    }
}
