//! Event images are stored at the bucket root as `{event_id}.{ext}`.

use url::Url;

use crate::{
    media::{Upload, sanitize_extension},
    storage::{ObjectStore, StorageError},
};

/// The public URL of the first root object named `{event_id}.*`.
pub async fn find_image(
    store: &dyn ObjectStore,
    event_id: &str,
) -> Result<Option<Url>, StorageError> {
    let prefix = format!("{event_id}.");
    Ok(store
        .list("")
        .await?
        .into_iter()
        .find(|object| object.name.starts_with(&prefix))
        .map(|object| store.public_url(&object.name)))
}

/// Stores `image` as the event's image, then removes any other image the
/// event had (possibly under a different extension). Failing to remove a
/// stale image only logs a warning.
#[tracing::instrument(skip(store, image), fields(filename = %image.filename))]
pub async fn attach_image(
    store: &dyn ObjectStore,
    event_id: &str,
    image: &Upload,
) -> Result<String, StorageError> {
    let path = format!("{event_id}.{}", sanitize_extension(&image.filename));
    store.upload(&path, image.bytes.clone()).await?;

    let prefix = format!("{event_id}.");
    let stale = match store.list("").await {
        Ok(objects) => objects
            .into_iter()
            .map(|object| object.name)
            .filter(|name| name.starts_with(&prefix) && *name != path)
            .collect::<Vec<_>>(),
        Err(e) => {
            tracing::warn!("could not list images to clean up: {e}");
            Vec::new()
        }
    };
    if !stale.is_empty() {
        if let Err(e) = store.remove(&stale).await {
            tracing::warn!("could not remove stale images {stale:?}: {e}");
        }
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use axum::body::Bytes;

    use super::*;
    use crate::storage::MemoryStore;

    fn image(name: &str) -> Upload {
        Upload {
            filename: name.to_string(),
            bytes: Bytes::from_static(b"\x89PNG"),
        }
    }

    #[tokio::test]
    async fn replaces_images_with_other_extensions() {
        let store = MemoryStore::new();
        attach_image(&store, "ev", &image("poster.jpg")).await.unwrap();
        attach_image(&store, "ev", &image("poster.PNG")).await.unwrap();
        store
            .upload("evening.png", Bytes::from_static(b"other"))
            .await
            .unwrap();

        let mut paths = store.paths();
        paths.sort();
        assert_eq!(paths, vec!["ev.png", "evening.png"]);

        let url = find_image(&store, "ev").await.unwrap().unwrap();
        assert!(url.as_str().ends_with("/ev.png"));
        assert!(find_image(&store, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_upload_keeps_old_image() {
        let store = MemoryStore::new();
        attach_image(&store, "ev", &image("a.jpg")).await.unwrap();
        store.set_fail_uploads(true);
        assert!(attach_image(&store, "ev", &image("b.png")).await.is_err());
        assert_eq!(store.paths(), vec!["ev.jpg"]);
    }
}
