use std::io;

use reststore_types::{collection_name, DocumentResource, OffsetLimit, Resource};
use serde_json::{Map, Value};
use tracing::debug;

use crate::filesystem::{is_reserved, FileSystemStorage};

/// Read the named children of the collection at `path` into one JSON document.
///
/// The result maps the collection name to an object holding each found child:
/// documents by their parsed JSON content, collections (names ending in `/`)
/// by their listing. Missing and expired children are left out.
pub(crate) async fn expand(
    storage: &FileSystemStorage,
    path: &str,
    etag: Option<&str>,
    names: &[String],
) -> Resource {
    let base = storage.resolve(path);
    match tokio::fs::metadata(&base).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return Resource::missing(),
    }

    let mut children = Map::new();
    for name in names {
        let child_path = format!("{}/{}", path.trim_end_matches('/'), name.trim_end_matches('/'));
        if is_reserved(&child_path) {
            continue;
        }
        let target = storage.resolve(&child_path);
        if name.ends_with('/') {
            let is_dir = tokio::fs::metadata(&target)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let listing = storage.lister().list(target, OffsetLimit::UNBOUNDED).await;
            match listing.as_collection() {
                Some(collection) => {
                    children.insert(name.clone(), Value::from(collection.listing_names()));
                }
                None => {
                    return Resource::failed(
                        listing
                            .error_message
                            .unwrap_or_else(|| format!("Error listing resource '{name}'")),
                    )
                }
            }
            continue;
        }

        if storage.expiry_index().is_expired(&child_path).await {
            continue;
        }
        let bytes = match tokio::fs::read(&target).await {
            Ok(bytes) => bytes,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory | io::ErrorKind::IsADirectory
                ) =>
            {
                continue
            }
            Err(e) => return Resource::failed(e.to_string()),
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => {
                children.insert(name.clone(), value);
            }
            Err(e) => {
                debug!(path = %child_path, error = %e, "expand hit invalid json");
                let message = format!("Error decoding invalid json resource '{name}'");
                return Resource {
                    invalid: true,
                    invalid_message: Some(message),
                    ..Resource::document(DocumentResource::default())
                };
            }
        }
    }

    let mut root = Map::new();
    root.insert(collection_name(path), Value::Object(children));
    let body = Value::Object(root).to_string().into_bytes();
    let tag = blake3::hash(&body).to_hex().to_string();
    if etag == Some(tag.as_str()) {
        return Resource::not_modified();
    }
    Resource::document(DocumentResource::readable(
        body.len() as u64,
        Some(tag),
        Box::new(io::Cursor::new(body)),
    ))
}
