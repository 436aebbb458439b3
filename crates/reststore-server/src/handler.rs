use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use reststore_store::{DeleteOptions, PutOptions, Storage};
use reststore_types::{
    collection_name, CollectionResource, DocumentResource, DocumentSink, ErrorChannel,
    OffsetLimit, PathProcessingStrategyFinder, Resource, ResourceFault, ResourceKind,
};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::headers::{
    self, PARAM_CLEANUP_AMOUNT, PARAM_FOLLOW, PARAM_LIMIT, PARAM_MERGE, PARAM_OFFSET,
    PARAM_RECURSIVE, PARAM_STORAGE_EXPAND,
};
use crate::listing;

const DEFAULT_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const CLEANUP_SUFFIX: &str = "_cleanup";
const MERGE_COMPRESS_CONFLICT: &str = "Invalid parameter/header combination: merge parameter and x-stored-compressed header cannot be used concurrently";
const EXPAND_UNPARSABLE: &str = "Bad Request: Unable to parse body of storageExpand POST request";
const EXPAND_MISSING_FIELD: &str = "Bad Request: Expected array field 'subResources' with names of resources";

/// Maps HTTP requests onto a [`Storage`] and renders the results.
#[derive(Clone)]
pub struct RestStorageHandler {
    inner: Arc<HandlerInner>,
}

struct HandlerInner {
    storage: Arc<dyn Storage>,
    config: ServerConfig,
    finder: PathProcessingStrategyFinder,
}

/// Parsed pieces of one request.
struct RequestContext<'a> {
    /// Path as requested, including the prefix.
    raw_path: &'a str,
    /// Normalized storage path.
    path: &'a str,
    headers: &'a HeaderMap,
    query: &'a HashMap<String, String>,
}

impl RequestContext<'_> {
    fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Axum entry point: every request is routed here.
pub async fn dispatch(State(handler): State<RestStorageHandler>, request: Request) -> Response {
    handler.handle(request).await
}

impl RestStorageHandler {
    pub fn new(storage: Arc<dyn Storage>, config: ServerConfig) -> Self {
        let finder = PathProcessingStrategyFinder::new(Some(config.path_processing_strategy));
        Self {
            inner: Arc::new(HandlerInner {
                storage,
                config,
                finder,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    fn storage(&self) -> &dyn Storage {
        self.inner.storage.as_ref()
    }

    /// Part of `raw_path` below the configured prefix, or `None` when the
    /// request is outside it.
    fn strip_prefix<'a>(&self, raw_path: &'a str) -> Option<&'a str> {
        let prefix = self.inner.config.normalized_prefix();
        if prefix.is_empty() {
            return Some(raw_path);
        }
        match raw_path.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => Some(rest),
            _ => None,
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        let raw_path = parts.uri.path();

        // Cleanup is served on any path, inside the prefix or not.
        if parts.method == Method::POST && raw_path.ends_with(CLEANUP_SUFFIX) {
            return self.cleanup(&query).await;
        }

        let Some(relative) = self.strip_prefix(raw_path) else {
            return if parts.method == Method::GET {
                not_found()
            } else {
                method_not_allowed()
            };
        };

        let strategy = self.inner.finder.find(headers::header_str(
            &parts.headers,
            headers::PATH_PROCESSING_STRATEGY,
        ));
        let path = strategy.process(relative);
        debug!(method = %parts.method, path = %path, "dispatching request");

        let ctx = RequestContext {
            raw_path,
            path: &path,
            headers: &parts.headers,
            query: &query,
        };
        match parts.method {
            Method::GET => self.get(&ctx).await,
            Method::PUT => self.put(&ctx, body).await,
            Method::DELETE => self.delete(&ctx).await,
            Method::POST if query.contains_key(PARAM_STORAGE_EXPAND) => {
                self.storage_expand(&ctx, body).await
            }
            _ => method_not_allowed(),
        }
    }

    // --- GET ---

    async fn get(&self, ctx: &RequestContext<'_>) -> Response {
        let etag = headers::if_none_match(ctx.headers);
        let window = OffsetLimit::parse(ctx.param(PARAM_OFFSET), ctx.param(PARAM_LIMIT));
        let resource = self.storage().get(ctx.path, etag.as_deref(), window).await;

        if resource.error {
            warn!(path = %ctx.path, error = ?resource.error_message, "read failed");
            return with_reason(StatusCode::INTERNAL_SERVER_ERROR, resource.error_message);
        }
        if !resource.modified {
            return not_modified(etag);
        }
        if !resource.exists {
            return not_found();
        }
        match resource.kind {
            ResourceKind::Collection(collection) => self.render_collection(ctx, collection),
            ResourceKind::Document(document) => {
                if ctx.raw_path.ends_with('/') && ctx.path != "/" {
                    return redirect(ctx.raw_path.trim_end_matches('/'));
                }
                document_response(document, &content_type(ctx.path))
            }
            ResourceKind::Missing => not_found(),
        }
    }

    fn render_collection(&self, ctx: &RequestContext<'_>, collection: CollectionResource) -> Response {
        let names = collection.listing_names();
        if !headers::wants_html(ctx.headers) {
            return Json(listing::render_json(&collection_name(ctx.path), &names)).into_response();
        }

        if !ctx.raw_path.ends_with('/') {
            return redirect(&format!("{}/", ctx.raw_path));
        }
        let follow = ctx.param(PARAM_FOLLOW) != Some("off");
        if let [only] = collection.items.as_slice() {
            if follow && only.is_collection() {
                return redirect(&format!("{}{}/", ctx.raw_path, only.name));
            }
        }
        Html(listing::render_html(
            ctx.raw_path,
            self.inner.config.normalized_prefix(),
            &names,
        ))
        .into_response()
    }

    // --- PUT ---

    /// Memory-pressure admission control. `Some` carries the rejection.
    fn admit_write(&self, path: &str, importance: Option<i64>) -> Option<Response> {
        if !self.inner.config.reject_storage_write_on_low_memory {
            if importance.is_some() {
                warn!(path, "{} header ignored, low memory rejection is disabled", headers::IMPORTANCE_LEVEL);
            }
            return None;
        }
        let Some(level) = importance else {
            debug!(path, "request without {} header treated as highest importance", headers::IMPORTANCE_LEVEL);
            return None;
        };
        match self.storage().current_memory_usage_percent() {
            None => {
                warn!(path, "memory usage unavailable, accepting write");
                None
            }
            Some(usage) if f64::from(usage) > level as f64 => {
                warn!(path, usage, level, "rejecting write under memory pressure");
                Some(with_reason(StatusCode::INSUFFICIENT_STORAGE, None))
            }
            Some(_) => None,
        }
    }

    async fn put(&self, ctx: &RequestContext<'_>, body: Body) -> Response {
        let importance = match headers::importance_level(ctx.headers) {
            Ok(level) => level,
            Err(message) => return bad_request(message),
        };
        if let Some(rejection) = self.admit_write(ctx.path, importance) {
            return rejection;
        }
        let expire = match headers::expiry(ctx.headers) {
            Ok(expire) => expire,
            Err(message) => return bad_request(message),
        };
        let lock = match headers::lock(ctx.headers) {
            Ok(lock) => lock,
            Err(message) => return bad_request(message),
        };
        // Merging only applies to JSON documents.
        let merge = headers::query_flag(ctx.query, PARAM_MERGE)
            && content_type(ctx.path).contains("application/json");
        let store_compressed =
            headers::is_true(headers::header_str(ctx.headers, headers::STORED_COMPRESSED));
        if merge && store_compressed {
            return bad_request(MERGE_COMPRESS_CONFLICT);
        }
        let etag = headers::if_none_match(ctx.headers);

        let resource = self
            .storage()
            .put(
                ctx.path,
                PutOptions {
                    etag: etag.clone(),
                    merge,
                    expire,
                    lock,
                    store_compressed,
                },
            )
            .await;

        if resource.error {
            warn!(path = %ctx.path, error = ?resource.error_message, "write could not start");
            return with_reason(StatusCode::INTERNAL_SERVER_ERROR, resource.error_message);
        }
        if resource.rejected {
            return with_reason(StatusCode::CONFLICT, resource.error_message);
        }
        if !resource.modified {
            return not_modified(etag);
        }
        let Resource {
            exists,
            errors,
            kind,
            ..
        } = resource;
        match kind {
            ResourceKind::Collection(_) => type_conflict(),
            ResourceKind::Document(_) if !exists => type_conflict(),
            ResourceKind::Document(mut document) => match document.take_sink() {
                Some(sink) => self.stream_body(ctx.path, sink, errors, body).await,
                None => with_reason(StatusCode::INTERNAL_SERVER_ERROR, None),
            },
            ResourceKind::Missing => with_reason(StatusCode::INTERNAL_SERVER_ERROR, None),
        }
    }

    /// Pump the request body into `sink`. Stream failures are emitted on the
    /// document's error channel so the engine discards the staged bytes.
    async fn stream_body(
        &self,
        path: &str,
        mut sink: Box<dyn DocumentSink>,
        errors: ErrorChannel,
        body: Body,
    ) -> Response {
        let log_path = path.to_string();
        errors.subscribe(move |fault| {
            warn!(path = %log_path, error = %fault, "upload failed");
        });

        let max = self.inner.config.max_body_size;
        let mut received = 0usize;
        let mut stream = BodyExt::into_data_stream(body);
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    errors.emit(ResourceFault::other(e.to_string()));
                    return bad_request(format!("Bad Request: {e}"));
                }
            };
            received += chunk.len();
            if received > max {
                errors.emit(ResourceFault::other(format!(
                    "request body exceeds {max} bytes"
                )));
                return with_reason(StatusCode::PAYLOAD_TOO_LARGE, None);
            }
            if let Err(e) = sink.write_chunk(&chunk).await {
                errors.emit(&e);
                return with_reason(StatusCode::INTERNAL_SERVER_ERROR, Some(e.to_string()));
            }
        }

        match sink.close().await {
            Ok(()) => {
                info!(path, bytes = received, "document stored");
                StatusCode::OK.into_response()
            }
            Err(e) => with_reason(StatusCode::INTERNAL_SERVER_ERROR, Some(e.to_string())),
        }
    }

    // --- DELETE ---

    async fn delete(&self, ctx: &RequestContext<'_>) -> Response {
        let lock = match headers::lock(ctx.headers) {
            Ok(lock) => lock,
            Err(message) => return bad_request(message),
        };
        let options = DeleteOptions {
            lock,
            confirm_collection_delete: self.inner.config.confirm_collection_delete,
            recursive: headers::query_flag(ctx.query, PARAM_RECURSIVE),
        };
        let resource = self.storage().delete(ctx.path, options).await;

        if resource.rejected {
            return with_reason(StatusCode::CONFLICT, resource.error_message);
        }
        if resource.error {
            let message = resource.error_message.unwrap_or_else(|| "Bad Request".into());
            return bad_request(format!("Bad Request: {message}"));
        }
        if !resource.exists {
            if self.inner.config.return_200_on_delete_non_existing {
                return StatusCode::OK.into_response();
            }
            return not_found();
        }
        StatusCode::OK.into_response()
    }

    // --- POST ---

    async fn storage_expand(&self, ctx: &RequestContext<'_>, body: Body) -> Response {
        let bytes = match axum::body::to_bytes(body, self.inner.config.max_body_size).await {
            Ok(bytes) => bytes,
            Err(_) => return bad_request(EXPAND_UNPARSABLE),
        };
        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(_) => return bad_request(EXPAND_UNPARSABLE),
        };
        let names: Option<Vec<String>> = value
            .get("subResources")
            .and_then(Value::as_array)
            .and_then(|items| {
                items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect()
            });
        let Some(names) = names else {
            return bad_request(EXPAND_MISSING_FIELD);
        };

        let etag = headers::if_none_match(ctx.headers);
        let resource = self
            .storage()
            .storage_expand(ctx.path, etag.as_deref(), &names)
            .await;

        if resource.error {
            return with_reason(StatusCode::CONFLICT, resource.error_message);
        }
        if resource.invalid {
            let message = resource.invalid_message.unwrap_or_default();
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response();
        }
        if !resource.modified {
            return not_modified(etag);
        }
        if !resource.exists {
            return not_found();
        }
        match resource.kind {
            ResourceKind::Document(document) => document_response(document, DEFAULT_CONTENT_TYPE),
            _ => not_found(),
        }
    }

    async fn cleanup(&self, query: &HashMap<String, String>) -> Response {
        let hint = query.get(PARAM_CLEANUP_AMOUNT).map(String::as_str);
        let resource = self.storage().cleanup(hint).await;
        if resource.error {
            return with_reason(StatusCode::INTERNAL_SERVER_ERROR, resource.error_message);
        }
        match resource.kind {
            ResourceKind::Document(document) => document_response(document, DEFAULT_CONTENT_TYPE),
            _ => StatusCode::OK.into_response(),
        }
    }
}

/// Content type served for the document at `path`.
fn content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

// --- Responses ---

/// Status with `message` as body, or the status line when there is none.
fn with_reason(status: StatusCode, message: Option<String>) -> Response {
    let body = message.unwrap_or_else(|| status_line(status));
    (status, body).into_response()
}

fn status_line(status: StatusCode) -> String {
    format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    )
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, message.into()).into_response()
}

fn not_found() -> Response {
    with_reason(StatusCode::NOT_FOUND, None)
}

fn method_not_allowed() -> Response {
    with_reason(StatusCode::METHOD_NOT_ALLOWED, None)
}

/// A document cannot replace a collection or live below a document.
fn type_conflict() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "GET, DELETE")],
        status_line(StatusCode::METHOD_NOT_ALLOWED),
    )
        .into_response()
}

fn not_modified(etag: Option<String>) -> Response {
    match etag {
        Some(tag) => (StatusCode::NOT_MODIFIED, [(header::ETAG, tag)]).into_response(),
        None => StatusCode::NOT_MODIFIED.into_response(),
    }
}

fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn document_response(mut document: DocumentResource, content_type: &str) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, document.length);
    if let Some(tag) = &document.etag {
        builder = builder.header(header::ETAG, tag.as_str());
    }
    let body = match document.take_reader() {
        Some(reader) => Body::from_stream(ReaderStream::new(reader)),
        None => Body::empty(),
    };
    builder
        .body(body)
        .unwrap_or_else(|e| with_reason(StatusCode::INTERNAL_SERVER_ERROR, Some(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reststore_store::{FileSystemConfig, FileSystemStorage};

    fn handler(prefix: &str) -> (tempfile::TempDir, RestStorageHandler) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(FileSystemConfig::new(dir.path())).unwrap();
        let config = ServerConfig {
            prefix: prefix.to_string(),
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        (dir, RestStorageHandler::new(Arc::new(storage), config))
    }

    #[test]
    fn empty_prefix_serves_everything() {
        let (_dir, h) = handler("");
        assert_eq!(h.strip_prefix("/a/b"), Some("/a/b"));
        assert_eq!(h.strip_prefix("/"), Some("/"));
    }

    #[test]
    fn prefix_is_stripped_on_segment_boundary() {
        let (_dir, h) = handler("/storage/");
        assert_eq!(h.strip_prefix("/storage/a"), Some("/a"));
        assert_eq!(h.strip_prefix("/storage"), Some(""));
        assert_eq!(h.strip_prefix("/storagex/a"), None);
        assert_eq!(h.strip_prefix("/other"), None);
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type("/a/doc.json"), "application/json");
        assert_eq!(content_type("/a/doc"), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type("/a/doc.txt"), "text/plain");
    }

    #[test]
    fn status_lines() {
        assert_eq!(status_line(StatusCode::NOT_FOUND), "404 Not Found");
        assert_eq!(status_line(StatusCode::INSUFFICIENT_STORAGE), "507 Insufficient Storage");
    }
}
