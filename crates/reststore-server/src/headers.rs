//! Request header and query parameter parsing.
//!
//! Parse failures carry the message sent back with the 400 response.

use std::collections::HashMap;

use axum::http::{header, HeaderMap};
use reststore_types::{Expiry, LockMode, LockRequest, DEFAULT_LOCK_EXPIRE_SECS};

pub const LOCK: &str = "x-lock";
pub const LOCK_MODE: &str = "x-lock-mode";
pub const LOCK_EXPIRE_AFTER: &str = "x-lock-expire-after";
pub const EXPIRE_AFTER: &str = "x-expire-after";
pub const IMPORTANCE_LEVEL: &str = "x-importance-level";
pub const STORED_COMPRESSED: &str = "x-stored-compressed";
pub const PATH_PROCESSING_STRATEGY: &str = "x-path-processing-strategy";

pub const PARAM_OFFSET: &str = "offset";
pub const PARAM_LIMIT: &str = "limit";
pub const PARAM_RECURSIVE: &str = "recursive";
pub const PARAM_MERGE: &str = "merge";
pub const PARAM_STORAGE_EXPAND: &str = "storageExpand";
pub const PARAM_FOLLOW: &str = "follow";
pub const PARAM_CLEANUP_AMOUNT: &str = "cleanupResourcesAmount";

/// Value of a header as text, if present and visible ASCII.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Entity tag from `If-None-Match`, without surrounding quotes.
pub fn if_none_match(headers: &HeaderMap) -> Option<String> {
    header_str(headers, header::IF_NONE_MATCH.as_str())
        .map(|v| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

/// `true` when a query parameter or header carries `true` (any case).
pub fn is_true(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

pub fn query_flag(query: &HashMap<String, String>, name: &str) -> bool {
    is_true(query.get(name).map(String::as_str))
}

pub fn expiry(headers: &HeaderMap) -> Result<Expiry, String> {
    match header_str(headers, EXPIRE_AFTER) {
        None => Ok(Expiry::Never),
        Some(value) => value
            .parse()
            .map_err(|_| format!("Invalid {EXPIRE_AFTER} header: {value}")),
    }
}

/// Lock parameters. Mode and expiry are only read when `x-lock` names an owner.
pub fn lock(headers: &HeaderMap) -> Result<LockRequest, String> {
    let Some(owner) = header_str(headers, LOCK) else {
        return Ok(LockRequest::default());
    };
    let owner = owner.to_string();
    let mode = match header_str(headers, LOCK_MODE) {
        None => LockMode::default(),
        Some(value) => value
            .parse()
            .map_err(|_| format!("Invalid {LOCK_MODE} header: {value}"))?,
    };
    let expire_after_secs = match header_str(headers, LOCK_EXPIRE_AFTER) {
        None => DEFAULT_LOCK_EXPIRE_SECS,
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| format!("Invalid {LOCK_EXPIRE_AFTER} header: {value}"))?,
    };
    Ok(LockRequest {
        owner,
        mode,
        expire_after_secs,
    })
}

pub fn importance_level(headers: &HeaderMap) -> Result<Option<i64>, String> {
    match header_str(headers, IMPORTANCE_LEVEL) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("Invalid {IMPORTANCE_LEVEL} header: {value}")),
    }
}

/// `true` when the client accepts an HTML rendering.
pub fn wants_html(headers: &HeaderMap) -> bool {
    header_str(headers, header::ACCEPT.as_str()).is_some_and(|v| v.contains("text/html"))
}
