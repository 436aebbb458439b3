//! Per-request parameters passed from the protocol layer to storage engines.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Lock expiry applied when the request does not name one.
pub const DEFAULT_LOCK_EXPIRE_SECS: u64 = 300;

/// Pagination window for collection listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffsetLimit {
    pub offset: i64,
    /// `-1` means no limit.
    pub limit: i64,
}

impl Default for OffsetLimit {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

impl OffsetLimit {
    pub const UNBOUNDED: OffsetLimit = OffsetLimit {
        offset: 0,
        limit: -1,
    };

    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }

    /// Parse the `offset` and `limit` query values.
    ///
    /// An unparsable offset reads as `0` and an unparsable limit as `-1`.
    pub fn parse(offset: Option<&str>, limit: Option<&str>) -> Self {
        let offset = offset.and_then(|v| v.trim().parse().ok()).unwrap_or(0);
        let limit = limit.and_then(|v| v.trim().parse().ok()).unwrap_or(-1);
        Self { offset, limit }
    }

    /// Slice of a sorted listing of `len` entries to return.
    ///
    /// A negative offset disables the window. A window that reaches past the
    /// end of the listing also returns every entry rather than a tail.
    pub fn window(&self, len: usize) -> Range<usize> {
        let len_i = len as i64;
        let full = 0..len;
        if self.offset < 0 {
            return full;
        }
        if self.limit == -1 {
            return if self.offset == 0 || self.offset >= len_i {
                full
            } else {
                self.offset as usize..len
            };
        }
        if self.limit < 0 || self.offset >= len_i || self.offset.saturating_add(self.limit) >= len_i {
            return full;
        }
        self.offset as usize..(self.offset + self.limit) as usize
    }
}

/// How a lock request behaves when the resource is already locked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Accept the request without reporting the conflict.
    #[default]
    Silent,
    /// Refuse the request with a conflict.
    Reject,
    /// Accept the request and notify the lock holder.
    Notify,
}

impl LockMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LockMode::Silent => "silent",
            LockMode::Reject => "reject",
            LockMode::Notify => "notify",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockMode {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "silent" => Ok(LockMode::Silent),
            "reject" => Ok(LockMode::Reject),
            "notify" => Ok(LockMode::Notify),
            _ => Err(TypesError::InvalidLockMode(s.to_string())),
        }
    }
}

/// Lock parameters of a mutating request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockRequest {
    /// Lock owner token; empty when no lock was requested.
    pub owner: String,
    pub mode: LockMode,
    pub expire_after_secs: u64,
}

impl Default for LockRequest {
    fn default() -> Self {
        Self {
            owner: String::new(),
            mode: LockMode::Silent,
            expire_after_secs: DEFAULT_LOCK_EXPIRE_SECS,
        }
    }
}

impl LockRequest {
    /// Returns `true` when the request names a lock owner.
    pub fn is_requested(&self) -> bool {
        !self.owner.is_empty()
    }
}

/// Time until a stored resource expires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Expiry {
    #[default]
    Never,
    After(u64),
}

impl Expiry {
    /// Interpret a seconds value: `-1` means never, other negatives are invalid.
    pub fn from_seconds(seconds: i64) -> crate::error::Result<Self> {
        match seconds {
            -1 => Ok(Expiry::Never),
            s if s < -1 => Err(TypesError::InvalidExpiry(s.to_string())),
            s => Ok(Expiry::After(s as u64)),
        }
    }

    /// Absolute deadline relative to `now`.
    ///
    /// Returns `None` for [`Expiry::Never`] and for durations the clock
    /// cannot represent, which therefore never expire.
    pub fn deadline_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Expiry::Never => None,
            Expiry::After(secs) => {
                let secs = i64::try_from(secs).ok()?;
                let delta = TimeDelta::try_seconds(secs)?;
                now.checked_add_signed(delta)
            }
        }
    }
}

impl FromStr for Expiry {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.parse::<i64>() {
            Ok(seconds) => Expiry::from_seconds(seconds),
            // Digits too large for i64 are still a valid, unreachable expiry.
            Err(_) if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) => {
                Ok(Expiry::After(u64::MAX))
            }
            Err(_) => Err(TypesError::InvalidExpiry(s.to_string())),
        }
    }
}
