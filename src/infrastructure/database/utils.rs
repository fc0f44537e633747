//! Timestamp formatting shared by the store implementations.
//!
//! Timestamps are stored as fixed-width `YYYY-MM-DDTHH:MM:SS.sssZ` strings
//! so that lexicographic ordering in SQL matches chronological ordering.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::domain::errors::{StoreError, StoreResult};

/// Format a timestamp for storage.
pub fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in storage format.
pub fn now_ts() -> String {
    fmt_ts(Utc::now())
}

/// Parse a stored timestamp.
pub fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::fatal(format!("invalid timestamp {s:?}: {e}")))
}

/// Parse an optional stored timestamp.
pub fn parse_opt_ts(s: Option<&str>) -> StoreResult<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}
