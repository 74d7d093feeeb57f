use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::warn;

/// Replay positions arrive as `YYYYMMDDThhmmss.fffffffZ` (UTC, 100ns
/// precision). Some stores append a comma-separated tail; only the first
/// segment is the timestamp.
const BOOKMARK_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second].[subsecond digits:7]Z");

/// Decodes a bookmark into an instant. `None` means "no filter": an empty
/// bookmark, or one that fails to parse. Parse failures degrade to an
/// unfiltered replay, never an error.
pub fn parse_bookmark(raw: &str) -> Option<OffsetDateTime> {
    let timestamp = raw.split(',').next().unwrap_or_default().trim();
    if timestamp.is_empty() {
        return None;
    }
    match PrimitiveDateTime::parse(timestamp, BOOKMARK_FORMAT) {
        Ok(parsed) => Some(parsed.assume_utc()),
        Err(err) => {
            warn!(bookmark = timestamp, %err, "unparseable bookmark, replaying without a filter");
            None
        }
    }
}
