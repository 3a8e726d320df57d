use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Rendering of the UTC half of every timestamp we return.
pub const UTC_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";
/// e.g. `Monday, 01 January 2030, 06:00 AM +06 (+0600)`.
pub const LOCAL_DISPLAY_FORMAT: &str = "%A, %d %B %Y, %I:%M %p %Z (%z)";

/// One instant rendered twice: machine-friendly UTC and a localized string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayTime {
    pub utc: String,
    pub local: String,
}

impl DisplayTime {
    pub fn new(at: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            utc: at.format(UTC_DISPLAY_FORMAT).to_string(),
            local: at.with_timezone(&tz).format(LOCAL_DISPLAY_FORMAT).to_string(),
        }
    }
}

/// 1-based page request as it arrives on `/…/page/{page}/{limit}` routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    /// Hard cap so a single request cannot pull an entire table.
    pub const MAX_LIMIT: u32 = 500;

    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    /// SQL `OFFSET` for this page.
    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.limit)
    }
}

/// A page of results plus the totals clients need to render pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub pages: u64,
    pub page: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, req: PageRequest) -> Self {
        let limit = u64::from(req.limit);
        Self {
            items,
            total,
            pages: total.div_ceil(limit),
            page: req.page,
        }
    }
}

/// Expand a free-text search term into the LIKE patterns we match against.
///
/// Users type either `daily sync` or `daily_sync` for the same task, so both
/// spellings are tried alongside the literal input.
pub fn search_patterns(query: &str) -> [String; 3] {
    let q = query.trim().to_lowercase();
    [
        format!("%{q}%"),
        format!("%{}%", q.replace(' ', "_")),
        format!("%{}%", q.replace('_', " ")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn display_time_renders_utc_and_local() {
        let at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let shown = DisplayTime::new(at, chrono_tz::Asia::Dhaka);
        assert_eq!(shown.utc, "2030-01-01 00:00:00 UTC");
        assert!(shown.local.starts_with("Tuesday, 01 January 2030, 06:00 AM"));
        assert!(shown.local.ends_with("(+0600)"));
    }

    #[test]
    fn page_counts_round_up() {
        let req = PageRequest::new(2, 10);
        let page = Page::new(vec![1, 2, 3], 23, req);
        assert_eq!(page.pages, 3);
        assert_eq!(page.page, 2);
        assert_eq!(req.offset(), 10);
    }

    #[test]
    fn page_request_clamps_zero_values() {
        let req = PageRequest::new(0, 0);
        assert_eq!(req.page, 1);
        assert_eq!(req.limit, 1);
        assert_eq!(req.offset(), 0);
    }

    #[test]
    fn search_patterns_cover_space_and_underscore() {
        let [a, b, c] = search_patterns(" Daily Sync ");
        assert_eq!(a, "%daily sync%");
        assert_eq!(b, "%daily_sync%");
        assert_eq!(c, "%daily sync%");
    }
}
