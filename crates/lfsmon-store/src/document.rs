use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Client id of the per-target aggregate row.
pub const AGGREGATE_NID: &str = "aggr";

/// Name of the single watermark record of a database.
pub const WATERMARK_NAME: &str = "last";

/// One stored row: a target's total or one client's share of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleDocument {
    /// Aligned timestamp, unix seconds.
    pub ts: i64,
    /// `"ost"` or `"mdt"`.
    pub target_kind: String,
    pub target: String,
    /// Normalized client name, or [`AGGREGATE_NID`].
    pub nid: String,
    pub v: Vec<i64>,
    /// Real seconds covered by `v`.
    pub dt: f64,
}

/// Most recent fully written cycle of a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub name: String,
    pub ts: i64,
}

impl Watermark {
    pub fn latest(ts: i64) -> Self {
        Self {
            name: WATERMARK_NAME.to_string(),
            ts,
        }
    }
}

/// Read-side selection: `ts` in `[from, to]` and `nid` in `nids`.
///
/// An empty `nids` selects every client including aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleQuery {
    pub from: i64,
    pub to: i64,
    #[serde(default)]
    pub nids: Vec<String>,
    #[serde(default)]
    pub target_kind: Option<String>,
}

impl SampleQuery {
    pub fn new(from: i64, to: i64) -> Self {
        Self {
            from,
            to,
            ..Default::default()
        }
    }

    pub fn with_nids(mut self, nids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.nids = nids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_target_kind(mut self, kind: impl Into<String>) -> Self {
        self.target_kind = Some(kind.into());
        self
    }

    pub fn matches(&self, doc: &SampleDocument) -> bool {
        doc.ts >= self.from
            && doc.ts <= self.to
            && (self.nids.is_empty() || self.nids.iter().any(|n| n == &doc.nid))
            && self.target_kind.as_ref().map_or(true, |k| k == &doc.target_kind)
    }
}

/// `<fsname><MM><YYYY>`, one collection per filesystem and month.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionName {
    pub fsname: String,
    pub month: u32,
    pub year: i32,
}

fn collection_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*)(\d\d)(\d\d\d\d)$").expect("constant pattern"))
}

/// Collection names become table names, so only `[A-Za-z0-9_]` is allowed.
pub fn validate_collection(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::InvalidCollection(name.to_string()));
    }
    Ok(())
}

impl CollectionName {
    /// Collection holding samples aligned to `ts` (UTC). Timestamps outside
    /// the calendar range land in its first or last month.
    pub fn for_timestamp(fsname: &str, ts: i64) -> Self {
        let at: DateTime<Utc> = Utc.timestamp_opt(ts, 0).single().unwrap_or(if ts < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        Self {
            fsname: fsname.to_string(),
            month: at.month(),
            year: at.year(),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let caps = collection_regex().captures(name)?;
        let month: u32 = caps[2].parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(Self {
            fsname: caps[1].to_string(),
            month,
            year: caps[3].parse().ok()?,
        })
    }

    /// Whether this month intersects `[from, to]`.
    pub fn overlaps(&self, from: i64, to: i64) -> bool {
        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        let month_start = |year: i32, month: u32| Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single();
        let Some(start) = month_start(self.year, self.month) else {
            return false;
        };
        let end = month_start(next_year, next_month).map_or(i64::MAX, |t| t.timestamp());
        start.timestamp() <= to && end > from
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:02}{:04}", self.fsname, self.month, self.year)
    }
}
