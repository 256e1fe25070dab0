//! Fixed-size counter vectors for the two monitored target families.

use std::fmt;
use std::ops::AddAssign;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Node role, one per target family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Metadata server, hosts MDTs.
    Mds,
    /// Object storage server, hosts OSTs.
    Oss,
}

impl Role {
    /// Name of the target kind this role hosts, as stored in documents.
    pub fn target_kind(&self) -> &'static str {
        match self {
            Role::Mds => "mdt",
            Role::Oss => "ost",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Mds => "mds",
            Role::Oss => "oss",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fixed-size tuple of cumulative counters.
///
/// Absolute readings are non-negative. A difference of two readings is only
/// reportable when no element went backwards and at least one moved.
pub trait CounterVector:
    Copy + Default + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Family this vector belongs to.
    const ROLE: Role;

    /// Element-wise `self - old`, without clamping.
    fn diff(&self, old: &Self) -> Self;

    /// Elements in their stored order.
    fn elements(&self) -> Vec<i64>;

    fn has_rollback(&self) -> bool {
        self.elements().iter().any(|v| *v < 0)
    }

    fn is_zero(&self) -> bool {
        self.elements().iter().all(|v| *v == 0)
    }

    /// The diff against `old`, or `None` when it must be omitted.
    fn reportable_diff(&self, old: &Self) -> Option<Self> {
        let d = self.diff(old);
        if d.has_rollback() || d.is_zero() {
            None
        } else {
            Some(d)
        }
    }
}

/// Object storage target I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OstStats {
    pub write_rqs: i64,
    pub write_bytes: i64,
    pub read_rqs: i64,
    pub read_bytes: i64,
}

impl OstStats {
    pub fn new(write_rqs: i64, write_bytes: i64, read_rqs: i64, read_bytes: i64) -> Self {
        Self {
            write_rqs,
            write_bytes,
            read_rqs,
            read_bytes,
        }
    }
}

impl CounterVector for OstStats {
    const ROLE: Role = Role::Oss;

    fn diff(&self, old: &Self) -> Self {
        Self {
            write_rqs: self.write_rqs.wrapping_sub(old.write_rqs),
            write_bytes: self.write_bytes.wrapping_sub(old.write_bytes),
            read_rqs: self.read_rqs.wrapping_sub(old.read_rqs),
            read_bytes: self.read_bytes.wrapping_sub(old.read_bytes),
        }
    }

    fn elements(&self) -> Vec<i64> {
        vec![self.write_rqs, self.write_bytes, self.read_rqs, self.read_bytes]
    }
}

/// Metadata target operation counters, bucketed by operation class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdsStats {
    pub open: i64,
    pub close: i64,
    /// getattr, getxattr and statfs.
    pub getattr: i64,
    pub other: i64,
}

impl MdsStats {
    pub fn new(open: i64, close: i64, getattr: i64, other: i64) -> Self {
        Self {
            open,
            close,
            getattr,
            other,
        }
    }

    pub fn total(&self) -> i64 {
        self.open + self.close + self.getattr + self.other
    }
}

impl AddAssign for MdsStats {
    fn add_assign(&mut self, rhs: Self) {
        self.open += rhs.open;
        self.close += rhs.close;
        self.getattr += rhs.getattr;
        self.other += rhs.other;
    }
}

impl CounterVector for MdsStats {
    const ROLE: Role = Role::Mds;

    fn diff(&self, old: &Self) -> Self {
        Self {
            open: self.open.wrapping_sub(old.open),
            close: self.close.wrapping_sub(old.close),
            getattr: self.getattr.wrapping_sub(old.getattr),
            other: self.other.wrapping_sub(old.other),
        }
    }

    fn elements(&self) -> Vec<i64> {
        vec![self.open, self.close, self.getattr, self.other]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_diff_is_reported() {
        let old = OstStats::new(100, 2000, 10, 500);
        let new = OstStats::new(150, 2500, 10, 500);
        assert_eq!(new.reportable_diff(&old), Some(OstStats::new(50, 500, 0, 0)));
    }

    #[test]
    fn test_zero_diff_is_omitted() {
        let v = OstStats::new(7, 8, 9, 10);
        assert_eq!(v.reportable_diff(&v), None);
    }

    #[test]
    fn test_rollback_is_never_clamped() {
        let old = OstStats::new(150, 2500, 10, 500);
        let new = OstStats::new(5, 9000, 20, 900);
        let d = new.diff(&old);
        assert!(d.has_rollback());
        assert_eq!(d.write_rqs, -145);
        assert_eq!(new.reportable_diff(&old), None);
    }

    #[test]
    fn test_mds_diff_and_total() {
        let old = MdsStats::new(10, 10, 5, 1);
        let new = MdsStats::new(12, 11, 5, 1);
        let d = new.reportable_diff(&old).unwrap();
        assert_eq!(d, MdsStats::new(2, 1, 0, 0));
        assert_eq!(d.total(), 3);
    }

    #[test]
    fn test_mds_accumulate() {
        let mut acc = MdsStats::default();
        acc += MdsStats::new(1, 0, 0, 0);
        acc += MdsStats::new(0, 0, 3, 4);
        assert_eq!(acc, MdsStats::new(1, 0, 3, 4));
    }

    #[test]
    fn test_role_names() {
        assert_eq!(OstStats::ROLE.target_kind(), "ost");
        assert_eq!(MdsStats::ROLE.target_kind(), "mdt");
        assert_eq!(Role::Oss.to_string(), "oss");
        assert_eq!(serde_json::to_string(&Role::Mds).unwrap(), "\"mds\"");
    }
}
