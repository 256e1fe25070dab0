//! Counter sources backed by the Lustre `/proc/fs/lustre` tree.
//!
//! Layout read here:
//!
//! ```text
//! <root>/ost                                   present on object storage servers
//! <root>/obdfilter/<ost>/stats                 target totals
//! <root>/obdfilter/<ost>/exports/<nid>/stats   per-client counters
//! <root>/mds                                   present on metadata servers
//! <root>/mdt/<mdt>/md_stats                    target totals (2.x)
//! <root>/mds/<mdt>/stats                       target totals (1.8)
//! <root>/<mdt dir>/<mdt>/exports/<nid>/stats   per-client counters
//! <root>/version                               "lustre: 2.5.3"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use lfsmon_types::{CounterVector, MdsStats, OstStats, Role};

use crate::error::SnapshotError;
use crate::source::{AbsoluteCounters, CounterSource};

pub const DEFAULT_PROC_ROOT: &str = "/proc/fs/lustre";

/// Parse an obdfilter `stats` file.
///
/// Lines look like `read_bytes 120 samples [bytes] 4096 1048576 9437184`:
/// the second field is the request count, the seventh the byte sum.
pub fn parse_ost_stats(content: &str) -> OstStats {
    let mut stats = OstStats::default();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (rqs, bytes) = match fields.first() {
            Some(&"read_bytes") => (&mut stats.read_rqs, &mut stats.read_bytes),
            Some(&"write_bytes") => (&mut stats.write_rqs, &mut stats.write_bytes),
            _ => continue,
        };
        *rqs = parse_field(&fields, 1);
        *bytes = parse_field(&fields, 6);
    }
    stats
}

/// Parse an MDT `md_stats` (or 1.8 `stats`) file.
///
/// Every line counted in `samples` adds its count to one bucket.
pub fn parse_md_stats(content: &str) -> MdsStats {
    let mut stats = MdsStats::default();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.get(2) != Some(&"samples") {
            continue;
        }
        let count = parse_field(&fields, 1);
        match fields[0] {
            "open" => stats.open += count,
            "close" => stats.close += count,
            "getattr" | "getxattr" | "statfs" => stats.getattr += count,
            _ => stats.other += count,
        }
    }
    stats
}

fn parse_field(fields: &[&str], idx: usize) -> i64 {
    fields
        .get(idx)
        .and_then(|f| f.parse::<i64>().ok())
        .unwrap_or(0)
}

/// Read a counter file, treating a missing or unreadable file as empty.
fn read_counter_file(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "counter file unreadable, using zeros");
            String::new()
        }
    }
}

/// Names of the subdirectories of `dir` accepted by `keep`, sorted.
fn subdirs(dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| keep(name))
        .collect();
    names.sort();
    names
}

fn is_nid(name: &str) -> bool {
    name.contains('@')
}

/// Reads totals and per-export counters below `target_root`.
fn read_family<V: CounterVector>(
    target_root: &Path,
    targets: Vec<String>,
    stats_file: &str,
    parse: fn(&str) -> V,
) -> AbsoluteCounters<V> {
    let mut counters = AbsoluteCounters::default();
    for target in targets {
        let dir = target_root.join(&target);
        let total = parse(&read_counter_file(&dir.join(stats_file)));
        let exports = dir.join("exports");
        let clients = subdirs(&exports, is_nid)
            .into_iter()
            .map(|nid| {
                let value = parse(&read_counter_file(&exports.join(&nid).join("stats")));
                (nid, value)
            })
            .collect();
        counters.clients.insert(target.clone(), clients);
        counters.totals.insert(target, total);
    }
    counters
}

/// Object storage target counters.
#[derive(Debug, Clone)]
pub struct OstSource {
    root: PathBuf,
}

impl OstSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn obdfilter(&self) -> PathBuf {
        self.root.join("obdfilter")
    }
}

impl CounterSource<OstStats> for OstSource {
    fn is_available(&self) -> bool {
        self.root.join("ost").is_dir()
    }

    fn list_targets(&self) -> Result<Vec<String>, SnapshotError> {
        if !self.is_available() {
            return Err(SnapshotError::UnsupportedRole(Role::Oss));
        }
        Ok(subdirs(&self.obdfilter(), |_| true))
    }

    fn read(&self) -> Result<AbsoluteCounters<OstStats>, SnapshotError> {
        let targets = self.list_targets()?;
        Ok(read_family(&self.obdfilter(), targets, "stats", parse_ost_stats))
    }
}

/// Where MDT counters live for a given Lustre release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MdtLayout {
    pub dir: &'static str,
    pub stats_file: &'static str,
}

impl MdtLayout {
    pub const V1_8: MdtLayout = MdtLayout {
        dir: "mds",
        stats_file: "stats",
    };
    pub const V2: MdtLayout = MdtLayout {
        dir: "mdt",
        stats_file: "md_stats",
    };

    /// Pick the layout from the content of the `version` file.
    pub fn from_version(content: &str) -> Option<MdtLayout> {
        let version = content
            .lines()
            .find_map(|l| l.strip_prefix("lustre:"))?
            .trim();
        match version.split('.').next()?.parse::<u32>().ok()? {
            1 => Some(Self::V1_8),
            _ => Some(Self::V2),
        }
    }

    /// Layout for the tree at `root`: the version file if readable,
    /// otherwise whichever target directory exists.
    pub fn detect(root: &Path) -> MdtLayout {
        if let Ok(content) = fs::read_to_string(root.join("version")) {
            if let Some(layout) = Self::from_version(&content) {
                return layout;
            }
            tracing::warn!(%content, "unrecognised lustre version, probing directories");
        }
        if root.join(Self::V2.dir).is_dir() {
            Self::V2
        } else {
            Self::V1_8
        }
    }
}

/// Metadata target counters.
#[derive(Debug, Clone)]
pub struct MdtSource {
    root: PathBuf,
    layout: MdtLayout,
}

impl MdtSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let layout = MdtLayout::detect(&root);
        Self { root, layout }
    }

    pub fn layout(&self) -> MdtLayout {
        self.layout
    }
}

impl CounterSource<MdsStats> for MdtSource {
    fn is_available(&self) -> bool {
        self.root.join("mds").is_dir()
    }

    fn list_targets(&self) -> Result<Vec<String>, SnapshotError> {
        if !self.is_available() {
            return Err(SnapshotError::UnsupportedRole(Role::Mds));
        }
        Ok(subdirs(&self.root.join(self.layout.dir), |name| {
            name.contains("-MDT")
        }))
    }

    fn read(&self) -> Result<AbsoluteCounters<MdsStats>, SnapshotError> {
        let targets = self.list_targets()?;
        Ok(read_family(
            &self.root.join(self.layout.dir),
            targets,
            self.layout.stats_file,
            parse_md_stats,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const OST_STATS: &str = "\
snapshot_time             1409062339.474409 secs.usecs
read_bytes                10 samples [bytes] 4096 1048576 500
write_bytes               100 samples [bytes] 4096 1048576 2000
setattr                   2 samples [reqs]
";

    const MD_STATS: &str = "\
snapshot_time             1409062339.474409 secs.usecs
open                      40 samples [reqs]
close                     38 samples [reqs]
getattr                   7 samples [reqs]
getxattr                  3 samples [reqs]
unlink                    5 samples [reqs]
mkdir                     1 samples [reqs]
";

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_parse_ost_stats() {
        assert_eq!(parse_ost_stats(OST_STATS), OstStats::new(100, 2000, 10, 500));
    }

    #[test]
    fn test_parse_ost_stats_garbage_is_zero() {
        assert_eq!(parse_ost_stats("read_bytes x samples"), OstStats::default());
        assert_eq!(parse_ost_stats(""), OstStats::default());
    }

    #[test]
    fn test_parse_md_stats_buckets() {
        assert_eq!(parse_md_stats(MD_STATS), MdsStats::new(40, 38, 10, 6));
    }

    #[test]
    fn test_layout_from_version() {
        assert_eq!(MdtLayout::from_version("lustre: 2.5.3\nkernel: patchless"), Some(MdtLayout::V2));
        assert_eq!(MdtLayout::from_version("lustre: 1.8.9\n"), Some(MdtLayout::V1_8));
        assert_eq!(MdtLayout::from_version("garbage"), None);
    }

    #[test]
    fn test_ost_source_reads_tree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("ost")).unwrap();
        write(&root.join("obdfilter/fs-OST0000/stats"), OST_STATS);
        write(&root.join("obdfilter/fs-OST0000/exports/10.0.0.1@o2ib/stats"), OST_STATS);
        // Export without a stats file reads as zero.
        fs::create_dir_all(root.join("obdfilter/fs-OST0000/exports/10.0.0.2@o2ib")).unwrap();
        // Not a nid.
        fs::create_dir_all(root.join("obdfilter/fs-OST0000/exports/clear")).unwrap();
        fs::create_dir_all(root.join("obdfilter/fs-OST0001")).unwrap();

        let source = OstSource::new(root);
        assert!(source.is_available());
        assert_eq!(source.list_targets().unwrap(), vec!["fs-OST0000", "fs-OST0001"]);

        let counters = source.read().unwrap();
        assert_eq!(counters.totals["fs-OST0000"], OstStats::new(100, 2000, 10, 500));
        assert_eq!(counters.totals["fs-OST0001"], OstStats::default());
        let clients = &counters.clients["fs-OST0000"];
        assert_eq!(clients.len(), 2);
        assert_eq!(clients["10.0.0.1@o2ib"], OstStats::new(100, 2000, 10, 500));
        assert_eq!(clients["10.0.0.2@o2ib"], OstStats::default());
    }

    #[test]
    fn test_ost_source_unsupported_role() {
        let tmp = TempDir::new().unwrap();
        let source = OstSource::new(tmp.path());
        assert!(!source.is_available());
        assert_eq!(
            source.read().unwrap_err(),
            SnapshotError::UnsupportedRole(Role::Oss)
        );
    }

    #[test]
    fn test_mdt_source_v2_layout() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(&root.join("version"), "lustre: 2.5.3\n");
        fs::create_dir_all(root.join("mds")).unwrap();
        write(&root.join("mdt/fs-MDT0000/md_stats"), MD_STATS);
        write(&root.join("mdt/fs-MDT0000/exports/10.0.0.1@tcp/stats"), "open 4 samples [reqs]\n");
        fs::create_dir_all(root.join("mdt/num_refs_dir")).unwrap();

        let source = MdtSource::new(root);
        assert_eq!(source.layout(), MdtLayout::V2);
        let counters = source.read().unwrap();
        assert_eq!(counters.totals.len(), 1);
        assert_eq!(counters.totals["fs-MDT0000"], MdsStats::new(40, 38, 10, 6));
        assert_eq!(
            counters.clients["fs-MDT0000"]["10.0.0.1@tcp"],
            MdsStats::new(4, 0, 0, 0)
        );
    }

    #[test]
    fn test_mdt_source_v18_layout_by_probe() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(&root.join("mds/fs-MDT0000/stats"), MD_STATS);

        let source = MdtSource::new(root);
        assert_eq!(source.layout(), MdtLayout::V1_8);
        assert_eq!(source.read().unwrap().totals["fs-MDT0000"].total(), 94);
    }
}
