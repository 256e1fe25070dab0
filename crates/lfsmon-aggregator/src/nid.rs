//! Client id normalization.
//!
//! A Lustre NID looks like `10.0.0.1@o2ib`. Stored client ids drop the
//! network suffix and map known addresses to host names. A configured
//! regex rewrites mapped names only; unknown addresses are stored as is.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use regex::Regex;

use crate::config::NidMappingConfig;
use crate::error::CollectError;

/// Address to display-name lookup.
pub trait HostMap: Send + Sync {
    fn lookup(&self, addr: &str) -> Option<&str>;
}

/// Maps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyHostMap;

impl HostMap for EmptyHostMap {
    fn lookup(&self, _addr: &str) -> Option<&str> {
        None
    }
}

/// A map read from an `/etc/hosts`-style file: `<ip> <name> [aliases..]`.
#[derive(Debug, Default, Clone)]
pub struct FileHostMap {
    names: HashMap<String, String>,
}

impl FileHostMap {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// First name wins when an address is listed twice.
    pub fn parse(content: &str) -> Self {
        let mut names = HashMap::new();
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default();
            let mut fields = line.split_whitespace();
            let (Some(addr), Some(name)) = (fields.next(), fields.next()) else {
                continue;
            };
            names.entry(addr.to_string()).or_insert_with(|| name.to_string());
        }
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl HostMap for FileHostMap {
    fn lookup(&self, addr: &str) -> Option<&str> {
        self.names.get(addr).map(String::as_str)
    }
}

pub struct NidNormalizer {
    hosts: Box<dyn HostMap>,
    rewrite: Option<(Regex, String)>,
}

impl NidNormalizer {
    pub fn new(hosts: Box<dyn HostMap>, rewrite: Option<(Regex, String)>) -> Self {
        Self { hosts, rewrite }
    }

    /// No host map, no rewrite: only the network suffix is stripped.
    pub fn identity() -> Self {
        Self::new(Box::new(EmptyHostMap), None)
    }

    pub fn from_config(config: &NidMappingConfig) -> Result<Self, CollectError> {
        let hosts: Box<dyn HostMap> = match &config.hostfile {
            Some(path) => {
                let map = FileHostMap::load(path).map_err(|e| {
                    CollectError::Config(lfsmon_config::ConfigError::Invalid(format!(
                        "nidmapping.hostfile {}: {e}",
                        path.display()
                    )))
                })?;
                tracing::info!(path = %path.display(), hosts = map.len(), "host map loaded");
                Box::new(map)
            }
            None => Box::new(EmptyHostMap),
        };
        let rewrite = match &config.pattern {
            Some(pattern) => {
                let re = Regex::new(pattern).map_err(|e| {
                    CollectError::Config(lfsmon_config::ConfigError::Invalid(format!(
                        "nidmapping.pattern: {e}"
                    )))
                })?;
                Some((re, config.replace.clone()))
            }
            None => None,
        };
        Ok(Self::new(hosts, rewrite))
    }

    pub fn normalize(&self, nid: &str) -> String {
        let addr = nid.split('@').next().unwrap_or(nid);
        let mapped = match addr.parse::<Ipv4Addr>() {
            Ok(_) => self.hosts.lookup(addr),
            Err(_) => None,
        };
        match (mapped, &self.rewrite) {
            (Some(name), Some((re, replace))) => re.replace_all(name, replace.as_str()).into_owned(),
            (Some(name), None) => name.to_string(),
            (None, _) => addr.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HOSTS: &str = "\
# cluster hosts
127.0.0.1   localhost
10.0.0.1    node01-ib node01
10.0.0.1    duplicate

10.0.0.2    node02-ib   # compute
";

    #[test]
    fn test_parse_hosts() {
        let map = FileHostMap::parse(HOSTS);
        assert_eq!(map.len(), 3);
        assert_eq!(map.lookup("10.0.0.1"), Some("node01-ib"));
        assert_eq!(map.lookup("10.0.0.2"), Some("node02-ib"));
        assert_eq!(map.lookup("10.0.0.3"), None);
    }

    #[test]
    fn test_strip_suffix_only() {
        let n = NidNormalizer::identity();
        assert_eq!(n.normalize("10.0.0.1@o2ib"), "10.0.0.1");
        assert_eq!(n.normalize("0@lo"), "0");
        assert_eq!(n.normalize("plain"), "plain");
    }

    #[test]
    fn test_host_map_and_rewrite() {
        let n = NidNormalizer::new(
            Box::new(FileHostMap::parse(HOSTS)),
            Some((Regex::new(r"^(.*)-ib$").unwrap(), "$1".to_string())),
        );
        assert_eq!(n.normalize("10.0.0.1@o2ib"), "node01");
        assert_eq!(n.normalize("10.0.0.2@tcp"), "node02");
        assert_eq!(n.normalize("10.0.0.9@tcp"), "10.0.0.9");
    }

    #[test]
    fn test_rewrite_only_mapped_names_and_every_match() {
        let n = NidNormalizer::new(
            Box::new(FileHostMap::parse("10.0.0.5 rack1-node-05\n")),
            Some((Regex::new(r"-").unwrap(), "_".to_string())),
        );
        assert_eq!(n.normalize("10.0.0.5@o2ib"), "rack1_node_05");
        assert_eq!(n.normalize("10.0.0-6@o2ib"), "10.0.0-6");
        assert_eq!(n.normalize("10.0.0.6@o2ib"), "10.0.0.6");
    }

    #[test]
    fn test_from_config_loads_hostfile() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(HOSTS.as_bytes()).unwrap();
        let config = NidMappingConfig {
            hostfile: Some(file.path().to_path_buf()),
            pattern: None,
            replace: String::new(),
        };
        let n = NidNormalizer::from_config(&config).unwrap();
        assert_eq!(n.normalize("10.0.0.2@o2ib"), "node02-ib");
    }

    #[test]
    fn test_from_config_missing_hostfile() {
        let config = NidMappingConfig {
            hostfile: Some("/nonexistent/hosts".into()),
            ..Default::default()
        };
        assert!(matches!(
            NidNormalizer::from_config(&config),
            Err(CollectError::Config(_))
        ));
    }
}
