use std::collections::BTreeMap;

use lfsmon_types::Role;
use parking_lot::RwLock;

/// Nodes that completed a collection cycle, and the targets they host.
///
/// Written by node readers after each successful cycle, read by the query
/// service.
#[derive(Default)]
pub struct ActiveTargets {
    inner: RwLock<BTreeMap<Role, BTreeMap<String, Vec<String>>>>,
}

impl ActiveTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, role: Role, node: &str, targets: &[String]) {
        let mut inner = self.inner.write();
        let nodes = inner.entry(role).or_default();
        if nodes.get(node).map(Vec::as_slice) != Some(targets) {
            tracing::debug!(%role, node, targets = targets.len(), "active targets changed");
            nodes.insert(node.to_string(), targets.to_vec());
        }
    }

    pub fn nodes(&self, role: Role) -> Vec<String> {
        self.inner
            .read()
            .get(&role)
            .map(|nodes| nodes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// `node -> targets` for one role.
    pub fn targets(&self, role: Role) -> BTreeMap<String, Vec<String>> {
        self.inner.read().get(&role).cloned().unwrap_or_default()
    }
}
