use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Read-only queries served by the aggregator.
pub const QUERY_SERVICE_ID: u16 = 10;

pub mod query_method {
    pub const OSS_LIST: u16 = 1;
    pub const OST_LIST: u16 = 2;
    pub const MDS_LIST: u16 = 3;
    pub const MDT_LIST: u16 = 4;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeListRsp {
    pub nodes: Vec<String>,
}

/// Active targets per node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMapRsp {
    pub targets: BTreeMap<String, Vec<String>>,
}
