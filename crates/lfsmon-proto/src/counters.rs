use lfsmon_types::Role;
use serde::{Deserialize, Serialize};

/// Role and target queries on a node collector.
pub const NODE_INFO_SERVICE_ID: u16 = 1;
/// Storage-target counters.
pub const OST_COUNTERS_SERVICE_ID: u16 = 2;
/// Metadata-target counters.
pub const MDT_COUNTERS_SERVICE_ID: u16 = 3;

pub mod node_info_method {
    pub const IS_OST: u16 = 1;
    pub const IS_MDT: u16 = 2;
    pub const LIST_ACTIVE_TARGETS: u16 = 3;
}

pub mod counters_method {
    /// Take the baseline snapshot. Replies with [`super::BaselineRsp`].
    pub const INITIALIZE_BASELINE: u16 = 1;
    /// Diff against the previous snapshot. Replies with a `CounterDiff`.
    pub const GET_DIFF: u16 = 2;
}

/// Counter service serving `role`'s target family.
pub fn counter_service_id(role: Role) -> u16 {
    match role {
        Role::Oss => OST_COUNTERS_SERVICE_ID,
        Role::Mds => MDT_COUNTERS_SERVICE_ID,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRsp {
    pub hosted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetListReq {
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetListRsp {
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineRsp {
    /// Targets captured in the baseline.
    pub targets: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, encode};

    #[test]
    fn test_service_for_role() {
        assert_eq!(counter_service_id(Role::Oss), OST_COUNTERS_SERVICE_ID);
        assert_eq!(counter_service_id(Role::Mds), MDT_COUNTERS_SERVICE_ID);
    }

    #[test]
    fn test_target_list_req_wire_form() {
        let body = encode(&TargetListReq { role: Role::Oss }).unwrap();
        assert_eq!(&body[..], br#"{"role":"oss"}"#);
        let back: TargetListReq = decode(&body).unwrap();
        assert_eq!(back.role, Role::Oss);
    }
}
