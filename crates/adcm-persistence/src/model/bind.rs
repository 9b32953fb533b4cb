//! Import binds between clusters

use serde::{Deserialize, Serialize};

use super::ids::{BindId, ClusterId, ServiceId};

/// Cluster, or one of its services, taking part in a bind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindEnd {
    pub cluster_id: ClusterId,
    #[serde(default)]
    pub service_id: Option<ServiceId>,
}

/// `importer` consumes the exports of `source`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bind {
    pub id: BindId,
    pub importer: BindEnd,
    pub source: BindEnd,
}
