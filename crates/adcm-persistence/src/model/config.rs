//! Configuration history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{ConfigLogId, ObjectConfigId};

/// Revision pointers of one object's configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub id: ObjectConfigId,
    pub current: ConfigLogId,
    #[serde(default)]
    pub previous: Option<ConfigLogId>,
}

/// Immutable configuration revision
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigLog {
    pub id: ConfigLogId,
    pub object_config_id: ObjectConfigId,
    pub config: Value,
    #[serde(default)]
    pub attr: Value,
    #[serde(default)]
    pub description: String,
    pub date: DateTime<Utc>,
}
