//! Concerns: issues, locks and flags attached to objects

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{ConcernId, TaskId};
use super::object::ObjectRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcernType {
    Lock,
    Issue,
    Flag,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcernCause {
    Config,
    Job,
    HostComponent,
    Import,
    Service,
    Requirement,
}

impl ConcernCause {
    pub fn as_str(self) -> &'static str {
        match self {
            ConcernCause::Config => "config",
            ConcernCause::Job => "job",
            ConcernCause::HostComponent => "host_component",
            ConcernCause::Import => "import",
            ConcernCause::Service => "service",
            ConcernCause::Requirement => "requirement",
        }
    }
}

impl fmt::Display for ConcernCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message template plus the values substituted into it
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcernReason {
    pub message: String,
    #[serde(default)]
    pub placeholder: BTreeMap<String, Value>,
}

impl ConcernReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            placeholder: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.placeholder.insert(key.to_string(), value);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Concern {
    pub id: ConcernId,
    #[serde(rename = "type")]
    pub kind: ConcernType,
    /// Flags have no cause
    pub cause: Option<ConcernCause>,
    pub owner: ObjectRef,
    /// Unique among the flags of an owner
    pub name: String,
    pub reason: ConcernReason,
    pub blocking: bool,
    /// Task holding a lock
    #[serde(default)]
    pub task_id: Option<TaskId>,
    /// Objects the concern is attached to, the owner included
    pub affected: BTreeSet<ObjectRef>,
}

impl Concern {
    pub fn is_lock(&self) -> bool {
        self.kind == ConcernType::Lock
    }

    /// Blocking lock attached to `object`
    pub fn locks(&self, object: ObjectRef) -> bool {
        self.kind == ConcernType::Lock && self.blocking && self.affected.contains(&object)
    }
}
