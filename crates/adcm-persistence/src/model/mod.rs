//! Entities of the object graph

pub mod action;
pub mod bind;
pub mod concern;
pub mod config;
pub mod group;
pub mod ids;
pub mod object;
pub mod prototype;
pub mod task;

pub use action::{
    Action, ActionType, Availability, HcAclAction, HcAclRule, InternalScript, ScriptType,
    StateChanges, SubAction,
};
pub use bind::{Bind, BindEnd};
pub use concern::{Concern, ConcernCause, ConcernReason, ConcernType};
pub use config::{ConfigLog, ObjectConfig};
pub use group::{ActionHostGroup, ConfigHostGroup};
pub use ids::*;
pub use object::{
    BeforeUpgrade, Cluster, Component, CoreObject, Host, MaintenanceMode, ObjectCommon,
    ObjectKind, ObjectRef, Provider, Service,
};
pub use prototype::{
    Bundle, Constraint, ConstraintBound, ConstraintMax, ImportSpec, LicenseState, Prototype,
    PrototypeType, Requirement, Upgrade, compare_versions,
};
pub use task::{HcEntry, Job, JobStatus, MaintenanceModeTransition, SelectorEntry, Task};
