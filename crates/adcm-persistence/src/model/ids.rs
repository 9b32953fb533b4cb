//! Typed identifiers of every entity

use adcm_common::define_id;

define_id!(BundleId, "bundle");
define_id!(PrototypeId, "prototype");
define_id!(ActionId, "action");
define_id!(UpgradeId, "upgrade");
define_id!(ClusterId, "cluster");
define_id!(ServiceId, "service");
define_id!(ComponentId, "component");
define_id!(ProviderId, "provider");
define_id!(HostId, "host");
define_id!(ObjectConfigId, "object config");
define_id!(ConfigLogId, "config");
define_id!(ConfigHostGroupId, "config host group");
define_id!(ActionHostGroupId, "action host group");
define_id!(BindId, "bind");
define_id!(ConcernId, "concern");
define_id!(TaskId, "task");
define_id!(JobId, "job");
