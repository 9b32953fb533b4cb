//! Resolving the objects a plugin call acts on
//!
//! Targets are found by an ordered chain of detectors; the first one that
//! yields anything wins:
//! - `from_objects`: the explicit `objects` list of the call
//! - `from_context`: a `type` relative to the job context, or the context owner itself

use adcm_common::{AdcmError, Result};
use adcm_persistence::{Graph, HostId, ObjectRef, ServiceId};
use adcm_scheduler::JobContext;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Argument keys consumed by target detection
pub const TARGET_KEYS: [&str; 5] = ["type", "service_name", "component_name", "host_id", "objects"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Cluster,
    Service,
    Component,
    #[serde(alias = "hostprovider")]
    Provider,
    Host,
}

/// One object named relative to the job context
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub component_name: Option<String>,
    #[serde(default)]
    pub host_id: Option<HostId>,
}

/// Target part of a plugin call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetArgs {
    pub objects: Vec<TargetSpec>,
    pub relative: Option<TargetSpec>,
}

impl TargetArgs {
    /// Move the target keys out of `args`
    pub fn split_from(args: &mut Map<String, Value>) -> Result<Self> {
        let objects = match args.remove("objects") {
            Some(Value::Null) | None => Vec::new(),
            Some(list) => serde_json::from_value(list)?,
        };
        let mut relative = Map::new();
        for key in TARGET_KEYS.iter().filter(|k| **k != "objects") {
            if let Some(value) = args.remove(*key) {
                relative.insert(key.to_string(), value);
            }
        }
        let relative = if relative.is_empty() {
            None
        } else if relative.contains_key("type") {
            Some(serde_json::from_value(Value::Object(relative))?)
        } else {
            return Err(AdcmError::Validation(
                "service_name, component_name and host_id need a type".to_string(),
            ));
        };
        Ok(Self { objects, relative })
    }
}

/// Run the detector chain
pub fn detect(graph: &Graph, context: &JobContext, args: &TargetArgs) -> Result<Vec<ObjectRef>> {
    let found = from_objects(graph, context, &args.objects)?;
    if !found.is_empty() {
        return Ok(found);
    }
    from_context(graph, context, args.relative.as_ref())
}

pub fn from_objects(graph: &Graph, context: &JobContext, objects: &[TargetSpec]) -> Result<Vec<ObjectRef>> {
    let mut targets = Vec::with_capacity(objects.len());
    for spec in objects {
        let target = resolve(graph, context, spec)?;
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    Ok(targets)
}

pub fn from_context(
    graph: &Graph,
    context: &JobContext,
    relative: Option<&TargetSpec>,
) -> Result<Vec<ObjectRef>> {
    let target = match relative {
        Some(spec) => resolve(graph, context, spec)?,
        None => context
            .owner()
            .ok_or_else(|| AdcmError::Validation("job context has no owner".to_string()))?,
    };
    Ok(vec![target])
}

/// Find the object `spec` names from the point of view of `context`
pub fn resolve(graph: &Graph, context: &JobContext, spec: &TargetSpec) -> Result<ObjectRef> {
    let target = match spec.kind {
        TargetKind::Cluster => ObjectRef::Cluster(context_cluster(context)?),
        TargetKind::Service => ObjectRef::Service(service(graph, context, spec)?),
        TargetKind::Component => match &spec.component_name {
            Some(name) => {
                let service = service(graph, context, spec)?;
                let component = graph
                    .component_by_name(service, name)
                    .ok_or_else(|| AdcmError::not_found("component", name))?;
                ObjectRef::Component(component.id)
            }
            None => ObjectRef::Component(
                context
                    .component_id
                    .ok_or_else(|| missing("component"))?,
            ),
        },
        TargetKind::Provider => match context.provider_id {
            Some(id) => ObjectRef::Provider(id),
            None => {
                let host = context.host_id.ok_or_else(|| missing("provider"))?;
                ObjectRef::Provider(graph.host(host)?.provider_id)
            }
        },
        TargetKind::Host => ObjectRef::Host(
            spec.host_id
                .or(context.host_id)
                .ok_or_else(|| missing("host"))?,
        ),
    };
    graph.object(target)?;
    Ok(target)
}

fn service(graph: &Graph, context: &JobContext, spec: &TargetSpec) -> Result<ServiceId> {
    match &spec.service_name {
        Some(name) => graph
            .service_by_name(context_cluster(context)?, name)
            .map(|s| s.id)
            .ok_or_else(|| AdcmError::not_found("service", name)),
        None => context.service_id.ok_or_else(|| missing("service")),
    }
}

fn context_cluster(context: &JobContext) -> Result<adcm_persistence::ClusterId> {
    context.cluster_id.ok_or_else(|| missing("cluster"))
}

fn missing(kind: &'static str) -> AdcmError {
    AdcmError::not_found(kind, "in job context")
}
