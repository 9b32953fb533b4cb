//! Import binds between clusters
//!
//! A cluster or service imports the exported config groups of another
//! cluster or service. The importer's prototype decides what it may import
//! and whether several sources of the same name are allowed.

use adcm_common::{AdcmError, Result, SecretVault, ensure};
use adcm_config::reveal_secrets;
use adcm_persistence::{Bind, BindEnd, BindId, Graph, ImportSpec, ObjectRef};
use serde_json::{Map, Value};
use tracing::info;

use crate::concern::ensure_unlocked;
use crate::context::OpContext;
use crate::engine::AdcmCore;

fn end_object(end: BindEnd) -> ObjectRef {
    match end.service_id {
        Some(service) => ObjectRef::Service(service),
        None => ObjectRef::Cluster(end.cluster_id),
    }
}

fn check_end(graph: &Graph, end: BindEnd) -> Result<()> {
    graph.cluster(end.cluster_id)?;
    if let Some(service) = end.service_id {
        ensure!(
            graph.service(service)?.cluster_id == end.cluster_id,
            AdcmError::BindConflict(format!(
                "service {} does not belong to cluster {}",
                service, end.cluster_id
            ))
        );
    }
    Ok(())
}

fn import_specs(graph: &Graph, end: BindEnd) -> Vec<ImportSpec> {
    graph
        .prototype_of(end_object(end))
        .map(|p| p.imports.clone())
        .unwrap_or_default()
}

fn source_name(graph: &Graph, bind: &Bind) -> String {
    graph.prototype_name(end_object(bind.source))
}

/// Names of required imports of `end` that no bind satisfies
pub fn missing_imports(graph: &Graph, end: BindEnd) -> Vec<String> {
    let binds = graph.binds_of_importer(end.cluster_id, end.service_id);
    import_specs(graph, end)
        .into_iter()
        .filter(|spec| spec.required)
        .filter(|spec| !binds.iter().any(|b| source_name(graph, b) == spec.name))
        .map(|spec| spec.name)
        .collect()
}

fn exported_values(
    graph: &Graph,
    source: BindEnd,
    vault: &SecretVault,
) -> Result<Vec<(String, Value)>> {
    let object = end_object(source);
    let prototype = graph.prototype_of(object)?;
    let Some(log) = graph.current_config_of(object)? else {
        return Ok(Vec::new());
    };
    let config = reveal_secrets(&prototype.config, &log.config, vault)?;
    Ok(prototype
        .exports
        .iter()
        .map(|group| (group.clone(), config.get(group).cloned().unwrap_or(Value::Null)))
        .collect())
}

/// Values imported by `end`, keyed by export group
///
/// A multibind import yields a list with one value per source. Imports with
/// no bind fall back to the importer's own config groups named in `default`.
pub fn import_values(graph: &Graph, end: BindEnd, vault: &SecretVault) -> Result<Value> {
    let binds = graph.binds_of_importer(end.cluster_id, end.service_id);
    let mut out = Map::new();
    for spec in import_specs(graph, end) {
        let sources: Vec<&&Bind> = binds
            .iter()
            .filter(|b| source_name(graph, b) == spec.name)
            .collect();
        if sources.is_empty() {
            if spec.default.is_empty() {
                continue;
            }
            let own = graph
                .current_config_of(end_object(end))?
                .map(|log| log.config.clone())
                .unwrap_or(Value::Null);
            for group in &spec.default {
                let value = own.get(group).cloned().unwrap_or(Value::Null);
                if spec.multibind {
                    out.insert(group.clone(), Value::Array(vec![value]));
                } else {
                    out.insert(group.clone(), value);
                }
            }
            continue;
        }
        for bind in sources {
            for (group, value) in exported_values(graph, bind.source, vault)? {
                if spec.multibind {
                    let slot = out
                        .entry(group)
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(items) = slot {
                        items.push(value);
                    }
                } else {
                    out.insert(group, value);
                }
            }
        }
    }
    Ok(Value::Object(out))
}

/// Create a bind after checking the importer declares the import
pub fn create_bind(graph: &mut Graph, importer: BindEnd, source: BindEnd) -> Result<BindId> {
    check_end(graph, importer)?;
    check_end(graph, source)?;
    ensure!(
        importer.cluster_id != source.cluster_id,
        AdcmError::BindConflict("a cluster can not import from itself".to_string())
    );

    let name = graph.prototype_name(end_object(source));
    let spec = import_specs(graph, importer)
        .into_iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| {
            AdcmError::BindConflict(format!(
                "{} does not import {}",
                end_object(importer),
                name
            ))
        })?;
    ensure!(
        !graph.prototype_of(end_object(source))?.exports.is_empty(),
        AdcmError::BindConflict(format!("{} exports nothing", name))
    );

    let existing = graph.binds_of_importer(importer.cluster_id, importer.service_id);
    ensure!(
        !existing.iter().any(|b| b.source == source),
        AdcmError::BindConflict(format!(
            "bind of {} to {} already exists",
            end_object(importer),
            end_object(source)
        ))
    );
    ensure!(
        spec.multibind || !existing.iter().any(|b| source_name(graph, b) == name),
        AdcmError::BindConflict(format!("import of {} does not allow multibind", name))
    );

    let id: BindId = graph.next_id();
    graph.binds.insert(id, Bind { id, importer, source });
    Ok(id)
}

impl AdcmCore {
    pub fn create_bind(&self, ctx: &OpContext, importer: BindEnd, source: BindEnd) -> Result<BindId> {
        let origin = ctx.origin;
        let object = Some(end_object(importer).to_string());
        let id = self.transaction(ctx, "create_bind", object, |graph| {
            ensure_unlocked(graph, end_object(importer), origin)?;
            create_bind(graph, importer, source)
        })?;
        info!(bind_id = %id, importer = %end_object(importer), source = %end_object(source), "Bind created");
        Ok(id)
    }

    pub fn delete_bind(&self, ctx: &OpContext, bind: BindId) -> Result<()> {
        let origin = ctx.origin;
        self.transaction(ctx, "delete_bind", Some(format!("bind {}", bind)), |graph| {
            let importer = graph.bind(bind)?.importer;
            ensure_unlocked(graph, end_object(importer), origin)?;
            graph.binds.remove(&bind);
            Ok(())
        })?;
        info!(bind_id = %bind, "Bind deleted");
        Ok(())
    }
}
