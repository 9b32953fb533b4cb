//! Builtin variant sources computed from the object graph

use adcm_common::{AdcmError, Result};
use adcm_config::VariantResolver;
use adcm_persistence::{Graph, ObjectRef, PrototypeType};
use serde_json::Value;

/// Resolves builtin sources for parameters of one object
pub struct GraphVariants<'a> {
    graph: &'a Graph,
    object: ObjectRef,
}

impl<'a> GraphVariants<'a> {
    pub fn new(graph: &'a Graph, object: ObjectRef) -> Self {
        Self { graph, object }
    }

    fn cluster(&self) -> Option<adcm_persistence::ClusterId> {
        self.graph.cluster_of(self.object)
    }

    fn hosts_in_cluster(&self, args: &Value) -> Vec<String> {
        let Some(cluster) = self.cluster() else {
            return Vec::new();
        };
        let service = args.get("service").and_then(Value::as_str);
        let component = args.get("component").and_then(Value::as_str);
        let mut hosts: Vec<String> = match service {
            None => self
                .graph
                .hosts_of_cluster(cluster)
                .iter()
                .map(|h| h.fqdn.clone())
                .collect(),
            Some(service) => {
                let Some(service) = self.graph.service_by_name(cluster, service) else {
                    return Vec::new();
                };
                let host_ids = match component {
                    Some(name) => match self.graph.component_by_name(service.id, name) {
                        Some(c) => self.graph.hosts_of_component(c.id),
                        None => return Vec::new(),
                    },
                    None => self.graph.hosts_of_service(service.id),
                };
                host_ids
                    .into_iter()
                    .filter_map(|id| self.graph.host(id).ok().map(|h| h.fqdn.clone()))
                    .collect()
            }
        };
        hosts.sort();
        hosts
    }

    fn services_to_add(&self) -> Vec<String> {
        let Some(cluster) = self.cluster() else {
            return Vec::new();
        };
        let Ok(bundle) = self.graph.bundle_of(ObjectRef::Cluster(cluster)) else {
            return Vec::new();
        };
        self.graph
            .prototypes
            .values()
            .filter(|p| p.bundle_id == bundle.id && p.kind == PrototypeType::Service)
            .filter(|p| self.graph.service_by_name(cluster, &p.name).is_none())
            .map(|p| p.name.clone())
            .collect()
    }
}

impl VariantResolver for GraphVariants<'_> {
    fn builtin(&self, name: &str, args: &Value) -> Result<Vec<String>> {
        let values = match name {
            "host" => self.graph.hosts.values().map(|h| h.fqdn.clone()).collect(),
            "host_in_cluster" => self.hosts_in_cluster(args),
            "host_not_in_clusters" => self
                .graph
                .hosts
                .values()
                .filter(|h| h.cluster_id.is_none())
                .map(|h| h.fqdn.clone())
                .collect(),
            "service_in_cluster" => match self.cluster() {
                Some(cluster) => self
                    .graph
                    .services_of(cluster)
                    .iter()
                    .map(|s| self.graph.prototype_name(ObjectRef::Service(s.id)))
                    .collect(),
                None => Vec::new(),
            },
            "service_to_add" => self.services_to_add(),
            other => {
                return Err(AdcmError::ConfigValue(format!(
                    "unknown builtin variant source `{}`",
                    other
                )));
            }
        };
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use serde_json::json;

    #[test]
    fn test_builtin_sources() {
        let fx = Fixture::new();
        fx.add_service("s1");
        fx.add_hosts_to_cluster(1);
        let graph = fx.core.snapshot();
        let variants = GraphVariants::new(&graph, ObjectRef::Cluster(fx.cluster));

        assert_eq!(variants.builtin("host_in_cluster", &Value::Null).unwrap(), vec!["h1.example.com"]);
        assert_eq!(variants.builtin("host_not_in_clusters", &Value::Null).unwrap().len(), 2);
        assert_eq!(variants.builtin("service_in_cluster", &Value::Null).unwrap(), vec!["s1"]);
        assert_eq!(variants.builtin("service_to_add", &Value::Null).unwrap(), vec!["s2"]);
        assert!(variants.builtin("host_in_cluster", &json!({"service": "s9"})).unwrap().is_empty());
        assert!(variants.builtin("nope", &Value::Null).is_err());
    }
}
