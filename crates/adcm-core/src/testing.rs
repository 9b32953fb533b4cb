//! Sample bundles and a ready-made cluster for tests
//!
//! `Fixture::new` loads a cluster bundle (`demo` 1.0 with services `s1` and
//! `s2`), its 2.0 upgrade and an ssh-style provider bundle, then creates
//! cluster `c1`, provider `p1` and three hosts outside the cluster.

use std::path::Path;
use std::sync::Arc;

use adcm_common::{AdcmPaths, MemoryAuditSink, Principal, SecretVault};
use adcm_persistence::{
    BundleId, ClusterId, ComponentId, HcEntry, HostId, ObjectRef, PrototypeId, PrototypeType,
    ProviderId, ServiceId, Store,
};

use crate::bundle::BundleManifest;
use crate::context::OpContext;
use crate::engine::AdcmCore;

pub const CLUSTER_BUNDLE: &str = r#"
- type: cluster
  name: demo
  version: "1.0"
  allow_maintenance_mode: true
  config:
    - {name: integer, type: integer, default: 10, group_customization: true}
    - {name: string, type: string, default: value}
    - {name: password, type: password, required: false}
  actions:
    install:
      script: install.yaml
      state_available: [created]
      on_success: {state: installed, multi_state_set: [deployed]}
      on_fail: {state: failed}
    deploy:
      type: task
      scripts:
        - {name: prepare, script: prepare.yaml}
        - {name: apply, script: apply.yaml}
        - {name: finish, script: finish.yaml, on_fail: {multi_state_set: [finish_failed]}}
      on_success: {state: deployed}
      allow_to_terminate: true
    expand:
      type: task
      scripts:
        - {name: place, script: place.yaml}
        - {name: apply_hc, script: hc_apply, script_type: internal}
        - {name: verify, script: verify.yaml}
      hc_acl:
        - {service: s1, component: a, action: add}
        - {service: s1, component: a, action: remove}
    scale:
      script: scale.yaml
      hc_acl:
        - {service: s1, component: a, action: add}
        - {service: s1, component: a, action: remove}
    probe:
      script: probe.yaml
      allow_to_terminate: true
      allow_in_maintenance_mode: true
      available_in_concerns: true
      allowed_concern_causes: [config, host_component]
- type: service
  name: s1
  version: "1.0"
  required: true
  config:
    - {name: port, type: integer, default: 8080}
  actions:
    check:
      script: check.yaml
      allow_for_action_host_group: true
    restart:
      script: restart.yaml
      host_action: true
  components:
    a:
      constraint: [1, "+"]
      config:
        - {name: heap, type: string, default: 1g, group_customization: true}
    b:
      constraint: [1]
- type: service
  name: s2
  version: "1.0"
  config:
    - {name: token, type: string}
  actions:
    adcm_turn_on_maintenance_mode:
      script: mm_on.yaml
      allow_in_maintenance_mode: true
    adcm_turn_off_maintenance_mode:
      script: mm_off.yaml
      allow_in_maintenance_mode: true
  components:
    a:
      constraint: [0, "+"]
    b:
      constraint: [0, "+"]
      bound_to: {service: s1, component: a}
"#;

pub const UPGRADE_BUNDLE: &str = r#"
- type: cluster
  name: demo
  version: "2.0"
  allow_maintenance_mode: true
  config:
    - {name: integer, type: integer, default: 10, group_customization: true}
    - {name: string, type: string, default: value}
    - {name: password, type: password, required: false}
    - {name: added, type: string, default: fresh}
  upgrade:
    - name: plain
      versions: {min: "1.0", max_strict: "2.0"}
      states: {available: [created, installed], on_success: upgraded}
    - name: scripted
      versions: {min: "1.0", max_strict: "2.0"}
      states: {available: [created, installed], on_success: upgraded}
      scripts:
        - {name: pre, script: pre.yaml}
        - {name: switch, script: bundle_switch, script_type: internal}
        - {name: post, script: post.yaml}
- type: service
  name: s1
  version: "2.0"
  required: true
  config:
    - {name: port, type: integer, default: 8080}
  components:
    a:
      constraint: [1, "+"]
    c:
      constraint: [0, "+"]
"#;

pub const PROVIDER_BUNDLE: &str = r#"
- type: provider
  name: ssh
  version: "1.0"
  config:
    - {name: user, type: string, default: root}
  actions:
    check_all:
      script: check_all.yaml
- type: host
  name: ssh-host
  version: "1.0"
  config:
    - {name: port, type: integer, default: 22}
  actions:
    reboot:
      script: reboot.yaml
"#;

const IMPORTER_BUNDLE: &str = r#"
- type: cluster
  name: importer
  version: "1.0"
  import:
    exporter: {required: true}
"#;

const EXPORTER_BUNDLE: &str = r#"
- type: cluster
  name: exporter
  version: "1.0"
  export: [endpoint]
  config:
    - name: endpoint
      type: group
      subs:
        - {name: url, type: string, default: "http://exporter"}
"#;

pub struct Fixture {
    pub core: AdcmCore,
    pub ctx: OpContext,
    pub audit: Arc<MemoryAuditSink>,
    pub cluster_bundle: BundleId,
    pub upgrade_bundle: BundleId,
    pub provider_bundle: BundleId,
    pub cluster: ClusterId,
    pub provider: ProviderId,
    pub hosts: Vec<HostId>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_paths(AdcmPaths::default())
    }

    /// Fixture whose engine writes job and task files under `base`
    pub fn in_dir(base: &Path) -> Self {
        Self::with_paths(AdcmPaths::under(base))
    }

    fn with_paths(paths: AdcmPaths) -> Self {
        let audit = Arc::new(MemoryAuditSink::new());
        let core = AdcmCore::new(
            Arc::new(Store::in_memory()),
            Arc::new(SecretVault::new(&[7u8; 32])),
        )
        .with_audit(audit.clone())
        .with_paths(paths);
        let ctx = OpContext::api(Principal::new("admin"));

        let load = |text: &str| {
            let manifest = BundleManifest::from_yaml(text).expect("sample manifest parses");
            core.load_bundle(&ctx, &manifest).expect("sample bundle loads")
        };
        let cluster_bundle = load(CLUSTER_BUNDLE);
        let upgrade_bundle = load(UPGRADE_BUNDLE);
        let provider_bundle = load(PROVIDER_BUNDLE);

        let mut fixture = Self {
            core,
            ctx,
            audit,
            cluster_bundle,
            upgrade_bundle,
            provider_bundle,
            cluster: ClusterId(0),
            provider: ProviderId(0),
            hosts: Vec::new(),
        };
        let cluster_prototype = fixture.cluster_prototype();
        fixture.cluster = fixture
            .core
            .create_cluster(&fixture.ctx, cluster_prototype, "c1", "")
            .expect("cluster is created");
        let provider_prototype = fixture.prototype(provider_bundle, PrototypeType::Provider, "ssh");
        fixture.provider = fixture
            .core
            .create_provider(&fixture.ctx, provider_prototype, "p1", "")
            .expect("provider is created");
        let host_prototype = fixture.host_prototype();
        for fqdn in ["h1.example.com", "h2.example.com", "h3.example.com"] {
            let host = fixture
                .core
                .create_host(&fixture.ctx, fixture.provider, host_prototype, fqdn, "")
                .expect("host is created");
            fixture.hosts.push(host);
        }
        fixture
    }

    pub fn prototype(&self, bundle: BundleId, kind: PrototypeType, name: &str) -> PrototypeId {
        self.core
            .snapshot()
            .prototypes
            .values()
            .find(|p| p.bundle_id == bundle && p.kind == kind && p.name == name)
            .map(|p| p.id)
            .unwrap_or_else(|| panic!("no {} prototype {}", kind, name))
    }

    pub fn cluster_prototype(&self) -> PrototypeId {
        self.prototype(self.cluster_bundle, PrototypeType::Cluster, "demo")
    }

    pub fn host_prototype(&self) -> PrototypeId {
        self.prototype(self.provider_bundle, PrototypeType::Host, "ssh-host")
    }

    pub fn add_service(&self, name: &str) -> ServiceId {
        let prototype = self.prototype(self.cluster_bundle, PrototypeType::Service, name);
        self.core
            .add_service(&self.ctx, self.cluster, prototype)
            .expect("service is added")
    }

    pub fn component(&self, service: ServiceId, name: &str) -> ComponentId {
        self.core
            .snapshot()
            .component_by_name(service, name)
            .map(|c| c.id)
            .unwrap_or_else(|| panic!("no component {}", name))
    }

    /// Add the first `count` hosts to `c1`
    pub fn add_hosts_to_cluster(&self, count: usize) {
        for host in self.hosts.iter().take(count) {
            self.core
                .add_host_to_cluster(&self.ctx, self.cluster, *host)
                .expect("host joins the cluster");
        }
    }

    /// `s1` added, h1 and h2 in the cluster, mapped `(s1,a,h1) (s1,a,h2) (s1,b,h1)`
    pub fn mapped_cluster(&self) -> (ServiceId, Vec<HcEntry>) {
        let s1 = self.add_service("s1");
        self.add_hosts_to_cluster(2);
        let a = self.component(s1, "a");
        let b = self.component(s1, "b");
        let hc = vec![
            HcEntry::new(s1, a, self.hosts[0]),
            HcEntry::new(s1, a, self.hosts[1]),
            HcEntry::new(s1, b, self.hosts[0]),
        ];
        self.core
            .set_hostcomponent(&self.ctx, self.cluster, hc.clone())
            .expect("mapping is valid");
        (s1, hc)
    }

    /// Cluster action by name
    pub fn cluster_action(&self, name: &str) -> adcm_persistence::ActionId {
        self.action(ObjectRef::Cluster(self.cluster), name)
    }

    /// Action declared by the prototype of `object`
    pub fn action(&self, object: ObjectRef, name: &str) -> adcm_persistence::ActionId {
        let graph = self.core.snapshot();
        let prototype = graph.prototype_of(object).expect("object exists").id;
        graph
            .actions
            .values()
            .find(|a| a.prototype_id == prototype && a.name == name)
            .map(|a| a.id)
            .unwrap_or_else(|| panic!("no action {} on {}", name, object))
    }

    /// Load an importing and an exporting cluster bundle and create one cluster of each
    pub fn import_pair(&self) -> (ClusterId, ClusterId) {
        let mut clusters = Vec::new();
        for (text, name) in [(IMPORTER_BUNDLE, "importer"), (EXPORTER_BUNDLE, "exporter")] {
            let manifest = BundleManifest::from_yaml(text).expect("sample manifest parses");
            let bundle = self.core.load_bundle(&self.ctx, &manifest).expect("bundle loads");
            let prototype = self.prototype(bundle, PrototypeType::Cluster, name);
            let cluster = self
                .core
                .create_cluster(&self.ctx, prototype, &format!("{}-1", name), "")
                .expect("cluster is created");
            clusters.push(cluster);
        }
        (clusters[0], clusters[1])
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
