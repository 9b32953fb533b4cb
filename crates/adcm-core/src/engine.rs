//! The engine handle shared by every caller
//!
//! `AdcmCore` owns the store and the collaborator seams. Each mutating
//! operation goes through [`AdcmCore::transaction`]: RBAC is asked first,
//! the change and the concern recompute are committed together, and one
//! audit record is emitted whatever the outcome.

use std::sync::Arc;

use adcm_common::{
    AdcmError, AdcmPaths, AllowAll, AuditRecord, AuditResult, AuditSink, PermissionChecker,
    Result, SecretVault, TracingAuditSink,
};
use adcm_persistence::{Graph, Store};
use tracing::{debug, warn};

use crate::concern;
use crate::context::OpContext;

#[derive(Clone)]
pub struct AdcmCore {
    store: Arc<Store>,
    vault: Arc<SecretVault>,
    rbac: Arc<dyn PermissionChecker>,
    audit: Arc<dyn AuditSink>,
    paths: AdcmPaths,
}

impl std::fmt::Debug for AdcmCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdcmCore")
            .field("store", &self.store)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl AdcmCore {
    pub fn new(store: Arc<Store>, vault: Arc<SecretVault>) -> Self {
        Self {
            store,
            vault,
            rbac: Arc::new(AllowAll),
            audit: Arc::new(TracingAuditSink),
            paths: AdcmPaths::default(),
        }
    }

    pub fn with_permissions(mut self, rbac: Arc<dyn PermissionChecker>) -> Self {
        self.rbac = rbac;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_paths(mut self, paths: AdcmPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn vault(&self) -> &SecretVault {
        &self.vault
    }

    pub fn paths(&self) -> &AdcmPaths {
        &self.paths
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Consistent view of the last committed graph
    pub fn snapshot(&self) -> Arc<Graph> {
        self.store.snapshot()
    }

    /// Ask RBAC; a refusal is audited and returned as `Forbidden`
    pub fn authorize(&self, ctx: &OpContext, operation: &str, object: Option<&str>) -> Result<()> {
        if self
            .rbac
            .has_permission(&ctx.actor, operation, object.unwrap_or("-"))
        {
            return Ok(());
        }
        warn!(actor = %ctx.actor.name, operation, "Permission denied");
        self.audit.record(AuditRecord::new(
            operation,
            object.map(str::to_string),
            AuditResult::Denied,
            &ctx.actor,
        ));
        Err(AdcmError::Forbidden(format!(
            "{} is not allowed to {}",
            ctx.actor.name, operation
        )))
    }

    /// Run one audited mutation and recompute concerns before commit
    pub fn transaction<T>(
        &self,
        ctx: &OpContext,
        operation: &str,
        object: Option<String>,
        f: impl FnOnce(&mut Graph) -> Result<T>,
    ) -> Result<T> {
        self.authorize(ctx, operation, object.as_deref())?;
        let result = self.store.write(|graph| {
            let value = f(graph)?;
            concern::recompute(graph);
            Ok(value)
        });
        let record = match &result {
            Ok(_) => AuditRecord::new(operation, object, AuditResult::Success, &ctx.actor),
            Err(e) => AuditRecord::new(operation, object, AuditResult::Fail, &ctx.actor)
                .with_detail(e.to_string()),
        };
        self.audit.record(record);
        match &result {
            Ok(_) => debug!(operation, actor = %ctx.actor.name, "Operation committed"),
            Err(e) => debug!(operation, actor = %ctx.actor.name, error = %e, "Operation rejected"),
        }
        result
    }

    /// Unaudited mutation issued by the engine itself
    pub fn internal<T>(&self, f: impl FnOnce(&mut Graph) -> Result<T>) -> Result<T> {
        self.store.write(|graph| {
            let value = f(graph)?;
            concern::recompute(graph);
            Ok(value)
        })
    }
}
