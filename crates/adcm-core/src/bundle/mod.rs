//! Bundle loading
//!
//! A bundle is read from an already parsed manifest, validated as a whole and
//! stored as immutable prototypes, actions and upgrade rules.

mod loader;
mod manifest;

pub use loader::{accept_license, delete_bundle, load_bundle, validate_manifest};
pub use manifest::{
    ActionDef, BundleManifest, ImportDef, PrototypeDef, UpgradeDef, UpgradeStates, VersionBounds,
};

use adcm_common::Result;
use adcm_persistence::{BundleId, PrototypeId};
use tracing::info;

use crate::context::OpContext;
use crate::engine::AdcmCore;

impl AdcmCore {
    /// Store a bundle; its content lives under `bundles/<hash>/`
    pub fn load_bundle(&self, ctx: &OpContext, manifest: &BundleManifest) -> Result<BundleId> {
        let name = manifest.main().ok().map(|m| format!("bundle {}", m.name));
        let id = self.transaction(ctx, "load_bundle", name, |graph| load_bundle(graph, manifest))?;
        let graph = self.snapshot();
        if let Ok(bundle) = graph.bundle(id) {
            info!(
                bundle_id = %id,
                name = %bundle.name,
                version = %bundle.version,
                edition = %bundle.edition,
                path = %self.paths().bundle_path(&bundle.hash).display(),
                "Bundle loaded"
            );
        }
        Ok(id)
    }

    pub fn delete_bundle(&self, ctx: &OpContext, bundle: BundleId) -> Result<()> {
        self.transaction(ctx, "delete_bundle", Some(format!("bundle {}", bundle)), |graph| {
            delete_bundle(graph, bundle)
        })?;
        info!(bundle_id = %bundle, "Bundle deleted");
        Ok(())
    }

    pub fn accept_license(&self, ctx: &OpContext, prototype: PrototypeId) -> Result<()> {
        self.transaction(
            ctx,
            "accept_license",
            Some(format!("prototype {}", prototype)),
            |graph| accept_license(graph, prototype),
        )
    }
}
