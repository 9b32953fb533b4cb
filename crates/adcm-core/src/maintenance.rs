//! Maintenance mode of services, components and hosts
//!
//! A component is effectively in maintenance when its own flag or its
//! service's flag is on. When the prototype ships a dedicated action the
//! switch goes through that action and the flag reads `changing` meanwhile;
//! otherwise it flips at once.

use adcm_common::{
    AdcmError, MM_HOST_TURN_OFF_ACTION, MM_HOST_TURN_ON_ACTION, MM_TURN_OFF_ACTION,
    MM_TURN_ON_ACTION, Result, ensure,
};
use adcm_persistence::{
    ActionId, Graph, MaintenanceMode, MaintenanceModeTransition, ObjectRef, PrototypeId,
};
use serde::Serialize;
use tracing::info;

use crate::concern::ensure_unlocked;
use crate::context::{OpContext, Origin};
use crate::engine::AdcmCore;

/// What a maintenance mode request resolved to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MaintenanceModeOutcome {
    /// The flag was written; `changed` is false when it already had the value
    Applied { changed: bool },
    /// A bundle action performs the switch and must be launched
    ActionRequired {
        action: ActionId,
        transition: MaintenanceModeTransition,
    },
}

/// Own flag of an object; `None` for clusters and providers
pub fn own_mm(graph: &Graph, object: ObjectRef) -> Option<MaintenanceMode> {
    graph.object(object).ok().and_then(|o| o.maintenance_mode())
}

/// Maintenance mode after inheritance from the service
pub fn effective_mm(graph: &Graph, object: ObjectRef) -> MaintenanceMode {
    let own = own_mm(graph, object).unwrap_or_default();
    if let ObjectRef::Component(id) = object {
        if own == MaintenanceMode::Off {
            let service_on = graph
                .component(id)
                .ok()
                .and_then(|c| graph.service(c.service_id).ok())
                .is_some_and(|s| s.maintenance_mode.is_on());
            if service_on {
                return MaintenanceMode::On;
            }
        }
    }
    own
}

pub fn is_effectively_on(graph: &Graph, object: ObjectRef) -> bool {
    effective_mm(graph, object).is_on()
}

fn action_on(graph: &Graph, prototype: PrototypeId, name: &str) -> Option<ActionId> {
    graph
        .actions
        .values()
        .find(|a| a.prototype_id == prototype && a.name == name)
        .map(|a| a.id)
}

/// Decide how `object` reaches `target` without changing anything
pub fn plan_maintenance_mode(
    graph: &Graph,
    object: ObjectRef,
    target: MaintenanceMode,
    origin: Origin,
) -> Result<MaintenanceModeOutcome> {
    ensure!(
        target != MaintenanceMode::Changing,
        AdcmError::Validation("maintenance mode can only be switched on or off".to_string())
    );
    let not_available = || AdcmError::MaintenanceModeNotAvailable(format!("{} {}", object.kind(), graph.display_name(object)));
    let current = own_mm(graph, object).ok_or_else(not_available)?;
    let cluster = graph.cluster_of(object).ok_or_else(not_available)?;
    let cluster_prototype = graph.prototype_of(ObjectRef::Cluster(cluster))?;
    ensure!(cluster_prototype.allow_maintenance_mode, not_available());
    ensure!(
        current != MaintenanceMode::Changing,
        AdcmError::MaintenanceModeNotAvailable(format!(
            "{} {} is already changing its maintenance mode",
            object.kind(),
            graph.display_name(object)
        ))
    );
    ensure_unlocked(graph, object, origin)?;

    if current == target {
        return Ok(MaintenanceModeOutcome::Applied { changed: false });
    }

    let action = match object {
        ObjectRef::Host(_) => action_on(
            graph,
            cluster_prototype.id,
            if target.is_on() {
                MM_HOST_TURN_ON_ACTION
            } else {
                MM_HOST_TURN_OFF_ACTION
            },
        ),
        _ => action_on(
            graph,
            graph.object(object)?.prototype_id(),
            if target.is_on() {
                MM_TURN_ON_ACTION
            } else {
                MM_TURN_OFF_ACTION
            },
        ),
    };
    Ok(match action {
        Some(action) => MaintenanceModeOutcome::ActionRequired {
            action,
            transition: MaintenanceModeTransition {
                object,
                target,
                previous: current,
            },
        },
        None => MaintenanceModeOutcome::Applied { changed: true },
    })
}

/// Write the flag; returns true when it changed
pub fn set_maintenance_mode(graph: &mut Graph, object: ObjectRef, value: MaintenanceMode) -> Result<bool> {
    let target = graph.object_mut(object)?;
    if target.maintenance_mode() == Some(value) {
        return Ok(false);
    }
    if !target.set_maintenance_mode(value) {
        return Err(AdcmError::MaintenanceModeNotAvailable(object.to_string()));
    }
    Ok(true)
}

/// Settle a switch driven by a bundle action
pub fn finish_transition(graph: &mut Graph, transition: &MaintenanceModeTransition, success: bool) -> Result<()> {
    if !graph.exists(transition.object) {
        return Ok(());
    }
    let value = if success {
        transition.target
    } else {
        transition.previous
    };
    set_maintenance_mode(graph, transition.object, value)?;
    Ok(())
}

impl AdcmCore {
    /// Switch maintenance mode directly or report the action that has to do it
    pub fn change_maintenance_mode(
        &self,
        ctx: &OpContext,
        object: ObjectRef,
        target: MaintenanceMode,
    ) -> Result<MaintenanceModeOutcome> {
        let origin = ctx.origin;
        let outcome = self.transaction(ctx, "change_maintenance_mode", Some(object.to_string()), |graph| {
            let outcome = plan_maintenance_mode(graph, object, target, origin)?;
            if outcome == (MaintenanceModeOutcome::Applied { changed: true }) {
                set_maintenance_mode(graph, object, target)?;
            }
            Ok(outcome)
        })?;
        if let MaintenanceModeOutcome::Applied { changed: true } = outcome {
            info!(object = %object, maintenance_mode = %target, "Maintenance mode changed");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn test_service_mm_is_inherited_by_components() {
        let fx = Fixture::new();
        let (s1, _) = fx.mapped_cluster();
        let outcome = fx
            .core
            .change_maintenance_mode(&fx.ctx, ObjectRef::Service(s1), MaintenanceMode::On)
            .unwrap();
        assert_eq!(outcome, MaintenanceModeOutcome::Applied { changed: true });

        let graph = fx.core.snapshot();
        for component in graph.components_of(s1) {
            assert!(is_effectively_on(&graph, ObjectRef::Component(component.id)));
            assert_eq!(component.maintenance_mode, MaintenanceMode::Off);
        }
        for host in &fx.hosts {
            assert!(!is_effectively_on(&graph, ObjectRef::Host(*host)));
        }

        let again = fx
            .core
            .change_maintenance_mode(&fx.ctx, ObjectRef::Service(s1), MaintenanceMode::On)
            .unwrap();
        assert_eq!(again, MaintenanceModeOutcome::Applied { changed: false });
    }

    #[test]
    fn test_orphan_host_has_no_maintenance_mode() {
        let fx = Fixture::new();
        let err = fx
            .core
            .change_maintenance_mode(&fx.ctx, ObjectRef::Host(fx.hosts[2]), MaintenanceMode::On)
            .unwrap_err();
        assert_eq!(err.code(), "MAINTENANCE_MODE_NOT_AVAILABLE");

        let err = fx
            .core
            .change_maintenance_mode(&fx.ctx, ObjectRef::Cluster(fx.cluster), MaintenanceMode::On)
            .unwrap_err();
        assert_eq!(err.code(), "MAINTENANCE_MODE_NOT_AVAILABLE");
    }

    #[test]
    fn test_bundle_action_drives_the_switch() {
        let fx = Fixture::new();
        let s2 = fx.add_service("s2");
        let outcome = fx
            .core
            .change_maintenance_mode(&fx.ctx, ObjectRef::Service(s2), MaintenanceMode::On)
            .unwrap();
        let MaintenanceModeOutcome::ActionRequired { action, transition } = outcome else {
            panic!("expected an action, got {:?}", outcome);
        };
        let graph = fx.core.snapshot();
        assert_eq!(graph.action(action).unwrap().name, MM_TURN_ON_ACTION);
        assert_eq!(transition.previous, MaintenanceMode::Off);
        assert_eq!(graph.service(s2).unwrap().maintenance_mode, MaintenanceMode::Off);

        let mut graph = (*graph).clone();
        set_maintenance_mode(&mut graph, transition.object, MaintenanceMode::Changing).unwrap();
        finish_transition(&mut graph, &transition, false).unwrap();
        assert_eq!(graph.service(s2).unwrap().maintenance_mode, MaintenanceMode::Off);
    }
}
