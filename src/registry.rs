//! Live controller registry.
//!
//! One controller is live per configured instance; the registry is the
//! shared map device polls resolve against. Replacement is atomic under a
//! reader-writer lock (a dispatch that reads an instance observes either
//! the old or the new controller, never a half-constructed one), and the
//! displaced controller is stopped so late polls against a stale `Arc`
//! drain to empty tasks.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{info, warn};
use once_cell::sync::Lazy;

use crate::account::AccountStore;
use crate::controllers::{
    BootstrapController, CircleController, CircleTarget, EventSink, IvController, JobController,
    LevelingController, QuestController, SmartRaidController, Task, TaskOptions,
};
use crate::cooldown::{CooldownPolicy, CooldownTracker};
use crate::error::{DispatchError, Result};
use crate::geofence::{CoverageConfig, Geofence};
use crate::instance::{GeofenceStore, InstanceConfig, InstanceKind};
use crate::Coordinate;

/// Registry of live job controllers, keyed by instance name.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: RwLock<HashMap<String, Arc<dyn JobController>>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a controller, atomically replacing any live one for the
    /// same instance. The displaced controller is stopped and returned.
    pub fn install(&self, controller: Arc<dyn JobController>) -> Option<Arc<dyn JobController>> {
        let name = controller.name().to_string();
        let displaced = self
            .write()
            .insert(name.clone(), controller);
        if let Some(old) = &displaced {
            old.stop();
            info!("[Registry] replaced instance '{}'", name);
        } else {
            info!("[Registry] installed instance '{}'", name);
        }
        displaced
    }

    /// Stop and drop the controller for an instance.
    pub fn remove(&self, instance: &str) -> Option<Arc<dyn JobController>> {
        let removed = self.write().remove(instance);
        if let Some(controller) = &removed {
            controller.stop();
            info!("[Registry] removed instance '{}'", instance);
        }
        removed
    }

    pub fn get(&self, instance: &str) -> Option<Arc<dyn JobController>> {
        self.read().get(instance).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Dispatch entry point for the device-facing endpoint. An unknown
    /// instance is a configuration problem, not a device error: the device
    /// gets the empty task and the miss is logged.
    pub fn get_task(&self, instance: &str, options: &TaskOptions) -> Task {
        match self.get(instance) {
            Some(controller) => controller.get_task(options),
            None => {
                warn!(
                    "[Registry] poll from {} for unknown instance '{}'",
                    options.device_uuid, instance
                );
                Task::empty()
            }
        }
    }

    /// Status line for one instance, for the admin surface.
    pub fn status(&self, instance: &str) -> Option<String> {
        self.get(instance).map(|c| c.get_status())
    }

    /// Reload one instance's controller state. False when unknown.
    pub fn reload(&self, instance: &str) -> bool {
        match self.get(instance) {
            Some(controller) => {
                controller.reload();
                true
            }
            None => false,
        }
    }

    /// Reload every live controller.
    pub fn reload_all(&self) {
        for controller in self.read().values() {
            controller.reload();
        }
    }

    /// Stop every live controller and clear the registry.
    pub fn stop_all(&self) {
        let mut controllers = self.write();
        for controller in controllers.values() {
            controller.stop();
        }
        controllers.clear();
        info!("[Registry] stopped all instances");
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn JobController>>> {
        self.controllers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn JobController>>> {
        self.controllers.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Process-wide registry instance.
pub static REGISTRY: Lazy<ControllerRegistry> = Lazy::new(ControllerRegistry::new);

/// Run `f` against the process-wide registry.
pub fn with_registry<F, R>(f: F) -> R
where
    F: FnOnce(&ControllerRegistry) -> R,
{
    f(&REGISTRY)
}

// ============================================================================
// Controller construction
// ============================================================================

/// Build a live controller for an instance configuration.
///
/// Geofence polygons are resolved once, here; `reload` recomputes derived
/// coordinate state but a geofence edit requires rebuilding and
/// re-installing the controller. An unknown geofence name is a
/// construction error; a known-but-empty fence degrades to a controller
/// that serves empty tasks.
pub fn build_controller(
    config: &InstanceConfig,
    geofences: &dyn GeofenceStore,
    accounts: Arc<dyn AccountStore>,
    events: EventSink,
) -> Result<Arc<dyn JobController>> {
    let mut polygons: Vec<Vec<Coordinate>> = Vec::new();
    for fence_name in &config.geofence_names {
        match geofences.polygons(fence_name)? {
            Some(mut rings) => polygons.append(&mut rings),
            None => {
                return Err(DispatchError::UnknownGeofence {
                    name: fence_name.clone(),
                })
            }
        }
    }
    let geofence = Geofence::new(config.name.clone(), polygons);
    let coverage = CoverageConfig::at_level(config.data.s2_cell_level(), config.data.max_cells());

    let policy = CooldownPolicy {
        limit_secs: config
            .data
            .cooldown_limit_secs
            .unwrap_or(CooldownPolicy::default().limit_secs),
    };
    let cooldown = CooldownTracker::new(accounts, policy);

    let controller: Arc<dyn JobController> = match config.kind {
        InstanceKind::CirclePokemon
        | InstanceKind::DynamicRoute
        | InstanceKind::FindTth
        | InstanceKind::Custom => Arc::new(CircleController::new(
            config.name.clone(),
            geofence,
            coverage,
            CircleTarget::Pokemon,
            config.min_level,
            config.max_level,
            config.data.optimize_route(),
        )),
        InstanceKind::CircleRaid => Arc::new(CircleController::new(
            config.name.clone(),
            geofence,
            coverage,
            CircleTarget::Raid,
            config.min_level,
            config.max_level,
            config.data.optimize_route(),
        )),
        InstanceKind::SmartRaid => Arc::new(SmartRaidController::new(
            config.name.clone(),
            geofence,
            coverage,
            config.min_level,
            config.max_level,
        )),
        InstanceKind::AutoQuest => Arc::new(QuestController::new(
            config.name.clone(),
            geofence,
            coverage,
            config.data.quest_mode(),
            config.min_level,
            config.max_level,
            cooldown,
            events,
        )),
        InstanceKind::PokemonIv => Arc::new(IvController::new(
            config.name.clone(),
            config.min_level,
            config.max_level,
            config.data.iv_queue_limit(),
        )),
        InstanceKind::Bootstrap => Arc::new(BootstrapController::new(
            config.name.clone(),
            geofence,
            coverage,
            config.min_level,
            config.max_level,
            events,
        )),
        InstanceKind::Leveling => Arc::new(LevelingController::new(
            config.name.clone(),
            geofence,
            coverage,
            config.min_level,
            config.max_level,
            config.data.spin_limit(),
            config.data.xp_window(),
            cooldown,
            events,
        )),
    };

    Ok(controller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::MemoryAccountStore;
    use crate::controllers::{event_sink, TaskAction};
    use crate::instance::MemoryGeofenceStore;
    use std::thread;

    fn square_fence() -> Vec<Vec<Coordinate>> {
        vec![vec![
            Coordinate::new(51.500, -0.130),
            Coordinate::new(51.500, -0.120),
            Coordinate::new(51.510, -0.120),
            Coordinate::new(51.510, -0.130),
        ]]
    }

    fn circle_controller(name: &str, coords: Vec<Coordinate>) -> Arc<dyn JobController> {
        Arc::new(CircleController::from_coordinates(
            name,
            coords,
            CircleTarget::Pokemon,
            0,
            50,
            false,
        ))
    }

    #[test]
    fn test_install_get_remove() {
        let registry = ControllerRegistry::new();
        assert!(registry.is_empty());

        let coords = vec![Coordinate::new(51.5, -0.13)];
        assert!(registry.install(circle_controller("area-1", coords)).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("area-1").is_some());
        assert!(registry.status("area-1").is_some());

        assert!(registry.remove("area-1").is_some());
        assert!(registry.get("area-1").is_none());
        assert!(registry.remove("area-1").is_none());
    }

    #[test]
    fn test_replace_stops_displaced_controller() {
        let registry = ControllerRegistry::new();
        let coords = vec![Coordinate::new(51.5, -0.13)];

        registry.install(circle_controller("area-1", coords.clone()));
        let stale = registry.get("area-1").unwrap();

        let displaced = registry.install(circle_controller("area-1", coords));
        assert!(displaced.is_some());

        // A poll through a stale handle drains to the empty task
        assert!(stale.get_task(&TaskOptions::for_device("dev-1")).is_empty());
        // The live controller still serves
        let task = registry.get_task("area-1", &TaskOptions::for_device("dev-1"));
        assert_eq!(task.action, TaskAction::ScanPokemon);
    }

    #[test]
    fn test_unknown_instance_serves_empty() {
        let registry = ControllerRegistry::new();
        let task = registry.get_task("nowhere", &TaskOptions::for_device("dev-1"));
        assert!(task.is_empty());
        assert!(registry.status("nowhere").is_none());
        assert!(!registry.reload("nowhere"));
    }

    #[test]
    fn test_dispatch_during_replacement() {
        let registry = Arc::new(ControllerRegistry::new());
        let coords: Vec<Coordinate> = (0..16)
            .map(|i| Coordinate::new(51.5 + i as f64 * 0.001, -0.13))
            .collect();
        registry.install(circle_controller("area-1", coords.clone()));

        let pollers: Vec<_> = (0..4)
            .map(|d| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let options = TaskOptions::for_device(format!("dev-{}", d));
                    for _ in 0..200 {
                        // Old or new controller, never a broken one
                        let _task = registry.get_task("area-1", &options);
                    }
                })
            })
            .collect();

        for _ in 0..20 {
            registry.install(circle_controller("area-1", coords.clone()));
        }

        for handle in pollers {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_build_controller_kinds() {
        let fences = MemoryGeofenceStore::new();
        fences.insert("west", square_fence());
        let accounts: Arc<dyn AccountStore> = Arc::new(MemoryAccountStore::new());

        for kind in [
            InstanceKind::CirclePokemon,
            InstanceKind::CircleRaid,
            InstanceKind::SmartRaid,
            InstanceKind::AutoQuest,
            InstanceKind::PokemonIv,
            InstanceKind::Bootstrap,
            InstanceKind::Leveling,
        ] {
            let mut config = InstanceConfig::new("inst", kind);
            config.geofence_names = vec!["west".to_string()];
            let controller =
                build_controller(&config, &fences, Arc::clone(&accounts), event_sink()).unwrap();
            assert_eq!(controller.name(), "inst");
            // Every variant responds to a poll without erroring
            let _task = controller.get_task(&TaskOptions::for_device("dev-1"));
        }
    }

    #[test]
    fn test_build_controller_unknown_geofence() {
        let fences = MemoryGeofenceStore::new();
        let accounts: Arc<dyn AccountStore> = Arc::new(MemoryAccountStore::new());
        let mut config = InstanceConfig::new("inst", InstanceKind::CirclePokemon);
        config.geofence_names = vec!["missing".to_string()];

        let err = match build_controller(&config, &fences, accounts, event_sink()) {
            Ok(_) => panic!("expected build_controller to fail with UnknownGeofence"),
            Err(e) => e,
        };
        assert!(matches!(err, DispatchError::UnknownGeofence { .. }));
    }

    #[test]
    fn test_empty_fence_degrades_to_empty_tasks() {
        let fences = MemoryGeofenceStore::new();
        let accounts: Arc<dyn AccountStore> = Arc::new(MemoryAccountStore::new());
        let config = InstanceConfig::new("bare", InstanceKind::CirclePokemon);

        let controller = build_controller(&config, &fences, accounts, event_sink()).unwrap();
        assert!(controller.get_task(&TaskOptions::for_device("dev-1")).is_empty());
    }

    #[test]
    fn test_global_registry_accessor() {
        with_registry(|registry| {
            let name = "global-test-instance";
            registry.install(circle_controller(name, vec![Coordinate::new(0.0, 0.0)]));
            assert!(registry.get(name).is_some());
            registry.remove(name);
        });
    }
}
