//! Bootstrap controller.
//!
//! Sweeps a fence exactly once: every covering coordinate is handed out a
//! single time, devices are tracked by their share of the sweep, and
//! completion events fire per device and once globally when the whole
//! fence has been visited.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use log::{info, warn};

use crate::controllers::{
    account_in_bounds, ControllerEvent, EventSink, JobController, Task, TaskAction, TaskOptions,
};
use crate::geofence::{CoverageConfig, Geofence};
use crate::Coordinate;

#[derive(Default, Clone)]
struct DeviceProgress {
    assigned: usize,
    completion_reported: bool,
}

#[derive(Default)]
struct SweepState {
    cursor: usize,
    devices: HashMap<String, DeviceProgress>,
    completed_fired: bool,
}

enum SweepSource {
    Fence {
        geofence: Geofence,
        coverage: CoverageConfig,
    },
    Explicit(Vec<Coordinate>),
}

pub struct BootstrapController {
    name: String,
    min_level: u8,
    max_level: u8,
    source: SweepSource,
    events: EventSink,
    coordinates: RwLock<Arc<Vec<Coordinate>>>,
    state: Mutex<SweepState>,
    stopped: AtomicBool,
}

impl BootstrapController {
    pub fn new(
        name: impl Into<String>,
        geofence: Geofence,
        coverage: CoverageConfig,
        min_level: u8,
        max_level: u8,
        events: EventSink,
    ) -> Self {
        Self::with_source(
            name,
            SweepSource::Fence { geofence, coverage },
            min_level,
            max_level,
            events,
        )
    }

    pub fn from_coordinates(
        name: impl Into<String>,
        coordinates: Vec<Coordinate>,
        min_level: u8,
        max_level: u8,
        events: EventSink,
    ) -> Self {
        Self::with_source(
            name,
            SweepSource::Explicit(coordinates),
            min_level,
            max_level,
            events,
        )
    }

    fn with_source(
        name: impl Into<String>,
        source: SweepSource,
        min_level: u8,
        max_level: u8,
        events: EventSink,
    ) -> Self {
        let name = name.into();
        let coordinates = Self::build_sweep(&name, &source);
        Self {
            name,
            min_level,
            max_level,
            source,
            events,
            coordinates: RwLock::new(Arc::new(coordinates)),
            state: Mutex::new(SweepState::default()),
            stopped: AtomicBool::new(false),
        }
    }

    fn build_sweep(name: &str, source: &SweepSource) -> Vec<Coordinate> {
        let coords = match source {
            SweepSource::Fence { geofence, coverage } => geofence.scan_coordinates(coverage),
            SweepSource::Explicit(coords) => coords.clone(),
        };
        if coords.is_empty() {
            warn!("[Bootstrap] '{}' has no coordinates; serving empty tasks", name);
        } else {
            info!("[Bootstrap] '{}' sweeping {} cells", name, coords.len());
        }
        coords
    }

    fn current_sweep(&self) -> Arc<Vec<Coordinate>> {
        Arc::clone(&self.coordinates.read().unwrap_or_else(|e| e.into_inner()))
    }
}

impl JobController for BootstrapController {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_task(&self, options: &TaskOptions) -> Task {
        if self.stopped.load(Ordering::Acquire) {
            return Task::empty();
        }
        if !account_in_bounds(options, self.min_level, self.max_level) {
            return Task::switch_account(self.min_level, self.max_level);
        }

        let sweep = self.current_sweep();
        if sweep.is_empty() {
            return Task::empty();
        }

        let mut fire_device = false;
        let mut fire_global = false;

        let coord = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

            if state.cursor >= sweep.len() {
                // Sweep exhausted. Report this device's completion once,
                // if it took part at all.
                let progress = state.devices.entry(options.device_uuid.clone()).or_default();
                if progress.assigned > 0 && !progress.completion_reported {
                    progress.completion_reported = true;
                    fire_device = true;
                }
                None
            } else {
                let idx = state.cursor;
                state.cursor += 1;
                state
                    .devices
                    .entry(options.device_uuid.clone())
                    .or_default()
                    .assigned += 1;
                if state.cursor == sweep.len() && !state.completed_fired {
                    state.completed_fired = true;
                    fire_global = true;
                }
                Some(sweep[idx])
            }
        };

        if fire_device {
            info!(
                "[Bootstrap] '{}' device {} finished its share",
                self.name, options.device_uuid
            );
            self.events
                .try_add(ControllerEvent::BootstrapDeviceCompleted {
                    instance: self.name.clone(),
                    device_uuid: options.device_uuid.clone(),
                    completed_at: Utc::now(),
                });
        }
        if fire_global {
            info!("[Bootstrap] '{}' fence fully visited", self.name);
            self.events.try_add(ControllerEvent::BootstrapCompleted {
                instance: self.name.clone(),
                completed_at: Utc::now(),
            });
        }

        match coord {
            Some(coord) => Task::at(
                TaskAction::ScanPokemon,
                coord,
                self.min_level,
                self.max_level,
            ),
            None => Task::empty(),
        }
    }

    fn get_status(&self) -> String {
        let sweep = self.current_sweep();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        format!(
            "Bootstrapping: {}/{}",
            state.cursor.min(sweep.len()),
            sweep.len()
        )
    }

    fn reload(&self) {
        let rebuilt = Self::build_sweep(&self.name, &self.source);
        *self.coordinates.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(rebuilt);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = SweepState::default();
        info!("[Bootstrap] '{}' reloaded", self.name);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        info!("[Bootstrap] '{}' stopped", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::event_sink;

    fn cells(n: usize) -> Vec<Coordinate> {
        (0..n)
            .map(|i| Coordinate::new(51.5 + i as f64 * 0.001, -0.13))
            .collect()
    }

    #[test]
    fn test_one_shot_sweep_and_global_event() {
        let events = event_sink();
        let controller =
            BootstrapController::from_coordinates("boot", cells(3), 0, 50, Arc::clone(&events));
        let options = TaskOptions::for_device("dev-1");

        let mut seen = Vec::new();
        for _ in 0..3 {
            let task = controller.get_task(&options);
            assert!(!task.is_empty());
            seen.push(task.coordinate());
        }
        // Every cell exactly once, in sweep order
        assert_eq!(seen, cells(3));

        let fired = events.to_vec();
        assert_eq!(fired.len(), 1);
        assert!(matches!(fired[0], ControllerEvent::BootstrapCompleted { .. }));
    }

    #[test]
    fn test_device_completion_event() {
        let events = event_sink();
        let controller =
            BootstrapController::from_coordinates("boot", cells(2), 0, 50, Arc::clone(&events));
        let dev1 = TaskOptions::for_device("dev-1");
        let dev2 = TaskOptions::for_device("dev-2");

        controller.get_task(&dev1);
        controller.get_task(&dev2); // fence done here (global event)

        // dev-1 polls again: nothing left, its share is complete
        assert!(controller.get_task(&dev1).is_empty());
        // Repeat polls don't re-fire
        assert!(controller.get_task(&dev1).is_empty());

        let device_events: Vec<_> = events
            .to_vec()
            .into_iter()
            .filter(|e| matches!(e, ControllerEvent::BootstrapDeviceCompleted { .. }))
            .collect();
        assert_eq!(device_events.len(), 1);
        match &device_events[0] {
            ControllerEvent::BootstrapDeviceCompleted { device_uuid, .. } => {
                assert_eq!(device_uuid, "dev-1")
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_uninvolved_device_gets_no_event() {
        let events = event_sink();
        let controller =
            BootstrapController::from_coordinates("boot", cells(1), 0, 50, Arc::clone(&events));

        controller.get_task(&TaskOptions::for_device("worker"));
        // A device that never received work completes nothing
        assert!(controller
            .get_task(&TaskOptions::for_device("bystander"))
            .is_empty());

        assert!(!events
            .to_vec()
            .iter()
            .any(|e| matches!(e, ControllerEvent::BootstrapDeviceCompleted { device_uuid, .. } if device_uuid == "bystander")));
    }

    #[test]
    fn test_status_and_reload() {
        let events = event_sink();
        let controller =
            BootstrapController::from_coordinates("boot", cells(4), 0, 50, events);
        let options = TaskOptions::for_device("dev-1");

        controller.get_task(&options);
        assert_eq!(controller.get_status(), "Bootstrapping: 1/4");

        controller.reload();
        assert_eq!(controller.get_status(), "Bootstrapping: 0/4");
        // Sweep restarts from the first cell
        assert_eq!(controller.get_task(&options).coordinate(), cells(4)[0]);
    }

    #[test]
    fn test_empty_fence() {
        let events = event_sink();
        let controller =
            BootstrapController::from_coordinates("boot", Vec::new(), 0, 50, events);
        assert!(controller.get_task(&TaskOptions::for_device("dev-1")).is_empty());
        assert_eq!(controller.get_status(), "Bootstrapping: 0/0");
    }
}
