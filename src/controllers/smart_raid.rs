//! Smart raid controller.
//!
//! Keeps a per-gym freshness map and always dispatches the gym whose raid
//! data has gone stale the longest. The map is seeded from the fence's
//! coordinate set and refreshed by the data pipeline through
//! [`SmartRaidController::update_gym`]; dispatching a gym also stamps it so
//! concurrent devices fan out instead of piling onto one gym.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::controllers::{account_in_bounds, JobController, Task, TaskAction, TaskOptions};
use crate::geofence::{CoverageConfig, Geofence};
use crate::Coordinate;

#[derive(Debug, Clone)]
struct GymState {
    coord: Coordinate,
    last_updated: DateTime<Utc>,
}

enum GymSource {
    Fence {
        geofence: Geofence,
        coverage: CoverageConfig,
    },
    Explicit(Vec<(String, Coordinate)>),
}

pub struct SmartRaidController {
    name: String,
    min_level: u8,
    max_level: u8,
    source: GymSource,
    gyms: Mutex<HashMap<String, GymState>>,
    stopped: AtomicBool,
}

impl SmartRaidController {
    pub fn new(
        name: impl Into<String>,
        geofence: Geofence,
        coverage: CoverageConfig,
        min_level: u8,
        max_level: u8,
    ) -> Self {
        Self::with_source(name, GymSource::Fence { geofence, coverage }, min_level, max_level)
    }

    /// Controller over known gyms (id, location) pairs.
    pub fn from_gyms(
        name: impl Into<String>,
        gyms: Vec<(String, Coordinate)>,
        min_level: u8,
        max_level: u8,
    ) -> Self {
        Self::with_source(name, GymSource::Explicit(gyms), min_level, max_level)
    }

    fn with_source(
        name: impl Into<String>,
        source: GymSource,
        min_level: u8,
        max_level: u8,
    ) -> Self {
        let name = name.into();
        let gyms = Self::build_gyms(&name, &source);
        Self {
            name,
            min_level,
            max_level,
            source,
            gyms: Mutex::new(gyms),
            stopped: AtomicBool::new(false),
        }
    }

    fn build_gyms(name: &str, source: &GymSource) -> HashMap<String, GymState> {
        // Epoch start: everything is maximally stale until scanned once.
        let never = DateTime::<Utc>::UNIX_EPOCH;
        let gyms: HashMap<String, GymState> = match source {
            GymSource::Fence { geofence, coverage } => geofence
                .scan_coordinates(coverage)
                .into_iter()
                .enumerate()
                .map(|(i, coord)| {
                    (
                        format!("cell-{}", i),
                        GymState {
                            coord,
                            last_updated: never,
                        },
                    )
                })
                .collect(),
            GymSource::Explicit(pairs) => pairs
                .iter()
                .map(|(id, coord)| {
                    (
                        id.clone(),
                        GymState {
                            coord: *coord,
                            last_updated: never,
                        },
                    )
                })
                .collect(),
        };
        if gyms.is_empty() {
            warn!("[SmartRaid] '{}' has no gyms; serving empty tasks", name);
        } else {
            info!("[SmartRaid] '{}' tracking {} gyms", name, gyms.len());
        }
        gyms
    }

    /// Refresh a gym from the data pipeline. Unknown gyms are added, so a
    /// fence seeded from cell centers converges onto real gym locations.
    pub fn update_gym(&self, gym_id: &str, coord: Coordinate, updated: DateTime<Utc>) {
        let mut gyms = self.lock();
        gyms.insert(
            gym_id.to_string(),
            GymState {
                coord,
                last_updated: updated,
            },
        );
    }

    pub fn gym_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, GymState>> {
        self.gyms.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl JobController for SmartRaidController {
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

        let coord = {
            let mut gyms = self.lock();
            // Stalest gym first; ties settle on the lower id for
            // determinism.
            let stalest = gyms
                .iter()
                .min_by(|(id_a, a), (id_b, b)| {
                    a.last_updated
                        .cmp(&b.last_updated)
                        .then_with(|| id_a.cmp(id_b))
                })
                .map(|(id, state)| (id.clone(), state.coord));

            match stalest {
                Some((id, coord)) => {
                    // Stamp at dispatch so concurrent polls fan out.
                    if let Some(state) = gyms.get_mut(&id) {
                        state.last_updated = Utc::now();
                    }
                    coord
                }
                None => return Task::empty(),
            }
        };

        Task::at(TaskAction::ScanRaid, coord, self.min_level, self.max_level)
    }

    fn get_status(&self) -> String {
        let gyms = self.lock();
        let never = DateTime::<Utc>::UNIX_EPOCH;
        let unscanned = gyms.values().filter(|g| g.last_updated == never).count();
        format!("Gyms: {} ({} unscanned)", gyms.len(), unscanned)
    }

    fn reload(&self) {
        let rebuilt = Self::build_gyms(&self.name, &self.source);
        *self.lock() = rebuilt;
        info!("[SmartRaid] '{}' reloaded", self.name);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        info!("[SmartRaid] '{}' stopped", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn gyms() -> Vec<(String, Coordinate)> {
        vec![
            ("gym-a".to_string(), Coordinate::new(51.500, -0.130)),
            ("gym-b".to_string(), Coordinate::new(51.501, -0.130)),
            ("gym-c".to_string(), Coordinate::new(51.502, -0.130)),
        ]
    }

    #[test]
    fn test_dispatches_stalest_gym() {
        let controller = SmartRaidController::from_gyms("raids", gyms(), 0, 50);
        let now = Utc::now();

        controller.update_gym("gym-a", gyms()[0].1, now - Duration::minutes(10));
        controller.update_gym("gym-b", gyms()[1].1, now - Duration::minutes(45));
        controller.update_gym("gym-c", gyms()[2].1, now - Duration::minutes(30));

        let options = TaskOptions::for_device("dev-1");
        // gym-b is stalest
        assert_eq!(controller.get_task(&options).coordinate(), gyms()[1].1);
        // gym-b was just stamped, so gym-c is next
        assert_eq!(controller.get_task(&options).coordinate(), gyms()[2].1);
        assert_eq!(controller.get_task(&options).coordinate(), gyms()[0].1);
    }

    #[test]
    fn test_unscanned_gyms_come_first() {
        let controller = SmartRaidController::from_gyms("raids", gyms(), 0, 50);
        let now = Utc::now();
        controller.update_gym("gym-a", gyms()[0].1, now);
        controller.update_gym("gym-c", gyms()[2].1, now);

        let task = controller.get_task(&TaskOptions::for_device("dev-1"));
        assert_eq!(task.action, TaskAction::ScanRaid);
        assert_eq!(task.coordinate(), gyms()[1].1);
    }

    #[test]
    fn test_update_gym_adds_new() {
        let controller = SmartRaidController::from_gyms("raids", Vec::new(), 0, 50);
        assert!(controller.get_task(&TaskOptions::for_device("dev-1")).is_empty());

        controller.update_gym(
            "fresh",
            Coordinate::new(51.6, -0.1),
            Utc::now() - Duration::hours(1),
        );
        assert_eq!(controller.gym_count(), 1);
        assert!(!controller.get_task(&TaskOptions::for_device("dev-1")).is_empty());
    }

    #[test]
    fn test_status_counts_unscanned() {
        let controller = SmartRaidController::from_gyms("raids", gyms(), 0, 50);
        controller.update_gym("gym-a", gyms()[0].1, Utc::now());
        assert_eq!(controller.get_status(), "Gyms: 3 (2 unscanned)");
    }

    #[test]
    fn test_reload_resets_staleness() {
        let controller = SmartRaidController::from_gyms("raids", gyms(), 0, 50);
        controller.update_gym("gym-a", gyms()[0].1, Utc::now());
        controller.reload();
        assert_eq!(controller.get_status(), "Gyms: 3 (3 unscanned)");
    }
}
