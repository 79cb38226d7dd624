//! Auto-quest controller.
//!
//! Tracks quest completion per pokestop for the active quest mode(s),
//! hands each device the nearest pending stop relative to its account's
//! last encounter, and wires the cooldown calculator into every dispatch.
//! When every stop has quests for the active mode(s) the controller fires
//! an instance-completed event; in `both` mode it first switches from
//! normal to alternative quests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use log::{info, warn};
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::collections::TimedMap;
use crate::controllers::{
    account_in_bounds, ControllerEvent, EventSink, JobController, Task, TaskAction, TaskOptions,
};
use crate::cooldown::CooldownTracker;
use crate::geofence::{CoverageConfig, Geofence};
use crate::instance::QuestMode;
use crate::Coordinate;

/// A pokestop with its index for R-tree nearest-neighbor queries.
#[derive(Debug, Clone, Copy)]
struct IndexedStop {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedStop {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

impl PointDistance for IndexedStop {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.lat - point[0];
        let dlng = self.lng - point[1];
        dlat * dlat + dlng * dlng
    }
}

struct StopSet {
    coords: Vec<Coordinate>,
    tree: RTree<IndexedStop>,
}

impl StopSet {
    fn build(coords: Vec<Coordinate>) -> Self {
        let indexed: Vec<IndexedStop> = coords
            .iter()
            .enumerate()
            .map(|(i, c)| IndexedStop {
                idx: i,
                lat: c.latitude,
                lng: c.longitude,
            })
            .collect();
        Self {
            coords,
            tree: RTree::bulk_load(indexed),
        }
    }
}

#[derive(Default)]
struct QuestState {
    /// Working the alternative mode's pass (set from the start for
    /// `alternative`, after the normal pass for `both`).
    active_alternative: bool,
    done_normal: HashSet<usize>,
    done_alternative: HashSet<usize>,
    completed_fired: bool,
}

enum StopSource {
    Fence {
        geofence: Geofence,
        coverage: CoverageConfig,
    },
    Explicit(Vec<Coordinate>),
}

pub struct QuestController {
    name: String,
    min_level: u8,
    max_level: u8,
    mode: QuestMode,
    source: StopSource,
    cooldown: CooldownTracker,
    events: EventSink,
    stops: RwLock<Arc<StopSet>>,
    state: Mutex<QuestState>,
    /// Last stop handed to each device, by dispatch time; the origin
    /// fallback when the account has no recorded encounter.
    last_dispatched: TimedMap<String, Coordinate>,
    stopped: AtomicBool,
}

impl QuestController {
    pub fn new(
        name: impl Into<String>,
        geofence: Geofence,
        coverage: CoverageConfig,
        mode: QuestMode,
        min_level: u8,
        max_level: u8,
        cooldown: CooldownTracker,
        events: EventSink,
    ) -> Self {
        Self::with_source(
            name,
            StopSource::Fence { geofence, coverage },
            mode,
            min_level,
            max_level,
            cooldown,
            events,
        )
    }

    /// Controller over an explicit stop list (used directly by tests and
    /// by deployments that import pokestops from elsewhere).
    pub fn from_coordinates(
        name: impl Into<String>,
        stops: Vec<Coordinate>,
        mode: QuestMode,
        min_level: u8,
        max_level: u8,
        cooldown: CooldownTracker,
        events: EventSink,
    ) -> Self {
        Self::with_source(
            name,
            StopSource::Explicit(stops),
            mode,
            min_level,
            max_level,
            cooldown,
            events,
        )
    }

    fn with_source(
        name: impl Into<String>,
        source: StopSource,
        mode: QuestMode,
        min_level: u8,
        max_level: u8,
        cooldown: CooldownTracker,
        events: EventSink,
    ) -> Self {
        let name = name.into();
        let stops = Self::build_stops(&name, &source);
        Self {
            name,
            min_level,
            max_level,
            mode,
            source,
            cooldown,
            events,
            stops: RwLock::new(Arc::new(stops)),
            state: Mutex::new(Self::fresh_state(mode)),
            last_dispatched: TimedMap::new(),
            stopped: AtomicBool::new(false),
        }
    }

    fn fresh_state(mode: QuestMode) -> QuestState {
        QuestState {
            active_alternative: mode == QuestMode::Alternative,
            ..QuestState::default()
        }
    }

    fn build_stops(name: &str, source: &StopSource) -> StopSet {
        let coords = match source {
            StopSource::Fence { geofence, coverage } => geofence.scan_coordinates(coverage),
            StopSource::Explicit(coords) => coords.clone(),
        };
        if coords.is_empty() {
            warn!("[Quest] '{}' has no stops; serving empty tasks", name);
        } else {
            info!("[Quest] '{}' tracking {} stops", name, coords.len());
        }
        StopSet::build(coords)
    }

    /// Nearest pending stop to `from`, or the lowest pending index when no
    /// reference location is available.
    fn select_stop(
        stops: &StopSet,
        done: &HashSet<usize>,
        from: Option<Coordinate>,
    ) -> Option<usize> {
        match from {
            Some(origin) => stops
                .tree
                .nearest_neighbor_iter(&[origin.latitude, origin.longitude])
                .map(|stop| stop.idx)
                .find(|idx| !done.contains(idx)),
            None => (0..stops.coords.len()).find(|idx| !done.contains(idx)),
        }
    }

    fn fire_completed(&self, state: &mut QuestState) {
        if !state.completed_fired {
            state.completed_fired = true;
            info!("[Quest] '{}' completed", self.name);
            self.events.try_add(ControllerEvent::InstanceCompleted {
                instance: self.name.clone(),
                completed_at: Utc::now(),
            });
        }
    }

    fn current_stops(&self) -> Arc<StopSet> {
        Arc::clone(&self.stops.read().unwrap_or_else(|e| e.into_inner()))
    }
}

impl JobController for QuestController {
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

        let stops = self.current_stops();
        if stops.coords.is_empty() {
            return Task::empty();
        }

        let origin = options
            .account
            .as_ref()
            .and_then(|a| a.last_encounter())
            .map(|(coord, _)| coord)
            .or_else(|| self.last_dispatched.latest(&options.device_uuid));

        let coord = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

            let mut idx = {
                let done = if state.active_alternative {
                    &state.done_alternative
                } else {
                    &state.done_normal
                };
                Self::select_stop(&stops, done, origin)
            };

            // The active pass is exhausted: switch modes in `both`, or
            // report completion.
            if idx.is_none() && self.mode == QuestMode::Both && !state.active_alternative {
                state.active_alternative = true;
                info!("[Quest] '{}' switching to alternative quests", self.name);
                idx = Self::select_stop(&stops, &state.done_alternative, origin);
            }

            let idx = match idx {
                Some(idx) => idx,
                None => {
                    self.fire_completed(&mut state);
                    return Task::empty();
                }
            };

            if state.active_alternative {
                state.done_alternative.insert(idx);
            } else {
                state.done_normal.insert(idx);
            }
            stops.coords[idx]
        };

        self.last_dispatched.set(
            options.device_uuid.clone(),
            coord,
            Utc::now().timestamp() as u64,
        );

        let mut task = Task::at(TaskAction::ScanQuest, coord, self.min_level, self.max_level);
        if let Some(account) = &options.account {
            let plan = self.cooldown.plan(account, coord);
            self.cooldown
                .commit_encounter(&account.username, coord, plan.encounter_time);
            task = task.with_delay(plan.delay_secs);
        }
        task
    }

    fn get_status(&self) -> String {
        let stops = self.current_stops();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let total = stops.coords.len();
        let (done, mode) = if state.active_alternative {
            (state.done_alternative.len(), "alternative")
        } else {
            (state.done_normal.len(), "normal")
        };
        format!("Quests: {}/{} ({})", done, total, mode)
    }

    fn reload(&self) {
        let rebuilt = Self::build_stops(&self.name, &self.source);
        *self.stops.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(rebuilt);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Self::fresh_state(self.mode);
        self.last_dispatched.clear();
        info!("[Quest] '{}' reloaded", self.name);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        info!("[Quest] '{}' stopped", self.name);
    }
}
