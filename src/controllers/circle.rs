//! Round-robin circle controller.
//!
//! Walks a fixed coordinate list (optionally pre-ordered by the route
//! optimizer) and hands the next stop to each polling device. An
//! on-demand scan-next queue is drained before the rotation so
//! user-triggered lookups jump the line without ever joining the
//! round-robin set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::collections::SafeCollection;
use crate::controllers::{account_in_bounds, JobController, Task, TaskAction, TaskOptions};
use crate::geofence::{CoverageConfig, Geofence};
use crate::{route, Coordinate};

/// What a circle instance scans for; decides the dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircleTarget {
    Pokemon,
    Raid,
}

impl CircleTarget {
    fn action(self) -> TaskAction {
        match self {
            CircleTarget::Pokemon => TaskAction::ScanPokemon,
            CircleTarget::Raid => TaskAction::ScanRaid,
        }
    }
}

/// Where the rotation's coordinates come from on (re)build.
enum RouteSource {
    /// Covering-cell centers of a geofence.
    Fence {
        geofence: Geofence,
        coverage: CoverageConfig,
    },
    /// An admin-supplied route (dynamic-route instances).
    Explicit(Vec<Coordinate>),
}

#[derive(Default)]
struct RotationState {
    last_index: usize,
    last_completed: Option<DateTime<Utc>>,
    previous_completed: Option<DateTime<Utc>>,
}

pub struct CircleController {
    name: String,
    target: CircleTarget,
    min_level: u8,
    max_level: u8,
    optimize: bool,
    source: RouteSource,
    coordinates: RwLock<Arc<Vec<Coordinate>>>,
    state: Mutex<RotationState>,
    scan_next: SafeCollection<Coordinate>,
    stopped: AtomicBool,
}

impl CircleController {
    /// Controller over a geofence's covering coordinates.
    pub fn new(
        name: impl Into<String>,
        geofence: Geofence,
        coverage: CoverageConfig,
        target: CircleTarget,
        min_level: u8,
        max_level: u8,
        optimize: bool,
    ) -> Self {
        Self::with_source(
            name,
            RouteSource::Fence { geofence, coverage },
            target,
            min_level,
            max_level,
            optimize,
        )
    }

    /// Controller over an explicit, admin-supplied route.
    pub fn from_coordinates(
        name: impl Into<String>,
        coordinates: Vec<Coordinate>,
        target: CircleTarget,
        min_level: u8,
        max_level: u8,
        optimize: bool,
    ) -> Self {
        Self::with_source(
            name,
            RouteSource::Explicit(coordinates),
            target,
            min_level,
            max_level,
            optimize,
        )
    }

    fn with_source(
        name: impl Into<String>,
        source: RouteSource,
        target: CircleTarget,
        min_level: u8,
        max_level: u8,
        optimize: bool,
    ) -> Self {
        let name = name.into();
        let coordinates = Self::build_route(&name, &source, optimize);
        Self {
            name,
            target,
            min_level,
            max_level,
            optimize,
            source,
            coordinates: RwLock::new(Arc::new(coordinates)),
            state: Mutex::new(RotationState::default()),
            scan_next: SafeCollection::new(),
            stopped: AtomicBool::new(false),
        }
    }

    fn build_route(name: &str, source: &RouteSource, optimize: bool) -> Vec<Coordinate> {
        let coords = match source {
            RouteSource::Fence { geofence, coverage } => geofence.scan_coordinates(coverage),
            RouteSource::Explicit(coords) => coords.clone(),
        };
        if coords.is_empty() {
            warn!("[Circle] '{}' has no coordinates; serving empty tasks", name);
            return coords;
        }
        info!("[Circle] '{}' route has {} stops", name, coords.len());
        if optimize {
            route::optimize(&coords, None)
        } else {
            coords
        }
    }

    /// Coordinates currently in rotation (snapshot).
    pub fn route_len(&self) -> usize {
        self.coordinates.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn current_route(&self) -> Arc<Vec<Coordinate>> {
        Arc::clone(&self.coordinates.read().unwrap_or_else(|e| e.into_inner()))
    }
}

impl JobController for CircleController {
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

        // On-demand lookups jump the rotation and are consumed for good.
        if let Some(coord) = self.scan_next.try_take() {
            return Task::at(self.target.action(), coord, self.min_level, self.max_level);
        }

        let route = self.current_route();
        if route.is_empty() {
            return Task::empty();
        }

        let coord = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.last_index >= route.len() {
                // Route shrank under a concurrent reload; restart the lap.
                state.last_index = 0;
            }
            let idx = state.last_index;
            if idx + 1 >= route.len() {
                state.last_index = 0;
                state.previous_completed = state.last_completed;
                state.last_completed = Some(Utc::now());
            } else {
                state.last_index = idx + 1;
            }
            route[idx]
        };

        Task::at(self.target.action(), coord, self.min_level, self.max_level)
    }

    fn get_status(&self) -> String {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match (state.previous_completed, state.last_completed) {
            (Some(previous), Some(last)) => {
                format!("Round time: {}s", (last - previous).num_seconds())
            }
            _ => "--".to_string(),
        }
    }

    fn reload(&self) {
        let rebuilt = Self::build_route(&self.name, &self.source, self.optimize);
        *self.coordinates.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(rebuilt);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = RotationState::default();
        self.scan_next.clear();
        info!("[Circle] '{}' reloaded", self.name);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.scan_next.clear();
        info!("[Circle] '{}' stopped", self.name);
    }

    fn enqueue_scan_next(&self, coord: Coordinate) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.scan_next.try_add(coord);
        true
    }
}
