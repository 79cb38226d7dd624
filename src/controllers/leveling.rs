//! Leveling controller.
//!
//! Sends low-level accounts to spin pokestops: each dispatch plans a
//! cooldown from the account's last encounter, records the encounter and
//! spin through the account store (best-effort), and rotates accounts out
//! once they hit the spin limit or the target level. XP reports fed in by
//! the data pipeline land in a bounded time series that powers the XP/h
//! status line.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use log::{debug, info, warn};
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::collections::TimedMapCollection;
use crate::controllers::{
    ControllerEvent, EventSink, JobController, Task, TaskAction, TaskOptions,
};
use crate::cooldown::CooldownTracker;
use crate::geofence::{CoverageConfig, Geofence};
use crate::Coordinate;

/// A spinnable stop with its index for nearest-neighbor queries.
#[derive(Debug, Clone, Copy)]
struct IndexedStop {
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
            .map(|c| IndexedStop {
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

enum StopSource {
    Fence {
        geofence: Geofence,
        coverage: CoverageConfig,
    },
    Explicit(Vec<Coordinate>),
}

pub struct LevelingController {
    name: String,
    min_level: u8,
    /// Target level; reaching it rotates the account out.
    max_level: u8,
    spin_limit: u32,
    source: StopSource,
    cooldown: CooldownTracker,
    events: EventSink,
    stops: RwLock<Arc<StopSet>>,
    /// Per-account (timestamp, xp) samples, bounded per account.
    xp: TimedMapCollection<String, u64>,
    leveled_up: Mutex<HashSet<String>>,
    stopped: AtomicBool,
}

impl LevelingController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        geofence: Geofence,
        coverage: CoverageConfig,
        min_level: u8,
        max_level: u8,
        spin_limit: u32,
        xp_window: usize,
        cooldown: CooldownTracker,
        events: EventSink,
    ) -> Self {
        Self::with_source(
            name,
            StopSource::Fence { geofence, coverage },
            min_level,
            max_level,
            spin_limit,
            xp_window,
            cooldown,
            events,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_coordinates(
        name: impl Into<String>,
        stops: Vec<Coordinate>,
        min_level: u8,
        max_level: u8,
        spin_limit: u32,
        xp_window: usize,
        cooldown: CooldownTracker,
        events: EventSink,
    ) -> Self {
        Self::with_source(
            name,
            StopSource::Explicit(stops),
            min_level,
            max_level,
            spin_limit,
            xp_window,
            cooldown,
            events,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn with_source(
        name: impl Into<String>,
        source: StopSource,
        min_level: u8,
        max_level: u8,
        spin_limit: u32,
        xp_window: usize,
        cooldown: CooldownTracker,
        events: EventSink,
    ) -> Self {
        let name = name.into();
        let stops = Self::build_stops(&name, &source);
        Self {
            name,
            min_level,
            max_level,
            spin_limit,
            source,
            cooldown,
            events,
            stops: RwLock::new(Arc::new(stops)),
            xp: TimedMapCollection::new(xp_window),
            leveled_up: Mutex::new(HashSet::new()),
            stopped: AtomicBool::new(false),
        }
    }

    fn build_stops(name: &str, source: &StopSource) -> StopSet {
        let coords = match source {
            StopSource::Fence { geofence, coverage } => geofence.scan_coordinates(coverage),
            StopSource::Explicit(coords) => coords.clone(),
        };
        if coords.is_empty() {
            warn!("[Leveling] '{}' has no stops; serving empty tasks", name);
        } else {
            info!("[Leveling] '{}' using {} stops", name, coords.len());
        }
        StopSet::build(coords)
    }

    /// Record an XP report for an account (fed by the data pipeline).
    pub fn track_xp(&self, username: &str, xp: u64, timestamp: u64) {
        self.xp.set(username.to_string(), xp, timestamp);
    }

    /// Aggregate XP per hour over every tracked account's retained window.
    pub fn xp_per_hour(&self) -> Option<u64> {
        let mut gained: u64 = 0;
        let mut seconds: u64 = 0;
        for username in self.xp.keys() {
            let (Some((t0, xp0)), Some((t1, xp1))) = (
                self.xp.oldest_entry(&username),
                self.xp.latest_entry(&username),
            ) else {
                continue;
            };
            if t1 > t0 && xp1 >= xp0 {
                gained += xp1 - xp0;
                seconds = seconds.max(t1 - t0);
            }
        }
        if seconds == 0 {
            None
        } else {
            Some(gained * 3600 / seconds)
        }
    }

    fn current_stops(&self) -> Arc<StopSet> {
        Arc::clone(&self.stops.read().unwrap_or_else(|e| e.into_inner()))
    }
}

impl JobController for LevelingController {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_task(&self, options: &TaskOptions) -> Task {
        if self.stopped.load(Ordering::Acquire) {
            return Task::empty();
        }

        // Leveling is meaningless without an account to level.
        let account = match &options.account {
            Some(account) => account,
            None => {
                debug!(
                    "[Leveling] '{}' poll from {} without an account",
                    self.name, options.device_uuid
                );
                return Task::empty();
            }
        };

        if account.level >= self.max_level {
            let mut leveled = self.leveled_up.lock().unwrap_or_else(|e| e.into_inner());
            if leveled.insert(account.username.clone()) {
                info!(
                    "[Leveling] '{}' account {} reached level {}",
                    self.name, account.username, account.level
                );
                self.events.try_add(ControllerEvent::AccountLevelUp {
                    instance: self.name.clone(),
                    username: account.username.clone(),
                    level: account.level,
                    at: Utc::now(),
                });
            }
            return Task::switch_account(self.min_level, self.max_level);
        }
        if account.level < self.min_level || account.spins >= self.spin_limit {
            return Task::switch_account(self.min_level, self.max_level);
        }

        let stops = self.current_stops();
        if stops.coords.is_empty() {
            return Task::empty();
        }

        let coord = match account.last_encounter() {
            Some((origin, _)) => stops
                .tree
                .nearest_neighbor(&[origin.latitude, origin.longitude])
                .map(|stop| Coordinate::new(stop.lat, stop.lng))
                .unwrap_or(stops.coords[0]),
            None => stops.coords[0],
        };

        let plan = self.cooldown.plan(account, coord);
        self.cooldown
            .commit_encounter(&account.username, coord, plan.encounter_time);
        self.cooldown.record_spin(&account.username);

        Task::at(
            TaskAction::SpinPokestop,
            coord,
            self.min_level,
            self.max_level,
        )
        .with_delay(plan.delay_secs)
    }

    fn get_status(&self) -> String {
        match self.xp_per_hour() {
            Some(rate) => format!("XP/h: {}", rate),
            None => "XP/h: --".to_string(),
        }
    }

    fn reload(&self) {
        let rebuilt = Self::build_stops(&self.name, &self.source);
        *self.stops.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(rebuilt);
        self.xp.clear();
        self.leveled_up
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!("[Leveling] '{}' reloaded", self.name);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        info!("[Leveling] '{}' stopped", self.name);
    }
}
