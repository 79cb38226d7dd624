//! # Scan Dispatch
//!
//! Geofenced task scheduling and dispatch for fleets of mobile scanning
//! devices.
//!
//! This library provides:
//! - Geofence containment tests and S2 cell covering
//! - A travelling-salesman style route optimizer (nearest-neighbor + 2-opt)
//! - Travel-time cooldown tracking for scanning accounts
//! - Per-strategy job controllers that hand out the next task to polling
//!   devices, behind a shared registry
//!
//! ## Features
//!
//! - **`parallel`** - Parallel 2-opt gain scanning with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use scan_dispatch::{Coordinate, route};
//!
//! let stops = vec![
//!     Coordinate::new(51.5074, -0.1278),
//!     Coordinate::new(51.5200, -0.1000),
//!     Coordinate::new(51.5080, -0.1290),
//! ];
//!
//! // Order the stops into a short closed tour
//! let tour = route::optimize(&stops, None);
//! assert_eq!(tour.len(), stops.len());
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{DispatchError, Result};

// Geographic utilities (distance, bounds, polyline length)
pub mod geo_utils;

// Geofence engine (containment tests, S2 cell covering)
pub mod geofence;
pub use geofence::{CoverageConfig, Geofence};

// Route optimizer (nearest-neighbor construction + 2-opt improvement)
pub mod route;

// Concurrency-safe collections
pub mod collections;
pub use collections::{SafeCollection, TimedMap, TimedMapCollection};

// Scanning accounts and their external store
pub mod account;
pub use account::{Account, AccountStore, AccountUpdate, MemoryAccountStore};

// Cooldown / rotation calculator
pub mod cooldown;
pub use cooldown::{CooldownPlan, CooldownPolicy, CooldownTracker};

// Instance configuration model
pub mod instance;
pub use instance::{
    GeofenceStore, InstanceConfig, InstanceData, InstanceKind, MemoryGeofenceStore, QuestMode,
};

// Job controller state machines (one module per scan strategy)
pub mod controllers;
pub use controllers::{
    ControllerEvent, EventSink, JobController, Task, TaskAction, TaskOptions,
};

// Live controller registry
pub mod registry;
pub use registry::{build_controller, with_registry, ControllerRegistry, REGISTRY};

// ============================================================================
// Core Types
// ============================================================================

/// A geographic coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use scan_dispatch::Coordinate;
/// let point = Coordinate::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the coordinate is a valid WGS84 position.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Total ordering by latitude, then longitude.
    ///
    /// Coordinate sets derived from cell coverings are sorted with this so
    /// controllers see the same route across restarts.
    pub fn total_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.latitude
            .total_cmp(&other.latitude)
            .then(self.longitude.total_cmp(&other.longitude))
    }
}

/// Bounding box for a set of coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from coordinates.
    pub fn from_coordinates(coords: &[Coordinate]) -> Option<Self> {
        if coords.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for c in coords {
            min_lat = min_lat.min(c.latitude);
            max_lat = max_lat.max(c.latitude);
            min_lng = min_lng.min(c.longitude);
            max_lng = max_lng.max(c.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
