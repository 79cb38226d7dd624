//! Job controller state machines, one per scan strategy.
//!
//! Every controller implements the same contract: hand out the next task
//! to a polling device (`get_task`), summarize progress (`get_status`),
//! rebuild internal state (`reload`), and release resources (`stop`).
//! Controllers never fail a poll: misconfiguration degrades to the empty
//! task, because a scanning device must always receive a well-formed
//! response.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::account::Account;
use crate::collections::SafeCollection;
use crate::Coordinate;
use std::sync::Arc;

pub mod bootstrap;
pub mod circle;
pub mod iv;
pub mod leveling;
pub mod quest;
pub mod smart_raid;

pub use bootstrap::BootstrapController;
pub use circle::{CircleController, CircleTarget};
pub use iv::{IvController, IvEntry};
pub use leveling::LevelingController;
pub use quest::QuestController;
pub use smart_raid::SmartRaidController;

// ============================================================================
// Tasks
// ============================================================================

/// Action a device is asked to perform at a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    ScanPokemon,
    ScanRaid,
    ScanQuest,
    ScanIv,
    SpinPokestop,
    /// The presented account cannot work this instance; the device should
    /// swap accounts and poll again.
    SwitchAccount,
    /// Nothing to do; the device should idle and retry later.
    None,
}

/// One dispatched unit of work.
///
/// An empty task (action [`TaskAction::None`]) is a well-formed response,
/// never an error on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub action: TaskAction,
    pub latitude: f64,
    pub longitude: f64,
    pub min_level: u8,
    pub max_level: u8,
    /// Cooldown the device must wait out before acting, seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

impl Task {
    pub fn at(action: TaskAction, coord: Coordinate, min_level: u8, max_level: u8) -> Self {
        Self {
            action,
            latitude: coord.latitude,
            longitude: coord.longitude,
            min_level,
            max_level,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay_secs: u64) -> Self {
        self.delay = Some(delay_secs);
        self
    }

    /// The empty task: idle, retry later.
    pub fn empty() -> Self {
        Self {
            action: TaskAction::None,
            latitude: 0.0,
            longitude: 0.0,
            min_level: 0,
            max_level: 0,
            delay: None,
        }
    }

    /// Rotation task for an out-of-bounds or exhausted account.
    pub fn switch_account(min_level: u8, max_level: u8) -> Self {
        Self {
            action: TaskAction::SwitchAccount,
            latitude: 0.0,
            longitude: 0.0,
            min_level,
            max_level,
            delay: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.action == TaskAction::None
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Transient per-poll request values. Never stored by controllers.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub device_uuid: String,
    pub account_username: Option<String>,
    pub account: Option<Account>,
}

impl TaskOptions {
    pub fn for_device(device_uuid: impl Into<String>) -> Self {
        Self {
            device_uuid: device_uuid.into(),
            account_username: None,
            account: None,
        }
    }

    pub fn with_account(mut self, account: Account) -> Self {
        self.account_username = Some(account.username.clone());
        self.account = Some(account);
        self
    }
}

// ============================================================================
// Controller contract
// ============================================================================

/// Shared contract implemented by every scan strategy.
///
/// Implementations keep all mutable state behind their own locks so the
/// registry can hand one `Arc` to many concurrent device polls. `reload`
/// must be safe while `get_task` is in flight from other devices.
pub trait JobController: Send + Sync {
    /// Instance name this controller serves.
    fn name(&self) -> &str;

    /// Hand out the next task. Never blocks on anything slower than the
    /// controller's own lock; never fails, misconfiguration yields the
    /// empty task.
    fn get_task(&self, options: &TaskOptions) -> Task;

    /// Human-readable progress summary for the admin surface.
    fn get_status(&self) -> String;

    /// Reset internal index/queue state as if newly constructed.
    fn reload(&self);

    /// Release background resources; afterwards every poll returns the
    /// empty task.
    fn stop(&self);

    /// Ask the controller to prioritize `coord` before its normal
    /// rotation. Returns false for strategies without an on-demand queue.
    fn enqueue_scan_next(&self, _coord: Coordinate) -> bool {
        false
    }
}

/// True when the presented account (if any) may work an instance bounded
/// by `[min_level, max_level]`. Polls without account data pass: level
/// enforcement then falls to the account assignment layer.
pub(crate) fn account_in_bounds(options: &TaskOptions, min_level: u8, max_level: u8) -> bool {
    match &options.account {
        Some(account) => account.level >= min_level && account.level <= max_level,
        None => true,
    }
}

// ============================================================================
// Events
// ============================================================================

/// Completion and progress events consumed by the orchestration layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Every unit of the instance's work is done.
    InstanceCompleted {
        instance: String,
        completed_at: DateTime<Utc>,
    },
    /// Every coordinate of the bootstrap fence has been visited.
    BootstrapCompleted {
        instance: String,
        completed_at: DateTime<Utc>,
    },
    /// One device's share of the bootstrap fence is exhausted.
    BootstrapDeviceCompleted {
        instance: String,
        device_uuid: String,
        completed_at: DateTime<Utc>,
    },
    /// A leveling account reached the instance's target level.
    AccountLevelUp {
        instance: String,
        username: String,
        level: u8,
        at: DateTime<Utc>,
    },
}

/// Shared event queue controllers push into; the orchestration layer
/// drains it.
pub type EventSink = Arc<SafeCollection<ControllerEvent>>;

/// A fresh, empty event sink.
pub fn event_sink() -> EventSink {
    Arc::new(SafeCollection::new())
}
