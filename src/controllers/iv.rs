//! IV scan controller.
//!
//! Backed by a bounded priority queue of pending scan entries fed by the
//! data pipeline (a sighting worth an IV check). Dispatch pops the
//! highest-priority entry; priority ties go to the earlier sighting so
//! nothing starves. An empty queue is the normal idle state, not an
//! error.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::controllers::{account_in_bounds, JobController, Task, TaskAction, TaskOptions};
use crate::Coordinate;

/// A pending IV scan, fed in by the data pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct IvEntry {
    /// Sighting identifier (encounter id or similar).
    pub id: String,
    pub coord: Coordinate,
    /// Higher scans sooner.
    pub priority: u32,
    pub discovered_at: DateTime<Utc>,
}

impl IvEntry {
    pub fn new(
        id: impl Into<String>,
        coord: Coordinate,
        priority: u32,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            coord,
            priority,
            discovered_at,
        }
    }
}

/// Heap ordering: highest priority first, then oldest sighting.
#[derive(Debug, Clone, PartialEq)]
struct Ranked(IvEntry);

impl Eq for Ranked {}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.discovered_at.cmp(&self.0.discovered_at))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

pub struct IvController {
    name: String,
    min_level: u8,
    max_level: u8,
    capacity: usize,
    pending: Mutex<BinaryHeap<Ranked>>,
    stopped: AtomicBool,
}

impl IvController {
    pub fn new(name: impl Into<String>, min_level: u8, max_level: u8, capacity: usize) -> Self {
        Self {
            name: name.into(),
            min_level,
            max_level,
            capacity,
            pending: Mutex::new(BinaryHeap::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Queue a sighting for an IV scan. Returns false when the queue is at
    /// capacity or the controller is stopped; the sighting is then dropped
    /// (the pipeline will resight anything that matters).
    pub fn enqueue(&self, entry: IvEntry) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        let mut pending = self.lock();
        if pending.len() >= self.capacity {
            debug!(
                "[Iv] '{}' queue full ({}), dropping sighting {}",
                self.name, self.capacity, entry.id
            );
            return false;
        }
        pending.push(Ranked(entry));
        true
    }

    pub fn pending_len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BinaryHeap<Ranked>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl JobController for IvController {
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

        match self.lock().pop() {
            Some(Ranked(entry)) => Task::at(
                TaskAction::ScanIv,
                entry.coord,
                self.min_level,
                self.max_level,
            ),
            None => Task::empty(),
        }
    }

    fn get_status(&self) -> String {
        format!("IV queue: {}/{}", self.pending_len(), self.capacity)
    }

    fn reload(&self) {
        self.lock().clear();
        info!("[Iv] '{}' reloaded", self.name);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.lock().clear();
        info!("[Iv] '{}' stopped", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use chrono::Duration;

    fn entry(id: &str, priority: u32, age_secs: i64) -> IvEntry {
        IvEntry::new(
            id,
            Coordinate::new(51.5, -0.13),
            priority,
            Utc::now() - Duration::seconds(age_secs),
        )
    }

    #[test]
    fn test_priority_order() {
        let controller = IvController::new("iv", 30, 50, 100);
        controller.enqueue(entry("low", 1, 0));
        controller.enqueue(entry("high", 9, 0));
        controller.enqueue(entry("mid", 5, 0));

        let options = TaskOptions::for_device("dev-1");
        // Highest priority first; entries leave the queue as they go
        assert_eq!(controller.get_task(&options).action, TaskAction::ScanIv);
        assert_eq!(controller.pending_len(), 2);
        controller.get_task(&options);
        controller.get_task(&options);
        assert!(controller.get_task(&options).is_empty());
    }

    #[test]
    fn test_ties_go_to_older_sighting() {
        let older = entry("older", 5, 60);
        let newer = entry("newer", 5, 0);
        assert!(Ranked(older) > Ranked(newer));
    }

    #[test]
    fn test_capacity_bound() {
        let controller = IvController::new("iv", 0, 50, 2);
        assert!(controller.enqueue(entry("a", 1, 0)));
        assert!(controller.enqueue(entry("b", 2, 0)));
        assert!(!controller.enqueue(entry("c", 3, 0)));
        assert_eq!(controller.pending_len(), 2);
    }

    #[test]
    fn test_account_bounds() {
        let controller = IvController::new("iv", 30, 50, 10);
        controller.enqueue(entry("a", 1, 0));

        let low = TaskOptions::for_device("dev-1").with_account(Account::new("low", 10));
        assert_eq!(controller.get_task(&low).action, TaskAction::SwitchAccount);
        // Entry stays queued for a capable device
        assert_eq!(controller.pending_len(), 1);
    }

    #[test]
    fn test_empty_queue_is_idle() {
        let controller = IvController::new("iv", 0, 50, 10);
        assert!(controller.get_task(&TaskOptions::for_device("dev-1")).is_empty());
    }

    #[test]
    fn test_stop_and_reload() {
        let controller = IvController::new("iv", 0, 50, 10);
        controller.enqueue(entry("a", 1, 0));
        controller.reload();
        assert_eq!(controller.pending_len(), 0);

        controller.enqueue(entry("b", 1, 0));
        controller.stop();
        assert!(!controller.enqueue(entry("c", 1, 0)));
        assert!(controller.get_task(&TaskOptions::for_device("dev-1")).is_empty());
    }
}
