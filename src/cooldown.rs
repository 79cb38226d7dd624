//! Cooldown / rotation calculator.
//!
//! Accounts must wait out a travel-time-based cooldown between encounters:
//! the delay models an assumed travel speed from the last encounter
//! location to the next target, capped by a configured ceiling. All store
//! side effects here are best-effort: a missed cooldown update must never
//! abort task dispatch to a device, so every expected miss degrades to a
//! logged skip.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

use crate::account::{Account, AccountStore, AccountUpdate};
use crate::geo_utils::great_circle_distance;
use crate::Coordinate;

/// Assumed travel speed in meters per second.
const TRAVEL_SPEED_MPS: f64 = 9.8;

/// Cooldown policy: travel speed and ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownPolicy {
    /// Hard cap on any single cooldown, in seconds.
    pub limit_secs: u64,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self { limit_secs: 7200 }
    }
}

impl CooldownPolicy {
    /// Cooldown for travelling `distance_m` meters:
    /// `min(distance / 9.8, limit)`.
    pub fn cooldown_secs(&self, distance_m: f64) -> u64 {
        let raw = (distance_m / TRAVEL_SPEED_MPS) as u64;
        raw.min(self.limit_secs)
    }
}

/// Planned cooldown for one dispatched encounter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownPlan {
    /// Seconds the device should wait before acting at the target.
    pub delay_secs: u64,
    /// When the encounter is considered to happen.
    pub encounter_time: DateTime<Utc>,
}

/// Tracks per-account cooldown and spin state against the external store.
#[derive(Clone)]
pub struct CooldownTracker {
    store: Arc<dyn AccountStore>,
    policy: CooldownPolicy,
}

impl CooldownTracker {
    pub fn new(store: Arc<dyn AccountStore>, policy: CooldownPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &CooldownPolicy {
        &self.policy
    }

    /// Plan the cooldown for sending `account` to `target`.
    pub fn plan(&self, account: &Account, target: Coordinate) -> CooldownPlan {
        self.plan_at(account, target, Utc::now())
    }

    /// [`plan`](Self::plan) with an explicit `now`, the testable core.
    ///
    /// No prior encounter ⇒ no delay. Otherwise the encounter lands at
    /// `last_encounter_time + cooldown`; if that is already past, the
    /// device may act immediately.
    pub fn plan_at(&self, account: &Account, target: Coordinate, now: DateTime<Utc>) -> CooldownPlan {
        let (last_location, last_time) = match account.last_encounter() {
            Some(state) => state,
            None => {
                return CooldownPlan {
                    delay_secs: 0,
                    encounter_time: now,
                }
            }
        };

        let distance = great_circle_distance(&last_location, &target);
        let cooldown = self.policy.cooldown_secs(distance);
        let ready = last_time + Duration::seconds(cooldown as i64);

        if ready <= now {
            CooldownPlan {
                delay_secs: 0,
                encounter_time: now,
            }
        } else {
            CooldownPlan {
                delay_secs: (ready - now).num_seconds().max(0) as u64,
                encounter_time: ready,
            }
        }
    }

    /// Persist an encounter for `username` at `location`/`time`.
    ///
    /// Best-effort: an unknown account or store failure is logged and
    /// skipped so dispatch continues.
    pub fn commit_encounter(&self, username: &str, location: Coordinate, time: DateTime<Utc>) {
        let update = AccountUpdate::encounter(location, time);
        match self.store.update(username, update) {
            Ok(0) => debug!(
                "[Cooldown] no account '{}' to record encounter for",
                username
            ),
            Ok(_) => {}
            Err(e) => warn!(
                "[Cooldown] failed to record encounter for '{}': {}",
                username, e
            ),
        }
    }

    /// Increment the spin counter for `username`.
    ///
    /// Best-effort, same skip semantics as
    /// [`commit_encounter`](Self::commit_encounter).
    pub fn record_spin(&self, username: &str) {
        let account = match self.store.find(username) {
            Ok(Some(account)) => account,
            Ok(None) => {
                debug!("[Cooldown] no account '{}' to record spin for", username);
                return;
            }
            Err(e) => {
                warn!("[Cooldown] spin lookup failed for '{}': {}", username, e);
                return;
            }
        };

        let update = AccountUpdate {
            spins: Some(account.spins + 1),
            ..AccountUpdate::default()
        };
        if let Err(e) = self.store.update(username, update) {
            warn!("[Cooldown] spin update failed for '{}': {}", username, e);
        }
    }
}
