//! Scanning accounts and the external store that owns them.
//!
//! The dispatch engine never persists accounts itself; it reads and writes
//! through [`AccountStore`], which the hosting application backs with its
//! real repository. [`MemoryAccountStore`] is the reference implementation
//! used in tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::Coordinate;

/// A scanning account as consumed by the dispatch engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub level: u8,
    pub last_encounter_lat: Option<f64>,
    pub last_encounter_lng: Option<f64>,
    pub last_encounter_time: Option<DateTime<Utc>>,
    pub spins: u32,
}

impl Account {
    pub fn new(username: impl Into<String>, level: u8) -> Self {
        Self {
            username: username.into(),
            level,
            last_encounter_lat: None,
            last_encounter_lng: None,
            last_encounter_time: None,
            spins: 0,
        }
    }

    /// Location of the account's last encounter, when known.
    pub fn last_encounter(&self) -> Option<(Coordinate, DateTime<Utc>)> {
        match (
            self.last_encounter_lat,
            self.last_encounter_lng,
            self.last_encounter_time,
        ) {
            (Some(lat), Some(lng), Some(time)) => Some((Coordinate::new(lat, lng), time)),
            _ => None,
        }
    }
}

/// Partial update applied to a stored account. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountUpdate {
    pub last_encounter_lat: Option<f64>,
    pub last_encounter_lng: Option<f64>,
    pub last_encounter_time: Option<DateTime<Utc>>,
    pub spins: Option<u32>,
}

impl AccountUpdate {
    /// Update recording an encounter at `coord` at `time`.
    pub fn encounter(coord: Coordinate, time: DateTime<Utc>) -> Self {
        Self {
            last_encounter_lat: Some(coord.latitude),
            last_encounter_lng: Some(coord.longitude),
            last_encounter_time: Some(time),
            ..Self::default()
        }
    }
}

/// External account repository collaborator.
///
/// Implementations own their timeouts; the dispatch path never holds a
/// controller lock across these calls.
pub trait AccountStore: Send + Sync {
    /// Look up an account by username. `Ok(None)` when it does not exist.
    fn find(&self, username: &str) -> Result<Option<Account>>;

    /// Apply a partial update, returning the number of affected rows.
    fn update(&self, username: &str, update: AccountUpdate) -> Result<u64>;
}

/// In-memory [`AccountStore`] for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<String, Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an account.
    pub fn insert(&self, account: Account) {
        self.lock().insert(account.username.clone(), account);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Account>> {
        self.accounts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AccountStore for MemoryAccountStore {
    fn find(&self, username: &str) -> Result<Option<Account>> {
        Ok(self.lock().get(username).cloned())
    }

    fn update(&self, username: &str, update: AccountUpdate) -> Result<u64> {
        let mut accounts = self.lock();
        let account = match accounts.get_mut(username) {
            Some(a) => a,
            None => return Ok(0),
        };

        if let Some(lat) = update.last_encounter_lat {
            account.last_encounter_lat = Some(lat);
        }
        if let Some(lng) = update.last_encounter_lng {
            account.last_encounter_lng = Some(lng);
        }
        if let Some(time) = update.last_encounter_time {
            account.last_encounter_time = Some(time);
        }
        if let Some(spins) = update.spins {
            account.spins = spins;
        }
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_find_update() {
        let store = MemoryAccountStore::new();
        store.insert(Account::new("alice", 30));

        let found = store.find("alice").unwrap().unwrap();
        assert_eq!(found.level, 30);
        assert_eq!(found.spins, 0);
        assert!(store.find("bob").unwrap().is_none());

        let coord = Coordinate::new(51.5, -0.13);
        let now = Utc::now();
        let affected = store
            .update("alice", AccountUpdate::encounter(coord, now))
            .unwrap();
        assert_eq!(affected, 1);

        let (loc, time) = store
            .find("alice")
            .unwrap()
            .unwrap()
            .last_encounter()
            .unwrap();
        assert_eq!(loc, coord);
        assert_eq!(time, now);

        // Unknown username is not an error, just zero rows
        assert_eq!(store.update("bob", AccountUpdate::default()).unwrap(), 0);
    }

    #[test]
    fn test_last_encounter_requires_all_fields() {
        let mut account = Account::new("carol", 20);
        assert!(account.last_encounter().is_none());

        account.last_encounter_lat = Some(51.5);
        assert!(account.last_encounter().is_none());

        account.last_encounter_lng = Some(-0.13);
        account.last_encounter_time = Some(Utc::now());
        assert!(account.last_encounter().is_some());
    }
}
