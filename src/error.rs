//! Unified error handling for the scan-dispatch library.
//!
//! Construction-time configuration and store failures surface through
//! [`DispatchError`]. Expected runtime misses (unknown account, empty
//! queue or geofence, unknown instance on the dispatch path) are not
//! errors: they degrade to `Option`/empty tasks with a logged skip,
//! because a polling device must always receive a well-formed response.

use thiserror::Error;

/// Unified error type for scan-dispatch operations.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// No geofence is configured under the requested name.
    #[error("unknown geofence: {name}")]
    UnknownGeofence { name: String },

    /// The external account store failed a read or write.
    #[error("account store error: {message}")]
    Store { message: String },
}

impl DispatchError {
    /// Store-failure constructor for [`crate::AccountStore`] implementations
    /// wrapping fallible backends.
    pub fn store(message: impl Into<String>) -> Self {
        DispatchError::Store {
            message: message.into(),
        }
    }
}

/// Result type alias for scan-dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::UnknownGeofence {
            name: "city-west".to_string(),
        };
        assert!(err.to_string().contains("city-west"));

        let err = DispatchError::store("connection reset");
        assert!(err.to_string().contains("connection reset"));
    }
}
