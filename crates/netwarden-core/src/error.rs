//! Error taxonomy for the netwarden scan core.

use thiserror::Error;

use crate::types::NetworkId;

/// Orchestration errors returned synchronously to callers of the scan
/// manager operations.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a sweep is already running")]
    AlreadyRunning,

    #[error("network not found: {0}")]
    NetworkNotFound(NetworkId),

    #[error("no sweep is currently running")]
    NotRunning,

    #[error("invalid IPv4 CIDR: {0}")]
    InvalidNetwork(String),

    #[error("network {network_id} still has {devices} devices; pass force to cascade")]
    NetworkNotEmpty { network_id: NetworkId, devices: u32 },

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the network registry and device store boundaries.
///
/// `Unavailable` marks a whole-store outage: a sweep that hits it
/// aborts, while any other variant is recovered per record.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this failure means the store as a whole is gone, as
    /// opposed to a single record operation failing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetworkId;

    #[test]
    fn messages_are_human_readable() {
        let id = NetworkId::new();
        let msg = ScanError::NetworkNotFound(id).to_string();
        assert!(msg.contains(&id.to_string()));

        assert_eq!(
            ScanError::AlreadyRunning.to_string(),
            "a sweep is already running"
        );
    }

    #[test]
    fn only_unavailable_is_fatal() {
        assert!(StoreError::Unavailable("connection lost".into()).is_fatal());
        assert!(!StoreError::NotFound("device 10.0.0.1".into()).is_fatal());
    }
}
