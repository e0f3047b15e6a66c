//! Hooks that decide when a worker is reachable.

use serde_json::Value;
use thiserror::Error;

use crate::reply::ReplySink;
use crate::InFlight;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    #[error("version {0} is not the active worker")]
    NotActive(u64),
    #[error("version {0} is no longer registered")]
    Unregistered(u64),
}

/// The runtime a worker lives in, as seen from inside its hooks.
pub trait Host {
    /// Asks the runtime to activate this worker without waiting for the
    /// previous version's clients to go away.
    fn skip_waiting(&self);

    /// Routes every open client to this worker. Returns the number of
    /// clients claimed.
    fn claim_clients(&self) -> Result<usize, LifecycleError>;
}

pub trait Worker: Send + Sync {
    fn on_init(&self, host: &dyn Host);

    /// Must not return before any claim it starts has finished.
    fn on_activate(&self, host: &dyn Host) -> Result<(), LifecycleError>;

    fn on_message(&self, message: &Value, reply_to: Box<dyn ReplySink>) -> Option<InFlight>;
}
