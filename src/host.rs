//! An in-process host for [`Worker`]s.
//!
//! A [`Registration`] keeps at most one active and one waiting worker
//! version, tracks open clients and which version controls each of them, and
//! routes client messages to the controlling version.

use log::{debug, info};
use parking_lot::Mutex;
use serde_json::Value;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::lifecycle::{Host, LifecycleError, Worker};
use crate::reply::ReplySink;
use crate::InFlight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    Installing,
    Waiting,
    Active,
}

#[derive(Clone, Default)]
pub struct Registration {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    next_version: u64,
    next_client: u64,
    versions: BTreeMap<u64, Entry>,
    active: Option<u64>,
    waiting: Option<u64>,
    clients: BTreeMap<ClientId, Option<u64>>,
}

struct Entry {
    worker: Arc<dyn Worker>,
    state: VersionState,
}

impl State {
    fn controlled_by(&self, version: u64) -> usize {
        self.clients
            .values()
            .filter(|&&controller| controller == Some(version))
            .count()
    }
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `worker` as a new version and returns its version number.
    ///
    /// The version activates right away if its `on_init` hook asked to skip
    /// waiting, or if the current active version controls no clients.
    /// Otherwise it waits, replacing any previously waiting version.
    ///
    /// An error from the worker's `on_activate` hook is returned as is. The
    /// version stays active in that case: the versions it superseded are
    /// already gone, and clients it did not get to claim stay uncontrolled.
    pub fn register(&self, worker: Arc<dyn Worker>) -> Result<u64, LifecycleError> {
        let version = {
            let mut st = self.state.lock();
            st.next_version += 1;
            let version = st.next_version;
            st.versions.insert(
                version,
                Entry {
                    worker: worker.clone(),
                    state: VersionState::Installing,
                },
            );
            version
        };
        info!("installing worker version {}", version);

        let scope = HookScope::new(self, version);
        worker.on_init(&scope);

        let activate = {
            let mut st = self.state.lock();
            let idle = match st.active {
                Some(active) => st.controlled_by(active) == 0,
                None => true,
            };
            if scope.skip_waiting.get() || idle {
                true
            } else {
                if let Some(previous) = st.waiting.replace(version) {
                    debug!("worker version {} replaced while waiting", previous);
                    st.versions.remove(&previous);
                }
                if let Some(entry) = st.versions.get_mut(&version) {
                    entry.state = VersionState::Waiting;
                }
                false
            }
        };
        if activate {
            self.activate(version)?;
        } else {
            info!("worker version {} is waiting", version);
        }
        Ok(version)
    }

    fn activate(&self, version: u64) -> Result<(), LifecycleError> {
        let worker = {
            let mut st = self.state.lock();
            let worker = match st.versions.get_mut(&version) {
                Some(entry) => {
                    entry.state = VersionState::Active;
                    entry.worker.clone()
                }
                None => return Err(LifecycleError::Unregistered(version)),
            };
            if let Some(waiting) = st.waiting.take() {
                if waiting != version {
                    debug!("worker version {} superseded by {} while waiting", waiting, version);
                    st.versions.remove(&waiting);
                }
            }
            if let Some(previous) = st.active.replace(version) {
                st.versions.remove(&previous);
                for controller in st.clients.values_mut() {
                    if *controller == Some(previous) {
                        *controller = Some(version);
                    }
                }
                debug!("worker version {} superseded by {}", previous, version);
            }
            worker
        };
        info!("activating worker version {}", version);

        let scope = HookScope::new(self, version);
        worker.on_activate(&scope)
    }

    fn claim(&self, version: u64) -> Result<usize, LifecycleError> {
        let mut st = self.state.lock();
        if !st.versions.contains_key(&version) {
            return Err(LifecycleError::Unregistered(version));
        }
        if st.active != Some(version) {
            return Err(LifecycleError::NotActive(version));
        }
        for controller in st.clients.values_mut() {
            *controller = Some(version);
        }
        Ok(st.clients.len())
    }

    /// Opens a client. It is controlled by the active version, if any.
    pub fn connect(&self) -> ClientId {
        let mut st = self.state.lock();
        st.next_client += 1;
        let client = ClientId(st.next_client);
        let controller = st.active;
        st.clients.insert(client, controller);
        debug!("{} connected (controller: {:?})", client, controller);
        client
    }

    /// Closes a client, promoting the waiting version once the active one
    /// has no clients left.
    pub fn disconnect(&self, client: ClientId) -> Result<bool, LifecycleError> {
        let promote = {
            let mut st = self.state.lock();
            if st.clients.remove(&client).is_none() {
                return Ok(false);
            }
            debug!("{} disconnected", client);
            match (st.active, st.waiting) {
                (Some(active), Some(waiting)) if st.controlled_by(active) == 0 => Some(waiting),
                _ => None,
            }
        };
        if let Some(waiting) = promote {
            self.activate(waiting)?;
        }
        Ok(true)
    }

    /// Delivers `message` to the version controlling `client`.
    ///
    /// Returns `None` when the client is unknown or uncontrolled, or when
    /// the worker ignored the message.
    pub fn post_message<R: ReplySink>(
        &self,
        client: ClientId,
        message: &Value,
        reply_to: R,
    ) -> Option<InFlight> {
        let worker = {
            let st = self.state.lock();
            let version = match st.clients.get(&client) {
                Some(Some(version)) => *version,
                Some(None) => {
                    debug!("{} has no controller; message dropped", client);
                    return None;
                }
                None => {
                    debug!("{} is not connected; message dropped", client);
                    return None;
                }
            };
            st.versions.get(&version)?.worker.clone()
        };
        worker.on_message(message, Box::new(reply_to))
    }

    pub fn active_version(&self) -> Option<u64> {
        self.state.lock().active
    }

    pub fn waiting_version(&self) -> Option<u64> {
        self.state.lock().waiting
    }

    pub fn version_state(&self, version: u64) -> Option<VersionState> {
        self.state.lock().versions.get(&version).map(|entry| entry.state)
    }

    pub fn controller(&self, client: ClientId) -> Option<u64> {
        self.state.lock().clients.get(&client).copied().flatten()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Registration")
            .field("active", &st.active)
            .field("waiting", &st.waiting)
            .field("clients", &st.clients.len())
            .finish()
    }
}

/// The [`Host`] a single hook invocation sees.
struct HookScope<'a> {
    registration: &'a Registration,
    version: u64,
    skip_waiting: Cell<bool>,
}

impl<'a> HookScope<'a> {
    fn new(registration: &'a Registration, version: u64) -> Self {
        Self {
            registration,
            version,
            skip_waiting: Cell::new(false),
        }
    }
}

impl Host for HookScope<'_> {
    fn skip_waiting(&self) {
        self.skip_waiting.set(true);
    }

    fn claim_clients(&self) -> Result<usize, LifecycleError> {
        self.registration.claim(self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::EventSendResult;
    use std::sync::mpsc::channel;

    /// Answers every message with its own version number.
    struct Probe {
        version_tag: u64,
        skip_waiting: bool,
        claim: bool,
    }

    impl Probe {
        fn new(version_tag: u64, skip_waiting: bool, claim: bool) -> Arc<dyn Worker> {
            Arc::new(Self {
                version_tag,
                skip_waiting,
                claim,
            })
        }
    }

    impl Worker for Probe {
        fn on_init(&self, host: &dyn Host) {
            if self.skip_waiting {
                host.skip_waiting();
            }
        }

        fn on_activate(&self, host: &dyn Host) -> Result<(), LifecycleError> {
            if self.claim {
                host.claim_clients()?;
            }
            Ok(())
        }

        fn on_message(&self, _message: &Value, reply_to: Box<dyn ReplySink>) -> Option<InFlight> {
            reply_to.post_message(EventSendResult::Sent {
                data: serde_json::json!(self.version_tag),
            });
            None
        }
    }

    fn ask(registration: &Registration, client: ClientId) -> Option<EventSendResult> {
        let (tx, rx) = channel();
        let _ = registration.post_message(client, &serde_json::json!({}), tx);
        rx.try_recv().ok()
    }

    fn answered_by(version_tag: u64) -> Option<EventSendResult> {
        Some(EventSendResult::Sent {
            data: serde_json::json!(version_tag),
        })
    }

    #[test]
    fn test_first_version_activates() {
        let registration = Registration::new();
        let version = registration.register(Probe::new(1, false, false)).unwrap();
        assert_eq!(registration.active_version(), Some(version));
        assert_eq!(registration.version_state(version), Some(VersionState::Active));
    }

    #[test]
    fn test_uncontrolled_client_needs_claim() {
        let registration = Registration::new();
        let early = registration.connect();
        registration.register(Probe::new(1, false, false)).unwrap();
        assert_eq!(registration.controller(early), None);
        assert_eq!(ask(&registration, early), None);

        let claiming = Registration::new();
        let early = claiming.connect();
        let version = claiming.register(Probe::new(1, false, true)).unwrap();
        assert_eq!(claiming.controller(early), Some(version));
        assert_eq!(ask(&claiming, early), answered_by(1));
    }

    #[test]
    fn test_new_version_waits_for_clients() {
        let registration = Registration::new();
        let v1 = registration.register(Probe::new(1, false, false)).unwrap();
        let client = registration.connect();
        let v2 = registration.register(Probe::new(2, false, false)).unwrap();

        assert_eq!(registration.active_version(), Some(v1));
        assert_eq!(registration.waiting_version(), Some(v2));
        assert_eq!(registration.version_state(v2), Some(VersionState::Waiting));
        assert_eq!(ask(&registration, client), answered_by(1));

        assert!(registration.disconnect(client).unwrap());
        assert_eq!(registration.active_version(), Some(v2));
        assert_eq!(registration.waiting_version(), None);
        assert_eq!(registration.version_state(v1), None);
        let next = registration.connect();
        assert_eq!(ask(&registration, next), answered_by(2));
    }

    #[test]
    fn test_skip_waiting_supersedes_active() {
        let registration = Registration::new();
        registration.register(Probe::new(1, false, false)).unwrap();
        let client = registration.connect();
        let v2 = registration.register(Probe::new(2, true, true)).unwrap();

        assert_eq!(registration.active_version(), Some(v2));
        assert_eq!(registration.controller(client), Some(v2));
        assert_eq!(ask(&registration, client), answered_by(2));
    }

    #[test]
    fn test_waiting_version_is_replaced() {
        let registration = Registration::new();
        registration.register(Probe::new(1, false, false)).unwrap();
        let _client = registration.connect();
        let v2 = registration.register(Probe::new(2, false, false)).unwrap();
        let v3 = registration.register(Probe::new(3, false, false)).unwrap();
        assert_eq!(registration.waiting_version(), Some(v3));
        assert_eq!(registration.version_state(v2), None);
    }

    #[test]
    fn test_skip_waiting_discards_waiting_version() {
        let registration = Registration::new();
        registration.register(Probe::new(1, false, false)).unwrap();
        let client = registration.connect();
        let v2 = registration.register(Probe::new(2, false, false)).unwrap();
        let v3 = registration.register(Probe::new(3, true, false)).unwrap();

        assert_eq!(registration.active_version(), Some(v3));
        assert_eq!(registration.waiting_version(), None);
        assert_eq!(registration.version_state(v2), None);

        assert!(registration.disconnect(client).unwrap());
        assert_eq!(registration.active_version(), Some(v3));
        let next = registration.connect();
        assert_eq!(ask(&registration, next), answered_by(3));
    }

    /// Skips waiting, then fails its own activation.
    struct FailingActivation;

    impl Worker for FailingActivation {
        fn on_init(&self, host: &dyn Host) {
            host.skip_waiting();
        }

        fn on_activate(&self, _host: &dyn Host) -> Result<(), LifecycleError> {
            Err(LifecycleError::Unregistered(0))
        }

        fn on_message(&self, message: &Value, reply_to: Box<dyn ReplySink>) -> Option<InFlight> {
            Probe::new(9, false, false).on_message(message, reply_to)
        }
    }

    #[test]
    fn test_failed_activation_stays_active() {
        let registration = Registration::new();
        let v1 = registration.register(Probe::new(1, false, false)).unwrap();
        let client = registration.connect();
        let result = registration.register(Arc::new(FailingActivation));
        assert!(matches!(result, Err(LifecycleError::Unregistered(0))));

        let active = registration.active_version().unwrap();
        assert_ne!(active, v1);
        assert_eq!(registration.version_state(active), Some(VersionState::Active));
        assert_eq!(registration.version_state(v1), None);
        assert_eq!(registration.controller(client), Some(active));
        assert_eq!(ask(&registration, client), answered_by(9));
    }

    #[test]
    fn test_claim_requires_active_version() {
        let registration = Registration::new();
        let v1 = registration.register(Probe::new(1, false, false)).unwrap();
        let _client = registration.connect();
        let v2 = registration.register(Probe::new(2, false, false)).unwrap();
        assert!(matches!(
            registration.claim(v2),
            Err(LifecycleError::NotActive(v)) if v == v2
        ));
        assert_eq!(registration.claim(v1).unwrap(), 1);
        assert!(matches!(
            registration.claim(99),
            Err(LifecycleError::Unregistered(99))
        ));
    }

    #[test]
    fn test_unknown_client() {
        let registration = Registration::new();
        registration.register(Probe::new(1, false, false)).unwrap();
        let client = registration.connect();
        assert!(registration.disconnect(client).unwrap());
        assert!(!registration.disconnect(client).unwrap());
        assert_eq!(ask(&registration, client), None);
    }
}
