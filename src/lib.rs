//! Relays analytics events from a client to an HTTP backend.
//!
//! A caller posts `{ "type": "SEND_EVENT", "data": ... }` to an [`EventRelay`].
//! The relay POSTs `data` to `{base_url}/events` and answers with exactly one
//! [`EventSendResult`]: `EVENT_SENT` carrying the backend's JSON reply, or
//! `EVENT_ERROR` carrying a description of what went wrong. Every other
//! message is ignored.

use http::StatusCode;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

pub mod config;
pub mod event;
pub mod host;
pub mod lifecycle;
pub mod messages;
pub mod reply;
pub mod transport;

pub use crate::config::{Config, ConfigError};
pub use crate::lifecycle::{Host, LifecycleError, Worker};
pub use crate::messages::{EventSendRequest, EventSendResult};
pub use crate::reply::{ReplyFn, ReplySink};
pub use crate::transport::{HttpTransport, Transport, TransportError, TransportResponse};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SendError {
    #[error("HTTP {}: {}", .0.as_u16(), .0.canonical_reason().unwrap_or(""))]
    Rejected(StatusCode),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct EventRelay {
    config: Arc<Config>,
    events_url: Arc<str>,
    transport: Arc<dyn Transport>,
}

impl EventRelay {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(&config.user_agent);
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(EventRelay {
            config: Arc::new(config.clone()),
            events_url: config.events_url().into(),
            transport,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handles one inbound message.
    ///
    /// A `SEND_EVENT` message starts a send on its own thread and `reply_to`
    /// receives exactly one result once it completes. Anything else is
    /// dropped and `None` is returned.
    pub fn handle<R: ReplySink>(&self, message: &Value, reply_to: R) -> Option<InFlight> {
        debug!("received message: {}", message);
        if !self.config.enabled {
            debug!("relay is disabled; message ignored");
            return None;
        }
        let request = match EventSendRequest::from_message(message) {
            Some(request) => request,
            None => {
                debug!("not a SEND_EVENT message; ignored");
                return None;
            }
        };
        Some(self.spawn_send(request, reply_to))
    }

    fn spawn_send<R: ReplySink>(&self, request: EventSendRequest, reply_to: R) -> InFlight {
        // Shared with the worker thread so the reply survives a failed spawn.
        let slot = Arc::new(Mutex::new(Some(reply_to)));
        let relay = self.clone();
        let thread_slot = slot.clone();
        let spawned = thread::Builder::new()
            .name("event-relay-send".to_owned())
            .spawn(move || {
                let result = relay.send_event(&request.data);
                if let Some(reply_to) = thread_slot.lock().take() {
                    reply_to.post_message(result);
                }
            });
        match spawned {
            Ok(handle) => InFlight {
                handle: Some(handle),
            },
            Err(e) => {
                warn!("error sending event: {}", e);
                if let Some(reply_to) = slot.lock().take() {
                    reply_to.post_message(EventSendResult::Error {
                        error: e.to_string(),
                    });
                }
                InFlight { handle: None }
            }
        }
    }

    /// Sends one event and blocks until the outcome is known.
    pub fn send_event(&self, data: &Value) -> EventSendResult {
        match self.try_send_event(data) {
            Ok(data) => {
                info!("event sent successfully: {}", data);
                EventSendResult::Sent { data }
            }
            Err(e) => {
                warn!("error sending event: {}", e);
                EventSendResult::Error {
                    error: e.to_string(),
                }
            }
        }
    }

    pub fn try_send_event(&self, data: &Value) -> Result<Value, SendError> {
        let body = serde_json::to_vec(data)?;
        let resp = self.transport.post_json(&self.events_url, body)?;
        if !resp.status.is_success() {
            return Err(SendError::Rejected(resp.status));
        }
        let parsed = serde_json::from_slice(&resp.body)?;
        Ok(parsed)
    }
}

impl Worker for EventRelay {
    fn on_init(&self, host: &dyn Host) {
        info!("event relay installing");
        host.skip_waiting();
    }

    fn on_activate(&self, host: &dyn Host) -> Result<(), LifecycleError> {
        info!("event relay activating");
        let claimed = host.claim_clients()?;
        debug!("claimed {} client(s)", claimed);
        Ok(())
    }

    fn on_message(&self, message: &Value, reply_to: Box<dyn ReplySink>) -> Option<InFlight> {
        self.handle(message, reply_to)
    }
}

impl fmt::Debug for EventRelay {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        struct TransportPlaceholder;
        impl fmt::Debug for TransportPlaceholder {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("<dyn Transport>")
            }
        }
        f.debug_struct("EventRelay")
            .field("config", &self.config)
            .field("events_url", &self.events_url)
            .field("transport", &TransportPlaceholder)
            .finish()
    }
}

/// A send that has been started by [`EventRelay::handle`].
#[derive(Debug)]
#[must_use = "dropping an InFlight detaches the send; call wait() to block on it"]
pub struct InFlight {
    handle: Option<JoinHandle<()>>,
}

impl InFlight {
    /// Blocks until the reply has been posted.
    pub fn wait(self) {
        if let Some(handle) = self.handle {
            if handle.join().is_err() {
                warn!("event send thread panicked");
            }
        }
    }
}
