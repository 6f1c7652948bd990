//! Session acquisition and release
//!
//! A [`Session`] is a scoped guard over one backend connection. Transient
//! sessions open a connection on acquire and close it when the guard is
//! dropped, on every exit path including unwinding. Persistent sessions
//! borrow the endpoint's long-lived connection and dropping the guard is a
//! no-op.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backend::{Transport, TransportResult};
use crate::endpoint::Endpoint;
use crate::error::{FsError, Result};

/// Lifetime of backend connections for one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPolicy {
    /// One connection per logical operation
    Transient,
    /// One connection for the endpoint's whole lifetime
    Persistent,
}

/// Connection shared by every operation on a persistent endpoint.
/// The mutex serializes request/response pairs.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

enum Handle {
    Transient(Option<Box<dyn Transport>>),
    Persistent(SharedTransport),
}

/// Scoped handle to a backend connection
pub struct Session<'a> {
    endpoint: &'a Endpoint,
    handle: Handle,
}

impl<'a> Session<'a> {
    /// Acquire a session for `endpoint` according to its policy
    ///
    /// Fails with `EndpointClosed` once the endpoint has been closed, and
    /// with `AuthenticationFailed` when a transient connection is refused.
    pub fn acquire(endpoint: &'a Endpoint) -> Result<Self> {
        endpoint.ensure_open()?;

        let handle = match endpoint.policy() {
            SessionPolicy::Transient => {
                let transport = endpoint.connect()?;
                tracing::debug!(endpoint = %endpoint.reference(), "transient session opened");
                Handle::Transient(Some(transport))
            }
            SessionPolicy::Persistent => {
                let shared = endpoint.persistent_transport().ok_or_else(|| {
                    FsError::EndpointClosed {
                        endpoint: endpoint.reference().to_string(),
                    }
                })?;
                Handle::Persistent(shared)
            }
        };

        Ok(Self { endpoint, handle })
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.endpoint
    }

    /// Run one backend request/response pair on this session
    pub fn call<T>(
        &mut self,
        f: impl FnOnce(&mut dyn Transport) -> TransportResult<T>,
    ) -> Result<TransportResult<T>> {
        match &mut self.handle {
            Handle::Transient(Some(transport)) => Ok(f(transport.as_mut())),
            Handle::Transient(None) => Err(FsError::EndpointClosed {
                endpoint: self.endpoint.reference().to_string(),
            }),
            Handle::Persistent(shared) => {
                let mut transport = shared.lock();
                Ok(f(transport.as_mut()))
            }
        }
    }

    /// Release explicitly; equivalent to dropping the guard
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Handle::Transient(slot) = &mut self.handle {
            if let Some(mut transport) = slot.take() {
                if let Err(e) = transport.close() {
                    tracing::warn!(
                        endpoint = %self.endpoint.reference(),
                        error = %e,
                        "failed to close transient session"
                    );
                } else {
                    tracing::debug!(endpoint = %self.endpoint.reference(), "transient session closed");
                }
            }
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}
