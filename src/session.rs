use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::tls::AlpnProtocol;

/// A shared connection able to carry many streams at once (HTTP/2 or QUIC).
///
/// Sessions are owned by the pool. A job only keeps a weak reference to the
/// session it adopted, so a session closed by the pool is never kept alive
/// by a job.
pub trait Session: Send + Sync {
    /// Returns true while new streams may be opened on the session.
    fn is_available(&self) -> bool;

    /// Returns the protocol spoken on the session.
    fn protocol(&self) -> AlpnProtocol;
}

/// A strong reference to a shared [`Session`].
#[derive(Clone)]
pub struct SessionHandle(Arc<dyn Session>);

impl SessionHandle {
    /// Wraps a session owned by the pool.
    pub fn new(session: Arc<dyn Session>) -> SessionHandle {
        SessionHandle(session)
    }

    /// Returns true while new streams may be opened on the session.
    pub fn is_available(&self) -> bool {
        self.0.is_available()
    }

    /// Returns the protocol spoken on the session.
    pub fn protocol(&self) -> AlpnProtocol {
        self.0.protocol()
    }

    /// Returns true if both handles refer to the same session.
    pub fn ptr_eq(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.0))
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("protocol", &self.protocol())
            .field("available", &self.is_available())
            .finish()
    }
}

/// The non-owning reference a job keeps to its adopted session.
#[derive(Clone)]
pub(crate) struct WeakSession(Weak<dyn Session>);

impl WeakSession {
    /// Returns the session if it is still alive and accepts new streams.
    pub(crate) fn available(&self) -> Option<SessionHandle> {
        self.0
            .upgrade()
            .map(SessionHandle)
            .filter(SessionHandle::is_available)
    }
}

impl fmt::Debug for WeakSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSession")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}
