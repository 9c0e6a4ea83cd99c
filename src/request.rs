//! What callers hand to a job and what they get back.

use std::{fmt, net::SocketAddr, time::Instant};

use crate::{
    attempt::QuicVersion,
    error::{Error, Result},
    priority::Priority,
    session::SessionHandle,
    tls::{AlpnProtocol, CertAndStatus, CertRequestInfo, SslInfo},
};

/// Identifies a stream request of a job. Never reused within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub(crate) u64);

/// Identifies a preconnect of a job. Never reused within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PreconnectId(pub(crate) u64);

/// Per-request knobs.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Urgency of the request.
    pub priority: Priority,
    /// Certificates the caller accepts despite verification errors.
    pub allowed_bad_certs: Vec<CertAndStatus>,
    /// Allow reusing a session of another destination that resolves to the
    /// same address.
    pub enable_ip_based_pooling: bool,
    /// Allow racing the alternate protocol.
    pub enable_alternative_services: bool,
    /// The alternate protocol version to race, if any.
    pub quic_version: Option<QuicVersion>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            priority: Priority::default(),
            allowed_bad_certs: Vec::new(),
            enable_ip_based_pooling: true,
            enable_alternative_services: true,
            quic_version: None,
        }
    }
}

impl RequestOptions {
    /// Options with `priority` and defaults otherwise.
    pub fn with_priority(priority: Priority) -> RequestOptions {
        RequestOptions {
            priority,
            ..RequestOptions::default()
        }
    }
}

/// Timestamps of the attempt that produced a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectTiming {
    /// When endpoint resolution started.
    pub dns_start: Option<Instant>,
    /// When endpoint resolution produced usable endpoints.
    pub dns_end: Option<Instant>,
    /// When the attempt started.
    pub connect_start: Option<Instant>,
    /// When the TCP handshake completed.
    pub tcp_handshake_end: Option<Instant>,
    /// When the attempt completed.
    pub connect_end: Option<Instant>,
}

/// A stream handed to a request.
pub enum HttpStream<S> {
    /// A socket dedicated to the request.
    Basic {
        /// The socket.
        socket: S,
        /// The negotiated protocol.
        negotiated: AlpnProtocol,
        /// Timing of the attempt that established the socket.
        timing: ConnectTiming,
    },
    /// A stream to open on a shared session.
    Multiplexed(SessionHandle),
}

impl<S> HttpStream<S> {
    /// Returns the protocol spoken on the stream.
    pub fn negotiated_protocol(&self) -> AlpnProtocol {
        match self {
            HttpStream::Basic { negotiated, .. } => *negotiated,
            HttpStream::Multiplexed(session) => session.protocol(),
        }
    }

    /// Returns the shared session, for multiplexed streams.
    pub fn session(&self) -> Option<&SessionHandle> {
        match self {
            HttpStream::Basic { .. } => None,
            HttpStream::Multiplexed(session) => Some(session),
        }
    }
}

impl<S> fmt::Debug for HttpStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpStream::Basic {
                negotiated, timing, ..
            } => f
                .debug_struct("Basic")
                .field("negotiated", negotiated)
                .field("timing", timing)
                .finish(),
            HttpStream::Multiplexed(session) => f.debug_tuple("Multiplexed").field(session).finish(),
        }
    }
}

/// One failed attempt, recorded for diagnostics.
#[derive(Debug, Clone)]
pub struct ConnectionAttempt {
    /// The endpoint tried, `None` when resolution itself failed.
    pub endpoint: Option<SocketAddr>,
    /// Why it failed.
    pub error: Error,
}

/// Diagnostics delivered with a failure.
#[derive(Debug, Clone, Default)]
pub struct FailureDetails {
    /// Every failed attempt, oldest first.
    pub connection_attempts: Vec<ConnectionAttempt>,
    /// Why the alternate protocol failed, if it was tried.
    pub quic_error: Option<Error>,
}

/// The single result delivered to a request.
pub enum StreamOutcome<S> {
    /// A stream is ready.
    Ready(HttpStream<S>),
    /// Establishing a stream failed.
    Failed {
        /// The failure.
        error: Error,
        /// What was tried.
        details: FailureDetails,
    },
    /// The destination's certificate was rejected.
    CertificateError {
        /// The rejection.
        error: Error,
        /// The rejected certificate.
        ssl_info: SslInfo,
    },
    /// The destination asked for a client certificate.
    NeedsClientAuth {
        /// The failure.
        error: Error,
        /// What the server asked for.
        cert_info: CertRequestInfo,
    },
}

impl<S> StreamOutcome<S> {
    /// Returns true for [`StreamOutcome::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, StreamOutcome::Ready(_))
    }

    /// Returns the error of a failed outcome.
    pub fn error(&self) -> Option<&Error> {
        match self {
            StreamOutcome::Ready(_) => None,
            StreamOutcome::Failed { error, .. }
            | StreamOutcome::CertificateError { error, .. }
            | StreamOutcome::NeedsClientAuth { error, .. } => Some(error),
        }
    }

    /// Collapses the outcome into a `Result`, dropping failure details.
    pub fn into_result(self) -> Result<HttpStream<S>> {
        match self {
            StreamOutcome::Ready(stream) => Ok(stream),
            StreamOutcome::Failed { error, .. }
            | StreamOutcome::CertificateError { error, .. }
            | StreamOutcome::NeedsClientAuth { error, .. } => Err(error),
        }
    }
}

impl<S> fmt::Debug for StreamOutcome<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamOutcome::Ready(stream) => f.debug_tuple("Ready").field(stream).finish(),
            StreamOutcome::Failed { error, details } => f
                .debug_struct("Failed")
                .field("error", error)
                .field("details", details)
                .finish(),
            StreamOutcome::CertificateError { error, ssl_info } => f
                .debug_struct("CertificateError")
                .field("error", error)
                .field("ssl_info", ssl_info)
                .finish(),
            StreamOutcome::NeedsClientAuth { error, cert_info } => f
                .debug_struct("NeedsClientAuth")
                .field("error", error)
                .field("cert_info", cert_info)
                .finish(),
        }
    }
}

/// The kind of failure a job settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Establishing a stream failed.
    StreamFailed,
    /// The destination's certificate was rejected.
    CertificateError,
    /// The destination asked for a client certificate.
    NeedsClientAuth,
}

/// Receives the outcome of one stream request.
///
/// Consumed by the notification, so an outcome is delivered at most once.
pub trait Delegate<S>: Send {
    /// Delivers the outcome.
    fn notify(self: Box<Self>, outcome: StreamOutcome<S>);
}

impl<S, F> Delegate<S> for F
where
    F: FnOnce(StreamOutcome<S>) + Send,
{
    fn notify(self: Box<Self>, outcome: StreamOutcome<S>) {
        (*self)(outcome)
    }
}

/// Receives the result of one preconnect.
pub type PreconnectCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// The immediate answer to a preconnect.
#[derive(Debug)]
pub enum PreconnectStatus {
    /// Nothing to wait for; the callback will not be called.
    Ready(Result<()>),
    /// The callback will be called once with the result.
    Pending(PreconnectId),
}

/// The immediate answer to a stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// The request is queued; the delegate is called later.
    Pending(RequestId),
    /// The delegate was already called.
    Done,
}

impl RequestStatus {
    /// Returns the id of a queued request.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            RequestStatus::Pending(id) => Some(*id),
            RequestStatus::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn closure_delegate_is_called_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let delegate: Box<dyn Delegate<()>> = Box::new(move |outcome: StreamOutcome<()>| {
            sink.lock().unwrap().push(outcome.is_ready());
        });

        delegate.notify(StreamOutcome::Failed {
            error: Error::canceled(),
            details: FailureDetails::default(),
        });
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[test]
    fn outcome_into_result() {
        let outcome: StreamOutcome<()> = StreamOutcome::NeedsClientAuth {
            error: Error::client_auth_required(),
            cert_info: CertRequestInfo::default(),
        };
        assert!(outcome.error().unwrap().is_client_auth_required());
        assert!(outcome.into_result().unwrap_err().is_client_auth_required());

        let ready = StreamOutcome::Ready(HttpStream::Basic {
            socket: (),
            negotiated: AlpnProtocol::HTTP1,
            timing: ConnectTiming::default(),
        });
        assert!(ready.is_ready());
        let stream = ready.into_result().unwrap();
        assert_eq!(stream.negotiated_protocol(), AlpnProtocol::HTTP1);
        assert!(stream.session().is_none());
    }

    #[test]
    fn default_options_enable_pooling() {
        let options = RequestOptions::with_priority(Priority::Highest);
        assert_eq!(options.priority, Priority::Highest);
        assert!(options.enable_ip_based_pooling);
        assert!(options.enable_alternative_services);
        assert!(options.quic_version.is_none());
    }
}
