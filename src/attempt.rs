//! The boundary between a job and the connection attempts it drives.
//!
//! An attempt is one TCP connect (optionally followed by a TLS handshake) to
//! a single IP endpoint. The job creates attempts through an
//! [`AttemptFactory`] and learns about their progress through the `on_*`
//! event methods of [`Job`](crate::Job), each tagged with the
//! [`AttemptId`] the job assigned.

use std::{fmt, net::SocketAddr, task::Poll};

use crate::{
    error::Error,
    key::StreamKey,
    resolve::ServiceEndpoint,
    session::SessionHandle,
    tls::{AlpnProtocol, CertRequestInfo, SslConfig, SslInfo},
};

/// Identifies one attempt of a job. Never reused within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId(pub(crate) u64);

impl AttemptId {
    /// Returns the numeric value of the id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt#{}", self.0)
    }
}

/// A socket established by an attempt, with the protocol negotiated on it.
#[derive(Debug)]
pub struct Connected<S> {
    /// The established socket.
    pub socket: S,
    /// The protocol negotiated through ALPN, `http/1.1` without TLS.
    pub negotiated: AlpnProtocol,
}

impl<S> Connected<S> {
    /// Wraps a socket that negotiated `negotiated`.
    pub fn new(socket: S, negotiated: AlpnProtocol) -> Connected<S> {
        Connected { socket, negotiated }
    }
}

/// How an attempt failed.
///
/// Certificate and client authentication failures carry the details a caller
/// needs to act on them and stop the job from trying other endpoints.
#[derive(Debug, Clone)]
pub enum AttemptError {
    /// Connecting or handshaking failed.
    Failed(Error),
    /// The peer's certificate was rejected.
    Certificate {
        /// The rejection.
        error: Error,
        /// The certificate that was rejected.
        ssl_info: SslInfo,
    },
    /// The peer asked for a client certificate.
    ClientAuthRequired {
        /// The failure reported for the handshake.
        error: Error,
        /// What the server asked for.
        cert_info: CertRequestInfo,
    },
}

impl AttemptError {
    /// Returns the underlying error.
    pub fn error(&self) -> &Error {
        match self {
            AttemptError::Failed(error)
            | AttemptError::Certificate { error, .. }
            | AttemptError::ClientAuthRequired { error, .. } => error,
        }
    }
}

impl From<Error> for AttemptError {
    fn from(error: Error) -> AttemptError {
        AttemptError::Failed(error)
    }
}

/// A running attempt owned by a job. Dropping it cancels the attempt.
pub trait StreamAttempt: Send {
    /// Delivers the TLS configuration to an attempt that was parked in
    /// [`SslConfigProvider::wait_for_ssl_config_ready`].
    fn on_ssl_config_ready(&mut self, _config: &SslConfig) {}
}

/// The result of starting an attempt.
pub enum Started<S> {
    /// The attempt runs; its events are reported to the job later.
    Pending(Box<dyn StreamAttempt>),
    /// The attempt finished while starting.
    Ready(Result<Connected<S>, AttemptError>),
}

impl<S> fmt::Debug for Started<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Started::Pending(_) => f.write_str("Started::Pending"),
            Started::Ready(Ok(connected)) => f
                .debug_tuple("Started::Ready")
                .field(&connected.negotiated)
                .finish(),
            Started::Ready(Err(err)) => f.debug_tuple("Started::Ready").field(err).finish(),
        }
    }
}

/// Creates attempts for a job.
pub trait AttemptFactory<S>: Send {
    /// Starts connecting to `endpoint`, with TLS when `secure` is set.
    ///
    /// TLS attempts obtain their configuration from the job through the
    /// [`SslConfigProvider`] capability.
    fn start(&mut self, id: AttemptId, endpoint: SocketAddr, secure: bool) -> Started<S>;
}

/// Version of the alternate protocol a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuicVersion(pub u32);

impl QuicVersion {
    /// QUIC version 1 (RFC 9000).
    pub const V1: QuicVersion = QuicVersion(0x0000_0001);
}

/// The alternate protocol task racing TCP based attempts.
///
/// Dropping the task cancels it. It reports a single result through
/// [`Job::on_quic_task_complete`](crate::Job::on_quic_task_complete).
pub trait QuicTask: Send {
    /// Called whenever the endpoints change; the task starts attempts to
    /// endpoints it has not tried yet.
    fn maybe_attempt(&mut self, endpoints: &[ServiceEndpoint]);
}

/// Creates the alternate protocol task for a job.
pub trait QuicTaskFactory: Send {
    /// Creates, without starting, a task for `key`.
    fn create(&mut self, version: QuicVersion, key: &StreamKey, config: &SslConfig) -> Box<dyn QuicTask>;
}

/// The capability a job offers its TLS attempts. Implemented by
/// [`Job`](crate::Job).
pub trait SslConfigProvider {
    /// Returns `Poll::Ready` once the configuration is available. Otherwise
    /// the attempt is parked and receives the configuration through
    /// [`StreamAttempt::on_ssl_config_ready`].
    fn wait_for_ssl_config_ready(&mut self, id: AttemptId) -> Poll<()>;

    /// Returns the configuration, if it was computed.
    fn ssl_config(&self) -> Option<SslConfig>;
}

/// The terminal result of a QUIC task.
pub type QuicResult = Result<SessionHandle, AttemptError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::CertStatus;

    #[test]
    fn attempt_error_exposes_error() {
        let err = AttemptError::Certificate {
            error: Error::certificate("expired"),
            ssl_info: SslInfo {
                cert_chain: Vec::new(),
                cert_status: CertStatus::DATE_INVALID,
            },
        };
        assert!(err.error().is_certificate());

        let err: AttemptError = Error::connect("refused").into();
        assert!(err.error().is_connect());
    }

    #[test]
    fn attempt_id_display() {
        assert_eq!(AttemptId(7).to_string(), "attempt#7");
    }
}
