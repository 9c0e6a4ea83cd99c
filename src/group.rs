use std::net::SocketAddr;

use crate::{
    attempt::Connected, error::Result, resolve::ServiceEndpoint, session::SessionHandle,
};

/// The registry a job belongs to.
///
/// A group owns every socket and session of one destination and shares
/// socket limits with the other groups of the pool. The job consults it
/// before each attempt and hands it everything it establishes.
pub trait Group<S>: Send {
    /// Returns true when the destination has no room for another socket.
    fn reached_group_limit(&self) -> bool;

    /// Returns true when the pool has no room for another socket.
    fn reached_pool_limit(&self) -> bool;

    /// Closes one idle socket of this destination. Returns false if there
    /// was none.
    fn close_one_idle_stream_socket(&mut self) -> bool;

    /// Closes one idle socket anywhere in the pool. Returns false if there
    /// was none.
    fn close_one_idle_stream_socket_in_pool(&mut self) -> bool;

    /// Number of sockets of this destination, idle or in use.
    fn active_stream_count(&self) -> usize;

    /// Returns true when the destination is known to speak HTTP/2.
    fn supports_http2(&self) -> bool {
        false
    }

    /// Returns true when the destination is known to reject HTTP/2.
    fn requires_http11(&self) -> bool {
        false
    }

    /// Looks up an available session for the destination.
    ///
    /// With `ip_pooling`, a session of another destination whose address is
    /// among `endpoints` may be returned.
    fn find_session(&self, _endpoints: &[ServiceEndpoint], _ip_pooling: bool) -> Option<SessionHandle> {
        None
    }

    /// Looks up an available QUIC session for the destination.
    fn find_quic_session(&self) -> Option<SessionHandle> {
        None
    }

    /// Creates a multiplexed session over a socket that negotiated it.
    fn create_session(&mut self, connected: Connected<S>) -> Result<SessionHandle>;

    /// Takes a socket no request is waiting for.
    fn add_idle_stream_socket(&mut self, connected: Connected<S>);

    /// Called when an attempt to `endpoint` starts.
    fn connecting_stream_started(&mut self, _endpoint: SocketAddr) {}

    /// Called when an attempt ends, successfully or not.
    fn connecting_stream_finished(&mut self) {}
}
