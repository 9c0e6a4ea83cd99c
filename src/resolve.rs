//! The boundary between a job and the service endpoint resolver.
//!
//! A job owns exactly one [`ServiceEndpointRequest`] for its lifetime. The
//! request may report partial results any number of times before it
//! finishes; the owner of the request forwards those reports to the job
//! through [`ServiceEndpointDelegate`].

use std::{net::SocketAddr, task::Poll};

use bytes::Bytes;

use crate::{error::Result, key::StreamKey, priority::Priority, tls::AlpnProtocol};

/// Metadata published alongside a set of addresses, e.g. from HTTPS records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointMetadata {
    /// Application protocols the destination advertises.
    pub supported_protocol_alpns: Vec<AlpnProtocol>,
    /// Encrypted ClientHello configuration.
    pub ech_config_list: Option<Bytes>,
}

/// One candidate set of addresses for a destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// IPv4 addresses, in resolver order.
    pub ipv4_endpoints: Vec<SocketAddr>,
    /// IPv6 addresses, in resolver order.
    pub ipv6_endpoints: Vec<SocketAddr>,
    /// Protocol hints for these addresses.
    pub metadata: EndpointMetadata,
}

impl ServiceEndpoint {
    /// Splits resolved addresses by family, keeping their order.
    pub fn from_addrs<I>(addrs: I) -> ServiceEndpoint
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        let (ipv6_endpoints, ipv4_endpoints) = addrs.into_iter().partition(SocketAddr::is_ipv6);
        ServiceEndpoint {
            ipv4_endpoints,
            ipv6_endpoints,
            metadata: EndpointMetadata::default(),
        }
    }

    /// Returns true when neither family has an address.
    pub fn is_empty(&self) -> bool {
        self.ipv4_endpoints.is_empty() && self.ipv6_endpoints.is_empty()
    }

    pub(crate) fn endpoints(&self, ipv6: bool) -> &[SocketAddr] {
        if ipv6 {
            &self.ipv6_endpoints
        } else {
            &self.ipv4_endpoints
        }
    }
}

/// An in-progress resolution for one destination.
///
/// Dropping the request cancels the resolution.
pub trait ServiceEndpointRequest: Send {
    /// Starts resolving.
    ///
    /// Returns `Poll::Ready` when the resolution finished synchronously, in
    /// which case no further delegate calls happen. Returns `Poll::Pending`
    /// when results will be reported through the delegate.
    fn start(&mut self) -> Poll<Result<()>>;

    /// Returns the endpoints known so far.
    fn endpoints(&self) -> Vec<ServiceEndpoint>;

    /// Returns true once enough is known to start cryptographic handshakes,
    /// e.g. HTTPS records have arrived or are known to be absent.
    fn endpoints_crypto_ready(&self) -> bool;

    /// Changes the urgency of the resolution.
    fn change_priority(&mut self, priority: Priority);
}

/// Creates endpoint requests for jobs.
pub trait Resolver: Send + Sync {
    /// Creates, without starting, a request for `key`.
    fn create_request(&self, key: &StreamKey, priority: Priority) -> Box<dyn ServiceEndpointRequest>;
}

/// Receives the progress of a [`ServiceEndpointRequest`]. Implemented by
/// [`Job`](crate::Job).
pub trait ServiceEndpointDelegate {
    /// Called when the request has new or changed endpoints. May be called
    /// any number of times before the request finishes.
    fn on_service_endpoints_updated(&mut self);

    /// Called exactly once when the request finished.
    fn on_service_endpoint_request_finished(&mut self, result: Result<()>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_addrs_splits_by_family() {
        let v4: SocketAddr = "192.0.2.1:443".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::1]:443".parse().unwrap();
        let v4b: SocketAddr = "192.0.2.2:443".parse().unwrap();

        let endpoint = ServiceEndpoint::from_addrs(vec![v4, v6, v4b]);
        assert_eq!(endpoint.ipv4_endpoints, vec![v4, v4b]);
        assert_eq!(endpoint.ipv6_endpoints, vec![v6]);
        assert_eq!(endpoint.endpoints(true), &[v6]);
        assert!(!endpoint.is_empty());
        assert!(ServiceEndpoint::default().is_empty());
    }
}
