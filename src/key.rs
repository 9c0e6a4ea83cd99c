use std::fmt;

use http::uri::{Scheme, Uri};

use crate::error::{Error, Result};

/// The destination one job serves.
///
/// Two requests share a job only when their keys compare equal: same
/// scheme, host and port, the same proxy (if any) and the same network
/// partition.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    scheme: Scheme,
    host: Box<str>,
    port: u16,
    proxy: Option<Uri>,
    partition: Option<Box<str>>,
}

impl StreamKey {
    /// Creates a key for a direct connection to `host:port`.
    pub fn new<H>(scheme: Scheme, host: H, port: u16) -> StreamKey
    where
        H: Into<Box<str>>,
    {
        StreamKey {
            scheme,
            host: host.into(),
            port,
            proxy: None,
            partition: None,
        }
    }

    /// Builds a key from an absolute `http` or `https` URI.
    ///
    /// The port falls back to the scheme's conventional port.
    pub fn from_uri(uri: &Uri) -> Result<StreamKey> {
        let scheme = match uri.scheme() {
            Some(scheme) if *scheme == Scheme::HTTP || *scheme == Scheme::HTTPS => scheme.clone(),
            Some(scheme) => {
                return Err(Error::builder(format!("unsupported scheme: {scheme}")));
            }
            None => {
                return Err(Error::builder(format!(
                    "absolute-form URI required, received: {uri:?}"
                )));
            }
        };

        let host = match uri.host() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(Error::builder(format!("URI has no host: {uri:?}"))),
        };

        let port = match uri.port_u16() {
            Some(port) => port,
            None if scheme == Scheme::HTTPS => 443,
            None => 80,
        };

        Ok(StreamKey::new(scheme, host, port))
    }

    /// Routes the destination through `proxy`.
    pub fn with_proxy(mut self, proxy: Uri) -> StreamKey {
        self.proxy = Some(proxy);
        self
    }

    /// Isolates the destination in a network partition.
    pub fn with_partition<P>(mut self, partition: P) -> StreamKey
    where
        P: Into<Box<str>>,
    {
        self.partition = Some(partition.into());
        self
    }

    /// Returns the destination scheme.
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Returns the destination host as written in the URI.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the destination port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the proxy connections are routed through, if any.
    pub fn proxy(&self) -> Option<&Uri> {
        self.proxy.as_ref()
    }

    /// Returns the network partition, if any.
    pub fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }

    /// Returns true when streams to this destination use TLS.
    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }

    /// Returns the host name used for TLS server name indication.
    pub fn server_name(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("StreamKey");
        builder.field("destination", &format_args!("{self}"));
        if let Some(ref proxy) = self.proxy {
            builder.field("proxy", proxy);
        }
        if let Some(ref partition) = self.partition {
            builder.field("partition", partition);
        }
        builder.finish()
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_uri_uses_default_ports() {
        let key = StreamKey::from_uri(&"https://example.com/path".parse().unwrap()).unwrap();
        assert_eq!(key.port(), 443);
        assert!(key.is_secure());

        let key = StreamKey::from_uri(&"http://example.com".parse().unwrap()).unwrap();
        assert_eq!(key.port(), 80);
        assert!(!key.is_secure());

        let key = StreamKey::from_uri(&"https://example.com:8443".parse().unwrap()).unwrap();
        assert_eq!(key.port(), 8443);
        assert_eq!(key.to_string(), "https://example.com:8443");
    }

    #[test]
    fn from_uri_rejects_relative_and_foreign_schemes() {
        let err = StreamKey::from_uri(&"/relative".parse().unwrap()).unwrap_err();
        assert!(err.is_builder());

        let err = StreamKey::from_uri(&"ftp://example.com".parse().unwrap()).unwrap_err();
        assert!(err.is_builder());
    }

    #[test]
    fn proxy_and_partition_split_keys() {
        let direct = StreamKey::new(Scheme::HTTPS, "example.com", 443);
        let proxied = direct
            .clone()
            .with_proxy("http://proxy.local:3128".parse().unwrap());
        let partitioned = direct.clone().with_partition("https://top-level.example");

        assert_ne!(direct, proxied);
        assert_ne!(direct, partitioned);
        assert_eq!(partitioned.partition(), Some("https://top-level.example"));
    }

    #[test]
    fn server_name_strips_ipv6_brackets() {
        let key = StreamKey::from_uri(&"https://[::1]:443".parse().unwrap()).unwrap();
        assert_eq!(key.server_name(), "::1");
    }
}
