//! TLS parameters exchanged between a job and its attempts.
//!
//! The job never performs a handshake itself. It computes one [`SslConfig`]
//! per destination and hands it to every TLS attempt, and it carries the
//! certificate details an attempt reports back on failure.

use bytes::{BufMut, Bytes, BytesMut};

/// A TLS ALPN protocol.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct AlpnProtocol(&'static [u8]);

impl AlpnProtocol {
    /// Prefer HTTP/1.1
    pub const HTTP1: AlpnProtocol = AlpnProtocol(b"http/1.1");

    /// Prefer HTTP/2
    pub const HTTP2: AlpnProtocol = AlpnProtocol(b"h2");

    /// Prefer HTTP/3
    pub const HTTP3: AlpnProtocol = AlpnProtocol(b"h3");

    /// Create a new [`AlpnProtocol`] from a static byte slice.
    #[inline]
    pub const fn new(value: &'static [u8]) -> Self {
        AlpnProtocol(value)
    }

    /// Matches a protocol id negotiated on the wire against the known ones.
    pub fn from_wire(value: &[u8]) -> Option<AlpnProtocol> {
        [AlpnProtocol::HTTP1, AlpnProtocol::HTTP2, AlpnProtocol::HTTP3]
            .into_iter()
            .find(|proto| proto.0 == value)
    }

    /// Returns the protocol id.
    #[inline]
    pub fn as_bytes(&self) -> &'static [u8] {
        self.0
    }

    /// Returns true for protocols that carry many streams over one session.
    #[inline]
    pub fn is_multiplexed(&self) -> bool {
        *self == AlpnProtocol::HTTP2 || *self == AlpnProtocol::HTTP3
    }

    fn encode_sequence<'a, I>(items: I) -> Bytes
    where
        I: IntoIterator<Item = &'a AlpnProtocol>,
    {
        let mut buf = BytesMut::new();
        for item in items {
            buf.put_u8(item.0.len() as u8);
            buf.extend_from_slice(item.0);
        }
        buf.freeze()
    }
}

/// Certificate verification status bits, as reported by the verifier.
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq)]
pub struct CertStatus(pub u32);

impl CertStatus {
    /// The certificate does not match the server name.
    pub const COMMON_NAME_INVALID: CertStatus = CertStatus(1 << 0);
    /// The certificate is expired or not yet valid.
    pub const DATE_INVALID: CertStatus = CertStatus(1 << 1);
    /// The certificate chains to an untrusted root.
    pub const AUTHORITY_INVALID: CertStatus = CertStatus(1 << 2);
    /// The certificate was revoked.
    pub const REVOKED: CertStatus = CertStatus(1 << 6);

    /// Returns true if every bit of `other` is set.
    pub fn contains(&self, other: CertStatus) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no error bit is set.
    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }
}

/// A certificate the caller chose to accept despite its errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertAndStatus {
    /// DER encoded certificate.
    pub cert: Bytes,
    /// The errors that are tolerated for this certificate.
    pub status: CertStatus,
}

/// What an attempt learned about the peer's certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SslInfo {
    /// DER encoded chain, leaf first.
    pub cert_chain: Vec<Bytes>,
    /// Verification result of the chain.
    pub cert_status: CertStatus,
}

/// A server's request for a client certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertRequestInfo {
    /// `host:port` that asked for the certificate.
    pub host_and_port: String,
    /// DER encoded distinguished names of acceptable authorities.
    pub cert_authorities: Vec<Bytes>,
    /// TLS signature algorithms the server accepts.
    pub signature_algorithms: Vec<u16>,
}

/// TLS configuration shared by all TLS attempts of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslConfig {
    /// Name sent in the SNI extension.
    pub server_name: Box<str>,
    /// Protocols offered, most preferred first.
    pub alpn_protos: Vec<AlpnProtocol>,
    /// Certificates accepted despite verification errors.
    pub allowed_bad_certs: Vec<CertAndStatus>,
    /// Encrypted ClientHello configuration published by the destination.
    pub ech_config_list: Option<Bytes>,
}

impl SslConfig {
    /// Returns the ALPN extension payload for `alpn_protos`.
    pub fn alpn_wire(&self) -> Bytes {
        AlpnProtocol::encode_sequence(&self.alpn_protos)
    }

    /// Returns the tolerated status for `cert`, if the caller allowed it.
    pub fn allowed_bad_cert(&self, cert: &[u8]) -> Option<CertStatus> {
        self.allowed_bad_certs
            .iter()
            .find(|allowed| allowed.cert.as_ref() == cert)
            .map(|allowed| allowed.status)
    }
}
