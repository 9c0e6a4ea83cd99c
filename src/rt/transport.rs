use std::{io, net::SocketAddr, time::Duration};

use futures_util::future::BoxFuture;
use tokio::net::{TcpSocket, TcpStream};

use crate::{
    attempt::{AttemptError, Connected},
    config::Config,
    error::{self, Error},
    session::SessionHandle,
    tls::SslConfig,
};

/// Opens the sockets attempts are made of.
///
/// The runtime owns the attempt lifecycle (timeouts, slow reports,
/// cancellation) and asks the transport for the I/O. A transport that
/// supports TLS overrides [`handshake`](Transport::handshake); one that
/// can multiplex overrides [`create_session`](Transport::create_session).
pub trait Transport: Send + Sync + 'static {
    /// The socket handed to requests. TLS capable transports usually make
    /// this an enum or a boxed stream so a plain TCP socket and a
    /// negotiated TLS stream share one type.
    type Socket: Send + 'static;

    /// Connects to `endpoint`.
    fn connect(
        &self,
        endpoint: SocketAddr,
        config: &Config,
    ) -> BoxFuture<'static, Result<Self::Socket, AttemptError>>;

    /// Runs the TLS handshake on a connected socket and reports the
    /// protocol negotiated through ALPN.
    ///
    /// The default rejects every secure destination.
    fn handshake(
        &self,
        socket: Self::Socket,
        config: SslConfig,
    ) -> BoxFuture<'static, Result<Connected<Self::Socket>, AttemptError>> {
        drop(socket);
        let error = Error::connect(format!(
            "transport cannot negotiate tls with {}",
            config.server_name
        ));
        Box::pin(futures_util::future::ready(Err(error.into())))
    }

    /// Creates a multiplexed session over a socket that negotiated it.
    ///
    /// The default fails, since plain sockets never negotiate HTTP/2.
    fn create_session(&self, connected: Connected<Self::Socket>) -> error::Result<SessionHandle> {
        Err(Error::connect(format!(
            "transport cannot create {:?} sessions",
            connected.negotiated
        )))
    }
}

/// Plain TCP connections through `socket2`.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    _priv: (),
}

impl TcpTransport {
    /// Creates a new [`TcpTransport`].
    pub fn new() -> TcpTransport {
        TcpTransport { _priv: () }
    }
}

impl Transport for TcpTransport {
    type Socket = TcpStream;

    fn connect(
        &self,
        endpoint: SocketAddr,
        config: &Config,
    ) -> BoxFuture<'static, Result<TcpStream, AttemptError>> {
        let nodelay = config.get_tcp_nodelay();
        let socket = open(&endpoint, config.get_tcp_keepalive());
        Box::pin(async move {
            let stream = socket
                .map_err(Error::connect)?
                .connect(endpoint)
                .await
                .map_err(Error::connect)?;

            if let Err(_e) = stream.set_nodelay(nodelay) {
                warn!("tcp set_nodelay error: {_e}");
            }
            Ok::<_, AttemptError>(stream)
        })
    }
}

fn open(addr: &SocketAddr, keepalive: Option<Duration>) -> io::Result<TcpSocket> {
    use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

    let domain = Domain::for_address(*addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // When constructing a Tokio `TcpSocket` from a raw fd/socket, the user is
    // responsible for ensuring O_NONBLOCK is set.
    socket.set_nonblocking(true)?;

    if let Some(time) = keepalive {
        if let Err(_e) = socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(time)) {
            warn!("tcp set_keepalive error: {_e}");
        }
    }

    Ok(TcpSocket::from_std_stream(socket.into()))
}
