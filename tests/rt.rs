mod support;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::future::BoxFuture;
use http::uri::Scheme;
use http_stream_pool::{
    dns::{Addrs, Name, Resolve, Resolving},
    rt::{self, PoolLimits, Spawner, TcpTransport, Transport},
    AlpnProtocol, AttemptError, BoxError, Config, Error, HttpStream, Priority, RequestOptions,
    StreamKey, StreamOutcome,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::Semaphore,
};

fn local_key(host: &str, port: u16) -> StreamKey {
    StreamKey::new(Scheme::HTTP, host, port)
}

async fn roundtrip(stream: HttpStream<tokio::net::TcpStream>) -> Vec<u8> {
    let HttpStream::Basic { mut socket, .. } = stream else {
        panic!("plain http is never multiplexed");
    };
    socket
        .write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut buf = vec![0; 1024];
    let n = socket.read(&mut buf).await.unwrap();
    buf.truncate(n);
    buf
}

/// Never answers.
struct Stall;

impl Resolve for Stall {
    fn resolve(&self, _name: Name) -> Resolving {
        Box::pin(std::future::pending::<Result<Addrs, BoxError>>())
    }
}

/// Answers every name with an error.
struct NxDomain;

impl Resolve for NxDomain {
    fn resolve(&self, _name: Name) -> Resolving {
        Box::pin(async { Err::<Addrs, BoxError>("nxdomain".into()) })
    }
}

/// Holds every connect until the test hands out a permit.
struct Gated {
    gate: Arc<Semaphore>,
    inner: TcpTransport,
}

impl Transport for Gated {
    type Socket = TcpStream;

    fn connect(
        &self,
        endpoint: SocketAddr,
        config: &Config,
    ) -> BoxFuture<'static, Result<TcpStream, AttemptError>> {
        let gate = self.gate.clone();
        let connect = self.inner.connect(endpoint, config);
        Box::pin(async move {
            gate.acquire().await.expect("gate is never closed").forget();
            connect.await
        })
    }
}

#[tokio::test]
async fn request_stream_connects() {
    let _ = env_logger::try_init();
    let server = support::server::http();

    let handle = rt::spawn(local_key("127.0.0.1", server.addr().port())).unwrap();
    let stream = handle
        .request_stream(RequestOptions::with_priority(Priority::Highest))
        .await
        .into_result()
        .unwrap();
    assert_eq!(stream.negotiated_protocol(), AlpnProtocol::HTTP1);

    let response = roundtrip(stream).await;
    assert!(response.starts_with(b"HTTP/1.1 200 OK"));
}

#[tokio::test]
async fn dns_overrides_are_used() {
    let _ = env_logger::try_init();
    let server = support::server::http();

    let spawner = Spawner::builder(TcpTransport::new())
        .resolve("pool.test", server.addr())
        .build();
    let handle = spawner
        .spawn(local_key("pool.test", server.addr().port()))
        .unwrap();

    let outcome = handle.request_stream(RequestOptions::default()).await;
    let response = roundtrip(outcome.into_result().unwrap()).await;
    assert!(response.starts_with(b"HTTP/1.1 200 OK"));
}

#[tokio::test]
async fn refused_connection_fails_request() {
    let _ = env_logger::try_init();
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let handle = rt::spawn(local_key("127.0.0.1", addr.port())).unwrap();
    match handle.request_stream(RequestOptions::default()).await {
        StreamOutcome::Failed { error, details } => {
            assert!(error.is_connect(), "{error:?}");
            assert_eq!(details.connection_attempts.len(), 1);
            assert_eq!(details.connection_attempts[0].endpoint, Some(addr));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn resolution_error_fails_request() {
    let _ = env_logger::try_init();
    let spawner = Spawner::builder(TcpTransport::new())
        .dns_resolver(NxDomain)
        .build();
    let handle = spawner.spawn(local_key("missing.test", 80)).unwrap();

    let outcome = handle.request_stream(RequestOptions::default()).await;
    assert!(outcome.error().unwrap().is_resolve());
}

#[tokio::test]
async fn preconnected_socket_serves_next_request() {
    let _ = env_logger::try_init();
    let server = support::server::http();

    let handle = rt::spawn(local_key("127.0.0.1", server.addr().port())).unwrap();
    handle.preconnect(1, None).await.unwrap();

    let stream = handle
        .request_stream(RequestOptions::default())
        .await
        .into_result()
        .unwrap();
    let HttpStream::Basic { timing, .. } = &stream else {
        panic!("plain http is never multiplexed");
    };
    assert!(timing.connect_start.is_none());

    let response = roundtrip(stream).await;
    assert!(response.starts_with(b"HTTP/1.1 200 OK"));
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn preconnect_fails_at_pool_limit() {
    let _ = env_logger::try_init();
    let server = support::server::http();

    let spawner = Spawner::builder(TcpTransport::new())
        .pool_limits(PoolLimits {
            max_per_group: 1,
            max_total: 1,
        })
        .build();
    let handle = spawner
        .spawn(local_key("127.0.0.1", server.addr().port()))
        .unwrap();

    let err = handle.preconnect(2, None).await.unwrap_err();
    assert!(err.is_preconnect_limit(), "{err:?}");
}

#[tokio::test]
async fn canceled_requests_fail() {
    let _ = env_logger::try_init();
    let spawner = Spawner::builder(TcpTransport::new())
        .dns_resolver(Stall)
        .build();
    let handle = spawner.spawn(local_key("stall.test", 80)).unwrap();

    let request = handle.request_stream(RequestOptions::default());
    handle.cancel_requests(Error::canceled());

    let outcome = request.await;
    assert!(outcome.error().unwrap().is_canceled());
}

#[tokio::test]
async fn dropped_request_is_withdrawn() {
    let _ = env_logger::try_init();
    let spawner = Spawner::builder(TcpTransport::new())
        .dns_resolver(Stall)
        .build();
    let handle = spawner.spawn(local_key("stall.test", 80)).unwrap();

    let kept = handle.request_stream(RequestOptions::with_priority(Priority::Low));
    drop(handle.request_stream(RequestOptions::with_priority(Priority::Highest)));

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.priority, Priority::Low);

    kept.set_priority(Priority::Medium);
    assert_eq!(handle.stats().await.unwrap().priority, Priority::Medium);
}

#[tokio::test]
async fn job_stalled_by_pool_limit_resumes_when_capacity_frees() {
    let _ = env_logger::try_init();
    let server = support::server::http();
    let gate = Arc::new(Semaphore::new(0));

    let spawner = Spawner::builder(Gated {
        gate: gate.clone(),
        inner: TcpTransport::new(),
    })
    .pool_limits(PoolLimits {
        max_per_group: 6,
        max_total: 1,
    })
    .build();
    let key = local_key("127.0.0.1", server.addr().port());
    let a = spawner.spawn(key.clone()).unwrap();
    let b = spawner.spawn(key).unwrap();

    let first = a.request_stream(RequestOptions::default());
    assert_eq!(a.stats().await.unwrap().in_flight_attempts, 1);

    let second = b.request_stream(RequestOptions::default());
    let stats = b.stats().await.unwrap();
    assert!(stats.stalled_by_pool_limit);
    assert_eq!(stats.in_flight_attempts, 0);

    gate.add_permits(2);
    let response = roundtrip(first.await.into_result().unwrap()).await;
    assert!(response.starts_with(b"HTTP/1.1 200 OK"));

    let outcome = tokio::time::timeout(Duration::from_secs(3), second)
        .await
        .expect("stalled job was never woken");
    let response = roundtrip(outcome.into_result().unwrap()).await;
    assert!(response.starts_with(b"HTTP/1.1 200 OK"));
    assert_eq!(server.accepted(), 2);
}
