#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # http-stream-pool
//!
//! The `http-stream-pool` crate establishes transport streams for HTTP
//! requests, one destination at a time.
//!
//! A [`Job`] owns everything needed to turn queued stream requests for one
//! [`StreamKey`] into ready streams:
//!
//! - resolving the destination once, at the urgency of the most urgent request
//! - racing connection attempts over the resolved endpoints, alternating
//!   address families and skipping endpoints that failed
//! - holding back redundant attempts while an HTTP/2 capable connection is
//!   likely to serve everyone, or while QUIC races TCP
//! - respecting per-destination and pool-wide socket limits
//! - delivering exactly one outcome to every request, most urgent first
//!
//! The job itself performs no I/O. It talks to its environment through
//! small traits ([`Resolver`], [`AttemptFactory`], [`Group`], [`Timer`],
//! [`QuicTaskFactory`]) and is driven by the `on_*` event methods. This
//! makes every race it arbitrates reproducible in tests.
//!
//! ## Running on tokio
//!
//! The `rt` module (enabled by default) runs each job on a tokio task,
//! with real timers, DNS resolution and TCP sockets:
//!
//! ```no_run
//! # async fn run() -> http_stream_pool::Result<()> {
//! use http_stream_pool::{rt, Priority, RequestOptions, StreamKey};
//!
//! let key = StreamKey::from_uri(&"http://example.com/".parse().unwrap())?;
//! let handle = rt::spawn(key)?;
//!
//! let outcome = handle
//!     .request_stream(RequestOptions::with_priority(Priority::Highest))
//!     .await;
//! let stream = outcome.into_result()?;
//! println!("negotiated {:?}", stream.negotiated_protocol());
//! # Ok(())
//! # }
//! ```
//!
//! ## Optional Features
//!
//! - **rt** *(enabled by default)*: Runs jobs on tokio with a `getaddrinfo`
//!   resolver and a `socket2` TCP transport.

#[macro_use]
mod trace;

mod attempt;
mod config;
mod error;
mod group;
mod job;
mod key;
mod priority;
mod request;
mod resolve;
mod session;
#[cfg(feature = "rt")]
mod sync;
mod timer;
mod tls;

#[cfg(feature = "rt")]
#[cfg_attr(docsrs, doc(cfg(feature = "rt")))]
pub mod dns;
#[cfg(feature = "rt")]
#[cfg_attr(docsrs, doc(cfg(feature = "rt")))]
pub mod rt;

pub use self::{
    attempt::{
        AttemptError, AttemptFactory, AttemptId, Connected, QuicResult, QuicTask, QuicTaskFactory,
        QuicVersion, SslConfigProvider, Started, StreamAttempt,
    },
    config::Config,
    error::{BoxError, Error, Result},
    group::Group,
    job::{Admission, Job, JobBuilder, JobState, JobStats, LoadState},
    key::StreamKey,
    priority::Priority,
    request::{
        ConnectTiming, ConnectionAttempt, Delegate, FailureDetails, FailureKind, HttpStream,
        PreconnectCallback, PreconnectId, PreconnectStatus, RequestId, RequestOptions,
        RequestStatus, StreamOutcome,
    },
    resolve::{
        EndpointMetadata, Resolver, ServiceEndpoint, ServiceEndpointDelegate,
        ServiceEndpointRequest,
    },
    session::{Session, SessionHandle},
    timer::{Timer, TimerKind},
    tls::{AlpnProtocol, CertAndStatus, CertRequestInfo, CertStatus, SslConfig, SslInfo},
};
