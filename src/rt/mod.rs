//! Runs jobs on the tokio runtime.
//!
//! A [`Spawner`] owns what the jobs of a pool share (transport, DNS
//! resolver, configuration and socket limits) and spawns one task per
//! destination. The task owns the [`Job`] and feeds it everything that
//! happens: commands from the [`JobHandle`], resolutions, attempt progress
//! and timer fires.
//!
//! ```no_run
//! # async fn run() -> http_stream_pool::Result<()> {
//! use http_stream_pool::{rt, RequestOptions, StreamKey};
//!
//! let key = StreamKey::from_uri(&"http://example.com/".parse().unwrap())?;
//! let handle = rt::spawn(key)?;
//! let stream = handle.request_stream(RequestOptions::default()).await.into_result()?;
//! println!("connected with {:?}", stream.negotiated_protocol());
//! # Ok(())
//! # }
//! ```
//!
//! Once a job has nothing left to do it drains. The task then builds a
//! fresh job for the next request, so a handle stays usable for as long as
//! it is kept.

mod attempt;
mod group;
mod resolve;
mod timer;
mod transport;

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};

pub use self::{
    group::PoolLimits,
    transport::{TcpTransport, Transport},
};
use self::{
    attempt::RtAttemptFactory,
    group::{Pool, RtGroup},
    resolve::DnsEndpointResolver,
    timer::{Generations, RtTimer},
};
use crate::{
    attempt::{AttemptError, AttemptId, Connected, QuicVersion},
    config::Config,
    dns::{DnsResolverWithOverrides, GaiResolver, IntoResolve, Resolve},
    error::{Error, Result},
    job::{Job, JobState, JobStats},
    key::StreamKey,
    priority::Priority,
    request::{
        ConnectTiming, FailureDetails, HttpStream, PreconnectStatus, RequestId, RequestOptions,
        RequestStatus, StreamOutcome,
    },
    resolve::ServiceEndpointDelegate,
    sync::Mutex,
    timer::TimerKind,
};

/// Spawns a job for `key` on the current tokio runtime, connecting plain
/// TCP sockets and resolving through `getaddrinfo`.
///
/// # Errors
///
/// This function fails if the job cannot be built.
///
/// # Panics
///
/// This function panics if called outside of a tokio runtime.
pub fn spawn(key: StreamKey) -> Result<JobHandle<TcpStream>> {
    Spawner::new(TcpTransport::new()).spawn(key)
}

/// Progress reported to a job by its collaborators.
pub(crate) enum JobEvent<S> {
    EndpointRequestFinished(Result<()>),
    AttemptSlow(AttemptId),
    TcpHandshakeComplete(AttemptId),
    AttemptComplete(AttemptId, std::result::Result<Connected<S>, AttemptError>),
    TimerFired(TimerKind, u64),
}

pub(crate) enum Command<S> {
    Request {
        token: u64,
        options: RequestOptions,
        tx: oneshot::Sender<StreamOutcome<S>>,
    },
    SetPriority {
        token: u64,
        priority: Priority,
    },
    CancelRequest(u64),
    Preconnect {
        num_streams: usize,
        quic_version: Option<QuicVersion>,
        tx: oneshot::Sender<Result<()>>,
    },
    CancelRequests(Error),
    CancelInFlightAttempts,
    RequiredHttp11,
    ProcessPendingRequest,
    Stats(oneshot::Sender<JobStats>),
    Shutdown,
}

pub(crate) enum Message<S> {
    Command(Command<S>),
    Event { epoch: u64, event: JobEvent<S> },
}

/// The sender collaborators report through. Tagged with the epoch of the
/// job they were built for, so reports outliving their job are dropped.
pub(crate) struct Events<S> {
    tx: mpsc::UnboundedSender<Message<S>>,
    epoch: u64,
}

impl<S> Clone for Events<S> {
    fn clone(&self) -> Self {
        Events {
            tx: self.tx.clone(),
            epoch: self.epoch,
        }
    }
}

impl<S> Events<S> {
    pub(crate) fn send(&self, event: JobEvent<S>) {
        let _ = self.tx.send(Message::Event {
            epoch: self.epoch,
            event,
        });
    }
}

// ===== impl Spawner =====

/// Spawns runtime jobs sharing one transport, resolver, configuration and
/// socket budget.
pub struct Spawner<T: Transport> {
    transport: Arc<T>,
    dns: Arc<dyn Resolve>,
    config: Config,
    pool: Arc<Pool<T::Socket>>,
}

/// A builder to configure a [`Spawner`].
#[must_use]
pub struct SpawnerBuilder<T> {
    transport: T,
    dns_resolver: Option<Arc<dyn Resolve>>,
    dns_overrides: HashMap<Box<str>, Vec<SocketAddr>>,
    config: Config,
    limits: PoolLimits,
}

impl<T: Transport> SpawnerBuilder<T> {
    /// Sets the timing and socket configuration of every job.
    pub fn config(mut self, config: Config) -> SpawnerBuilder<T> {
        self.config = config;
        self
    }

    /// Sets the socket limits shared by every job.
    pub fn pool_limits(mut self, limits: PoolLimits) -> SpawnerBuilder<T> {
        self.limits = limits;
        self
    }

    /// Override DNS resolution for specific domains to a particular IP address.
    ///
    /// The port of the destination is used, any port in `addr` is ignored.
    pub fn resolve(self, domain: &str, addr: SocketAddr) -> SpawnerBuilder<T> {
        self.resolve_to_addrs(domain, &[addr])
    }

    /// Override DNS resolution for specific domains to particular IP addresses.
    ///
    /// The port of the destination is used, any port in `addrs` is ignored.
    pub fn resolve_to_addrs(mut self, domain: &str, addrs: &[SocketAddr]) -> SpawnerBuilder<T> {
        self.dns_overrides.insert(domain.into(), addrs.to_vec());
        self
    }

    /// Override the DNS resolver implementation.
    ///
    /// Overrides for specific names passed to `resolve` and `resolve_to_addrs`
    /// are still applied on top of this resolver.
    pub fn dns_resolver<R: IntoResolve>(mut self, resolver: R) -> SpawnerBuilder<T> {
        self.dns_resolver = Some(resolver.into_resolve());
        self
    }

    /// Returns a `Spawner` that uses this `SpawnerBuilder` configuration.
    pub fn build(self) -> Spawner<T> {
        let mut dns = self
            .dns_resolver
            .unwrap_or_else(|| Arc::new(GaiResolver::new()) as Arc<dyn Resolve>);
        if !self.dns_overrides.is_empty() {
            dns = Arc::new(DnsResolverWithOverrides::new(dns, self.dns_overrides));
        }

        Spawner {
            transport: Arc::new(self.transport),
            dns,
            config: self.config,
            pool: Arc::new(Pool::new(self.limits)),
        }
    }
}

impl<T> fmt::Debug for SpawnerBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("SpawnerBuilder");
        builder.field("config", &self.config);
        builder.field("limits", &self.limits);
        if !self.dns_overrides.is_empty() {
            builder.field("dns_overrides", &self.dns_overrides);
        }
        builder.finish()
    }
}

impl<T: Transport> Spawner<T> {
    /// Creates a spawner with the default configuration.
    pub fn new(transport: T) -> Spawner<T> {
        Spawner::builder(transport).build()
    }

    /// Creates a [`SpawnerBuilder`] around `transport`.
    pub fn builder(transport: T) -> SpawnerBuilder<T> {
        SpawnerBuilder {
            transport,
            dns_resolver: None,
            dns_overrides: HashMap::new(),
            config: Config::default(),
            limits: PoolLimits::default(),
        }
    }

    /// Spawns the task of a job for `key`.
    ///
    /// Every call creates a new job with its own sockets; callers keep one
    /// handle per destination.
    ///
    /// # Errors
    ///
    /// This method fails if the job cannot be built.
    ///
    /// # Panics
    ///
    /// This method panics if called outside of a tokio runtime.
    pub fn spawn(&self, key: StreamKey) -> Result<JobHandle<T::Socket>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let parts = Parts {
            key: key.clone(),
            transport: self.transport.clone(),
            dns: self.dns.clone(),
            config: self.config.clone(),
            group: RtGroup::new(self.transport.clone(), self.pool.clone(), tx.clone()),
            generations: Arc::new(Generations::default()),
            tx: tx.clone(),
        };
        let job = parts.build_job(0)?;

        debug!("{}: spawning job task", key);
        tokio::spawn(
            JobTask {
                parts,
                rx,
                job,
                epoch: 0,
                requests: HashMap::new(),
            }
            .run(),
        );

        Ok(JobHandle {
            inner: Arc::new(Inner {
                key,
                tx,
                next_token: AtomicU64::new(0),
            }),
        })
    }
}

impl<T: Transport> Clone for Spawner<T> {
    fn clone(&self) -> Self {
        Spawner {
            transport: self.transport.clone(),
            dns: self.dns.clone(),
            config: self.config.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl<T: Transport> fmt::Debug for Spawner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spawner")
            .field("config", &self.config)
            .field("limits", &self.pool.limits())
            .finish()
    }
}

// ===== impl JobTask =====

/// Everything a job is rebuilt from.
struct Parts<T: Transport> {
    key: StreamKey,
    transport: Arc<T>,
    dns: Arc<dyn Resolve>,
    config: Config,
    group: RtGroup<T>,
    generations: Arc<Generations>,
    tx: mpsc::UnboundedSender<Message<T::Socket>>,
}

impl<T: Transport> Parts<T> {
    fn build_job(&self, epoch: u64) -> Result<Job<T::Socket>> {
        let events = Events {
            tx: self.tx.clone(),
            epoch,
        };

        Job::builder(self.key.clone())
            .config(self.config.clone())
            .resolver(Arc::new(DnsEndpointResolver::new(
                self.dns.clone(),
                events.clone(),
            )))
            .attempt_factory(RtAttemptFactory::new(
                self.transport.clone(),
                self.config.clone(),
                events.clone(),
            ))
            .group(self.group.clone())
            .timer(RtTimer::new(events, self.generations.clone()))
            .build()
    }
}

struct JobTask<T: Transport> {
    parts: Parts<T>,
    rx: mpsc::UnboundedReceiver<Message<T::Socket>>,
    job: Job<T::Socket>,
    epoch: u64,
    // Handle tokens of the requests the job still holds.
    requests: HashMap<u64, RequestId>,
}

impl<T: Transport> JobTask<T> {
    async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                Message::Command(Command::Shutdown) => break,
                Message::Command(command) => self.on_command(command),
                Message::Event { epoch, event } if epoch == self.epoch => self.on_event(event),
                Message::Event { .. } => {
                    trace!("{}: dropping report of a drained job", self.parts.key);
                }
            }

            let job = &self.job;
            self.requests.retain(|_, id| job.is_request_pending(*id));
        }
        debug!("{}: job task shut down", self.parts.key);
    }

    fn on_command(&mut self, command: Command<T::Socket>) {
        match command {
            Command::Request { token, options, tx } => {
                self.revive();
                if let Some(connected) = self.parts.group.take_idle_socket() {
                    trace!("{}: serving request from an idle socket", self.parts.key);
                    let _ = tx.send(StreamOutcome::Ready(HttpStream::Basic {
                        socket: connected.socket,
                        negotiated: connected.negotiated,
                        timing: ConnectTiming::default(),
                    }));
                    return;
                }

                let delegate = move |outcome: StreamOutcome<T::Socket>| {
                    let _ = tx.send(outcome);
                };
                if let RequestStatus::Pending(id) = self.job.request_stream(delegate, options) {
                    self.requests.insert(token, id);
                }
            }
            Command::SetPriority { token, priority } => {
                if let Some(id) = self.requests.get(&token) {
                    self.job.set_priority(*id, priority);
                }
            }
            Command::CancelRequest(token) => {
                if let Some(id) = self.requests.remove(&token) {
                    self.job.cancel_request(id);
                }
            }
            Command::Preconnect {
                num_streams,
                quic_version,
                tx,
            } => {
                self.revive();
                let slot = Arc::new(Mutex::new(Some(tx)));
                let callback = {
                    let slot = slot.clone();
                    move |result: Result<()>| {
                        if let Some(tx) = slot.lock().take() {
                            let _ = tx.send(result);
                        }
                    }
                };
                if let PreconnectStatus::Ready(result) =
                    self.job.preconnect(num_streams, quic_version, callback)
                {
                    if let Some(tx) = slot.lock().take() {
                        let _ = tx.send(result);
                    }
                }
            }
            Command::CancelRequests(error) => self.job.cancel_requests(error),
            Command::CancelInFlightAttempts => self.job.cancel_in_flight_attempts(),
            Command::RequiredHttp11 => {
                self.parts.group.set_requires_http11();
                self.job.on_required_http11();
            }
            Command::ProcessPendingRequest => self.job.process_pending_request(),
            Command::Stats(tx) => {
                let _ = tx.send(self.job.stats());
            }
            Command::Shutdown => {}
        }
    }

    fn on_event(&mut self, event: JobEvent<T::Socket>) {
        match event {
            JobEvent::EndpointRequestFinished(result) => {
                self.job.on_service_endpoint_request_finished(result)
            }
            JobEvent::AttemptSlow(id) => self.job.on_attempt_slow(id),
            JobEvent::TcpHandshakeComplete(id) => self.job.on_attempt_tcp_handshake_complete(id),
            JobEvent::AttemptComplete(id, result) => self.job.on_attempt_complete(id, result),
            JobEvent::TimerFired(kind, generation) => {
                if self.parts.generations.is_current(kind, generation) {
                    self.job.on_timer_fired(kind);
                }
            }
        }
    }

    /// Replaces a drained job before it is handed new work.
    fn revive(&mut self) {
        if self.job.state() != JobState::Drained {
            return;
        }
        match self.parts.build_job(self.epoch + 1) {
            Ok(job) => {
                self.epoch += 1;
                trace!("{}: starting job #{}", self.parts.key, self.epoch);
                self.job = job;
            }
            Err(err) => warn!("{}: rebuilding the job failed: {}", self.parts.key, err),
        }
    }
}

// ===== impl JobHandle =====

/// A handle to a job running on a tokio task.
///
/// Cloning is cheap. The task shuts down once every handle and every
/// [`RequestFuture`] is dropped, failing whatever it still holds.
pub struct JobHandle<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    key: StreamKey,
    tx: mpsc::UnboundedSender<Message<S>>,
    next_token: AtomicU64,
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Command(Command::Shutdown));
    }
}

impl<S> Clone for JobHandle<S> {
    fn clone(&self) -> Self {
        JobHandle {
            inner: self.inner.clone(),
        }
    }
}

impl<S> JobHandle<S> {
    /// Returns the destination of the job.
    pub fn key(&self) -> &StreamKey {
        &self.inner.key
    }

    /// Asks the job for a stream.
    ///
    /// Dropping the returned future before it completes cancels the request.
    pub fn request_stream(&self, options: RequestOptions) -> RequestFuture<S> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.send(Command::Request { token, options, tx });

        RequestFuture {
            token,
            rx,
            handle: self.clone(),
            done: false,
        }
    }

    /// Asks for `num_streams` streams or a session to be available.
    ///
    /// # Errors
    ///
    /// This method fails with the job's failure, a
    /// [`preconnect_limit`](Error::is_preconnect_limit) error if socket limits
    /// block it, or an [`aborted`](Error::is_aborted) error if the job task is
    /// gone.
    pub async fn preconnect(&self, num_streams: usize, quic_version: Option<QuicVersion>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Preconnect {
            num_streams,
            quic_version,
            tx,
        });
        rx.await.unwrap_or_else(|_| Err(Error::aborted()))
    }

    /// Fails every request and preconnect of the job with `error`.
    pub fn cancel_requests(&self, error: Error) {
        self.send(Command::CancelRequests(error));
    }

    /// Cancels running attempts. Requests stay queued.
    pub fn cancel_in_flight_attempts(&self) {
        self.send(Command::CancelInFlightAttempts);
    }

    /// Reports that the destination only accepts HTTP/1.1.
    pub fn on_required_http11(&self) {
        self.send(Command::RequiredHttp11);
    }

    /// Lets the job start an attempt after socket capacity freed up.
    pub fn process_pending_request(&self) {
        self.send(Command::ProcessPendingRequest);
    }

    /// Returns a snapshot of the job's counters.
    ///
    /// # Errors
    ///
    /// This method fails with an [`aborted`](Error::is_aborted) error if the
    /// job task is gone.
    pub async fn stats(&self) -> Result<JobStats> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats(tx));
        rx.await.map_err(|_| Error::aborted())
    }

    fn send(&self, command: Command<S>) {
        if self.inner.tx.send(Message::Command(command)).is_err() {
            debug!("{}: job task is gone", self.inner.key);
        }
    }
}

impl<S> fmt::Debug for JobHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("key", &self.inner.key)
            .finish()
    }
}

// ===== impl RequestFuture =====

/// The outcome of [`JobHandle::request_stream`].
///
/// Resolves to an [`aborted`](Error::is_aborted) failure if the job task
/// goes away first.
#[must_use = "futures do nothing unless polled"]
pub struct RequestFuture<S> {
    token: u64,
    rx: oneshot::Receiver<StreamOutcome<S>>,
    handle: JobHandle<S>,
    done: bool,
}

impl<S> RequestFuture<S> {
    /// Changes the priority of the request while it is queued.
    pub fn set_priority(&self, priority: Priority) {
        if !self.done {
            self.handle.send(Command::SetPriority {
                token: self.token,
                priority,
            });
        }
    }
}

impl<S> Future for RequestFuture<S> {
    type Output = StreamOutcome<S>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => StreamOutcome::Failed {
                error: Error::aborted(),
                details: FailureDetails::default(),
            },
        };
        self.done = true;
        Poll::Ready(outcome)
    }
}

impl<S> Drop for RequestFuture<S> {
    fn drop(&mut self) {
        if !self.done {
            self.handle.send(Command::CancelRequest(self.token));
        }
    }
}

impl<S> fmt::Debug for RequestFuture<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFuture")
            .field("key", self.handle.key())
            .field("done", &self.done)
            .finish()
    }
}
