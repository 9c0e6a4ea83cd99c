//! The per-destination connection establishment job.
//!
//! A [`Job`] serves every stream request for one [`StreamKey`]. It resolves
//! the destination once, races TCP based attempts (and optionally a QUIC
//! task) against each other, and delivers exactly one [`StreamOutcome`] to
//! every request it accepted.
//!
//! The job performs no I/O. Its owner feeds it events (`on_*` methods) as
//! resolutions, attempts and timers make progress, and the job reacts by
//! calling into its collaborators: the [`Resolver`], the
//! [`AttemptFactory`], the [`Group`] and the [`Timer`]. Delegates and
//! callbacks never receive a reference to the job, so notifying a caller
//! cannot re-enter it.
//!
//! ```text
//! Active ──(endpoints exhausted / certificate / HTTP/1.1 required)──▶ Failing
//!   │                                                                   │
//!   └──────────────(no requests, preconnects or attempts left)──────────┴──▶ Drained
//! ```

mod admission;
mod attempt;
mod notify;
mod queue;
mod resolve;

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

pub use self::admission::Admission;
use crate::{
    attempt::{AttemptFactory, AttemptId, QuicTask, QuicTaskFactory, QuicVersion, StreamAttempt},
    config::Config,
    error::{Error, Result},
    group::Group,
    key::StreamKey,
    priority::{Pointer, Priority, PriorityQueue},
    request::{
        ConnectionAttempt, Delegate, FailureKind, PreconnectCallback, PreconnectId, RequestId,
        StreamOutcome,
    },
    resolve::{Resolver, ServiceEndpointRequest},
    session::WeakSession,
    timer::{Timer, TimerKind},
    tls::{CertAndStatus, CertRequestInfo, SslConfig, SslInfo},
};

/// The lifecycle state of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Accepting requests and starting attempts.
    Active,
    /// A terminal failure was delivered. New requests are rejected with
    /// the same failure and no attempt is started.
    Failing,
    /// Nothing is left to do. The owner should drop the job.
    Drained,
}

/// What a job is currently waiting on, for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing.
    Idle,
    /// Endpoint resolution has not produced usable endpoints yet.
    ResolvingHost,
    /// Socket limits block the next attempt.
    WaitingForAvailableSocket,
    /// TCP handshakes are running.
    Connecting,
    /// TLS handshakes are running.
    SslHandshake,
}

/// A snapshot of a job's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStats {
    /// Lifecycle state.
    pub state: JobState,
    /// Highest priority among queued requests.
    pub priority: Priority,
    /// Queued requests.
    pub requests: usize,
    /// Requests not covered by an in-flight attempt.
    pub pending_requests: usize,
    /// Preconnect demand not covered by an in-flight attempt.
    pub pending_preconnects: usize,
    /// Running attempts.
    pub in_flight_attempts: usize,
    /// Running attempts reported slow.
    pub slow_attempts: usize,
    /// Endpoints that failed.
    pub failed_endpoints: usize,
    /// Whether the pool limit blocks the next attempt.
    pub stalled_by_pool_limit: bool,
}

pub(crate) struct RequestEntry<S> {
    id: RequestId,
    delegate: Box<dyn Delegate<S>>,
}

pub(crate) struct PreconnectEntry {
    remaining: usize,
    result: Result<()>,
    callback: PreconnectCallback,
}

pub(crate) struct InFlightAttempt {
    endpoint: SocketAddr,
    attempt: Option<Box<dyn StreamAttempt>>,
    secure: bool,
    is_slow: bool,
    connect_start: Instant,
    tcp_handshake_end: Option<Instant>,
}

/// Establishes streams for one destination.
///
/// See the [module documentation](self) for the model.
pub struct Job<S> {
    key: StreamKey,
    config: Config,
    resolver: Arc<dyn Resolver>,
    attempt_factory: Box<dyn AttemptFactory<S>>,
    group: Box<dyn Group<S>>,
    timer: Box<dyn Timer>,
    quic_factory: Option<Box<dyn QuicTaskFactory>>,

    state: JobState,
    is_canceling: bool,
    next_id: u64,

    requests: PriorityQueue<RequestEntry<S>>,
    request_pointers: HashMap<RequestId, Pointer>,
    preconnects: BTreeMap<PreconnectId, PreconnectEntry>,

    // Taken from the newest request.
    allowed_bad_certs: Vec<CertAndStatus>,
    enable_ip_based_pooling: bool,
    enable_alternative_services: bool,
    quic_version: Option<QuicVersion>,

    endpoint_request: Option<Box<dyn ServiceEndpointRequest>>,
    endpoint_request_priority: Priority,
    endpoint_request_finished: bool,
    dns_resolution_start: Option<Instant>,
    dns_resolution_end: Option<Instant>,

    ssl_config: Option<SslConfig>,
    ssl_config_waiters: Vec<AttemptId>,

    in_flight: BTreeMap<AttemptId, InFlightAttempt>,
    slow_attempt_count: usize,
    prefer_ipv6: bool,
    failed_endpoints: HashSet<SocketAddr>,
    slow_endpoints: HashSet<SocketAddr>,
    connection_attempts: Vec<ConnectionAttempt>,

    http2_throttle_running: bool,
    http2_throttle_passed: bool,
    should_block_stream_attempt: bool,
    stream_attempt_delay_running: bool,

    session: Option<WeakSession>,
    quic_task: Option<Box<dyn QuicTask>>,
    quic_task_result: Option<Result<()>>,

    error_to_notify: Option<Error>,
    failure: Option<FailureKind>,
    cert_error_ssl_info: Option<SslInfo>,
    client_auth_cert_info: Option<CertRequestInfo>,
}

/// A builder to configure a [`Job`].
///
/// The resolver, attempt factory, group and timer are required.
#[must_use]
pub struct JobBuilder<S> {
    key: StreamKey,
    config: Config,
    resolver: Option<Arc<dyn Resolver>>,
    attempt_factory: Option<Box<dyn AttemptFactory<S>>>,
    group: Option<Box<dyn Group<S>>>,
    timer: Option<Box<dyn Timer>>,
    quic_factory: Option<Box<dyn QuicTaskFactory>>,
}

// ===== impl JobBuilder =====

impl<S> JobBuilder<S> {
    /// Starts building a job for `key`.
    pub fn new(key: StreamKey) -> JobBuilder<S> {
        JobBuilder {
            key,
            config: Config::default(),
            resolver: None,
            attempt_factory: None,
            group: None,
            timer: None,
            quic_factory: None,
        }
    }

    /// Sets the timing configuration.
    pub fn config(mut self, config: Config) -> JobBuilder<S> {
        self.config = config;
        self
    }

    /// Sets the resolver the job creates its endpoint request with.
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> JobBuilder<S> {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the factory for TCP based attempts.
    pub fn attempt_factory<F>(mut self, factory: F) -> JobBuilder<S>
    where
        F: AttemptFactory<S> + 'static,
    {
        self.attempt_factory = Some(Box::new(factory));
        self
    }

    /// Sets the group the job belongs to.
    pub fn group<G>(mut self, group: G) -> JobBuilder<S>
    where
        G: Group<S> + 'static,
    {
        self.group = Some(Box::new(group));
        self
    }

    /// Sets the scheduler of the job's timers.
    pub fn timer<T>(mut self, timer: T) -> JobBuilder<S>
    where
        T: Timer + 'static,
    {
        self.timer = Some(Box::new(timer));
        self
    }

    /// Enables racing QUIC with tasks created by `factory`.
    pub fn quic_task_factory<F>(mut self, factory: F) -> JobBuilder<S>
    where
        F: QuicTaskFactory + 'static,
    {
        self.quic_factory = Some(Box::new(factory));
        self
    }

    /// Returns a `Job` that uses this `JobBuilder` configuration.
    ///
    /// # Errors
    ///
    /// This method fails if a required collaborator was not set.
    pub fn build(self) -> Result<Job<S>> {
        let resolver = self
            .resolver
            .ok_or_else(|| Error::builder("a resolver is required"))?;
        let attempt_factory = self
            .attempt_factory
            .ok_or_else(|| Error::builder("an attempt factory is required"))?;
        let group = self
            .group
            .ok_or_else(|| Error::builder("a group is required"))?;
        let timer = self
            .timer
            .ok_or_else(|| Error::builder("a timer is required"))?;

        Ok(Job {
            key: self.key,
            config: self.config,
            resolver,
            attempt_factory,
            group,
            timer,
            quic_factory: self.quic_factory,
            state: JobState::Active,
            is_canceling: false,
            next_id: 0,
            requests: PriorityQueue::default(),
            request_pointers: HashMap::new(),
            preconnects: BTreeMap::new(),
            allowed_bad_certs: Vec::new(),
            enable_ip_based_pooling: true,
            enable_alternative_services: true,
            quic_version: None,
            endpoint_request: None,
            endpoint_request_priority: Priority::default(),
            endpoint_request_finished: false,
            dns_resolution_start: None,
            dns_resolution_end: None,
            ssl_config: None,
            ssl_config_waiters: Vec::new(),
            in_flight: BTreeMap::new(),
            slow_attempt_count: 0,
            prefer_ipv6: true,
            failed_endpoints: HashSet::new(),
            slow_endpoints: HashSet::new(),
            connection_attempts: Vec::new(),
            http2_throttle_running: false,
            http2_throttle_passed: false,
            should_block_stream_attempt: false,
            stream_attempt_delay_running: false,
            session: None,
            quic_task: None,
            quic_task_result: None,
            error_to_notify: None,
            failure: None,
            cert_error_ssl_info: None,
            client_auth_cert_info: None,
        })
    }
}

impl<S> fmt::Debug for JobBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobBuilder")
            .field("key", &self.key)
            .field("config", &self.config)
            .field("quic", &self.quic_factory.is_some())
            .finish()
    }
}

// ===== impl Job =====

impl<S> Job<S> {
    /// Creates a [`JobBuilder`] for `key`.
    pub fn builder(key: StreamKey) -> JobBuilder<S> {
        JobBuilder::new(key)
    }

    /// Returns the destination of this job.
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Returns true once endpoint resolution finished.
    pub fn is_service_endpoint_request_finished(&self) -> bool {
        self.endpoint_request_finished
    }

    /// Returns when endpoint resolution started.
    pub fn dns_resolution_start_time(&self) -> Option<Instant> {
        self.dns_resolution_start
    }

    /// Returns when endpoint resolution first produced endpoints, or
    /// finished.
    pub fn dns_resolution_end_time(&self) -> Option<Instant> {
        self.dns_resolution_end
    }

    /// Returns the number of running attempts.
    pub fn in_flight_attempt_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns the endpoints that failed so far.
    pub fn failed_endpoints(&self) -> &HashSet<SocketAddr> {
        &self.failed_endpoints
    }

    /// Returns the endpoints reported slow so far.
    pub fn slow_endpoints(&self) -> &HashSet<SocketAddr> {
        &self.slow_endpoints
    }

    /// Returns every failed attempt, oldest first.
    pub fn connection_attempts(&self) -> &[ConnectionAttempt] {
        &self.connection_attempts
    }

    /// Returns the result of the QUIC task, once it completed.
    pub fn quic_task_result(&self) -> Option<&Result<()>> {
        self.quic_task_result.as_ref()
    }

    /// Returns the kind of the terminal failure, once one was delivered.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure
    }

    /// Returns true if a session is adopted and still accepts streams.
    pub fn has_available_session(&self) -> bool {
        self.session
            .as_ref()
            .and_then(WeakSession::available)
            .is_some()
    }

    /// Returns what the job is waiting on.
    pub fn load_state(&self) -> LoadState {
        let has_endpoints = self
            .endpoint_request
            .as_ref()
            .map(|request| request.endpoints().iter().any(|e| !e.is_empty()))
            .unwrap_or(false);

        if self.endpoint_request.is_some() && !self.endpoint_request_finished && !has_endpoints {
            return LoadState::ResolvingHost;
        }

        if self
            .in_flight
            .values()
            .any(|attempt| attempt.secure && attempt.tcp_handshake_end.is_some())
        {
            return LoadState::SslHandshake;
        }

        if !self.in_flight.is_empty() {
            return LoadState::Connecting;
        }

        if matches!(
            self.admission(),
            Admission::ReachedGroupLimit | Admission::ReachedPoolLimit
        ) {
            return LoadState::WaitingForAvailableSocket;
        }

        LoadState::Idle
    }

    /// Returns a snapshot of the job's counters.
    pub fn stats(&self) -> JobStats {
        JobStats {
            state: self.state,
            priority: self.priority(),
            requests: self.request_count(),
            pending_requests: self.pending_request_count(),
            pending_preconnects: self.pending_preconnect_count(),
            in_flight_attempts: self.in_flight.len(),
            slow_attempts: self.slow_attempt_count,
            failed_endpoints: self.failed_endpoints.len(),
            stalled_by_pool_limit: self.is_stalled_by_pool_limit(),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn start_timer(&mut self, kind: TimerKind) {
        let delay = match kind {
            TimerKind::Http2Throttle => {
                self.http2_throttle_running = true;
                self.config.get_http2_throttle_delay()
            }
            TimerKind::StreamAttemptDelay => {
                self.stream_attempt_delay_running = true;
                self.config.get_stream_attempt_delay()
            }
        };
        trace!("{}: starting {:?} timer for {:?}", self.key, kind, delay);
        self.timer.start(kind, delay);
    }

    fn stop_timer(&mut self, kind: TimerKind) {
        let running = match kind {
            TimerKind::Http2Throttle => &mut self.http2_throttle_running,
            TimerKind::StreamAttemptDelay => &mut self.stream_attempt_delay_running,
        };
        if std::mem::replace(running, false) {
            self.timer.stop(kind);
        }
    }

    fn stop_timers(&mut self) {
        self.stop_timer(TimerKind::Http2Throttle);
        self.stop_timer(TimerKind::StreamAttemptDelay);
    }

    /// Moves the job to `Drained` once nothing is left to do.
    ///
    /// Called at the end of every public entry point.
    fn maybe_complete(&mut self) {
        if self.state == JobState::Drained {
            return;
        }

        if !self.requests.is_empty()
            || !self.preconnects.is_empty()
            || !self.in_flight.is_empty()
            || self.quic_task.is_some()
        {
            return;
        }

        // A job that never had demand has nothing to complete.
        if self.endpoint_request.is_none() && self.state == JobState::Active && !self.is_canceling {
            return;
        }

        debug!("{}: job drained", self.key);
        self.state = JobState::Drained;
        self.stop_timers();
        self.ssl_config_waiters.clear();
        self.endpoint_request = None;
    }
}

impl<S> Drop for Job<S> {
    fn drop(&mut self) {
        if !self.requests.is_empty() || !self.preconnects.is_empty() {
            debug!("{}: job dropped with pending work", self.key);
            let error = Error::aborted();
            self.notify_preconnects_complete(Err(error.clone()));
            let details = self.failure_details();
            while let Some(entry) = self.extract_first_request() {
                entry.delegate.notify(StreamOutcome::Failed {
                    error: error.clone(),
                    details: details.clone(),
                });
            }
        }
        self.stop_timers();
    }
}

impl<S> fmt::Debug for Job<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("requests", &self.requests.len())
            .field("preconnects", &self.preconnects.len())
            .field("in_flight", &self.in_flight.len())
            .field("slow", &self.slow_attempt_count)
            .field("failed_endpoints", &self.failed_endpoints.len())
            .field("session", &self.session)
            .field("quic", &self.quic_task.is_some())
            .finish()
    }
}

