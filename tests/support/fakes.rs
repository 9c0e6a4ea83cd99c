//! Scripted collaborators for driving a `Job` by hand.
//!
//! Every fake is a cheap handle onto shared state, so a test keeps one
//! clone to script and inspect while the job owns another.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    task::Poll,
    time::Duration,
};

use http::uri::Scheme;
use http_stream_pool::{
    AlpnProtocol, AttemptFactory, AttemptId, Config, Connected, Group, Job, PreconnectCallback,
    Priority, QuicTask, QuicTaskFactory, QuicVersion, Resolver, Result, ServiceEndpoint,
    ServiceEndpointRequest, Session, SessionHandle, SslConfig, Started, StreamAttempt, StreamKey,
    StreamOutcome, Timer, TimerKind,
};

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap()
}

pub fn http_key() -> StreamKey {
    StreamKey::new(Scheme::HTTP, "example.com", 80)
}

pub fn https_key() -> StreamKey {
    StreamKey::new(Scheme::HTTPS, "example.com", 443)
}

pub fn v4(n: u8) -> SocketAddr {
    SocketAddr::from(([192, 0, 2, n], 443))
}

pub fn v6(n: u16) -> SocketAddr {
    SocketAddr::from(([0x2001, 0xdb8, 0, 0, 0, 0, 0, n], 443))
}

/// The socket type of jobs under test: remembers where it connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeSocket(pub SocketAddr);

pub fn http1(endpoint: SocketAddr) -> Connected<FakeSocket> {
    Connected::new(FakeSocket(endpoint), AlpnProtocol::HTTP1)
}

pub fn http2(endpoint: SocketAddr) -> Connected<FakeSocket> {
    Connected::new(FakeSocket(endpoint), AlpnProtocol::HTTP2)
}

// ===== resolver =====

#[derive(Default)]
pub struct ResolverState {
    pub endpoints: Vec<ServiceEndpoint>,
    pub crypto_ready: bool,
    /// Finish synchronously in `start` with this result.
    pub finish_on_start: Option<Result<()>>,
    pub created: Vec<Priority>,
    pub priority_changes: Vec<Priority>,
}

#[derive(Clone, Default)]
pub struct FakeResolver(Arc<Mutex<ResolverState>>);

impl FakeResolver {
    pub fn state(&self) -> MutexGuard<'_, ResolverState> {
        lock(&self.0)
    }

    /// Resolves synchronously to `addrs`.
    pub fn resolve_to(&self, addrs: Vec<SocketAddr>) {
        let mut state = self.state();
        state.endpoints = vec![ServiceEndpoint::from_addrs(addrs)];
        state.finish_on_start = Some(Ok(()));
    }

    /// Publishes `addrs` without finishing; the test drives the job's
    /// delegate methods itself.
    pub fn publish(&self, addrs: Vec<SocketAddr>, crypto_ready: bool) {
        let mut state = self.state();
        state.endpoints = vec![ServiceEndpoint::from_addrs(addrs)];
        state.crypto_ready = crypto_ready;
    }
}

impl Resolver for FakeResolver {
    fn create_request(&self, _key: &StreamKey, priority: Priority) -> Box<dyn ServiceEndpointRequest> {
        self.state().created.push(priority);
        Box::new(FakeRequest(self.0.clone()))
    }
}

struct FakeRequest(Arc<Mutex<ResolverState>>);

impl ServiceEndpointRequest for FakeRequest {
    fn start(&mut self) -> Poll<Result<()>> {
        match lock(&self.0).finish_on_start.take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }

    fn endpoints(&self) -> Vec<ServiceEndpoint> {
        lock(&self.0).endpoints.clone()
    }

    fn endpoints_crypto_ready(&self) -> bool {
        lock(&self.0).crypto_ready
    }

    fn change_priority(&mut self, priority: Priority) {
        lock(&self.0).priority_changes.push(priority);
    }
}

// ===== attempts =====

#[derive(Default)]
pub struct AttemptsState {
    pub started: Vec<(AttemptId, SocketAddr, bool)>,
    pub ssl_configs: Vec<(AttemptId, SslConfig)>,
    pub dropped: Vec<AttemptId>,
    /// Complete the next attempt while it starts.
    pub complete_on_start: Option<Connected<FakeSocket>>,
}

#[derive(Clone, Default)]
pub struct FakeAttempts(Arc<Mutex<AttemptsState>>);

impl FakeAttempts {
    pub fn state(&self) -> MutexGuard<'_, AttemptsState> {
        lock(&self.0)
    }

    pub fn count(&self) -> usize {
        self.state().started.len()
    }

    pub fn id(&self, n: usize) -> AttemptId {
        self.state().started[n].0
    }

    pub fn endpoint(&self, n: usize) -> SocketAddr {
        self.state().started[n].1
    }

    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.state().started.iter().map(|(_, addr, _)| *addr).collect()
    }
}

impl AttemptFactory<FakeSocket> for FakeAttempts {
    fn start(&mut self, id: AttemptId, endpoint: SocketAddr, secure: bool) -> Started<FakeSocket> {
        let mut state = self.state();
        state.started.push((id, endpoint, secure));
        if let Some(connected) = state.complete_on_start.take() {
            return Started::Ready(Ok(connected));
        }
        Started::Pending(Box::new(FakeAttempt {
            id,
            state: self.0.clone(),
        }))
    }
}

struct FakeAttempt {
    id: AttemptId,
    state: Arc<Mutex<AttemptsState>>,
}

impl StreamAttempt for FakeAttempt {
    fn on_ssl_config_ready(&mut self, config: &SslConfig) {
        lock(&self.state).ssl_configs.push((self.id, config.clone()));
    }
}

impl Drop for FakeAttempt {
    fn drop(&mut self) {
        lock(&self.state).dropped.push(self.id);
    }
}

// ===== group =====

pub struct FakeSession {
    available: AtomicBool,
    protocol: AlpnProtocol,
}

impl FakeSession {
    pub fn new(protocol: AlpnProtocol) -> Arc<FakeSession> {
        Arc::new(FakeSession {
            available: AtomicBool::new(true),
            protocol,
        })
    }

    pub fn close(&self) {
        self.available.store(false, Ordering::SeqCst);
    }
}

impl Session for FakeSession {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn protocol(&self) -> AlpnProtocol {
        self.protocol
    }
}

#[derive(Default)]
pub struct GroupState {
    pub group_limit_reached: bool,
    pub pool_limit_reached: bool,
    /// Idle sockets that closing one frees a slot for.
    pub closable_idle: usize,
    pub closed_idle: usize,
    pub active: usize,
    pub supports_http2: bool,
    pub requires_http11: bool,
    pub sessions: Vec<SessionHandle>,
    pub quic_session: Option<SessionHandle>,
    pub idle: Vec<Connected<FakeSocket>>,
    pub connecting: usize,
}

#[derive(Clone, Default)]
pub struct FakeGroup(Arc<Mutex<GroupState>>);

impl FakeGroup {
    pub fn state(&self) -> MutexGuard<'_, GroupState> {
        lock(&self.0)
    }

    pub fn add_session(&self, session: Arc<FakeSession>) -> SessionHandle {
        let handle = SessionHandle::new(session);
        self.state().sessions.push(handle.clone());
        handle
    }
}

impl Group<FakeSocket> for FakeGroup {
    fn reached_group_limit(&self) -> bool {
        self.state().group_limit_reached
    }

    fn reached_pool_limit(&self) -> bool {
        self.state().pool_limit_reached
    }

    fn close_one_idle_stream_socket(&mut self) -> bool {
        let mut state = self.state();
        if state.closable_idle == 0 {
            return false;
        }
        state.closable_idle -= 1;
        state.closed_idle += 1;
        state.group_limit_reached = false;
        true
    }

    fn close_one_idle_stream_socket_in_pool(&mut self) -> bool {
        false
    }

    fn active_stream_count(&self) -> usize {
        self.state().active
    }

    fn supports_http2(&self) -> bool {
        self.state().supports_http2
    }

    fn requires_http11(&self) -> bool {
        self.state().requires_http11
    }

    fn find_session(&self, _endpoints: &[ServiceEndpoint], _ip_pooling: bool) -> Option<SessionHandle> {
        self.state()
            .sessions
            .iter()
            .find(|session| session.is_available())
            .cloned()
    }

    fn find_quic_session(&self) -> Option<SessionHandle> {
        self.state().quic_session.clone()
    }

    fn create_session(&mut self, connected: Connected<FakeSocket>) -> Result<SessionHandle> {
        let session = SessionHandle::new(FakeSession::new(connected.negotiated));
        let mut state = self.state();
        state.supports_http2 = true;
        state.sessions.push(session.clone());
        Ok(session)
    }

    fn add_idle_stream_socket(&mut self, connected: Connected<FakeSocket>) {
        self.state().idle.push(connected);
    }

    fn connecting_stream_started(&mut self, _endpoint: SocketAddr) {
        self.state().connecting += 1;
    }

    fn connecting_stream_finished(&mut self) {
        let mut state = self.state();
        state.connecting = state.connecting.saturating_sub(1);
    }
}

// ===== timer =====

#[derive(Default)]
pub struct TimerState {
    pub running: HashMap<TimerKind, Duration>,
    pub started: Vec<TimerKind>,
    pub stopped: Vec<TimerKind>,
}

#[derive(Clone, Default)]
pub struct FakeTimer(Arc<Mutex<TimerState>>);

impl FakeTimer {
    pub fn state(&self) -> MutexGuard<'_, TimerState> {
        lock(&self.0)
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.state().running.contains_key(&kind)
    }
}

impl Timer for FakeTimer {
    fn start(&mut self, kind: TimerKind, delay: Duration) {
        let mut state = self.state();
        state.running.insert(kind, delay);
        state.started.push(kind);
    }

    fn stop(&mut self, kind: TimerKind) {
        let mut state = self.state();
        state.running.remove(&kind);
        state.stopped.push(kind);
    }
}

// ===== quic =====

#[derive(Default)]
pub struct QuicState {
    pub created: Vec<(QuicVersion, SslConfig)>,
    pub attempted: Vec<usize>,
    pub dropped: usize,
}

#[derive(Clone, Default)]
pub struct FakeQuic(Arc<Mutex<QuicState>>);

impl FakeQuic {
    pub fn state(&self) -> MutexGuard<'_, QuicState> {
        lock(&self.0)
    }
}

impl QuicTaskFactory for FakeQuic {
    fn create(&mut self, version: QuicVersion, _key: &StreamKey, config: &SslConfig) -> Box<dyn QuicTask> {
        self.state().created.push((version, config.clone()));
        Box::new(FakeQuicTask(self.0.clone()))
    }
}

struct FakeQuicTask(Arc<Mutex<QuicState>>);

impl QuicTask for FakeQuicTask {
    fn maybe_attempt(&mut self, endpoints: &[ServiceEndpoint]) {
        lock(&self.0).attempted.push(endpoints.len());
    }
}

impl Drop for FakeQuicTask {
    fn drop(&mut self) {
        lock(&self.0).dropped += 1;
    }
}

// ===== outcomes =====

/// Collects delivered outcomes, tagged with the request they belong to.
#[derive(Clone, Default)]
pub struct Outcomes(Arc<Mutex<Vec<(&'static str, StreamOutcome<FakeSocket>)>>>);

impl Outcomes {
    pub fn delegate(&self, tag: &'static str) -> impl FnOnce(StreamOutcome<FakeSocket>) + Send + 'static {
        let outcomes = self.0.clone();
        move |outcome: StreamOutcome<FakeSocket>| lock(&outcomes).push((tag, outcome))
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn tags(&self) -> Vec<&'static str> {
        lock(&self.0).iter().map(|(tag, _)| *tag).collect()
    }

    /// Takes the outcome delivered to `tag`, panicking if there is none.
    pub fn take(&self, tag: &str) -> StreamOutcome<FakeSocket> {
        let mut outcomes = lock(&self.0);
        let index = outcomes
            .iter()
            .position(|(t, _)| *t == tag)
            .unwrap_or_else(|| panic!("no outcome for {tag}"));
        outcomes.remove(index).1
    }

    pub fn count(&self, tag: &str) -> usize {
        lock(&self.0).iter().filter(|(t, _)| *t == tag).count()
    }
}

/// Collects preconnect results.
#[derive(Clone, Default)]
pub struct PreconnectResults(Arc<Mutex<Vec<Result<()>>>>);

impl PreconnectResults {
    pub fn callback(&self) -> PreconnectCallback {
        let results = self.0.clone();
        Box::new(move |result: Result<()>| lock(&results).push(result))
    }

    pub fn take(&self) -> Vec<Result<()>> {
        std::mem::take(&mut *lock(&self.0))
    }
}

// ===== harness =====

/// One set of fakes, and the jobs built on them.
#[derive(Clone, Default)]
pub struct Fakes {
    pub resolver: FakeResolver,
    pub attempts: FakeAttempts,
    pub group: FakeGroup,
    pub timer: FakeTimer,
    pub quic: FakeQuic,
    pub outcomes: Outcomes,
    pub preconnects: PreconnectResults,
}

impl Fakes {
    pub fn new() -> Fakes {
        let _ = env_logger::try_init();
        Fakes::default()
    }

    pub fn job(&self, key: StreamKey) -> Job<FakeSocket> {
        self.job_with_config(key, Config::default())
    }

    pub fn job_with_config(&self, key: StreamKey, config: Config) -> Job<FakeSocket> {
        Job::builder(key)
            .config(config)
            .resolver(Arc::new(self.resolver.clone()))
            .attempt_factory(self.attempts.clone())
            .group(self.group.clone())
            .timer(self.timer.clone())
            .build()
            .unwrap()
    }

    pub fn job_with_quic(&self, key: StreamKey) -> Job<FakeSocket> {
        Job::builder(key)
            .resolver(Arc::new(self.resolver.clone()))
            .attempt_factory(self.attempts.clone())
            .group(self.group.clone())
            .timer(self.timer.clone())
            .quic_task_factory(self.quic.clone())
            .build()
            .unwrap()
    }
}
