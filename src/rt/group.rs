use std::{
    collections::VecDeque,
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use tokio::sync::mpsc;

use super::{transport::Transport, Command, Message};
use crate::{
    attempt::Connected,
    error::Result,
    group::Group,
    resolve::ServiceEndpoint,
    session::SessionHandle,
    sync::Mutex,
};

/// Socket limits shared by every job of one [`Spawner`](super::Spawner).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Sockets per destination, connecting or idle.
    pub max_per_group: usize,
    /// Sockets across every destination, connecting or idle.
    pub max_total: usize,
}

impl Default for PoolLimits {
    fn default() -> Self {
        PoolLimits {
            max_per_group: 6,
            max_total: 256,
        }
    }
}

/// Bookkeeping shared by the groups of one spawner.
pub(crate) struct Pool<S> {
    limits: PoolLimits,
    total: AtomicUsize,
    groups: Mutex<Vec<Weak<Mutex<GroupState<S>>>>>,
}

impl<S> Pool<S> {
    pub(crate) fn new(limits: PoolLimits) -> Pool<S> {
        Pool {
            limits,
            total: AtomicUsize::new(0),
            groups: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn limits(&self) -> PoolLimits {
        self.limits
    }

    pub(crate) fn register(&self, state: &Arc<Mutex<GroupState<S>>>) {
        let mut groups = self.groups.lock();
        groups.retain(|group| group.strong_count() > 0);
        groups.push(Arc::downgrade(state));
    }

    /// Frees socket capacity and wakes the jobs the pool limit stalled.
    ///
    /// Must not be called with a group locked.
    fn release(&self, count: usize) {
        self.total.fetch_sub(count, Ordering::AcqRel);

        let groups = self.groups.lock().clone();
        for group in groups.iter().filter_map(Weak::upgrade) {
            let mut state = group.lock();
            if std::mem::take(&mut state.stalled_by_pool_limit) {
                trace!("waking a job stalled by the pool limit");
                let _ = state
                    .wake
                    .send(Message::Command(Command::ProcessPendingRequest));
            }
        }
    }
}

/// Sockets and sessions of one destination. Outlives the jobs serving it.
pub(crate) struct GroupState<S> {
    idle: VecDeque<Connected<S>>,
    connecting: usize,
    sessions: Vec<SessionHandle>,
    supports_http2: bool,
    requires_http11: bool,
    // Set when the job last found the pool full, cleared when it is woken.
    stalled_by_pool_limit: bool,
    wake: mpsc::UnboundedSender<Message<S>>,
}

impl<S> GroupState<S> {
    fn new(wake: mpsc::UnboundedSender<Message<S>>) -> GroupState<S> {
        GroupState {
            idle: VecDeque::new(),
            connecting: 0,
            sessions: Vec::new(),
            supports_http2: false,
            requires_http11: false,
            stalled_by_pool_limit: false,
            wake,
        }
    }

    fn active(&self) -> usize {
        self.connecting + self.idle.len()
    }
}

/// The [`Group`] a runtime job consults.
///
/// Cloning is cheap; every clone refers to the same destination state.
pub(crate) struct RtGroup<T: Transport> {
    transport: Arc<T>,
    pool: Arc<Pool<T::Socket>>,
    state: Arc<Mutex<GroupState<T::Socket>>>,
}

impl<T: Transport> Clone for RtGroup<T> {
    fn clone(&self) -> Self {
        RtGroup {
            transport: self.transport.clone(),
            pool: self.pool.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T: Transport> RtGroup<T> {
    /// Creates the group of one job task. `wake` is the task's channel.
    pub(crate) fn new(
        transport: Arc<T>,
        pool: Arc<Pool<T::Socket>>,
        wake: mpsc::UnboundedSender<Message<T::Socket>>,
    ) -> RtGroup<T> {
        let state = Arc::new(Mutex::new(GroupState::new(wake)));
        pool.register(&state);
        RtGroup {
            transport,
            pool,
            state,
        }
    }

    /// Hands out the most recently idled socket.
    pub(crate) fn take_idle_socket(&self) -> Option<Connected<T::Socket>> {
        let connected = self.state.lock().idle.pop_back()?;
        self.pool.release(1);
        Some(connected)
    }

    #[cfg(test)]
    pub(crate) fn idle_socket_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub(crate) fn set_requires_http11(&self) {
        let mut state = self.state.lock();
        state.requires_http11 = true;
        state.supports_http2 = false;
        state.sessions.clear();
    }
}

impl<T: Transport> Group<T::Socket> for RtGroup<T> {
    fn reached_group_limit(&self) -> bool {
        self.state.lock().active() >= self.pool.limits.max_per_group
    }

    fn reached_pool_limit(&self) -> bool {
        // The flag and the load share the lock `release` takes to scan
        // flags, so a release racing this check still wakes the job.
        let mut state = self.state.lock();
        let reached = self.pool.total.load(Ordering::Acquire) >= self.pool.limits.max_total;
        state.stalled_by_pool_limit = reached;
        reached
    }

    fn close_one_idle_stream_socket(&mut self) -> bool {
        let closed = self.state.lock().idle.pop_front().is_some();
        if closed {
            trace!("closing an idle socket of the group");
            self.pool.release(1);
        }
        closed
    }

    fn close_one_idle_stream_socket_in_pool(&mut self) -> bool {
        let groups = self.pool.groups.lock().clone();
        for group in groups.iter().filter_map(Weak::upgrade) {
            let closed = group.lock().idle.pop_front().is_some();
            if closed {
                trace!("closing an idle socket of the pool");
                self.pool.release(1);
                return true;
            }
        }
        false
    }

    fn active_stream_count(&self) -> usize {
        self.state.lock().active()
    }

    fn supports_http2(&self) -> bool {
        self.state.lock().supports_http2
    }

    fn requires_http11(&self) -> bool {
        self.state.lock().requires_http11
    }

    fn find_session(&self, _endpoints: &[ServiceEndpoint], _ip_pooling: bool) -> Option<SessionHandle> {
        let mut state = self.state.lock();
        state.sessions.retain(SessionHandle::is_available);
        state.sessions.first().cloned()
    }

    fn create_session(&mut self, connected: Connected<T::Socket>) -> Result<SessionHandle> {
        let session = self.transport.create_session(connected)?;
        let mut state = self.state.lock();
        state.supports_http2 = true;
        state.sessions.push(session.clone());
        Ok(session)
    }

    fn add_idle_stream_socket(&mut self, connected: Connected<T::Socket>) {
        self.state.lock().idle.push_back(connected);
        self.pool.total.fetch_add(1, Ordering::AcqRel);
    }

    fn connecting_stream_started(&mut self, endpoint: SocketAddr) {
        trace!("connecting to {}", endpoint);
        self.state.lock().connecting += 1;
        self.pool.total.fetch_add(1, Ordering::AcqRel);
    }

    fn connecting_stream_finished(&mut self) {
        let finished = {
            let mut state = self.state.lock();
            let finished = state.connecting > 0;
            state.connecting = state.connecting.saturating_sub(1);
            finished
        };
        if finished {
            self.pool.release(1);
        }
    }
}

impl<T: Transport> fmt::Debug for RtGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RtGroup")
            .field("idle", &state.idle.len())
            .field("connecting", &state.connecting)
            .field("sessions", &state.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rt::TcpTransport, tls::AlpnProtocol};

    fn group(pool: &Arc<Pool<tokio::net::TcpStream>>) -> RtGroup<TcpTransport> {
        let (wake, _rx) = mpsc::unbounded_channel();
        RtGroup::new(Arc::new(TcpTransport::new()), pool.clone(), wake)
    }

    #[test]
    fn limits_count_connecting_sockets() {
        let pool = Arc::new(Pool::new(PoolLimits {
            max_per_group: 2,
            max_total: 3,
        }));
        let mut a = group(&pool);
        let mut b = group(&pool);
        let endpoint: SocketAddr = "127.0.0.1:80".parse().unwrap();

        a.connecting_stream_started(endpoint);
        a.connecting_stream_started(endpoint);
        assert!(a.reached_group_limit());
        assert!(!a.reached_pool_limit());

        b.connecting_stream_started(endpoint);
        assert!(!b.reached_group_limit());
        assert!(b.reached_pool_limit());

        a.connecting_stream_finished();
        assert!(!a.reached_group_limit());
        assert!(!b.reached_pool_limit());
        assert_eq!(a.active_stream_count(), 1);
    }

    #[tokio::test]
    async fn idle_sockets_are_closed_across_the_pool() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let socket = tokio::net::TcpStream::connect(addr).await.unwrap();

        let pool = Arc::new(Pool::new(PoolLimits::default()));
        let mut a = group(&pool);
        let mut b = group(&pool);

        a.add_idle_stream_socket(Connected::new(socket, AlpnProtocol::HTTP1));
        assert_eq!(a.idle_socket_count(), 1);
        assert!(!b.close_one_idle_stream_socket());
        assert!(b.close_one_idle_stream_socket_in_pool());
        assert_eq!(a.idle_socket_count(), 0);
        assert_eq!(pool.total.load(Ordering::Acquire), 0);
    }

    #[test]
    fn release_wakes_groups_stalled_by_pool_limit() {
        let pool = Arc::new(Pool::new(PoolLimits {
            max_per_group: 6,
            max_total: 1,
        }));
        let mut a = group(&pool);
        let (wake, mut rx) = mpsc::unbounded_channel();
        let b = RtGroup::new(Arc::new(TcpTransport::new()), pool.clone(), wake);
        let endpoint: SocketAddr = "127.0.0.1:80".parse().unwrap();

        a.connecting_stream_started(endpoint);
        assert!(b.reached_pool_limit());
        assert!(rx.try_recv().is_err());

        a.connecting_stream_finished();
        assert!(matches!(
            rx.try_recv(),
            Ok(Message::Command(Command::ProcessPendingRequest))
        ));

        a.connecting_stream_started(endpoint);
        a.connecting_stream_finished();
        assert!(rx.try_recv().is_err(), "woken once per stall");
    }
}
