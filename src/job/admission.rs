use std::{net::SocketAddr, time::Instant};

use super::{InFlightAttempt, Job, JobState};
use crate::{
    attempt::{AttemptId, SslConfigProvider, Started},
    error::Error,
    timer::TimerKind,
};

/// Whether a job may start another attempt, and if not, what blocks it.
///
/// The variants are checked in declaration order; the first that applies
/// wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Another attempt may start.
    Attempt,
    /// No request or preconnect is waiting.
    NoPendingDemand,
    /// Attempts that are not slow already cover every waiting request.
    CoveredByInFlight,
    /// The destination speaks HTTP/2 and one attempt is already running.
    ThrottledForHttp2,
    /// TCP based attempts are held back while QUIC races them.
    BlockedStreamAttempt,
    /// The destination has no room for another socket.
    ReachedGroupLimit,
    /// The pool has no room for another socket.
    ReachedPoolLimit,
}

impl<S> Job<S> {
    /// Evaluates whether another attempt may start. Has no side effects.
    pub fn admission(&self) -> Admission {
        let demand = self.requests.len().max(self.max_preconnect_remaining());
        if demand == 0 {
            return Admission::NoPendingDemand;
        }
        if self.pending_count(demand) == 0 {
            return Admission::CoveredByInFlight;
        }
        if self.should_throttle_for_http2() {
            return Admission::ThrottledForHttp2;
        }
        if self.should_block_stream_attempt {
            return Admission::BlockedStreamAttempt;
        }
        if self.group.reached_group_limit() {
            return Admission::ReachedGroupLimit;
        }
        if self.group.reached_pool_limit() {
            return Admission::ReachedPoolLimit;
        }
        Admission::Attempt
    }

    /// Returns true when the pool limit is what keeps the job from starting
    /// another attempt.
    pub fn is_stalled_by_pool_limit(&self) -> bool {
        if self.state != JobState::Active || self.is_canceling {
            return false;
        }
        self.admission() == Admission::ReachedPoolLimit
    }

    /// Starts one attempt if the job has unmet demand. The owner calls this
    /// when socket capacity frees up.
    pub fn process_pending_request(&mut self) {
        if self.pending_request_count() == 0 {
            return;
        }
        self.maybe_attempt_connection(Some(1));
        self.maybe_complete();
    }

    fn should_throttle_for_http2(&self) -> bool {
        self.group.supports_http2() && !self.in_flight.is_empty() && !self.http2_throttle_passed
    }

    /// Like [`admission`](Job::admission), but acts on what blocks: starts
    /// the throttle timer, or frees socket capacity by closing idle sockets.
    /// Pending preconnects fail when limits cannot be relieved.
    fn is_connection_attempt_ready(&mut self) -> bool {
        let mut closed_in_group = false;
        let mut closed_in_pool = false;

        loop {
            match self.admission() {
                Admission::Attempt => return true,
                Admission::NoPendingDemand
                | Admission::CoveredByInFlight
                | Admission::BlockedStreamAttempt => return false,
                Admission::ThrottledForHttp2 => {
                    if !self.http2_throttle_running {
                        debug!("{}: throttling attempts for http2", self.key);
                        self.start_timer(TimerKind::Http2Throttle);
                    }
                    return false;
                }
                Admission::ReachedGroupLimit
                    if !closed_in_group && self.group.close_one_idle_stream_socket() =>
                {
                    closed_in_group = true;
                }
                Admission::ReachedPoolLimit
                    if !closed_in_pool && self.group.close_one_idle_stream_socket_in_pool() =>
                {
                    closed_in_pool = true;
                }
                limit @ (Admission::ReachedGroupLimit | Admission::ReachedPoolLimit) => {
                    trace!("{}: blocked by {:?}", self.key, limit);
                    if !self.preconnects.is_empty() {
                        self.notify_preconnects_complete(Err(Error::preconnect_limit()));
                    }
                    return false;
                }
            }
        }
    }

    /// Starts attempts while demand is unmet and nothing blocks them, up to
    /// `max_attempts` if given. Fails the job once every endpoint failed.
    pub(super) fn maybe_attempt_connection(&mut self, max_attempts: Option<usize>) {
        let mut started = 0;

        while self.state == JobState::Active && !self.is_canceling {
            if !self.is_connection_attempt_ready() {
                return;
            }

            let Some(endpoint) = self.endpoint_to_attempt() else {
                if self.endpoint_request_finished
                    && self.in_flight.is_empty()
                    && self.quic_task.is_none()
                {
                    debug!("{}: no endpoint left to attempt", self.key);
                    self.notify_failure();
                }
                return;
            };

            self.start_attempt(endpoint);
            started += 1;
            if max_attempts.is_some_and(|max| started >= max) {
                return;
            }
        }
    }

    fn start_attempt(&mut self, endpoint: SocketAddr) {
        let id = AttemptId(self.next_id());
        let secure = self.key.is_secure();
        debug!("{}: {} to {}", self.key, id, endpoint);

        self.prefer_ipv6 = !endpoint.is_ipv6();
        self.group.connecting_stream_started(endpoint);
        let started = self.attempt_factory.start(id, endpoint, secure);

        let mut in_flight = InFlightAttempt {
            endpoint,
            attempt: None,
            secure,
            is_slow: false,
            connect_start: Instant::now(),
            tcp_handshake_end: None,
        };

        match started {
            Started::Pending(attempt) => {
                in_flight.attempt = Some(attempt);
                self.in_flight.insert(id, in_flight);

                if secure && self.wait_for_ssl_config_ready(id).is_ready() {
                    let attempt = self
                        .in_flight
                        .get_mut(&id)
                        .and_then(|in_flight| in_flight.attempt.as_mut());
                    if let (Some(config), Some(attempt)) = (self.ssl_config.as_ref(), attempt) {
                        attempt.on_ssl_config_ready(config);
                    }
                }
            }
            Started::Ready(result) => {
                self.in_flight.insert(id, in_flight);
                self.complete_attempt(id, result);
            }
        }
    }

    /// Picks the next endpoint: the preferred address family first, then
    /// the other. Failed endpoints are skipped and slow ones are only used
    /// when nothing else is left.
    fn endpoint_to_attempt(&self) -> Option<SocketAddr> {
        let request = self.endpoint_request.as_ref()?;
        let endpoints = request.endpoints();
        let families = [self.prefer_ipv6, !self.prefer_ipv6];

        let candidates = || {
            families.into_iter().flat_map(|ipv6| {
                endpoints
                    .iter()
                    .flat_map(move |endpoint| endpoint.endpoints(ipv6).iter().copied())
            })
        };

        candidates()
            .filter(|addr| !self.failed_endpoints.contains(addr))
            .find(|addr| !self.slow_endpoints.contains(addr))
            .or_else(|| candidates().find(|addr| !self.failed_endpoints.contains(addr)))
    }
}
