use std::{net::SocketAddr, time::Instant};

use super::{Job, JobState};
use crate::{
    attempt::{AttemptError, AttemptId, Connected, QuicResult},
    request::{ConnectTiming, ConnectionAttempt, HttpStream, StreamOutcome},
    session::SessionHandle,
    timer::TimerKind,
    tls::AlpnProtocol,
};

impl<S> Job<S> {
    /// Reports that an attempt exceeded the slow threshold.
    ///
    /// The attempt keeps running but no longer covers demand, so another
    /// attempt may start next to it. Its endpoint is only used again when no
    /// other endpoint is left.
    pub fn on_attempt_slow(&mut self, id: AttemptId) {
        let Some(attempt) = self.in_flight.get_mut(&id) else {
            return;
        };
        if attempt.is_slow {
            return;
        }
        attempt.is_slow = true;
        let endpoint = attempt.endpoint;

        debug!("{}: {} to {} is slow", self.key, id, endpoint);
        self.slow_attempt_count += 1;
        self.slow_endpoints.insert(endpoint);
        self.prefer_ipv6 = !endpoint.is_ipv6();

        self.maybe_attempt_connection(None);
        self.maybe_complete();
    }

    /// Reports that the TCP handshake of an attempt completed.
    pub fn on_attempt_tcp_handshake_complete(&mut self, id: AttemptId) {
        if let Some(attempt) = self.in_flight.get_mut(&id) {
            trace!("{}: {} connected", self.key, id);
            attempt.tcp_handshake_end = Some(Instant::now());
        }
    }

    /// Reports the result of an attempt. Unknown or already completed ids
    /// are ignored.
    pub fn on_attempt_complete(&mut self, id: AttemptId, result: Result<Connected<S>, AttemptError>) {
        self.complete_attempt(id, result);
        self.maybe_complete();
    }

    /// Reports the result of the QUIC task.
    pub fn on_quic_task_complete(&mut self, result: QuicResult) {
        if self.quic_task.take().is_none() {
            trace!("{}: ignoring result of a canceled quic task", self.key);
            return;
        }

        match result {
            Ok(session) => {
                debug!("{}: quic session ready", self.key);
                self.quic_task_result = Some(Ok(()));
                if self.state == JobState::Active && !self.is_canceling {
                    self.adopt_session(session);
                }
            }
            Err(err) => {
                let error = err.error().clone();
                debug!("{}: quic task failed: {}", self.key, error);
                self.quic_task_result = Some(Err(error.clone()));

                self.should_block_stream_attempt = false;
                self.stop_timer(TimerKind::StreamAttemptDelay);
                if self.error_to_notify.is_none() {
                    self.error_to_notify = Some(error);
                }
                self.maybe_attempt_connection(None);
            }
        }
        self.maybe_complete();
    }

    /// Reports that a timer started by the job fired. Fires of stopped
    /// timers are ignored.
    pub fn on_timer_fired(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Http2Throttle => {
                if !self.http2_throttle_running {
                    return;
                }
                trace!("{}: http2 throttle passed", self.key);
                self.http2_throttle_running = false;
                self.http2_throttle_passed = true;
            }
            TimerKind::StreamAttemptDelay => {
                if !self.stream_attempt_delay_running {
                    return;
                }
                trace!("{}: stream attempt delay passed", self.key);
                self.stream_attempt_delay_running = false;
                self.should_block_stream_attempt = false;
            }
        }
        self.maybe_attempt_connection(None);
        self.maybe_complete();
    }

    /// Cancels every running attempt without notifying anyone. Queued
    /// requests stay queued.
    pub fn cancel_in_flight_attempts(&mut self) {
        self.cancel_in_flight_attempts_internal();
        self.maybe_complete();
    }

    pub(super) fn cancel_in_flight_attempts_internal(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        debug!("{}: canceling {} attempt(s)", self.key, self.in_flight.len());
        for _ in std::mem::take(&mut self.in_flight) {
            self.group.connecting_stream_finished();
        }
        self.slow_attempt_count = 0;
        self.ssl_config_waiters.clear();
    }

    pub(super) fn complete_attempt(&mut self, id: AttemptId, result: Result<Connected<S>, AttemptError>) {
        let Some(attempt) = self.in_flight.remove(&id) else {
            trace!("{}: ignoring result of {}", self.key, id);
            return;
        };
        self.ssl_config_waiters.retain(|waiter| *waiter != id);
        if attempt.is_slow {
            self.slow_attempt_count -= 1;
        }
        self.group.connecting_stream_finished();

        let connected = match result {
            Ok(connected) => connected,
            Err(err) => return self.handle_attempt_failure(attempt.endpoint, err),
        };

        debug!(
            "{}: {} to {} negotiated {:?}",
            self.key, id, attempt.endpoint, connected.negotiated
        );
        self.process_preconnects_after_attempt_complete(Ok(()));

        if connected.negotiated == AlpnProtocol::HTTP2 {
            self.on_http2_connected(connected);
            return;
        }

        let timing = ConnectTiming {
            dns_start: self.dns_resolution_start,
            dns_end: self.dns_resolution_end,
            connect_start: Some(attempt.connect_start),
            tcp_handshake_end: attempt.tcp_handshake_end,
            connect_end: Some(Instant::now()),
        };
        self.create_text_based_stream_and_notify(connected, timing);
    }

    fn handle_attempt_failure(&mut self, endpoint: SocketAddr, err: AttemptError) {
        debug!("{}: attempt to {} failed: {}", self.key, endpoint, err.error());
        self.connection_attempts.push(ConnectionAttempt {
            endpoint: Some(endpoint),
            error: err.error().clone(),
        });
        self.failed_endpoints.insert(endpoint);

        if self.state != JobState::Active || self.is_canceling {
            return;
        }

        match err {
            AttemptError::Certificate { error, ssl_info } => {
                self.cert_error_ssl_info = Some(ssl_info);
                self.error_to_notify = Some(error);
                self.notify_failure();
            }
            AttemptError::ClientAuthRequired { error, cert_info } => {
                self.client_auth_cert_info = Some(cert_info);
                self.error_to_notify = Some(error);
                self.notify_failure();
            }
            AttemptError::Failed(error) => {
                self.process_preconnects_after_attempt_complete(Err(error.clone()));
                self.error_to_notify = Some(error);
                self.maybe_attempt_connection(None);
            }
        }
    }

    fn on_http2_connected(&mut self, connected: Connected<S>) {
        if self.state != JobState::Active || self.is_canceling {
            trace!("{}: closing http2 connection of a finished job", self.key);
            drop(connected);
            return;
        }

        let session = match self.group.create_session(connected) {
            Ok(session) => session,
            Err(error) => {
                warn!("{}: creating http2 session failed: {}", self.key, error);
                self.error_to_notify = Some(error);
                self.notify_failure();
                return;
            }
        };

        if self.has_available_session() {
            trace!("{}: keeping the session already adopted", self.key);
            return;
        }
        self.adopt_session(session);
    }

    /// Serves every waiter from `session` and stops racing for another.
    pub(super) fn adopt_session(&mut self, session: SessionHandle) {
        debug!("{}: adopting {:?} session", self.key, session.protocol());
        self.session = Some(session.downgrade());

        while let Some(entry) = self.extract_first_request() {
            entry
                .delegate
                .notify(StreamOutcome::Ready(HttpStream::Multiplexed(session.clone())));
        }
        self.notify_preconnects_complete(Ok(()));
        self.cancel_in_flight_attempts_internal();
        self.stop_timers();
    }

    /// Hands a dedicated socket to the most urgent request, or to the group
    /// when nobody waits for it.
    fn create_text_based_stream_and_notify(&mut self, connected: Connected<S>, timing: ConnectTiming) {
        match self.extract_first_request() {
            Some(entry) => {
                trace!("{}: stream ready for {:?}", self.key, entry.id);
                entry.delegate.notify(StreamOutcome::Ready(HttpStream::Basic {
                    socket: connected.socket,
                    negotiated: connected.negotiated,
                    timing,
                }));
                self.maybe_change_endpoint_request_priority();
            }
            None => {
                trace!("{}: no request waiting, socket goes idle", self.key);
                self.group.add_idle_stream_socket(connected);
            }
        }
        self.maybe_attempt_connection(None);
    }
}
