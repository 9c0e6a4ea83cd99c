use std::{mem, task::Poll, time::Instant};

use super::{Job, JobState};
use crate::{
    attempt::{AttemptId, SslConfigProvider},
    error::Result,
    priority::Priority,
    request::ConnectionAttempt,
    resolve::ServiceEndpointDelegate,
    timer::TimerKind,
    tls::{AlpnProtocol, SslConfig},
};

impl<S> Job<S> {
    pub(super) fn start_internal(&mut self, priority: Priority) {
        if self.endpoint_request.is_none() {
            self.resolve_service_endpoint(priority);
        } else {
            self.maybe_change_endpoint_request_priority();
            self.maybe_attempt_connection(None);
        }
    }

    fn resolve_service_endpoint(&mut self, priority: Priority) {
        debug!("{}: resolving at {:?}", self.key, priority);

        self.should_block_stream_attempt =
            self.can_use_quic() && !self.config.get_stream_attempt_delay().is_zero();

        let mut request = self.resolver.create_request(&self.key, priority);
        self.endpoint_request_priority = priority;
        self.dns_resolution_start = Some(Instant::now());
        let started = request.start();
        self.endpoint_request = Some(request);

        match started {
            Poll::Ready(result) => self.handle_endpoint_request_finished(result),
            Poll::Pending => self.process_service_endpoint_changes(),
        }
    }

    pub(super) fn maybe_change_endpoint_request_priority(&mut self) {
        if self.endpoint_request_finished {
            return;
        }
        let priority = self.priority();
        if priority == self.endpoint_request_priority {
            return;
        }
        if let Some(request) = self.endpoint_request.as_mut() {
            trace!("{}: resolver priority now {:?}", self.key, priority);
            request.change_priority(priority);
            self.endpoint_request_priority = priority;
        }
    }

    fn handle_endpoint_request_finished(&mut self, result: Result<()>) {
        self.endpoint_request_finished = true;
        if self.dns_resolution_end.is_none() {
            self.dns_resolution_end = Some(Instant::now());
        }

        match result {
            Ok(()) => {
                debug!("{}: resolution finished", self.key);
                self.process_service_endpoint_changes();
            }
            Err(error) => {
                debug!("{}: resolution failed: {}", self.key, error);
                self.connection_attempts.push(ConnectionAttempt {
                    endpoint: None,
                    error: error.clone(),
                });
                self.error_to_notify = Some(error);

                if self.state != JobState::Active || self.is_canceling {
                    return;
                }
                if self.in_flight.is_empty()
                    && self.quic_task.is_none()
                    && self.existing_session().is_none()
                {
                    self.notify_failure();
                }
            }
        }
    }

    /// Reacts to new endpoints or the end of resolution.
    fn process_service_endpoint_changes(&mut self) {
        if self.state != JobState::Active || self.is_canceling {
            return;
        }
        if self.can_use_existing_session_after_endpoint_changes() {
            return;
        }
        self.maybe_run_stream_attempt_delay_timer();
        self.maybe_calculate_ssl_config();
        self.maybe_attempt_quic();
        self.maybe_attempt_connection(None);
    }

    fn can_use_existing_session_after_endpoint_changes(&mut self) -> bool {
        match self.existing_session() {
            Some(session) => {
                self.adopt_session(session);
                true
            }
            None => false,
        }
    }

    fn maybe_run_stream_attempt_delay_timer(&mut self) {
        if !self.should_block_stream_attempt || self.stream_attempt_delay_running {
            return;
        }
        self.start_timer(TimerKind::StreamAttemptDelay);
    }

    fn maybe_calculate_ssl_config(&mut self) {
        if !self.key.is_secure() || self.ssl_config.is_some() {
            return;
        }
        let Some(request) = self.endpoint_request.as_ref() else {
            return;
        };
        if !self.endpoint_request_finished && !request.endpoints_crypto_ready() {
            return;
        }

        let ech_config_list = request
            .endpoints()
            .into_iter()
            .find_map(|endpoint| endpoint.metadata.ech_config_list);
        let alpn_protos = if self.group.requires_http11() {
            vec![AlpnProtocol::HTTP1]
        } else {
            vec![AlpnProtocol::HTTP2, AlpnProtocol::HTTP1]
        };

        trace!("{}: ssl config ready", self.key);
        self.ssl_config = Some(SslConfig {
            server_name: self.key.server_name().into(),
            alpn_protos,
            allowed_bad_certs: self.allowed_bad_certs.clone(),
            ech_config_list,
        });

        for id in mem::take(&mut self.ssl_config_waiters) {
            let attempt = self
                .in_flight
                .get_mut(&id)
                .and_then(|in_flight| in_flight.attempt.as_mut());
            if let (Some(config), Some(attempt)) = (self.ssl_config.as_ref(), attempt) {
                attempt.on_ssl_config_ready(config);
            }
        }
    }

    pub(super) fn can_use_quic(&self) -> bool {
        self.quic_factory.is_some()
            && self.enable_alternative_services
            && self.quic_version.is_some()
            && self.key.is_secure()
            && self.key.proxy().is_none()
            && !self.group.requires_http11()
    }

    fn maybe_attempt_quic(&mut self) {
        if !self.can_use_quic() || self.quic_task_result.is_some() {
            return;
        }
        let (Some(config), Some(version)) = (self.ssl_config.as_ref(), self.quic_version) else {
            return;
        };
        let endpoints = self
            .endpoint_request
            .as_ref()
            .map(|request| request.endpoints())
            .unwrap_or_default();

        if self.quic_task.is_none() {
            if let Some(factory) = self.quic_factory.as_mut() {
                debug!("{}: racing quic {:?}", self.key, version);
                self.quic_task = Some(factory.create(version, &self.key, config));
            }
        }
        if let Some(task) = self.quic_task.as_mut() {
            task.maybe_attempt(&endpoints);
        }
    }
}

impl<S> ServiceEndpointDelegate for Job<S> {
    fn on_service_endpoints_updated(&mut self) {
        let Some(request) = self.endpoint_request.as_ref() else {
            return;
        };
        if self.endpoint_request_finished {
            return;
        }
        if self.dns_resolution_end.is_none()
            && request.endpoints().iter().any(|endpoint| !endpoint.is_empty())
        {
            self.dns_resolution_end = Some(Instant::now());
        }

        trace!("{}: endpoints updated", self.key);
        self.process_service_endpoint_changes();
        self.maybe_complete();
    }

    fn on_service_endpoint_request_finished(&mut self, result: Result<()>) {
        if self.endpoint_request.is_none() || self.endpoint_request_finished {
            return;
        }
        self.handle_endpoint_request_finished(result);
        self.maybe_complete();
    }
}

impl<S> SslConfigProvider for Job<S> {
    fn wait_for_ssl_config_ready(&mut self, id: AttemptId) -> Poll<()> {
        if self.ssl_config.is_some() {
            return Poll::Ready(());
        }
        if !self.ssl_config_waiters.contains(&id) {
            self.ssl_config_waiters.push(id);
        }
        Poll::Pending
    }

    fn ssl_config(&self) -> Option<SslConfig> {
        self.ssl_config.clone()
    }
}
