use std::mem;

use super::{Job, JobState};
use crate::{
    error::{Error, Result},
    request::{FailureDetails, FailureKind, StreamOutcome},
};

impl<S> Job<S> {
    /// Fails every request and preconnect with `error` and cancels all work.
    ///
    /// The job ends up drained; requests arriving later are rejected.
    pub fn cancel_requests(&mut self, error: Error) {
        debug!("{}: canceling requests: {}", self.key, error);
        self.is_canceling = true;
        self.cancel_in_flight_attempts_internal();
        self.quic_task = None;
        self.stop_timers();

        self.notify_preconnects_complete(Err(error.clone()));
        let details = self.failure_details();
        while let Some(entry) = self.extract_first_request() {
            entry.delegate.notify(StreamOutcome::Failed {
                error: error.clone(),
                details: details.clone(),
            });
        }
        self.maybe_complete();
    }

    /// Reports that the destination only accepts HTTP/1.1.
    ///
    /// Drops the adopted session and fails every current and future request
    /// with an [`http11_required`](Error::is_http11_required) error.
    pub fn on_required_http11(&mut self) {
        if self.state == JobState::Drained {
            return;
        }
        debug!("{}: destination requires http/1.1", self.key);
        self.session = None;
        self.error_to_notify = Some(Error::http11_required());
        self.notify_failure();
        self.maybe_complete();
    }

    /// Enters `Failing` and delivers the failure to every waiter, most
    /// urgent request first.
    pub(super) fn notify_failure(&mut self) {
        if self.state == JobState::Drained {
            return;
        }
        self.state = JobState::Failing;
        self.failure = Some(self.determine_failure_kind());
        let error = self
            .error_to_notify
            .get_or_insert_with(Error::name_not_resolved)
            .clone();
        debug!(
            "{}: failing with {:?}: {}",
            self.key,
            self.failure,
            error
        );
        self.stop_timers();

        self.notify_preconnects_complete(Err(error));
        while let Some(entry) = self.extract_first_request() {
            entry.delegate.notify(self.failure_outcome());
        }
    }

    /// The outcome every request of a failing job receives.
    pub(super) fn failure_outcome(&self) -> StreamOutcome<S> {
        let error = self
            .error_to_notify
            .clone()
            .unwrap_or_else(Error::name_not_resolved);

        match self.determine_failure_kind() {
            FailureKind::CertificateError => StreamOutcome::CertificateError {
                error,
                ssl_info: self.cert_error_ssl_info.clone().unwrap_or_default(),
            },
            FailureKind::NeedsClientAuth => StreamOutcome::NeedsClientAuth {
                error,
                cert_info: self.client_auth_cert_info.clone().unwrap_or_default(),
            },
            FailureKind::StreamFailed => StreamOutcome::Failed {
                error,
                details: self.failure_details(),
            },
        }
    }

    pub(super) fn failure_details(&self) -> FailureDetails {
        let quic_error = match &self.quic_task_result {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        };
        FailureDetails {
            connection_attempts: self.connection_attempts.clone(),
            quic_error,
        }
    }

    /// Certificate and client authentication failures carry what the
    /// caller needs to act on them, so they win over generic failures.
    fn determine_failure_kind(&self) -> FailureKind {
        if self.cert_error_ssl_info.is_some() {
            FailureKind::CertificateError
        } else if self.client_auth_cert_info.is_some() {
            FailureKind::NeedsClientAuth
        } else {
            FailureKind::StreamFailed
        }
    }

    pub(super) fn notify_preconnects_complete(&mut self, result: Result<()>) {
        for (id, entry) in mem::take(&mut self.preconnects) {
            trace!("{}: {:?} complete", self.key, id);
            (entry.callback)(result.clone());
        }
    }

    /// Counts one finished attempt against every preconnect, completing
    /// those that reach zero. A failure is what they complete with unless
    /// a later attempt succeeds.
    pub(super) fn process_preconnects_after_attempt_complete(&mut self, result: Result<()>) {
        let mut completed = Vec::new();
        for (id, entry) in self.preconnects.iter_mut() {
            entry.remaining = entry.remaining.saturating_sub(1);
            entry.result = result.clone();
            if entry.remaining == 0 {
                completed.push(*id);
            }
        }

        for id in completed {
            if let Some(entry) = self.preconnects.remove(&id) {
                trace!("{}: {:?} complete", self.key, id);
                (entry.callback)(entry.result);
            }
        }
    }
}
