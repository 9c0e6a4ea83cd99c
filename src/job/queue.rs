use super::{Job, JobState, PreconnectEntry, RequestEntry};
use crate::{
    attempt::QuicVersion,
    error::{Error, Result},
    priority::Priority,
    request::{
        Delegate, FailureDetails, HttpStream, PreconnectId, PreconnectStatus, RequestId,
        RequestOptions, RequestStatus, StreamOutcome,
    },
    session::SessionHandle,
};

impl<S> Job<S> {
    /// Asks for a stream.
    ///
    /// `delegate` is called exactly once. A job that already failed calls it
    /// before returning with the failure every other request received; a
    /// drained job calls it with a [`drained`](Error::is_drained) error. An
    /// adopted session serves the request right away.
    pub fn request_stream<D>(&mut self, delegate: D, options: RequestOptions) -> RequestStatus
    where
        D: Delegate<S> + 'static,
    {
        let delegate: Box<dyn Delegate<S>> = Box::new(delegate);

        match self.state {
            JobState::Drained => {
                trace!("{}: rejecting request, job drained", self.key);
                delegate.notify(StreamOutcome::Failed {
                    error: Error::drained(),
                    details: FailureDetails::default(),
                });
                return RequestStatus::Done;
            }
            JobState::Failing => {
                trace!("{}: rejecting request, job failing", self.key);
                delegate.notify(self.failure_outcome());
                return RequestStatus::Done;
            }
            JobState::Active => {}
        }

        if self.session.is_none() {
            if let Some(version) = options.quic_version {
                self.quic_version = Some(version);
            }
        }
        self.allowed_bad_certs = options.allowed_bad_certs;
        self.enable_ip_based_pooling = options.enable_ip_based_pooling;
        self.enable_alternative_services = options.enable_alternative_services;

        if let Some(session) = self.existing_session() {
            debug!("{}: serving request from existing session", self.key);
            delegate.notify(StreamOutcome::Ready(HttpStream::Multiplexed(session)));
            return RequestStatus::Done;
        }

        let id = RequestId(self.next_id());
        let pointer = self
            .requests
            .insert(RequestEntry { id, delegate }, options.priority);
        self.request_pointers.insert(id, pointer);
        trace!("{}: queued {:?} at {:?}", self.key, id, options.priority);

        self.start_internal(options.priority);
        self.maybe_complete();

        if self.request_pointers.contains_key(&id) {
            RequestStatus::Pending(id)
        } else {
            RequestStatus::Done
        }
    }

    /// Asks for `num_streams` streams or a session to be available, without
    /// a request waiting on them.
    ///
    /// Returns [`PreconnectStatus::Ready`] when nothing needs to be done, in
    /// which case `callback` is dropped uncalled. Otherwise `callback` is
    /// called exactly once, possibly before this method returns. Several
    /// preconnects are satisfied by the same streams: two preconnects of one
    /// stream each complete with a single established stream.
    pub fn preconnect<F>(
        &mut self,
        num_streams: usize,
        quic_version: Option<QuicVersion>,
        callback: F,
    ) -> PreconnectStatus
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        match self.state {
            JobState::Drained => return PreconnectStatus::Ready(Err(Error::drained())),
            JobState::Failing => {
                let error = self
                    .error_to_notify
                    .clone()
                    .unwrap_or_else(Error::name_not_resolved);
                return PreconnectStatus::Ready(Err(error));
            }
            JobState::Active => {}
        }

        if self.quic_version.is_none() {
            self.quic_version = quic_version;
        }

        if self.existing_session().is_some() {
            return PreconnectStatus::Ready(Ok(()));
        }

        let active = self.group.active_stream_count();
        if active >= num_streams {
            return PreconnectStatus::Ready(Ok(()));
        }

        let id = PreconnectId(self.next_id());
        self.preconnects.insert(
            id,
            PreconnectEntry {
                remaining: num_streams - active,
                result: Ok(()),
                callback: Box::new(callback),
            },
        );
        debug!(
            "{}: preconnecting {} stream(s)",
            self.key,
            num_streams - active
        );

        self.start_internal(Priority::Idle);
        self.maybe_complete();
        PreconnectStatus::Pending(id)
    }

    /// Changes the priority of a queued request.
    ///
    /// Returns false if the request is no longer queued.
    pub fn set_priority(&mut self, id: RequestId, priority: Priority) -> bool {
        let Some(pointer) = self.request_pointers.get(&id).copied() else {
            return false;
        };
        if pointer.priority() == priority {
            return true;
        }

        match self.requests.change_priority(pointer, priority) {
            Some(pointer) => {
                self.request_pointers.insert(id, pointer);
                self.maybe_change_endpoint_request_priority();
                true
            }
            None => false,
        }
    }

    /// Withdraws a queued request. Its delegate is dropped uncalled.
    ///
    /// Returns false if the request was already notified or withdrawn.
    pub fn cancel_request(&mut self, id: RequestId) -> bool {
        let Some(pointer) = self.request_pointers.remove(&id) else {
            return false;
        };
        let removed = self.requests.erase(pointer).is_some();
        if removed {
            trace!("{}: canceled {:?}", self.key, id);
            self.maybe_change_endpoint_request_priority();
            self.maybe_complete();
        }
        removed
    }

    /// Withdraws a preconnect. Its callback is dropped uncalled.
    ///
    /// Returns false if the preconnect was already completed or withdrawn.
    pub fn cancel_preconnect(&mut self, id: PreconnectId) -> bool {
        let removed = self.preconnects.remove(&id).is_some();
        if removed {
            self.maybe_complete();
        }
        removed
    }

    /// Returns true while `id` waits for its outcome.
    pub fn is_request_pending(&self, id: RequestId) -> bool {
        self.request_pointers.contains_key(&id)
    }

    /// Returns the number of queued requests.
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Returns the number of queued requests not covered by an in-flight
    /// attempt. Slow attempts do not cover requests.
    pub fn pending_request_count(&self) -> usize {
        self.pending_count(self.requests.len())
    }

    /// Returns the preconnect demand not covered by an in-flight attempt.
    pub fn pending_preconnect_count(&self) -> usize {
        self.pending_count(self.max_preconnect_remaining())
    }

    /// Returns the highest priority among queued requests.
    pub fn priority(&self) -> Priority {
        self.requests.highest_priority().unwrap_or(Priority::Idle)
    }

    pub(super) fn pending_count(&self, demand: usize) -> usize {
        let covering = self.in_flight.len().saturating_sub(self.slow_attempt_count);
        demand.saturating_sub(covering)
    }

    pub(super) fn max_preconnect_remaining(&self) -> usize {
        self.preconnects
            .values()
            .map(|entry| entry.remaining)
            .max()
            .unwrap_or(0)
    }

    pub(super) fn extract_first_request(&mut self) -> Option<RequestEntry<S>> {
        let entry = self.requests.pop_first_max()?;
        self.request_pointers.remove(&entry.id);
        Some(entry)
    }

    /// Returns the adopted session, or adopts one the group already has.
    pub(super) fn existing_session(&mut self) -> Option<SessionHandle> {
        if !self.key.is_secure() {
            return None;
        }

        if let Some(weak) = &self.session {
            match weak.available() {
                Some(session) => return Some(session),
                None => {
                    debug!("{}: adopted session is gone", self.key);
                    self.session = None;
                }
            }
        }

        let found = if self.can_use_quic() {
            self.group.find_quic_session()
        } else {
            None
        };
        let found = found.or_else(|| {
            let endpoints = self
                .endpoint_request
                .as_ref()
                .map(|request| request.endpoints())
                .unwrap_or_default();
            self.group
                .find_session(&endpoints, self.enable_ip_based_pooling)
        })?;

        debug!("{}: found existing {:?} session", self.key, found.protocol());
        self.session = Some(found.downgrade());
        Some(found)
    }
}
