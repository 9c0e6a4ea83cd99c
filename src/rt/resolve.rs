use std::{
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::Poll,
};

use tokio::task::JoinHandle;
use tower_service::Service;

use super::{Events, JobEvent};
use crate::{
    dns::{DynResolver, Name, Resolve, SocketAddrs},
    error::{Error, Result},
    key::StreamKey,
    priority::Priority,
    resolve::{Resolver, ServiceEndpoint, ServiceEndpointRequest},
    sync::Mutex,
};

/// Resolves a job's destination through a [`Resolve`] implementation.
pub(crate) struct DnsEndpointResolver<S> {
    dns: Arc<dyn Resolve>,
    events: Events<S>,
}

impl<S> DnsEndpointResolver<S> {
    pub(crate) fn new(dns: Arc<dyn Resolve>, events: Events<S>) -> DnsEndpointResolver<S> {
        DnsEndpointResolver { dns, events }
    }
}

impl<S: Send + 'static> Resolver for DnsEndpointResolver<S> {
    fn create_request(&self, key: &StreamKey, priority: Priority) -> Box<dyn ServiceEndpointRequest> {
        trace!("{}: creating dns request at {:?}", key, priority);
        Box::new(DnsEndpointRequest {
            host: key.host().into(),
            port: key.port(),
            dns: DynResolver::new(self.dns.clone()),
            events: self.events.clone(),
            shared: Arc::new(Shared::default()),
            task: None,
        })
    }
}

impl<S> fmt::Debug for DnsEndpointResolver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsEndpointResolver").finish()
    }
}

#[derive(Default)]
struct Shared {
    endpoints: Mutex<Vec<ServiceEndpoint>>,
    finished: AtomicBool,
}

/// One lookup. The result is published to `shared` before the job hears
/// about it, so the job always reads what it was told about.
struct DnsEndpointRequest<S> {
    host: Box<str>,
    port: u16,
    dns: DynResolver,
    events: Events<S>,
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl<S> DnsEndpointRequest<S> {
    fn publish(shared: &Shared, addrs: Vec<SocketAddr>) {
        *shared.endpoints.lock() = vec![ServiceEndpoint::from_addrs(addrs)];
        shared.finished.store(true, Ordering::Release);
    }
}

impl<S: Send + 'static> ServiceEndpointRequest for DnsEndpointRequest<S> {
    fn start(&mut self) -> Poll<Result<()>> {
        if let Some(addrs) = SocketAddrs::try_parse(&self.host, self.port) {
            Self::publish(&self.shared, addrs.collect());
            return Poll::Ready(Ok(()));
        }

        let port = self.port;
        let shared = self.shared.clone();
        let events = self.events.clone();
        let resolving = self.dns.call(Name::new(self.host.clone()));

        self.task = Some(tokio::spawn(async move {
            let result = match resolving.await {
                Ok(addrs) => {
                    let addrs: Vec<SocketAddr> = addrs
                        .map(|mut addr| {
                            addr.set_port(port);
                            addr
                        })
                        .collect();
                    if addrs.is_empty() {
                        Err(Error::resolve("no addresses returned"))
                    } else {
                        Ok(addrs)
                    }
                }
                Err(err) => Err(Error::resolve(err)),
            };

            let result = result.map(|addrs| Self::publish(&shared, addrs));
            if result.is_err() {
                shared.finished.store(true, Ordering::Release);
            }
            events.send(JobEvent::EndpointRequestFinished(result));
        }));
        Poll::Pending
    }

    fn endpoints(&self) -> Vec<ServiceEndpoint> {
        self.shared.endpoints.lock().clone()
    }

    fn endpoints_crypto_ready(&self) -> bool {
        // Plain address lookups carry no HTTPS records to wait for.
        self.shared.finished.load(Ordering::Acquire)
    }

    fn change_priority(&mut self, priority: Priority) {
        trace!("dns request for {} now at {:?}", self.host, priority);
    }
}

impl<S> Drop for DnsEndpointRequest<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
