use std::{net::SocketAddr, sync::Arc};

use futures_util::future::{self, Either};
use tokio::{sync::oneshot, task::JoinHandle};

use super::{transport::Transport, Events, JobEvent};
use crate::{
    attempt::{AttemptError, AttemptFactory, AttemptId, Connected, Started, StreamAttempt},
    config::Config,
    error::Error,
    tls::{AlpnProtocol, SslConfig},
};

/// Starts each attempt on its own task.
pub(crate) struct RtAttemptFactory<T: Transport> {
    transport: Arc<T>,
    config: Config,
    events: Events<T::Socket>,
}

impl<T: Transport> RtAttemptFactory<T> {
    pub(crate) fn new(transport: Arc<T>, config: Config, events: Events<T::Socket>) -> Self {
        RtAttemptFactory {
            transport,
            config,
            events,
        }
    }
}

impl<T: Transport> AttemptFactory<T::Socket> for RtAttemptFactory<T> {
    fn start(&mut self, id: AttemptId, endpoint: SocketAddr, secure: bool) -> Started<T::Socket> {
        let (ssl_tx, ssl_rx) = oneshot::channel();
        let task = tokio::spawn(run(
            id,
            endpoint,
            secure.then_some(ssl_rx),
            self.transport.clone(),
            self.config.clone(),
            self.events.clone(),
        ));

        Started::Pending(Box::new(RtAttempt {
            ssl_tx: secure.then_some(ssl_tx),
            task,
        }))
    }
}

/// The job's handle on a running attempt task.
struct RtAttempt {
    ssl_tx: Option<oneshot::Sender<SslConfig>>,
    task: JoinHandle<()>,
}

impl StreamAttempt for RtAttempt {
    fn on_ssl_config_ready(&mut self, config: &SslConfig) {
        if let Some(tx) = self.ssl_tx.take() {
            let _ = tx.send(config.clone());
        }
    }
}

impl Drop for RtAttempt {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<T: Transport>(
    id: AttemptId,
    endpoint: SocketAddr,
    ssl_rx: Option<oneshot::Receiver<SslConfig>>,
    transport: Arc<T>,
    config: Config,
    events: Events<T::Socket>,
) {
    let attempt = establish(id, endpoint, ssl_rx, &*transport, &config, &events);
    let attempt = async {
        match config.get_connect_timeout() {
            Some(dur) => match tokio::time::timeout(dur, attempt).await {
                Ok(result) => result,
                Err(_elapsed) => Err(Error::timed_out().into()),
            },
            None => attempt.await,
        }
    };
    futures_util::pin_mut!(attempt);

    let slow = tokio::time::sleep(config.get_slow_attempt_threshold());
    futures_util::pin_mut!(slow);

    let result = match future::select(attempt, slow).await {
        Either::Left((result, _slow)) => result,
        Either::Right(((), attempt)) => {
            events.send(JobEvent::AttemptSlow(id));
            attempt.await
        }
    };
    events.send(JobEvent::AttemptComplete(id, result));
}

async fn establish<T: Transport>(
    id: AttemptId,
    endpoint: SocketAddr,
    ssl_rx: Option<oneshot::Receiver<SslConfig>>,
    transport: &T,
    config: &Config,
    events: &Events<T::Socket>,
) -> Result<Connected<T::Socket>, AttemptError> {
    let socket = transport.connect(endpoint, config).await?;
    events.send(JobEvent::TcpHandshakeComplete(id));

    let Some(ssl_rx) = ssl_rx else {
        return Ok(Connected::new(socket, AlpnProtocol::HTTP1));
    };

    // The job drops the sender only when it drops this attempt too.
    let ssl_config = ssl_rx
        .await
        .map_err(|_| Error::connect("tls configuration was never provided"))?;
    trace!("{}: handshaking with {}", id, ssl_config.server_name);
    transport.handshake(socket, ssl_config).await
}
