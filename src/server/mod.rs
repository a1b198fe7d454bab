//! # Server Supervisor
//!
//! Runs the SCEP HTTP listener as three supervised tasks:
//!
//! - the accept loop, serving connections until told to stop;
//! - the shutdown watcher, which drains in-flight connections within a grace
//!   period once shutdown begins;
//! - the signal watcher, waiting for a termination signal.
//!
//! Whichever task finishes first stops the others. Every task's outcome is
//! collected in completion order and logged once; none of them is fatal to
//! the process.

pub mod http;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::scep::ScepService;
use crate::{Error, Result};

/// Maximum time to receive request headers
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace period for in-flight requests once shutdown begins
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Pause after an accept error that is not tied to a single connection
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// The supervised tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    AcceptLoop,
    ShutdownWatcher,
    SignalWatcher,
}

/// How a supervised task concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The accept loop stopped taking connections
    ListenerClosed,
    /// Every in-flight connection finished within the grace period
    Drained,
    /// The grace period elapsed; remaining connections were dropped
    DrainTimedOut { remaining: usize },
    /// A termination signal arrived
    Signalled,
    /// Unwound because another task finished first
    Cancelled,
    Failed(String),
}

/// Source of inbound connections for the accept loop
trait Accept: Send + 'static {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Errors that concern one connection only; the listener itself is fine.
fn is_connection_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Connections handed from the accept loop to the shutdown watcher
struct Draining {
    graceful: GracefulShutdown,
    connections: JoinSet<()>,
}

/// Owns the listener lifecycle: `Idle → Running → Draining → Stopped`.
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: ServerConfig,
    drain_timeout: Duration,
}

impl Supervisor {
    pub fn new(config: ServerConfig) -> Self {
        Self { config, drain_timeout: DRAIN_TIMEOUT }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Bind the configured address and serve until shutdown or SIGTERM.
    ///
    /// Only a bind failure is an error; task outcomes are returned.
    pub async fn run(
        &self,
        service: Arc<dyn ScepService>,
        shutdown: CancellationToken,
    ) -> Result<Vec<(TaskKind, TaskOutcome)>> {
        let listener = TcpListener::bind(self.config.listen).await.map_err(|e| {
            Error::transport(format!("Failed to bind {}: {}", self.config.listen, e))
        })?;
        Ok(self.run_with_listener(listener, service, shutdown).await)
    }

    /// Serve on an already bound listener.
    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
        service: Arc<dyn ScepService>,
        shutdown: CancellationToken,
    ) -> Vec<(TaskKind, TaskOutcome)> {
        self.run_with_signal(listener, service, shutdown, termination_signal()).await
    }

    /// Serve on `listener`, treating completion of `signal` as a termination signal.
    pub async fn run_with_signal<F>(
        &self,
        listener: TcpListener,
        service: Arc<dyn ScepService>,
        shutdown: CancellationToken,
        signal: F,
    ) -> Vec<(TaskKind, TaskOutcome)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(address) = listener.local_addr() {
            info!(address = %address, "Starting SCEP server");
        }

        let stop = shutdown.child_token();
        let (handoff_tx, handoff_rx) = oneshot::channel();
        let router = http::router(service);

        let mut tasks = JoinSet::new();
        tasks.spawn(accept_loop(listener, router, stop.clone(), handoff_tx));
        tasks.spawn(shutdown_watcher(stop.clone(), handoff_rx, self.drain_timeout));
        tasks.spawn(signal_watcher(signal, stop.clone()));

        let mut outcomes = Vec::with_capacity(3);
        while let Some(joined) = tasks.join_next().await {
            let (kind, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Supervised task aborted");
                    stop.cancel();
                    continue;
                }
            };
            debug!(task = ?kind, outcome = ?outcome, "Supervised task finished");
            stop.cancel();
            outcomes.push((kind, outcome));
        }

        info!(outcomes = ?outcomes, "terminated");
        outcomes
    }
}

/// Serve connections until `stop`. Accept errors never end the loop:
/// connection errors are skipped and anything else (descriptor or memory
/// exhaustion) is retried after [`ACCEPT_ERROR_BACKOFF`].
async fn accept_loop<L: Accept>(
    mut listener: L,
    router: axum::Router,
    stop: CancellationToken,
    handoff: oneshot::Sender<Draining>,
) -> (TaskKind, TaskOutcome) {
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();
    let mut builder = http1::Builder::new();
    builder.timer(TokioTimer::new()).header_read_timeout(HEADER_READ_TIMEOUT);

    let outcome = loop {
        tokio::select! {
            _ = stop.cancelled() => break TaskOutcome::ListenerClosed,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) if is_connection_error(&e) => {
                        debug!(error = %e, "Accept failed for one connection");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed, retrying");
                        tokio::select! {
                            _ = stop.cancelled() => break TaskOutcome::ListenerClosed,
                            _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => continue,
                        }
                    }
                };
                debug!(peer = %peer, "Accepted connection");

                let service = TowerToHyperService::new(router.clone());
                let connection = graceful.watch(builder.serve_connection(TokioIo::new(stream), service));
                connections.spawn(async move {
                    if let Err(e) = connection.await {
                        debug!(peer = %peer, error = %e, "Connection closed with error");
                    }
                });
            }
        }
    };

    drop(listener);
    // The watcher is gone only if it was aborted; nothing is left to drain.
    let _ = handoff.send(Draining { graceful, connections });
    (TaskKind::AcceptLoop, outcome)
}

async fn shutdown_watcher(
    stop: CancellationToken,
    handoff: oneshot::Receiver<Draining>,
    drain_timeout: Duration,
) -> (TaskKind, TaskOutcome) {
    stop.cancelled().await;

    let Ok(Draining { graceful, mut connections }) = handoff.await else {
        return (TaskKind::ShutdownWatcher, TaskOutcome::Failed("accept loop vanished".into()));
    };

    info!(in_flight = connections.len(), "Draining connections");
    let outcome = match tokio::time::timeout(drain_timeout, graceful.shutdown()).await {
        Ok(()) => {
            while connections.join_next().await.is_some() {}
            TaskOutcome::Drained
        }
        Err(_) => {
            let remaining = connections.len();
            warn!(remaining, "Drain grace period elapsed, closing connections");
            connections.shutdown().await;
            TaskOutcome::DrainTimedOut { remaining }
        }
    };
    (TaskKind::ShutdownWatcher, outcome)
}

async fn signal_watcher<F>(signal: F, stop: CancellationToken) -> (TaskKind, TaskOutcome)
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = signal => {
            info!("Termination signal received");
            (TaskKind::SignalWatcher, TaskOutcome::Signalled)
        }
        _ = stop.cancelled() => (TaskKind::SignalWatcher, TaskOutcome::Cancelled),
    }
}

/// Completes on SIGTERM (Ctrl-C on non-Unix platforms).
pub async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;

    struct Caps;

    #[async_trait]
    impl ScepService for Caps {
        async fn get_ca_caps(&self) -> Result<Vec<u8>> {
            Ok(b"AES".to_vec())
        }

        async fn get_ca_cert(&self, _message: &str) -> Result<(Vec<u8>, usize)> {
            Err(Error::internal("no chain"))
        }

        async fn pki_operation(&self, _body: &[u8]) -> Result<Vec<u8>> {
            Err(Error::internal("no engine"))
        }
    }

    /// Fails the first accepts with the queued errors, then defers to a real listener
    struct Flaky {
        errors: VecDeque<io::Error>,
        inner: TcpListener,
    }

    impl Accept for Flaky {
        fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
            let next = self.errors.pop_front();
            async move {
                match next {
                    Some(e) => Err(e),
                    None => self.inner.accept().await,
                }
            }
        }
    }

    #[test]
    fn connection_errors_are_told_apart() {
        assert!(is_connection_error(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_connection_error(&io::Error::from(io::ErrorKind::ConnectionReset)));
        // EMFILE
        assert!(!is_connection_error(&io::Error::from_raw_os_error(24)));
    }

    #[tokio::test]
    async fn accept_errors_do_not_stop_the_listener() {
        let inner = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = inner.local_addr().expect("address");
        let listener = Flaky {
            errors: VecDeque::from([
                io::Error::from(io::ErrorKind::ConnectionAborted),
                io::Error::from_raw_os_error(24),
                io::Error::from_raw_os_error(24),
            ]),
            inner,
        };
        let stop = CancellationToken::new();
        let (handoff_tx, handoff_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            listener,
            http::router(Arc::new(Caps)),
            stop.clone(),
            handoff_tx,
        ));

        let caps = reqwest::get(format!("http://{address}/scep?operation=GetCACaps"))
            .await
            .expect("request")
            .text()
            .await
            .expect("body");
        assert_eq!(caps, "AES");

        stop.cancel();
        let (kind, outcome) = task.await.expect("join");
        assert_eq!(kind, TaskKind::AcceptLoop);
        assert_eq!(outcome, TaskOutcome::ListenerClosed);
        assert!(handoff_rx.await.is_ok());
    }

    #[tokio::test]
    async fn backoff_ends_when_stopped() {
        let inner = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let listener = Flaky { errors: VecDeque::from([io::Error::from_raw_os_error(24)]), inner };
        let stop = CancellationToken::new();
        let (handoff_tx, _handoff_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            listener,
            http::router(Arc::new(Caps)),
            stop.clone(),
            handoff_tx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();
        let (_, outcome) = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .expect("stopped during backoff")
            .expect("join");
        assert_eq!(outcome, TaskOutcome::ListenerClosed);
    }
}
