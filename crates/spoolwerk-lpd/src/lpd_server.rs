// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The LPD server: listener, per-connection task management, and the
// external-ID sequencer.
//
// # Lifecycle
//
// `start` binds the listener and spawns the accept loop; every accepted
// socket gets its own `ConnectionDriver` task.  `close` stops accepting new
// connections and closes the listener but deliberately does NOT cancel
// connections that are already established -- a peer may still be
// transmitting a legitimate file, and cancelling would leave a truncated
// spool file behind.  The finished-connections stream ends once the last
// in-flight connection has drained.
//
// # External-ID ordering
//
// Embedders can install a callback that assigns an ID to every received
// print job.  The contract is strict: IDs are assigned in connection-accept
// order (not completion order), and the callback is never invoked
// concurrently with itself.  Both guarantees come from a single sequencer
// task that consumes an `arrivals` queue fed by the accept loop *before*
// each connection task is spawned.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use spoolwerk_core::{ConnectionType, DaemonConfig, ExternalIdFn, LpdError, QueueStateFn, Result};

use crate::connection::{ConnectionDriver, LpdConnection};
use crate::decode::FallbackDecoder;

/// IANA-assigned port for the LPR/LPD protocol.
pub const DEFAULT_LPR_PORT: u16 = 515;

/// Capacity of the finished-connections and arrivals channels.
const CHANNEL_CAPACITY: usize = 100;

/// Configuration snapshot shared with every connection task.
pub(crate) struct ServerShared {
    pub(crate) decoder: FallbackDecoder,
    pub(crate) file_mask: u32,
    pub(crate) spool_dir: PathBuf,
    pub(crate) trace: bool,
    pub(crate) queue_state: Option<Arc<QueueStateFn>>,
}

/// Handshake queued per accepted connection, in accept order.
struct Arrival {
    type_rx: oneshot::Receiver<ConnectionType>,
    id_tx: oneshot::Sender<u64>,
}

/// An embeddable LPR/LPD print server.
///
/// Accepts RFC 1179 connections, receives jobs into spool files, and hands
/// each finished connection to the embedder through a bounded stream:
///
/// ```no_run
/// # async fn demo() -> spoolwerk_core::Result<()> {
/// use spoolwerk_core::DaemonConfig;
/// use spoolwerk_lpd::LpdServer;
///
/// let mut server = LpdServer::new(DaemonConfig { port: 5515, ..Default::default() });
/// server.start().await?;
///
/// while let Some(conn) = server.finished_connections().recv().await {
///     println!("job from {:?} spooled at {:?}", conn.user_identification, conn.save_name);
/// }
/// # Ok(())
/// # }
/// ```
pub struct LpdServer {
    config: DaemonConfig,
    queue_state: Option<Arc<QueueStateFn>>,
    external_id: Option<Arc<ExternalIdFn>>,
    shutdown: Arc<Notify>,
    finished_tx: Option<mpsc::Sender<LpdConnection>>,
    finished_rx: mpsc::Receiver<LpdConnection>,
}

impl LpdServer {
    /// Create a server with the given configuration. Nothing is bound until
    /// [`start`](Self::start) is called.
    pub fn new(config: DaemonConfig) -> Self {
        let (finished_tx, finished_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            config,
            queue_state: None,
            external_id: None,
            shutdown: Arc::new(Notify::new()),
            finished_tx: Some(finished_tx),
            finished_rx,
        }
    }

    /// Permission bits for created spool files. Takes effect on `start`.
    pub fn set_file_mask(&mut self, mask: u32) {
        self.config.file_mask = mask;
    }

    /// Directory for received data files (empty = system temp dir).
    /// Takes effect on `start`.
    pub fn set_spool_dir(&mut self, dir: impl Into<PathBuf>) {
        self.config.spool_dir = dir.into();
    }

    /// Write a per-connection trace file into the spool dir.
    /// Takes effect on `start`.
    pub fn set_trace(&mut self, trace: bool) {
        self.config.trace = trace;
    }

    /// Fallback encoding (IANA label) for non-UTF-8 metadata values.
    /// Validated immediately; takes effect on `start`.
    pub fn set_fallback_encoding(&mut self, label: &str) -> Result<()> {
        FallbackDecoder::for_label(label)?;
        self.config.fallback_encoding = label.to_owned();
        Ok(())
    }

    /// Install the queue-state callback answering the 0x03/0x04 commands.
    /// Without one, every queue-state request is answered with "Idle\n".
    /// Takes effect on `start`; may be called from concurrent connections.
    pub fn set_queue_state_callback<F>(&mut self, callback: F)
    where
        F: Fn(&str, &str, bool) -> String + Send + Sync + 'static,
    {
        self.queue_state = Some(Arc::new(callback));
    }

    /// Install the external-ID callback invoked once per received print
    /// job, serially and in connection-accept order. It may block.
    /// Takes effect on `start`.
    pub fn set_external_id_callback<F>(&mut self, callback: F)
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.external_id = Some(Arc::new(callback));
    }

    /// Bind the listener and launch the accept loop and the ID sequencer.
    ///
    /// A configured port of 0 means the LPR default (515); an empty bind
    /// address means all interfaces.
    ///
    /// # Errors
    ///
    /// Fails if the server was already started, the fallback encoding label
    /// is unknown, or the address cannot be bound.
    pub async fn start(&mut self) -> Result<()> {
        let finished_tx = self
            .finished_tx
            .take()
            .ok_or_else(|| LpdError::Config("server already started".into()))?;

        let decoder = FallbackDecoder::for_label(&self.config.fallback_encoding)?;

        let port = if self.config.port == 0 {
            DEFAULT_LPR_PORT
        } else {
            self.config.port
        };
        let host = if self.config.bind_address.is_empty() {
            "0.0.0.0"
        } else {
            self.config.bind_address.as_str()
        };
        let bind_addr = format!("{host}:{port}");

        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| LpdError::Config(format!("can't listen on {bind_addr}: {e}")))?;
        info!(addr = %bind_addr, "LPD server listening");

        let shared = Arc::new(ServerShared {
            decoder,
            file_mask: self.config.file_mask,
            spool_dir: self.config.spool_dir.clone(),
            trace: self.config.trace,
            queue_state: self.queue_state.clone(),
        });

        let (arrivals_tx, arrivals_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run_id_sequencer(arrivals_rx, self.external_id.clone()));

        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(accept_loop(
            listener,
            shutdown,
            shared,
            arrivals_tx,
            finished_tx,
        ));

        Ok(())
    }

    /// Stop accepting new connections and close the listener.
    ///
    /// Returns immediately; the accept loop winds down in the background.
    /// Established connections are left alone and drain naturally; once the
    /// last one terminates, [`finished_connections`](Self::finished_connections)
    /// yields `None`.
    pub fn close(&self) {
        debug!("close requested, stopping accept loop");
        self.shutdown.notify_one();
    }

    /// The consumer end of the finished-connections stream.
    ///
    /// Every accepted socket produces exactly one record here, with status
    /// `End` or `Error`, its external ID already resolved. The stream ends
    /// after [`close`](Self::close) once all in-flight connections have
    /// terminated.
    pub fn finished_connections(&mut self) -> &mut mpsc::Receiver<LpdConnection> {
        &mut self.finished_rx
    }
}

/// Accept connections until shut down, then drain the in-flight tasks.
async fn accept_loop(
    listener: TcpListener,
    shutdown: Arc<Notify>,
    shared: Arc<ServerShared>,
    arrivals_tx: mpsc::Sender<Arrival>,
    finished_tx: mpsc::Sender<LpdConnection>,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("accept loop received shutdown signal");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        info!(peer = %peer_addr, "accepted LPR connection");

                        let (type_tx, type_rx) = oneshot::channel();
                        let (id_tx, id_rx) = oneshot::channel();

                        // The arrival must be queued before the connection
                        // task exists: the sequencer hands out external IDs
                        // in accept order.
                        if arrivals_tx.send(Arrival { type_rx, id_tx }).await.is_err() {
                            error!(peer = %peer_addr, "ID sequencer is gone, dropping connection");
                            continue;
                        }

                        let driver = ConnectionDriver::new(
                            stream,
                            peer_addr,
                            Arc::clone(&shared),
                            type_tx,
                            id_rx,
                            finished_tx.clone(),
                        );
                        tasks.spawn(driver.run());
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                }
            }

            // Reap completed connection tasks as we go.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    // Refuse new connections immediately, but let running transfers finish.
    drop(listener);
    debug!(in_flight = tasks.len(), "waiting for running connections to finish");
    while tasks.join_next().await.is_some() {}
    debug!("all connections finished");

    // Returning drops the channel senders: the finished stream ends and the
    // sequencer stops.
}

/// Assign external IDs strictly in accept order.
///
/// For each arrival the sequencer waits for the connection's type, skips
/// everything that is not a print job (the connection then reads ID 0), and
/// otherwise invokes the embedder callback on a blocking thread -- the
/// callback may sleep, and while it does, later arrivals simply wait.
async fn run_id_sequencer(
    mut arrivals: mpsc::Receiver<Arrival>,
    callback: Option<Arc<ExternalIdFn>>,
) {
    while let Some(arrival) = arrivals.recv().await {
        let connection_type = arrival.type_rx.await.unwrap_or(ConnectionType::Unknown);
        if connection_type != ConnectionType::ReceivePrintJob {
            continue;
        }

        let id = match &callback {
            Some(cb) => {
                let cb = Arc::clone(cb);
                match tokio::task::spawn_blocking(move || cb()).await {
                    Ok(id) => id,
                    Err(e) => {
                        error!(error = %e, "external-ID callback panicked, assigning 0");
                        0
                    }
                }
            }
            None => 0,
        };

        debug!(id, "external ID assigned");
        let _ = arrival.id_tx.send(id);
    }

    debug!("ID sequencer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starting_twice_is_an_error() {
        let mut server = LpdServer::new(DaemonConfig {
            port: 2399,
            bind_address: "127.0.0.1".into(),
            ..Default::default()
        });

        server.start().await.unwrap();
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, LpdError::Config(_)));

        server.close();
    }

    #[tokio::test]
    async fn unknown_fallback_encoding_is_rejected_eagerly() {
        let mut server = LpdServer::new(DaemonConfig::default());
        assert!(server.set_fallback_encoding("no-such-charset").is_err());
        assert!(server.set_fallback_encoding("windows-1251").is_ok());
    }

    #[tokio::test]
    async fn close_before_start_is_harmless() {
        let server = LpdServer::new(DaemonConfig::default());
        server.close();
    }
}
