// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-connection protocol state machine.
//
// Each accepted socket is driven by exactly one task through
// AwaitDaemonCommand -> AwaitJobSubCommand -> End/Error.  Control- and
// data-file reception happen inline within a sub-command, so there are no
// dedicated transfer states.  When the connection reaches a terminal state
// the driver resolves the external job ID and publishes the immutable
// record on the daemon's finished-connections stream.
//
// # Acknowledgement ordering
//
// The daemon ACKs (one 0x00 byte) after the receive-job command, after each
// file-transfer sub-command, and again after each fully received payload.
// Peers are strict about this ordering; an ACK in the wrong place stalls
// real-world LPR clients.
//
// # End-of-stream classification
//
// A peer that closes after transferring both files (or before starting a
// job at all) has behaved correctly: the record ends as `End`.  A close
// with only one of the two files transferred is a failed job: `Error`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use spoolwerk_core::{ConnectionStatus, ConnectionType, LpdError, Result};

use crate::codec;
use crate::control;
use crate::lpd_server::ServerShared;
use crate::spool::{self, SpoolFile, IMPLAUSIBLE_FILESIZE};

/// Default size of the per-connection read buffer.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// The published result of one accepted connection.
///
/// Exactly one record per accepted socket appears on the daemon's
/// finished-connections stream, with `status` either `End` or `Error`, and
/// it is never mutated after publication.  All metadata fields hold decoded
/// UTF-8 (non-UTF-8 input goes through the configured fallback encoding).
#[derive(Debug, Default)]
pub struct LpdConnection {
    /// Terminal state of the connection (`End` or `Error` once published).
    pub status: ConnectionStatus,
    /// What the peer asked for; set once, on the first daemon command.
    pub connection_type: ConnectionType,
    /// Remote address of the peer.
    pub peer_addr: Option<SocketAddr>,

    /// Printer queue name from the receive-job command.
    pub prq_name: Option<String>,
    /// 'H' -- host name of the submitting machine.
    pub hostname: Option<String>,
    /// 'N' -- name of the source file.
    pub filename: Option<String>,
    /// 'P' -- user identification.
    pub user_identification: Option<String>,
    /// 'J' -- job name for the banner page.
    pub job_name: Option<String>,
    /// 'C' -- class for the banner page.
    pub class_name: Option<String>,
    /// 'T' -- title for pr.
    pub title: Option<String>,
    /// 'p' -- print with 'pr' format; kept raw, not fallback-decoded.
    pub print_file_with_pr: Option<String>,
    /// 'I' -- indent count.
    pub indent_count: i64,

    /// Declared size of the data file (0 = unknown, framed by sentinel).
    pub filesize: u64,
    /// Bytes actually written to the spool file.
    pub processed_bytes: u64,
    /// Path of the spool file; present iff a data file was at least opened.
    pub save_name: Option<PathBuf>,

    /// Whether a complete control file was received.
    pub control_file_received: bool,
    /// Whether a complete data file was received.
    pub data_file_received: bool,

    /// Embedder-assigned job ID; 0 for non-print-job connections or when no
    /// callback is installed.
    pub external_id: u64,
}

/// Drives one accepted socket to completion.
pub(crate) struct ConnectionDriver {
    stream: TcpStream,
    buf: Vec<u8>,
    record: LpdConnection,
    shared: Arc<ServerShared>,
    type_tx: Option<oneshot::Sender<ConnectionType>>,
    id_rx: oneshot::Receiver<u64>,
    finished_tx: mpsc::Sender<LpdConnection>,
    trace: Option<TraceFile>,
}

impl ConnectionDriver {
    pub(crate) fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        shared: Arc<ServerShared>,
        type_tx: oneshot::Sender<ConnectionType>,
        id_rx: oneshot::Receiver<u64>,
        finished_tx: mpsc::Sender<LpdConnection>,
    ) -> Self {
        let record = LpdConnection {
            peer_addr: Some(peer_addr),
            ..LpdConnection::default()
        };

        Self {
            stream,
            buf: vec![0u8; DEFAULT_BUFFER_SIZE],
            record,
            shared,
            type_tx: Some(type_tx),
            id_rx,
            finished_tx,
            trace: None,
        }
    }

    /// Run the connection to completion and publish its record.
    pub(crate) async fn run(mut self) {
        if self.shared.trace {
            self.trace = TraceFile::create(&self.shared.spool_dir).await;
        }

        self.process().await;

        // Close the transport and trace file before the record leaves this
        // task; the published record must carry no open resources.
        let Self {
            stream,
            mut record,
            type_tx,
            id_rx,
            finished_tx,
            trace,
            ..
        } = self;
        drop(stream);
        drop(trace);

        // Unblock the ID sequencer if no daemon command ever arrived, then
        // wait for our slot. A dropped sender means "not a print job".
        drop(type_tx);
        record.external_id = id_rx.await.unwrap_or(0);

        if finished_tx.send(record).await.is_err() {
            warn!("finished-connections stream closed before publication");
        }
    }

    /// The command loop: read one LF-terminated command, dispatch on the
    /// current state, repeat until a terminal state is reached.
    async fn process(&mut self) {
        while !self.record.status.is_terminal() {
            let outcome = codec::read_command(&mut self.stream, &mut self.buf).await;
            if let Some(trace) = self.trace.as_mut() {
                trace.log_read(&outcome).await;
            }

            match outcome {
                Err(e) => self.fail(e),

                // EOF: graceful iff the peer either completed a job or never
                // started one.
                Ok(None) => {
                    if self.record.control_file_received == self.record.data_file_received {
                        debug!("peer closed the connection, request complete");
                        self.record.status = ConnectionStatus::End;
                    } else {
                        self.fail(LpdError::Protocol(format!(
                            "peer closed mid-job (control file received: {}, data file received: {})",
                            self.record.control_file_received, self.record.data_file_received,
                        )));
                    }
                }

                Ok(Some(command)) if command.is_empty() => {
                    debug!("empty command, ending connection");
                    self.record.status = ConnectionStatus::End;
                }

                Ok(Some(command)) => {
                    let result = match self.record.status {
                        ConnectionStatus::AwaitDaemonCommand => {
                            self.handle_daemon_command(&command).await
                        }
                        ConnectionStatus::AwaitJobSubCommand => {
                            self.handle_job_sub_command(&command).await
                        }
                        ConnectionStatus::End | ConnectionStatus::Error => Ok(()),
                    };
                    if let Err(e) = result {
                        self.fail(e);
                    }
                }
            }
        }
    }

    fn fail(&mut self, err: LpdError) {
        error!(peer = ?self.record.peer_addr, error = %err, "connection failed");
        self.record.status = ConnectionStatus::Error;
    }

    /// Record the connection type (first daemon command only) and hand it to
    /// the ID sequencer.
    fn publish_type(&mut self, connection_type: ConnectionType) {
        if let Some(tx) = self.type_tx.take() {
            self.record.connection_type = connection_type;
            let _ = tx.send(connection_type);
        }
    }

    /// Dispatch a daemon command (RFC 1179 §5).
    async fn handle_daemon_command(&mut self, command: &[u8]) -> Result<()> {
        match command[0] {
            /* 01 - Print any waiting jobs (recognized, not acted on) */
            0x01 => {
                self.publish_type(ConnectionType::PrintWaitingJobs);
            }

            /* 02 - Receive a printer job */
            0x02 => {
                self.publish_type(ConnectionType::ReceivePrintJob);
                self.record.prq_name = Some(self.shared.decoder.decode(&command[1..]));
                debug!(queue = ?self.record.prq_name, "receive-job command");
                self.record.status = ConnectionStatus::AwaitJobSubCommand;
                codec::send_ack(&mut self.stream).await?;
            }

            /* 03 - Send queue state (short): | 03 | Queue | SP | List | LF | */
            0x03 => {
                self.publish_type(ConnectionType::QueueStateShort);
                self.reply_queue_state(&command[1..], false).await?;
            }

            /* 04 - Send queue state (long) */
            0x04 => {
                self.publish_type(ConnectionType::QueueStateLong);
                self.reply_queue_state(&command[1..], true).await?;
            }

            /* 05 - Remove jobs (recognized, not acted on) */
            0x05 => {
                self.publish_type(ConnectionType::RemoveJobs);
            }

            other => {
                self.publish_type(ConnectionType::Unknown);
                return Err(LpdError::Protocol(format!(
                    "unknown daemon command {:02x}: {:?}",
                    other,
                    String::from_utf8_lossy(command)
                )));
            }
        }

        Ok(())
    }

    /// Dispatch a job sub-command (RFC 1179 §6).
    async fn handle_job_sub_command(&mut self, command: &[u8]) -> Result<()> {
        match command[0] {
            /* 01 - Abort job */
            0x01 => Err(LpdError::Protocol("job aborted by peer".into())),

            /* 02 - Receive control file */
            0x02 => {
                let (size, name) = transfer_operands(command)?;
                codec::send_ack(&mut self.stream).await?;
                self.receive_control_file(size, &name).await?;
                codec::send_ack(&mut self.stream).await?;
                self.record.control_file_received = true;
                Ok(())
            }

            /* 03 - Receive data file */
            0x03 => {
                let (size, name) = transfer_operands(command)?;
                codec::send_ack(&mut self.stream).await?;
                self.receive_data_file(size, &name).await?;
                codec::send_ack(&mut self.stream).await?;
                self.record.data_file_received = true;
                Ok(())
            }

            other => Err(LpdError::Protocol(format!(
                "unknown job sub-command {:02x}: {:?}",
                other,
                String::from_utf8_lossy(command)
            ))),
        }
    }

    /// Read a control file of exactly `size` payload bytes plus the
    /// terminating NUL, and fold its lines into the record.
    async fn receive_control_file(&mut self, size: u64, name: &str) -> Result<()> {
        debug!(file = name, bytes = size, "receiving control file");
        if self.record.control_file_received {
            warn!(file = name, "peer sent an additional control file on the same connection");
        }

        // +1 for the sender's terminating 0x00.
        let mut payload = vec![0u8; size as usize + 1];
        self.stream.read_exact(&mut payload).await?;

        let last = payload[payload.len() - 1];
        if last != 0 {
            return Err(LpdError::Protocol(format!(
                "control file does not end with 0x00 but {last:02x}"
            )));
        }

        control::parse_control_file(
            &mut self.record,
            &payload[..payload.len() - 1],
            &self.shared.decoder,
        )
    }

    /// Stream a data file into a fresh spool file.
    ///
    /// The declared size is advisory: a size of 0 (or an implausibly large
    /// one) means the transfer is framed only by the NUL sentinel and the
    /// peer closing the connection.
    async fn receive_data_file(&mut self, size: u64, name: &str) -> Result<()> {
        debug!(file = name, bytes = size, "receiving data file");
        if self.record.data_file_received {
            warn!(file = name, "peer sent an additional data file on the same connection");
        }

        self.record.filesize = size;
        self.record.processed_bytes = 0;

        let (file, path) =
            spool::create_spool_file(&self.shared.spool_dir, "", self.shared.file_mask).await?;
        debug!(path = %path.display(), "new data file");
        self.record.save_name = Some(path);

        let mut out = SpoolFile::new(file, size);

        loop {
            let n = self.stream.read(&mut self.buf).await?;
            if n == 0 {
                if size == 0 || size > IMPLAUSIBLE_FILESIZE {
                    debug!(
                        declared = size,
                        received = out.written(),
                        "peer closed, treating sentinel-framed transfer as complete"
                    );
                    break;
                }
                self.record.processed_bytes = out.written();
                return Err(LpdError::Protocol(format!(
                    "peer closed during data file after {} of {} bytes",
                    out.written(),
                    size
                )));
            }

            let end_reached = out.write_chunk(&self.buf[..n]).await?;
            self.record.processed_bytes = out.written();
            if end_reached {
                break;
            }
        }

        self.record.processed_bytes = out.written();
        out.finish().await
    }

    /// Answer a queue-state request and end the connection.
    async fn reply_queue_state(&mut self, rest: &[u8], long: bool) -> Result<()> {
        let fields = codec::operands(rest, 2);
        let queue = fields
            .first()
            .map(|f| self.shared.decoder.decode(f))
            .unwrap_or_default();
        let list = fields
            .get(1)
            .map(|f| self.shared.decoder.decode(f))
            .unwrap_or_default();

        let reply = match &self.shared.queue_state {
            Some(callback) => callback(&queue, &list, long),
            None => "Idle\n".to_owned(),
        };

        debug!(queue = %queue, list = %list, long, bytes = reply.len(), "queue state reply");
        self.stream.write_all(reply.as_bytes()).await?;

        self.record.status = ConnectionStatus::End;
        Ok(())
    }
}

/// Parse the `<byteCount> <filename>` operands of a file-transfer
/// sub-command. The file name is informational only.
fn transfer_operands(command: &[u8]) -> Result<(u64, String)> {
    let fields = codec::operands(&command[1..], 2);
    if fields.len() != 2 {
        return Err(LpdError::Protocol(format!(
            "file-transfer sub-command {:?} has {} operands, expected 2",
            String::from_utf8_lossy(command),
            fields.len()
        )));
    }

    let size = std::str::from_utf8(&fields[0])
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| {
            LpdError::Protocol(format!(
                "invalid byte count {:?}",
                String::from_utf8_lossy(&fields[0])
            ))
        })?;

    Ok((size, String::from_utf8_lossy(&fields[1]).into_owned()))
}

/// Optional per-connection trace of every command-channel read.
struct TraceFile {
    file: File,
}

impl TraceFile {
    async fn create(dir: &Path) -> Option<Self> {
        match spool::create_spool_file(dir, "lpd_trace_", 0o600).await {
            Ok((mut file, path)) => {
                debug!(path = %path.display(), "created trace file");
                let header = format!("LPD connection trace {}\n", Utc::now());
                if let Err(e) = file.write_all(header.as_bytes()).await {
                    warn!(error = %e, "failed to write trace header");
                }
                Some(Self { file })
            }
            Err(e) => {
                warn!(error = %e, "failed to create trace file");
                None
            }
        }
    }

    async fn log_read(&mut self, outcome: &Result<Option<Vec<u8>>>) {
        let mut entry: Vec<u8> = Vec::new();
        match outcome {
            Ok(Some(command)) => {
                entry.extend_from_slice(format!("received message {}:\n-----\n", command.len()).as_bytes());
                entry.extend_from_slice(command);
                entry.extend_from_slice(b"\n-----\n");
            }
            Ok(None) => entry.extend_from_slice(b"end of stream\n"),
            Err(e) => entry.extend_from_slice(format!("error: {e}\n").as_bytes()),
        }

        if let Err(e) = self.file.write_all(&entry).await {
            warn!(error = %e, "failed to write trace entry");
            return;
        }
        if let Err(e) = self.file.flush().await {
            warn!(error = %e, "failed to flush trace file");
        }
    }
}
