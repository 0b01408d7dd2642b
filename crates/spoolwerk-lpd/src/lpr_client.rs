// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// LPR client (RFC 1179) -- submits one print job to a remote daemon.
//
// The protocol is a strict lock-step: open the connection, announce the job
// (0x02 <queue>), send a control file with the job metadata, send the data
// file, and read a 0x00 ACK byte after every command and every payload.
// Each socket operation runs under the client's per-operation deadline.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use spoolwerk_core::{LpdError, Result};

use crate::lpd_server::DEFAULT_LPR_PORT;

/// Default maximum bytes per data-file write.
const DEFAULT_MAX_SIZE: usize = 16 * 1024;

/// Run one socket operation under a deadline.
///
/// A zero deadline fails immediately -- setting `timeout` to zero makes
/// every subsequent operation report a timeout, which is occasionally
/// useful to bail out of a half-sent job.
pub(crate) async fn io_timeout<T, F>(limit: Duration, op: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    if limit.is_zero() {
        return Err(LpdError::Timeout("deadline already expired".into()));
    }
    match tokio::time::timeout(limit, op).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(LpdError::Timeout(format!("operation exceeded {limit:?}"))),
    }
}

/// A connected LPR client, good for submitting a single print job.
///
/// For the common case use [`send`]; the step-wise API exists for embedders
/// that need to amend the control-file map or interleave the transfer
/// phases themselves.
#[derive(Debug)]
pub struct LprClient {
    stream: TcpStream,
    input_file: PathBuf,
    queue: String,
    local_hostname: String,
    /// Maximum bytes per data-file write.
    pub max_size: usize,
    /// Control-file attributes, keyed by tag byte ('H', 'N', 'P', 'p', and
    /// optionally 'J', 'C', 'T', 'I', ...). Seeded by [`connect`](Self::connect).
    pub control: BTreeMap<u8, String>,
    /// Deadline applied to each socket read and write.
    pub timeout: Duration,
    job_started: bool,
}

impl LprClient {
    /// Resolve `host`, dial the daemon (port 0 means 515), and seed the
    /// control-file map.
    ///
    /// `user` defaults to the current OS user (`$USER`) when empty; the
    /// 'H' and 'p' entries use the local hostname.
    pub async fn connect(
        host: &str,
        file_path: impl Into<PathBuf>,
        port: u16,
        queue: &str,
        user: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let input_file: PathBuf = file_path.into();
        if input_file.as_os_str().is_empty() {
            return Err(LpdError::Config("no input file name given".into()));
        }

        let port = if port == 0 { DEFAULT_LPR_PORT } else { port };

        let local_hostname = local_hostname();
        let user = if user.is_empty() {
            std::env::var("USER")
                .map_err(|_| LpdError::Config("can't resolve the local user name".into()))?
        } else {
            user.to_owned()
        };
        let source_name = input_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut control = BTreeMap::new();
        control.insert(b'H', local_hostname.clone());
        control.insert(b'N', source_name);
        control.insert(b'P', user);
        control.insert(b'p', format!("dfA000{local_hostname}"));

        let mut addrs = tokio::net::lookup_host((host, port)).await?;
        let addr = addrs
            .next()
            .ok_or_else(|| LpdError::Config(format!("no addresses found for host {host:?}")))?;

        debug!(host, %addr, "connecting to LPR daemon");
        let stream = io_timeout(timeout, TcpStream::connect(addr)).await?;

        Ok(Self {
            stream,
            input_file,
            queue: queue.to_owned(),
            local_hostname,
            max_size: DEFAULT_MAX_SIZE,
            control,
            timeout,
            job_started: false,
        })
    }

    /// Announce the print job (`0x02 <queue> LF`) if not yet announced.
    ///
    /// Both transfer phases call this, so a control file and a data file
    /// may be sent in either order.
    async fn start_print_job(&mut self) -> Result<()> {
        if self.job_started {
            return Ok(());
        }

        debug!(queue = %self.queue, "sending receive-job command");
        let command = format!("\x02{}\n", self.queue);
        io_timeout(self.timeout, self.stream.write_all(command.as_bytes())).await?;
        self.read_ack().await?;

        self.job_started = true;
        Ok(())
    }

    /// Send the control file built from the attribute map.
    pub async fn send_configuration(&mut self) -> Result<()> {
        self.start_print_job().await?;

        let mut payload = Vec::new();
        for (tag, value) in &self.control {
            payload.push(*tag);
            payload.extend_from_slice(value.as_bytes());
            payload.push(b'\n');
        }
        if payload.is_empty() {
            return Err(LpdError::Config("control-file attribute map is empty".into()));
        }

        let header = format!("\x02{} cfA000{}\n", payload.len(), self.local_hostname);
        debug!(bytes = payload.len(), "sending control file");
        io_timeout(self.timeout, self.stream.write_all(header.as_bytes())).await?;
        self.read_ack().await?;

        // The payload itself is closed by a single 0x00 byte.
        payload.push(0);
        io_timeout(self.timeout, self.stream.write_all(&payload)).await?;
        self.read_ack().await?;

        Ok(())
    }

    /// Stream the input file to the daemon as the job's data file.
    pub async fn send_file(&mut self) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.input_file).await.map_err(|e| {
            LpdError::File(format!("can't stat {}: {e}", self.input_file.display()))
        })?;
        let size = metadata.len();
        if size == 0 {
            return Err(LpdError::File(format!(
                "refusing to send empty file {}",
                self.input_file.display()
            )));
        }

        self.start_print_job().await?;

        let header = format!("\x03{size} dfA000{}\n", self.local_hostname);
        debug!(bytes = size, "sending data file");
        io_timeout(self.timeout, self.stream.write_all(header.as_bytes())).await?;
        self.read_ack().await?;

        let mut file = tokio::fs::File::open(&self.input_file).await.map_err(|e| {
            LpdError::File(format!("can't open {}: {e}", self.input_file.display()))
        })?;

        let mut buf = vec![0u8; self.max_size];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| LpdError::File(format!("reading {}: {e}", self.input_file.display())))?;
            if n == 0 {
                break;
            }
            io_timeout(self.timeout, self.stream.write_all(&buf[..n])).await?;
        }

        // The sender's half of the final ACK: one 0x00 after the payload.
        io_timeout(self.timeout, self.stream.write_all(&[0])).await?;
        self.read_ack().await?;

        info!(file = %self.input_file.display(), bytes = size, "data file sent");
        Ok(())
    }

    /// Read and validate one ACK byte. 0x00 is success; anything else is a
    /// peer-reported error, and EOF here means the peer gave up on us.
    async fn read_ack(&mut self) -> Result<()> {
        let byte = io_timeout(self.timeout, self.stream.read_u8()).await?;
        if byte != 0 {
            return Err(LpdError::PeerReported(byte));
        }
        Ok(())
    }

    /// Close the connection. Safe to call after a failed transfer.
    pub async fn close(mut self) -> Result<()> {
        let _ = self.stream.shutdown().await;
        Ok(())
    }
}

/// Submit one file as a complete print job: connect, send the control file,
/// send the data file, close.
pub async fn send(
    host: &str,
    file_path: impl Into<PathBuf>,
    port: u16,
    queue: &str,
    user: &str,
    timeout: Duration,
) -> Result<()> {
    let mut client = LprClient::connect(host, file_path, port, queue, user, timeout).await?;
    client.send_configuration().await?;
    client.send_file().await?;
    client.close().await
}

/// The machine's hostname via gethostname(2); sent on the wire in the 'H'
/// and 'p' control-file entries.
fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_seeds_the_control_map() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = LprClient::connect(
            "127.0.0.1",
            "/tmp/report.txt",
            port,
            "raw",
            "TestUser",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        assert_eq!(client.control.get(&b'N').map(String::as_str), Some("report.txt"));
        assert_eq!(client.control.get(&b'P').map(String::as_str), Some("TestUser"));
        assert_eq!(client.control.get(&b'H'), Some(&hostname));
        assert_eq!(client.control.get(&b'p'), Some(&format!("dfA000{hostname}")));
        assert_eq!(client.max_size, 16 * 1024);
    }

    #[tokio::test]
    async fn empty_file_path_is_rejected() {
        let err = LprClient::connect("127.0.0.1", "", 9, "raw", "u", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LpdError::Config(_)));
    }

    #[tokio::test]
    async fn zero_deadline_reports_a_timeout() {
        let err = io_timeout(Duration::ZERO, std::future::pending::<std::io::Result<()>>())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn elapsed_deadline_reports_a_timeout() {
        let err = io_timeout(
            Duration::from_millis(5),
            std::future::pending::<std::io::Result<()>>(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }
}
