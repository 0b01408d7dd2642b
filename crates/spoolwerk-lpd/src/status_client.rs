// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Queue-state query client.
//
// RFC 1179 §5.2/§5.3: the client sends `03 Queue SP List LF` (04 for the
// long form) and the daemon answers with an opaque ASCII stream that runs
// until the connection closes.  Real printers are sloppy about that close --
// some reset the socket instead of shutting it down, which callers can opt
// to tolerate.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use spoolwerk_core::Result;

use crate::lpd_server::DEFAULT_LPR_PORT;
use crate::lpr_client::io_timeout;

/// Deadline used when the caller passes a zero timeout.
const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(2);

/// Queue queried when the caller passes an empty name.
const DEFAULT_QUEUE: &str = "raw";

/// Read the state of `queue` on the given host.
///
/// `timeout` bounds the connection attempt and each read/write (zero means
/// a 2-second default). `long` selects the long listing. With
/// `ignore_forceful_close`, a connection reset while reading counts as the
/// end of the reply instead of an error.
pub async fn query_status(
    host: &str,
    port: u16,
    queue: &str,
    long: bool,
    timeout: Duration,
    ignore_forceful_close: bool,
) -> Result<String> {
    let port = if port == 0 { DEFAULT_LPR_PORT } else { port };
    let queue = if queue.is_empty() { DEFAULT_QUEUE } else { queue };
    let timeout = if timeout.is_zero() {
        DEFAULT_STATUS_TIMEOUT
    } else {
        timeout
    };
    let code = if long { 0x04u8 } else { 0x03u8 };

    debug!(host, port, queue, long, ?timeout, "querying queue state");
    let mut stream = io_timeout(timeout, TcpStream::connect((host, port))).await?;

    let mut command = vec![code];
    command.extend_from_slice(queue.as_bytes());
    command.push(b'\n');
    io_timeout(timeout, stream.write_all(&command)).await?;

    let mut reply = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match io_timeout(timeout, stream.read(&mut buf)).await {
            Ok(0) => break,
            Ok(n) => reply.extend_from_slice(&buf[..n]),
            Err(spoolwerk_core::LpdError::Transport(e))
                if ignore_forceful_close && e.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!("ignoring forceful connection close by the server");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    let text = String::from_utf8_lossy(&reply).into_owned();
    debug!(bytes = text.len(), "queue state received");
    Ok(text)
}
