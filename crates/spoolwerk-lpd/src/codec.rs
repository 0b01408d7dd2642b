// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Wire codec for the LPR/LPD command channel.
//
// Every command on the wire is a run of bytes terminated by LF (0x0A); the
// receiving side answers most of them with a single 0x00 ACK byte.  Command
// operands are separated by ASCII whitespace.  Nothing here interprets
// command semantics -- that is the connection state machine's job.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use spoolwerk_core::{LpdError, Result};

/// ASCII whitespace bytes that separate command operands (RFC 1179 §3).
fn is_operand_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | 0x0b | 0x0c)
}

/// Read one LF-terminated command from `stream` into `buf`.
///
/// Keeps reading until an LF arrives, up to `buf.len()` bytes, and returns
/// the bytes *before* the LF.  Returns `Ok(None)` on EOF (the peer closed
/// the connection; mid-line EOF is also reported as EOF -- the caller decides
/// whether that is graceful).  Bytes after the LF within the final read are
/// discarded: the peer is malformed, but the line itself is still usable.
pub async fn read_command<R>(stream: &mut R, buf: &mut [u8]) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;

    loop {
        if filled == buf.len() {
            return Err(LpdError::Protocol(format!(
                "command exceeds the {}-byte command buffer without a terminating LF",
                buf.len()
            )));
        }

        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(None);
        }

        let end = filled + n;
        if let Some(pos) = buf[filled..end].iter().position(|&b| b == b'\n') {
            let lf = filled + pos;
            if lf != end - 1 {
                warn!(
                    discarded = end - lf - 1,
                    "garbage after LF in command, discarding trailing bytes"
                );
            }
            return Ok(Some(buf[..lf].to_vec()));
        }

        filled = end;
    }
}

/// Write the single 0x00 acknowledgement byte. A write error here is fatal
/// for the connection.
pub async fn send_ack<W>(stream: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&[0]).await?;
    Ok(())
}

/// Split `data` into at most `max` operands on ASCII whitespace.
///
/// Runs of whitespace count as a single separator and leading whitespace
/// never produces an empty first field.  Once `max - 1` operands have been
/// produced, the rest of the data becomes the final operand verbatim, with
/// internal whitespace preserved -- a control-file announcement like
/// `2 bytes cfAxxxhost` splits into exactly two operands even though the
/// file name contains a space.
///
/// Operands stay byte strings: values on this channel may be non-UTF-8.
pub fn operands(data: &[u8], max: usize) -> Vec<Vec<u8>> {
    let mut fields: Vec<Vec<u8>> = Vec::new();
    let mut i = 0;

    while i < data.len() {
        while i < data.len() && is_operand_space(data[i]) {
            i += 1;
        }
        if i == data.len() {
            break;
        }

        if fields.len() + 1 == max {
            fields.push(data[i..].to_vec());
            return fields;
        }

        let start = i;
        while i < data.len() && !is_operand_space(data[i]) {
            i += 1;
        }
        fields.push(data[start..i].to_vec());
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn strs(fields: &[Vec<u8>]) -> Vec<&str> {
        fields
            .iter()
            .map(|f| std::str::from_utf8(f).unwrap())
            .collect()
    }

    #[test]
    fn operands_simple_split() {
        let fields = operands(b"17 dfA000myhost", 2);
        assert_eq!(strs(&fields), vec!["17", "dfA000myhost"]);
    }

    #[test]
    fn operands_final_field_keeps_internal_whitespace() {
        let fields = operands(b"2 bytes cfAxxxhost", 2);
        assert_eq!(strs(&fields), vec!["2", "bytes cfAxxxhost"]);
    }

    #[test]
    fn operands_collapse_whitespace_runs() {
        let fields = operands(b"a \t b", 3);
        assert_eq!(strs(&fields), vec!["a", "b"]);
    }

    #[test]
    fn operands_leading_whitespace_is_not_a_field() {
        let fields = operands(b"  queue list", 2);
        assert_eq!(strs(&fields), vec!["queue", "list"]);
    }

    #[test]
    fn operands_empty_input() {
        assert!(operands(b"", 2).is_empty());
        assert!(operands(b" \t ", 2).is_empty());
    }

    #[test]
    fn operands_fewer_fields_than_max() {
        let fields = operands(b"rawq", 2);
        assert_eq!(strs(&fields), vec!["rawq"]);
    }

    #[tokio::test]
    async fn read_command_returns_bytes_before_lf() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(b"\x02raw\n").await.unwrap();

        let mut buf = vec![0u8; 32];
        let cmd = read_command(&mut rx, &mut buf).await.unwrap().unwrap();
        assert_eq!(cmd, b"\x02raw");
    }

    #[tokio::test]
    async fn read_command_spans_fragmented_writes() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; 32];
            read_command(&mut rx, &mut buf).await
        });

        tx.write_all(b"\x02ra").await.unwrap();
        tokio::task::yield_now().await;
        tx.write_all(b"w\n").await.unwrap();

        let cmd = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(cmd, b"\x02raw");
    }

    #[tokio::test]
    async fn read_command_discards_garbage_after_lf() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(b"\x02raw\ntrailing").await.unwrap();

        let mut buf = vec![0u8; 32];
        let cmd = read_command(&mut rx, &mut buf).await.unwrap().unwrap();
        assert_eq!(cmd, b"\x02raw");
    }

    #[tokio::test]
    async fn read_command_eof_before_any_line() {
        let (tx, mut rx) = tokio::io::duplex(64);
        drop(tx);

        let mut buf = vec![0u8; 32];
        assert!(read_command(&mut rx, &mut buf).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_command_rejects_oversized_line() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(&[b'x'; 16]).await.unwrap();

        let mut buf = vec![0u8; 16];
        let err = read_command(&mut rx, &mut buf).await.unwrap_err();
        assert!(matches!(err, LpdError::Protocol(_)));
    }

    #[tokio::test]
    async fn ack_is_a_single_zero_byte() {
        let (mut tx, mut rx) = tokio::io::duplex(8);
        send_ack(&mut tx).await.unwrap();

        let mut byte = [0xffu8; 1];
        rx.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte[0], 0);
    }
}
