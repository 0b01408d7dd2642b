// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Control-file parsing (RFC 1179 §7).
//
// A control file is a NUL-terminated blob of LF-separated lines, each a
// one-byte tag followed by the value.  A handful of tags carry job metadata
// the daemon keeps; the rest announce formatting the daemon recognizes but
// does not act on.

use tracing::debug;

use spoolwerk_core::{LpdError, Result};

use crate::connection::LpdConnection;
use crate::decode::FallbackDecoder;

/// Parse a full control-file payload (without the trailing NUL) into the
/// connection's metadata fields.
///
/// Lines are separated by LF; empty lines are skipped.  Bytes after the
/// last LF are garbage -- a conforming sender terminates every line.
pub(crate) fn parse_control_file(
    conn: &mut LpdConnection,
    payload: &[u8],
    decoder: &FallbackDecoder,
) -> Result<()> {
    let mut rest = payload;

    while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
        let line = &rest[..pos];
        rest = &rest[pos + 1..];
        if line.is_empty() {
            continue;
        }
        apply_control_line(conn, line, decoder)?;
    }

    if !rest.is_empty() {
        return Err(LpdError::Protocol(format!(
            "garbage at end of control file: {:?}",
            String::from_utf8_lossy(rest)
        )));
    }

    Ok(())
}

/// Dispatch a single control-file line by its tag byte.
pub(crate) fn apply_control_line(
    conn: &mut LpdConnection,
    line: &[u8],
    decoder: &FallbackDecoder,
) -> Result<()> {
    let value = &line[1..];

    match line[0] {
        /* H - Host name */
        b'H' => {
            conn.hostname = Some(decoder.decode(value));
            debug!(hostname = ?conn.hostname, "control: hostname");
        }

        /* N - Name of source file */
        b'N' => {
            conn.filename = Some(decoder.decode(value));
            debug!(filename = ?conn.filename, "control: source file name");
        }

        /* P - User identification */
        b'P' => {
            conn.user_identification = Some(decoder.decode(value));
            debug!(user = ?conn.user_identification, "control: user identification");
        }

        /* J - Job name for banner page */
        b'J' => {
            conn.job_name = Some(decoder.decode(value));
            debug!(job = ?conn.job_name, "control: job name");
        }

        /* C - Class for banner page */
        b'C' => {
            conn.class_name = Some(decoder.decode(value));
            debug!(class = ?conn.class_name, "control: class name");
        }

        /* T - Title for pr */
        b'T' => {
            conn.title = Some(decoder.decode(value));
            debug!(title = ?conn.title, "control: title");
        }

        /* I - Indent printing */
        b'I' => {
            let text = std::str::from_utf8(value)
                .map_err(|_| LpdError::Protocol("indent count is not ASCII".into()))?;
            conn.indent_count = text.parse::<i64>().map_err(|e| {
                LpdError::Protocol(format!("invalid indent count {text:?}: {e}"))
            })?;
            debug!(indent = conn.indent_count, "control: indent count");
        }

        /* p - Print file with 'pr' format; stored raw, no fallback decoding */
        b'p' => {
            conn.print_file_with_pr = Some(String::from_utf8_lossy(value).into_owned());
            debug!(pr = ?conn.print_file_with_pr, "control: print with pr");
        }

        // Recognized formatting and bookkeeping tags the daemon ignores:
        // banner page, mail-when-printed, symlink data, unlink, width,
        // troff fonts, and the plot/print-as variants.
        b'L' | b'M' | b'S' | b'U' | b'W' | b'1'..=b'4' | b'c' | b'd' | b'f' | b'g' | b'l'
        | b'n' | b'o' | b'r' | b't' | b'v' | 0x00 => {}

        other => {
            return Err(LpdError::Protocol(format!(
                "unknown control file line {:02x} ({}): {:?}",
                other,
                other as char,
                String::from_utf8_lossy(line)
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(payload: &[u8]) -> Result<LpdConnection> {
        let mut conn = LpdConnection::default();
        parse_control_file(&mut conn, payload, &FallbackDecoder::default())?;
        Ok(conn)
    }

    #[test]
    fn stored_tags_round_trip() {
        let conn = parse(
            b"Hclient-host\nNreport.txt\nPalice\nJnightly report\nCclassA\nTReport Title\nI4\npdfA000client-host\n",
        )
        .unwrap();

        assert_eq!(conn.hostname.as_deref(), Some("client-host"));
        assert_eq!(conn.filename.as_deref(), Some("report.txt"));
        assert_eq!(conn.user_identification.as_deref(), Some("alice"));
        assert_eq!(conn.job_name.as_deref(), Some("nightly report"));
        assert_eq!(conn.class_name.as_deref(), Some("classA"));
        assert_eq!(conn.title.as_deref(), Some("Report Title"));
        assert_eq!(conn.indent_count, 4);
        assert_eq!(conn.print_file_with_pr.as_deref(), Some("dfA000client-host"));
    }

    #[test]
    fn ignored_tags_are_accepted() {
        let conn = parse(b"L\nMalice\nUdfA000host\nW80\n1R\nldfA000host\n").unwrap();
        assert!(conn.hostname.is_none());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = parse(b"Zvalue\n").unwrap_err();
        assert!(matches!(err, LpdError::Protocol(_)));
    }

    #[test]
    fn empty_lines_are_skipped() {
        let conn = parse(b"Puser1\n\n\nHhost\n").unwrap();
        assert_eq!(conn.user_identification.as_deref(), Some("user1"));
        assert_eq!(conn.hostname.as_deref(), Some("host"));
    }

    #[test]
    fn garbage_after_last_line_is_rejected() {
        let err = parse(b"Hhost\nPuser").unwrap_err();
        assert!(matches!(err, LpdError::Protocol(_)));
    }

    #[test]
    fn non_utf8_value_uses_fallback() {
        let conn = parse(b"Pr\xe4w-user\n").unwrap();
        assert_eq!(conn.user_identification.as_deref(), Some("räw-user"));
    }

    #[test]
    fn indent_count_must_be_numeric() {
        assert!(parse(b"Ifour\n").is_err());
        assert_eq!(parse(b"I12\n").unwrap().indent_count, 12);
    }
}
