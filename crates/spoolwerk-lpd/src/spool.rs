// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spool files for received data.
//
// Each received data file lands in its own freshly created file with a
// random name and restrictive permission bits.  The writer side implements
// the RFC 1179 end-of-data convention: the sender appends a single NUL
// after the announced payload, and some senders announce no size at all and
// frame the transfer with that sentinel alone.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use spoolwerk_core::{LpdError, Result};

/// Declared sizes above this are treated as untrustworthy: the transfer is
/// framed by the NUL sentinel and connection close instead.
pub(crate) const IMPLAUSIBLE_FILESIZE: u64 = 2 * 1024 * 1024 * 1024;

/// How many random names to try before giving up on a spool directory.
const MAX_CREATE_ATTEMPTS: u32 = 10_000;

/// Create a new spool file in `dir` (the system temp dir if `dir` is empty)
/// with the given permission bits.
///
/// File names are `prefix` plus a 16-hex-char random token, opened with
/// `O_EXCL` so a colliding name is retried rather than clobbered.
pub(crate) async fn create_spool_file(
    dir: &Path,
    prefix: &str,
    mask: u32,
) -> Result<(File, PathBuf)> {
    let dir = if dir.as_os_str().is_empty() {
        std::env::temp_dir()
    } else {
        dir.to_path_buf()
    };

    for attempt in 0..MAX_CREATE_ATTEMPTS {
        let token = hex::encode(rand::random::<[u8; 8]>());
        let path = dir.join(format!("{prefix}{token}"));

        let mut options = OpenOptions::new();
        options.read(true).write(true).create_new(true);
        #[cfg(unix)]
        options.mode(mask);
        #[cfg(not(unix))]
        let _ = mask;

        match options.open(&path).await {
            Ok(file) => {
                debug!(path = %path.display(), attempt, "created spool file");
                return Ok((file, path));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(LpdError::File(format!(
                    "creating spool file in {}: {e}",
                    dir.display()
                )));
            }
        }
    }

    Err(LpdError::File(format!(
        "no free spool file name in {} after {MAX_CREATE_ATTEMPTS} attempts",
        dir.display()
    )))
}

/// An open spool file receiving a data-file transfer.
pub(crate) struct SpoolFile {
    file: File,
    declared_size: u64,
    written: u64,
}

impl SpoolFile {
    pub(crate) fn new(file: File, declared_size: u64) -> Self {
        Self {
            file,
            declared_size,
            written: 0,
        }
    }

    /// Bytes written to disk so far (the stripped sentinel is not counted).
    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    /// Append a received chunk, detecting the end of the transfer.
    ///
    /// The trailing NUL sentinel is stripped iff it is the chunk's last byte
    /// and either no size was declared or the chunk completes the declared
    /// payload.  A genuine 0x00 data byte never satisfies both conditions
    /// when the declared size is honest.  Returns `true` once the sentinel
    /// has been consumed.
    pub(crate) async fn write_chunk(&mut self, chunk: &[u8]) -> Result<bool> {
        if chunk.is_empty() {
            return Ok(false);
        }

        let mut data = chunk;
        let mut end_reached = false;

        let completes_payload =
            self.declared_size == 0 || self.written + (chunk.len() as u64 - 1) >= self.declared_size;
        if chunk[chunk.len() - 1] == 0 && completes_payload {
            data = &chunk[..chunk.len() - 1];
            end_reached = true;
        }

        self.file
            .write_all(data)
            .await
            .map_err(|e| LpdError::File(format!("writing {} bytes: {e}", data.len())))?;
        self.written += data.len() as u64;

        Ok(end_reached)
    }

    /// Flush buffered writes through to the file.
    pub(crate) async fn finish(mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| LpdError::File(format!("flushing spool file: {e}")))
    }
}
