// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for the spoolwerk LPR/LPD stack.

use thiserror::Error;

/// Top-level error type for all LPR/LPD operations.
#[derive(Debug, Error)]
pub enum LpdError {
    /// Socket read/write failure on either side of the protocol.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed framing, unknown command bytes, bad operand counts,
    /// unparseable byte counts, or a peer that hung up mid-job.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote printer answered a command with a non-zero ACK byte.
    #[error("printer reported error ({0})")]
    PeerReported(u8),

    /// A per-operation deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The configured fallback encoding label is unknown.
    #[error("unsupported encoding: {0}")]
    Encoding(String),

    /// Spool- or input-file creation, read, or write failure.
    #[error("file error: {0}")]
    File(String),

    /// Invalid arguments or a broken local environment (no hostname,
    /// no resolvable address, missing input file, double start).
    #[error("configuration error: {0}")]
    Config(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LpdError>;
