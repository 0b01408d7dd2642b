// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Daemon configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the LPD server.
///
/// The queue-state and external-ID callbacks are installed on the server at
/// runtime and are deliberately not part of this (serializable) struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// TCP port to listen on (0 means the LPR default, 515).
    pub port: u16,
    /// Bind address; empty means all interfaces.
    pub bind_address: String,
    /// Directory for received data files; empty means the system temp dir.
    pub spool_dir: PathBuf,
    /// POSIX permission bits applied to created spool files.
    pub file_mask: u32,
    /// Write a per-connection trace file into the spool dir.
    pub trace: bool,
    /// IANA label of the encoding used to decode non-UTF-8 metadata.
    pub fallback_encoding: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 515,
            bind_address: String::new(),
            spool_dir: PathBuf::new(),
            file_mask: 0o600,
            trace: false,
            fallback_encoding: "windows-1252".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_rfc_and_policy() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.port, 515);
        assert!(cfg.bind_address.is_empty());
        assert!(cfg.spool_dir.as_os_str().is_empty());
        assert_eq!(cfg.file_mask, 0o600);
        assert!(!cfg.trace);
        assert_eq!(cfg.fallback_encoding, "windows-1252");
    }
}
