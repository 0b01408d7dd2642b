// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk LPD -- a bidirectional implementation of the Line Printer Daemon
// protocol (RFC 1179): a receiving daemon that accepts print jobs, control
// files and queue-state queries over TCP, and a sending client that submits
// jobs to a remote LPR peer.
//
// The daemon is a library server in the spirit of a classic `lpd`: it
// receives jobs into spool files and hands each finished connection to the
// embedding application through a bounded stream.  What to do with a
// received job (render it, forward it, archive it) is up to the embedder.

pub mod codec;
pub mod connection;
pub mod control;
pub mod decode;
pub mod lpd_server;
pub mod lpr_client;
pub mod spool;
pub mod status_client;

pub use connection::LpdConnection;
pub use decode::FallbackDecoder;
pub use lpd_server::LpdServer;
pub use lpr_client::{send, LprClient};
pub use status_client::query_status;

pub use spoolwerk_core::{ConnectionStatus, ConnectionType, DaemonConfig, LpdError, Result};
