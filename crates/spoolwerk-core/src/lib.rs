// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk -- shared types, errors and configuration used by the LPR/LPD
// daemon and client crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::DaemonConfig;
pub use error::{LpdError, Result};
pub use types::*;
