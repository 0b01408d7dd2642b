// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the spoolwerk LPR/LPD stack.

/// What the peer asked for with its first daemon command (RFC 1179 §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// 0x01 -- print any waiting jobs (recognized, not acted on).
    PrintWaitingJobs,
    /// 0x02 -- receive a printer job.
    ReceivePrintJob,
    /// 0x03 -- send queue state, short form.
    QueueStateShort,
    /// 0x04 -- send queue state, long form.
    QueueStateLong,
    /// 0x05 -- remove jobs (recognized, not acted on).
    RemoveJobs,
    /// Anything else, or no command received at all.
    Unknown,
}

impl Default for ConnectionType {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Lifecycle states of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Waiting for a daemon command (RFC 1179 §5).
    AwaitDaemonCommand,
    /// Waiting for a job sub-command (RFC 1179 §6).
    AwaitJobSubCommand,
    /// Request processed, connection closed cleanly.
    End,
    /// Request failed, connection closed.
    Error,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::AwaitDaemonCommand
    }
}

impl ConnectionStatus {
    /// Whether the connection has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Error)
    }
}

/// Callback producing the queue-state text returned for the 0x03/0x04
/// daemon commands. Arguments are the queue name, the (possibly empty)
/// user/job filter list, and whether the long form was requested. The
/// returned text is written to the peer verbatim.
pub type QueueStateFn = dyn Fn(&str, &str, bool) -> String + Send + Sync;

/// Callback producing an external job ID for each received print job.
/// Invoked serially, in connection-arrival order; it may block.
pub type ExternalIdFn = dyn Fn() -> u64 + Send + Sync;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!ConnectionStatus::AwaitDaemonCommand.is_terminal());
        assert!(!ConnectionStatus::AwaitJobSubCommand.is_terminal());
        assert!(ConnectionStatus::End.is_terminal());
        assert!(ConnectionStatus::Error.is_terminal());
    }

    #[test]
    fn defaults() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::AwaitDaemonCommand);
        assert_eq!(ConnectionType::default(), ConnectionType::Unknown);
    }
}
