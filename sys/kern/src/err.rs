// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Syscall implementations spend a lot of time validating what a process
//! handed them. Rather than recording errors inline, they return a `Result`
//! and let the dispatcher decide what the process gets to see.

use abi::{FaultInfo, SysError, UsageError};

use crate::task::NextTask;

/// An error committed by user code when interacting with a syscall.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UserError {
    /// A recoverable error. The code is returned to the process in `x0`.
    /// This may still cause a context switch, as indicated by the
    /// `NextTask`.
    Recoverable(SysError, NextTask),
    /// An unrecoverable error. These are turned into a fault against the
    /// process, which is killed and its slot reclaimed.
    Unrecoverable(FaultInfo),
}

impl UserError {
    /// Shorthand for the common case of an error that doesn't switch
    /// processes.
    pub const fn code(e: SysError) -> Self {
        Self::Recoverable(e, NextTask::Same)
    }
}

impl From<SysError> for UserError {
    fn from(e: SysError) -> Self {
        Self::code(e)
    }
}

impl From<FaultInfo> for UserError {
    fn from(f: FaultInfo) -> Self {
        Self::Unrecoverable(f)
    }
}

/// Convenience conversion from `UsageError` (by way of `FaultInfo`).
impl From<UsageError> for UserError {
    fn from(f: UsageError) -> Self {
        Self::Unrecoverable(f.into())
    }
}
