// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and user processes.
//!
//! Everything in here is part of the binary contract across the syscall
//! boundary: syscall numbers, response codes, the process argument block, and
//! the handful of constants both sides need to agree on. Changing any of it
//! means rebuilding the kernel and every program together.

#![cfg_attr(not(test), no_std)]

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of a page, the unit of allocation and mapping.
pub const PAGE_SIZE: usize = 4096;

/// Size of the stack handed to each process (and each kernel core).
pub const STACK_SIZE: usize = 2 * PAGE_SIZE;

/// Syscall numbers at or above this value can never be registered.
pub const SYSNUM_LIMIT: u32 = 512;

/// Pipe names must be strictly shorter than this many bytes (not counting
/// the terminating NUL).
pub const SYS_PIPE_NAME_MAX: usize = 32;

/// Conventional pipe names for the standard streams.
pub const SYS_PIPE_STDIN: &str = "stdin";
pub const SYS_PIPE_STDOUT: &str = "stdout";
pub const SYS_PIPE_STDERR: &str = "stderr";

/// Address at which every process finds its argument block. See
/// [`ArgsHeader`] for the layout.
pub const SYS_ARGS_ADDRESS: usize = 0x100_0000;

/// Value returned by `SBRK` when the requested break is out of bounds.
pub const SBRK_FAILED: u64 = u64::MAX;

/// Response code for a successful syscall.
pub const SYS_OK: u64 = 0;

const_assert!(SYS_ARGS_ADDRESS % PAGE_SIZE == 0);
const_assert!(STACK_SIZE % PAGE_SIZE == 0);

/// Names a process.
///
/// Pids are handed out from a monotonically increasing counter and are never
/// reused while the kernel is up. Pid 0 is never assigned; passing it to a
/// syscall that takes a pid means "the calling process."
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct Pid(pub u32);

impl Pid {
    /// Stand-in for the caller's own pid.
    pub const CURRENT: Self = Self(0);

    /// Checks whether this is the "calling process" stand-in.
    pub const fn is_current(self) -> bool {
        self.0 == Self::CURRENT.0
    }
}

/// Scheduling priority of a process.
///
/// Numerically *higher* priorities are more important. This type does not
/// implement `Ord` so that comparisons go through `is_more_important_than`,
/// which reads unambiguously.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Priority(pub u32);

impl Priority {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(31);
    pub const DEFAULT: Self = Self(10);

    /// Checks if `self` is strictly more important than `other`.
    pub const fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }

    /// Checks whether the scheduler accepts this priority.
    pub const fn is_valid(self) -> bool {
        self.0 >= Self::MIN.0 && self.0 <= Self::MAX.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Process-local name for an open pipe, as returned by `PIPE_OPEN` and
/// `PIPE_GET`.
///
/// The value zero is the null handle, used to signal failure.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct PipeHandle(pub u64);

impl PipeHandle {
    pub const NULL: Self = Self(0);

    /// Produces the handle naming slot `slot` of a process's handle table.
    pub const fn from_slot(slot: usize) -> Self {
        Self(slot as u64 + 1)
    }

    /// Recovers the handle table slot, or `None` for the null handle.
    pub fn slot(self) -> Option<usize> {
        self.0.checked_sub(1).and_then(|s| usize::try_from(s).ok())
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Kernel-wide index of a pipe in the pipe table. This shows up in the
/// scheduling state of processes blocked on a pipe.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PipeId(pub u16);

/// Enumeration of syscall numbers.
///
/// Numbers 10 through 24 belong to the window manager and are not defined
/// here; the pipe calls start at 32.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Sysnum {
    Exit = 0,
    Print = 1,
    GetPid = 2,
    Debug = 3,
    Spawn = 4,
    Sleep = 5,
    Yield = 6,
    SchedSetPriority = 7,
    SchedGetPriority = 8,
    Sbrk = 9,
    PipeOpen = 32,
    PipeClose = 33,
    PipeGet = 34,
    PipeRead = 35,
    PipeWrite = 36,
}

impl Sysnum {
    /// Every syscall implemented by the kernel core, in numeric order.
    pub const ALL: [Self; 15] = [
        Self::Exit,
        Self::Print,
        Self::GetPid,
        Self::Debug,
        Self::Spawn,
        Self::Sleep,
        Self::Yield,
        Self::SchedSetPriority,
        Self::SchedGetPriority,
        Self::Sbrk,
        Self::PipeOpen,
        Self::PipeClose,
        Self::PipeGet,
        Self::PipeRead,
        Self::PipeWrite,
    ];
}

impl From<Sysnum> for u32 {
    fn from(s: Sysnum) -> Self {
        s as u32
    }
}

/// We're using an explicit `TryFrom` impl for `Sysnum` instead of
/// `FromPrimitive` so that the mapping is spelled out next to the enum.
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Exit),
            1 => Ok(Self::Print),
            2 => Ok(Self::GetPid),
            3 => Ok(Self::Debug),
            4 => Ok(Self::Spawn),
            5 => Ok(Self::Sleep),
            6 => Ok(Self::Yield),
            7 => Ok(Self::SchedSetPriority),
            8 => Ok(Self::SchedGetPriority),
            9 => Ok(Self::Sbrk),
            32 => Ok(Self::PipeOpen),
            33 => Ok(Self::PipeClose),
            34 => Ok(Self::PipeGet),
            35 => Ok(Self::PipeRead),
            36 => Ok(Self::PipeWrite),
            _ => Err(()),
        }
    }
}

/// Response codes returned in `x0` by syscalls that report success or
/// failure. Success is `SYS_OK` (zero) and has no variant here.
///
/// The order is fixed by the ABI; several codes are only produced by the
/// filesystem and window-manager collaborators.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromPrimitive, Serialize, Deserialize,
)]
#[repr(u32)]
pub enum SysError {
    Generic = 1,
    Internal = 2,
    UnknownSyscall = 3,
    InvalidPriority = 4,
    MsgQueueEmpty = 5,
    OutOfMem = 6,
    InvalidWindow = 7,
    InvalidFile = 8,
    InvalidDir = 9,
    InvalidPid = 10,
    InvalidPipe = 11,
    PipeFull = 12,
    PipeEmpty = 13,
    PipeClosed = 14,
}

impl SysError {
    /// Returns the value placed in `x0` for this error.
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Interprets a syscall response word. Codes this version of the ABI
    /// doesn't know are reported as `Internal`.
    pub fn check(response: u64) -> Result<(), Self> {
        if response == SYS_OK {
            Ok(())
        } else {
            Err(num_traits::FromPrimitive::from_u64(response)
                .unwrap_or(Self::Internal))
        }
    }
}

/// Scheduler parameters for a live process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum SchedState {
    /// This process could be scheduled on the CPU.
    Runnable,
    /// This process is waiting for its timer to expire.
    Sleeping,
    /// This process is blocked until the given pipe has data or hangs up.
    InPipeRead(PipeId),
    /// This process is blocked until the given pipe has room or hangs up.
    InPipeWrite(PipeId),
}

/// State of a slot in the process table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum ProcessState {
    /// Nothing lives here; `SPAWN` may claim the slot.
    Vacant,
    /// A live process.
    Healthy(SchedState),
}

impl ProcessState {
    /// Checks if a process in this state is blocked reading `pipe`.
    pub fn is_reading(&self, pipe: PipeId) -> bool {
        self == &ProcessState::Healthy(SchedState::InPipeRead(pipe))
    }

    /// Checks if a process in this state is blocked writing `pipe`.
    pub fn is_writing(&self, pipe: PipeId) -> bool {
        self == &ProcessState::Healthy(SchedState::InPipeWrite(pipe))
    }

    pub fn is_vacant(&self) -> bool {
        matches!(self, ProcessState::Vacant)
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        ProcessState::Vacant
    }
}

impl From<SchedState> for ProcessState {
    fn from(s: SchedState) -> Self {
        Self::Healthy(s)
    }
}

/// A record describing a fault taken by a process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum FaultInfo {
    /// The process has violated memory access rules, either while executing
    /// (`source` `User`) or by asking the kernel to touch memory it does not
    /// own (`source` `Kernel`).
    MemoryAccess {
        address: Option<usize>,
        source: FaultSource,
    },
    /// Arguments passed to a syscall were malformed beyond the point where
    /// an error code makes sense.
    SyscallUsage(UsageError),
    /// Execution of an illegal instruction, or an exception class the
    /// kernel doesn't handle. The code is the raw syndrome.
    InvalidOperation(u64),
}

impl From<UsageError> for FaultInfo {
    fn from(e: UsageError) -> Self {
        Self::SyscallUsage(e)
    }
}

/// A kernel-defined fault, arising from how a process called a syscall.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum UsageError {
    /// A slice argument was unaligned for its type or would wrap around the
    /// end of the address space.
    InvalidSlice,
    /// A string argument ran off the end of the caller's memory before its
    /// terminating NUL.
    UnterminatedString,
}

/// Origin of a fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum FaultSource {
    /// User code did something that was intercepted by the processor.
    User,
    /// User code asked the kernel to do something bad on its behalf.
    Kernel,
}

bitflags::bitflags! {
    /// Access rights attached to a region of process memory.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct RegionAttributes: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        /// Part of the program image. Spawned processes inherit these
        /// regions from their parent.
        const IMAGE = 1 << 3;
    }
}

/// Header of the process argument block found at [`SYS_ARGS_ADDRESS`].
///
/// The block is laid out as:
///
/// ```text
/// [ argc: u64 ]
/// [ argv[0]: u64 ] -> address of the first NUL-terminated string
///        ...
/// [ argv[argc - 1]: u64 ]
/// [ 0: u64 ]
/// [ string bytes ... ]
/// ```
///
/// All pointers are addresses in the process's own address space.
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct ArgsHeader {
    pub argc: u64,
}

/// Size of one entry in the argument pointer array.
pub const ARGS_POINTER_SIZE: usize = core::mem::size_of::<u64>();

const_assert!(core::mem::size_of::<ArgsHeader>() == ARGS_POINTER_SIZE);

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::TryFrom;

    #[test]
    fn sysnum_numbering_is_stable() {
        for s in Sysnum::ALL {
            assert_eq!(Sysnum::try_from(u32::from(s)), Ok(s));
        }
        // Priority get and set must never share a number.
        assert_ne!(
            u32::from(Sysnum::SchedGetPriority),
            u32::from(Sysnum::SchedSetPriority)
        );
        assert_eq!(u32::from(Sysnum::Sbrk), 9);
        assert!(Sysnum::try_from(10).is_err());
        assert!(Sysnum::try_from(SYSNUM_LIMIT).is_err());
    }

    #[test]
    fn error_codes_follow_abi_order() {
        assert_eq!(SysError::Generic.code(), 1);
        assert_eq!(SysError::UnknownSyscall.code(), 3);
        assert_eq!(SysError::OutOfMem.code(), 6);
        assert_eq!(SysError::InvalidPid.code(), 10);
        assert_eq!(SysError::PipeClosed.code(), 14);
    }

    #[test]
    fn check_response_words() {
        assert_eq!(SysError::check(SYS_OK), Ok(()));
        assert_eq!(SysError::check(11), Err(SysError::InvalidPipe));
        assert_eq!(SysError::check(9999), Err(SysError::Internal));
    }

    #[test]
    fn pipe_handle_slots() {
        assert!(PipeHandle::NULL.is_null());
        assert_eq!(PipeHandle::NULL.slot(), None);
        assert_eq!(PipeHandle::from_slot(0), PipeHandle(1));
        assert_eq!(PipeHandle::from_slot(5).slot(), Some(5));
    }

    #[test]
    fn priority_ordering_reads_right() {
        assert!(Priority::MAX.is_more_important_than(Priority::MIN));
        assert!(!Priority::DEFAULT.is_more_important_than(Priority::DEFAULT));
        assert!(Priority::DEFAULT.is_valid());
        assert!(!Priority(Priority::MAX.0 + 1).is_valid());
    }
}
