// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User program support library.
//!
//! This contains syscall stubs and types, and re-exports the contents of the
//! `abi` crate that gets shared with the kernel.
//!
//! # Syscall stubs
//!
//! Every call goes through `syscall`, which takes one `Request` (number plus
//! five argument words), traps with `svc #0`, and hands back `x0`. The
//! `sys_*` wrappers build the request, check the preconditions the kernel
//! would otherwise reject with `GENERIC`, and decode the response.
//!
//! Preconditions are checked with `uassert!`: passing a null pipe handle or
//! an empty pipe name is a bug in the program, not a runtime condition.

#![cfg_attr(not(test), no_std)]

#[macro_use]
pub mod macros;

pub mod args;

pub use abi::*;

use core::ffi::CStr;

/// Most arguments `sys_spawn` will pass along.
pub const SPAWN_ARGS_MAX: usize = 16;

/// A syscall as placed in registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Request {
    pub id: u32,
    pub args: [u64; 5],
}

impl Request {
    pub const fn new(id: Sysnum, args: [u64; 5]) -> Self {
        Self {
            id: id as u32,
            args,
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        /// Traps into the kernel with `req`, returning the response word.
        ///
        /// # Safety
        ///
        /// Pointer arguments must be valid for whatever `req.id` does with
        /// them; the kernel kills the process otherwise.
        #[inline(always)]
        pub unsafe fn syscall(req: &Request) -> u64 {
            let ret: u64;
            // Safety: per our contract. The kernel restores every register
            // but x0.
            unsafe {
                core::arch::asm!(
                    "svc #0",
                    inlateout("x0") req.args[0] => ret,
                    in("x1") req.args[1],
                    in("x2") req.args[2],
                    in("x3") req.args[3],
                    in("x4") req.args[4],
                    in("x8") u64::from(req.id),
                    options(nostack),
                );
            }
            ret
        }
    } else {
        /// Host builds can't trap; this exists so the crate type checks and
        /// its pure parts can be tested.
        ///
        /// # Safety
        ///
        /// Always panics.
        pub unsafe fn syscall(req: &Request) -> u64 {
            panic!("syscall {} needs an aarch64 target", req.id)
        }
    }
}

fn call(id: Sysnum, args: [u64; 5]) -> u64 {
    // Safety: the wrappers below only pass addresses of live Rust objects,
    // sized to match.
    unsafe { syscall(&Request::new(id, args)) }
}

fn status(id: Sysnum, args: [u64; 5]) -> Result<(), SysError> {
    SysError::check(call(id, args))
}

pub fn sys_exit(status: i32) -> ! {
    call(Sysnum::Exit, [status as i64 as u64, 0, 0, 0, 0]);
    // The kernel doesn't come back here.
    loop {
        core::hint::spin_loop();
    }
}

pub fn sys_print(msg: &CStr) -> Result<(), SysError> {
    status(Sysnum::Print, [msg.as_ptr() as u64, 0, 0, 0, 0])
}

pub fn sys_getpid() -> Pid {
    Pid(call(Sysnum::GetPid, [0; 5]) as u32)
}

pub fn sys_debug(value: u64) -> Result<(), SysError> {
    status(Sysnum::Debug, [value, 0, 0, 0, 0])
}

/// Starts a new process at `entry` with `argv`. The new process shares this
/// one's program image.
pub fn sys_spawn(entry: extern "C" fn() -> !, argv: &[&CStr]) -> Result<(), SysError> {
    uassert!(argv.len() <= SPAWN_ARGS_MAX);
    let pointers: heapless::Vec<u64, SPAWN_ARGS_MAX> =
        argv.iter().map(|s| s.as_ptr() as u64).collect();
    status(
        Sysnum::Spawn,
        [
            entry as usize as u64,
            pointers.len() as u64,
            pointers.as_ptr() as u64,
            0,
            0,
        ],
    )
}

pub fn sys_usleep(micros: u64) -> Result<(), SysError> {
    status(Sysnum::Sleep, [micros, 0, 0, 0, 0])
}

pub fn sys_sleep(seconds: u64) -> Result<(), SysError> {
    sys_usleep(seconds.saturating_mul(1_000_000))
}

pub fn sys_yield() -> Result<(), SysError> {
    status(Sysnum::Yield, [0; 5])
}

/// Pid `Pid::CURRENT` means the caller.
pub fn sys_sched_set_priority(pid: Pid, priority: Priority) -> Result<(), SysError> {
    status(
        Sysnum::SchedSetPriority,
        [u64::from(pid.0), u64::from(priority.0), 0, 0, 0],
    )
}

pub fn sys_sched_get_priority(pid: Pid) -> Result<Priority, SysError> {
    let mut out = 0u32;
    status(
        Sysnum::SchedGetPriority,
        [u64::from(pid.0), &mut out as *mut u32 as u64, 0, 0, 0],
    )?;
    Ok(Priority(out))
}

/// Moves the program break by `increment` bytes, returning the old break.
pub fn sys_sbrk(increment: isize) -> Option<*mut u8> {
    match call(Sysnum::Sbrk, [increment as i64 as u64, 0, 0, 0, 0]) {
        SBRK_FAILED => None,
        old => Some(old as usize as *mut u8),
    }
}

fn check_name(name: &CStr) {
    let len = name.to_bytes().len();
    uassert!(len != 0 && len < SYS_PIPE_NAME_MAX);
}

fn handle_or_none(raw: u64) -> Option<PipeHandle> {
    let h = PipeHandle(raw);
    (!h.is_null()).then_some(h)
}

/// Creates a pipe owned by this process.
pub fn sys_pipe_open(name: &CStr) -> Option<PipeHandle> {
    check_name(name);
    handle_or_none(call(Sysnum::PipeOpen, [name.as_ptr() as u64, 0, 0, 0, 0]))
}

/// Gets a handle on `owner`'s pipe `name`.
pub fn sys_pipe_get(owner: Pid, name: &CStr) -> Option<PipeHandle> {
    check_name(name);
    handle_or_none(call(
        Sysnum::PipeGet,
        [u64::from(owner.0), name.as_ptr() as u64, 0, 0, 0],
    ))
}

pub fn sys_pipe_close(handle: PipeHandle) -> Result<(), SysError> {
    uassert!(!handle.is_null());
    status(Sysnum::PipeClose, [handle.0, 0, 0, 0, 0])
}

/// Reads into `buf`, blocking until something is there. `Ok(0)` with a
/// non-empty `buf` means the pipe was hung up.
pub fn sys_pipe_read(handle: PipeHandle, buf: &mut [u8]) -> Result<usize, SysError> {
    uassert!(!handle.is_null());
    let mut n = 0u64;
    status(
        Sysnum::PipeRead,
        [
            handle.0,
            buf.as_mut_ptr() as u64,
            buf.len() as u64,
            &mut n as *mut u64 as u64,
            0,
        ],
    )?;
    Ok(n as usize)
}

/// Writes from `buf`, blocking while the pipe is full. May take less than
/// all of `buf`.
pub fn sys_pipe_write(handle: PipeHandle, buf: &[u8]) -> Result<usize, SysError> {
    uassert!(!handle.is_null());
    let mut n = 0u64;
    status(
        Sysnum::PipeWrite,
        [
            handle.0,
            buf.as_ptr() as u64,
            buf.len() as u64,
            &mut n as *mut u64 as u64,
            0,
        ],
    )?;
    Ok(n as usize)
}

/// Writes all of `buf`, a chunk at a time.
pub fn sys_pipe_write_all(handle: PipeHandle, mut buf: &[u8]) -> Result<(), SysError> {
    while !buf.is_empty() {
        let n = sys_pipe_write(handle, buf)?;
        buf = &buf[n..];
    }
    Ok(())
}

/// Process entry: runs the program's `main` and exits with its status.
#[cfg(target_os = "none")]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    extern "Rust" {
        fn main() -> i32;
    }
    // Safety: every program linked with this crate defines `main`.
    let status = unsafe { main() };
    sys_exit(status)
}

#[cfg(all(target_os = "none", feature = "panic-handler"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    let line = macros::format_line(format_args!("panic: {info}"));
    if let Ok(msg) = CStr::from_bytes_with_nul(line.as_bytes()) {
        sys_print(msg).ok();
    }
    sys_exit(-1)
}
