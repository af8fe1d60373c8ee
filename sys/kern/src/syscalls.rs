// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent syscall implementation.
//!
//! This builds on architecture-specific parts defined in the `arch::*` modules.
//!
//! # Syscall implementations
//!
//! Syscalls are implemented by functions with the signature:
//!
//! ```ignore
//! fn syscall(kernel: &mut Kernel, caller: usize) -> Result<NextTask, UserError>;
//! ```
//!
//! `caller` is the index of the process that trapped. A handler writes its own
//! results on success and returns a `NextTask` scheduling hint. A `UserError`
//! indicates a condition that needs to either be returned as a response code
//! or recorded as a fault; the dispatcher takes care of those side effects,
//! reducing code in each syscall.
//!
//! Arguments are read from the caller's saved registers as a single
//! `SyscallRequest` (`task.save().as_request()`), not through per-call
//! accessors.
//!
//! Handlers live in a table indexed by syscall number. The built-in calls are
//! registered when the kernel is created; other subsystems may add their own
//! below `SYSNUM_LIMIT`.

use abi::{
    Pid, Priority, RegionAttributes, SysError, Sysnum, PAGE_SIZE, SBRK_FAILED,
    SYSNUM_LIMIT, SYS_ARGS_ADDRESS,
};

use crate::addr::VirtAddr;
use crate::args::ArgsWriter;
use crate::err::UserError;
use crate::pipe;
use crate::startup::Kernel;
use crate::task::{self, ArchState, NextTask, Region};
use crate::time;
use crate::umem::{USlice, UStr};

/// Longest message `print` will log.
pub const PRINT_MAX: usize = 256;

/// A syscall as it arrives: identifier plus the five argument registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SyscallRequest {
    pub id: u32,
    pub args: [u64; 5],
}

pub type Handler = fn(&mut Kernel, usize) -> Result<NextTask, UserError>;

/// Syscall number to handler.
pub struct SyscallTable {
    handlers: [Option<Handler>; SYSNUM_LIMIT as usize],
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl SyscallTable {
    pub const fn empty() -> Self {
        Self {
            handlers: [None; SYSNUM_LIMIT as usize],
        }
    }

    /// A table holding every call in `Sysnum`.
    pub fn with_builtins() -> Self {
        let mut table = Self::empty();
        for s in Sysnum::ALL {
            let ok = table.register(u32::from(s), builtin(s));
            uassert!(ok);
        }
        table
    }

    /// Installs `handler` for `id`. Returns `false`, changing nothing, if the
    /// number is out of range or already taken.
    pub fn register(&mut self, id: u32, handler: Handler) -> bool {
        match self.handlers.get_mut(id as usize) {
            Some(slot @ None) => {
                *slot = Some(handler);
                true
            }
            _ => false,
        }
    }

    /// Removes whatever handles `id`, returning it.
    pub fn unregister(&mut self, id: u32) -> Option<Handler> {
        self.handlers.get_mut(id as usize)?.take()
    }

    pub fn is_registered(&self, id: u32) -> bool {
        self.handlers.get(id as usize).is_some_and(Option::is_some)
    }

    /// The handler for `id`. Unknown numbers get a handler that reports
    /// `UnknownSyscall`.
    pub fn lookup(&self, id: u32) -> Handler {
        self.handlers
            .get(id as usize)
            .copied()
            .flatten()
            .unwrap_or(unknown)
    }
}

fn builtin(s: Sysnum) -> Handler {
    match s {
        Sysnum::Exit => exit,
        Sysnum::Print => print,
        Sysnum::GetPid => getpid,
        Sysnum::Debug => debug,
        Sysnum::Spawn => spawn,
        Sysnum::Sleep => sleep,
        Sysnum::Yield => yield_now,
        Sysnum::SchedSetPriority => set_priority,
        Sysnum::SchedGetPriority => get_priority,
        Sysnum::Sbrk => sbrk,
        Sysnum::PipeOpen => pipe::sys_pipe_open,
        Sysnum::PipeClose => pipe::sys_pipe_close,
        Sysnum::PipeGet => pipe::sys_pipe_get,
        Sysnum::PipeRead => pipe::sys_pipe_read,
        Sysnum::PipeWrite => pipe::sys_pipe_write,
    }
}

impl Kernel {
    /// Runs the syscall `procs[caller]` trapped with, and applies its
    /// outcome.
    pub fn handle_syscall(&mut self, caller: usize) -> NextTask {
        let id = self.process(caller).save().syscall_descriptor();
        let handler = self.syscalls().lookup(id);
        match handler(self, caller) {
            Ok(nt) => nt,
            Err(UserError::Recoverable(code, hint)) => {
                self.process_mut(caller).save_mut().set_error_response(code);
                hint
            }
            Err(UserError::Unrecoverable(fault)) => {
                let (procs, pipes) = self.split_mut();
                task::force_fault(procs, pipes, caller, fault)
            }
        }
    }
}

/// Entry point for the arch-specific exception handler once the caller's
/// registers are saved.
#[cfg(target_os = "none")]
pub fn syscall_entry() {
    crate::startup::with_kernel(|k| {
        let current = k.current();
        let hint = k.handle_syscall(current);
        k.switch_after(current, hint);
    });
}

fn unknown(_k: &mut Kernel, _caller: usize) -> Result<NextTask, UserError> {
    Err(SysError::UnknownSyscall.into())
}

fn exit(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let p = k.process(caller);
    klog!(
        "pid {} exited with status {}",
        p.pid().0,
        p.save().arg0() as i64
    );
    let (procs, pipes) = k.split_mut();
    Ok(task::reap(procs, pipes, caller))
}

/// Longest valid UTF-8 prefix, for logging.
fn printable(b: &[u8]) -> &str {
    match core::str::from_utf8(b) {
        Ok(s) => s,
        Err(e) => core::str::from_utf8(&b[..e.valid_up_to()]).unwrap_or(""),
    }
}

fn print(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let p = k.process(caller);
    let addr = p.save().arg0();
    if addr == 0 {
        return Err(SysError::Generic.into());
    }
    let msg = p.read_c_str(addr as usize, PRINT_MAX)?;
    klog!("sys_print() from pid={}: {}", p.pid().0, printable(msg.bytes()));
    k.process_mut(caller).save_mut().set_ok();
    Ok(NextTask::Same)
}

fn getpid(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let p = k.process_mut(caller);
    let pid = p.pid();
    p.save_mut().ret0(u64::from(pid.0));
    Ok(NextTask::Same)
}

fn debug(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let p = k.process_mut(caller);
    klog!("Debug: {} from pid={}", p.save().arg0(), p.pid().0);
    p.save_mut().set_ok();
    Ok(NextTask::Same)
}

fn spawn(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let req = k.process(caller).save().as_request();
    let [entry, argc, argv, ..] = req.args;
    if entry == 0 || (argc != 0 && argv == 0) {
        return Err(SysError::Generic.into());
    }
    let slot = k.vacant_slot().ok_or(SysError::OutOfMem)?;
    let argc = usize::try_from(argc).map_err(|_| SysError::OutOfMem)?;

    // Lay out the arguments in the new slot's page before committing to
    // anything.
    let args_page = k.process(slot).memory().args;
    // Safety: the slot is vacant, so nothing else refers to its page, and
    // slot pages are kernel-mapped for the life of the kernel.
    let page = unsafe {
        core::slice::from_raw_parts_mut(args_page.as_mut_ptr::<u8>(), PAGE_SIZE)
    };
    page.fill(0);
    let mut writer = ArgsWriter::new(page, argc, SYS_ARGS_ADDRESS)
        .map_err(|_| SysError::OutOfMem)?;
    let parent = k.process(caller);
    let pointers = USlice::<u64>::from_raw(argv as usize, argc)?;
    for &ptr in parent.try_read(&pointers)? {
        if ptr == 0 {
            return Err(SysError::Generic.into());
        }
        match parent.read_c_str(ptr as usize, PAGE_SIZE)? {
            UStr::Complete(s) => {
                writer.push(s).map_err(|_| SysError::OutOfMem)?
            }
            UStr::Truncated(_) => return Err(SysError::OutOfMem.into()),
        }
    }
    writer.finish();

    // The child runs the same program, but only the parent may write it.
    let images: heapless::Vec<Region, { task::MAX_REGIONS }> = parent
        .regions()
        .iter()
        .filter(|r| r.attributes.contains(RegionAttributes::IMAGE))
        .map(|r| Region {
            attributes: r.attributes - RegionAttributes::WRITE,
            ..*r
        })
        .collect();
    let pid = k.start_process(slot, VirtAddr::new(entry as usize), &images)?;
    klog!("pid {} spawned pid {} at {:#x}", k.process(caller).pid().0, pid.0, entry);

    let caller_priority = k.process(caller).priority();
    k.process_mut(caller).save_mut().set_ok();
    if k.process(slot).priority().is_more_important_than(caller_priority) {
        Ok(NextTask::Specific(slot))
    } else {
        Ok(NextTask::Same)
    }
}

fn sleep(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let p = k.process_mut(caller);
    let ticks = time::ticks_for_micros(p.save().arg0());
    p.save_mut().set_ok();
    if ticks == 0 {
        return Ok(NextTask::Same);
    }
    p.sleep_until(crate::arch::now().after(ticks));
    Ok(NextTask::Other)
}

fn yield_now(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    k.process_mut(caller).save_mut().set_ok();
    Ok(NextTask::Other)
}

/// Resolves a pid argument, where 0 means the caller.
fn target(k: &Kernel, caller: usize, raw: u64) -> Result<usize, UserError> {
    match u32::try_from(raw).map(Pid) {
        Ok(p) if p.is_current() => Ok(caller),
        Ok(p) => task::find_pid(k.processes(), p).ok_or(SysError::InvalidPid.into()),
        Err(_) => Err(SysError::InvalidPid.into()),
    }
}

fn set_priority(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let req = k.process(caller).save().as_request();
    let index = target(k, caller, req.args[0])?;
    let priority = u32::try_from(req.args[1])
        .map(Priority)
        .ok()
        .filter(|p| p.is_valid())
        .ok_or(SysError::InvalidPriority)?;
    k.process_mut(index).set_priority(priority);
    k.process_mut(caller).save_mut().set_ok();
    Ok(NextTask::Other)
}

fn get_priority(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let req = k.process(caller).save().as_request();
    if req.args[1] == 0 {
        return Err(SysError::Generic.into());
    }
    let index = target(k, caller, req.args[0])?;
    let priority = k.process(index).priority();
    let p = k.process_mut(caller);
    p.write_value(req.args[1] as usize, priority.0)?;
    p.save_mut().set_ok();
    Ok(NextTask::Same)
}

fn sbrk(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let p = k.process_mut(caller);
    let increment = p.save().arg0() as i64;
    let heap = p.heap();
    let new = if increment >= 0 {
        heap.brk.checked_add(increment as usize)
    } else {
        heap.brk.checked_sub(increment.unsigned_abs() as usize)
    };
    match new {
        Some(brk) if brk >= heap.base && brk - heap.base <= heap.limit => {
            p.set_brk(brk);
            p.save_mut().ret0(heap.brk as u64);
        }
        _ => p.save_mut().ret0(SBRK_FAILED),
    }
    Ok(NextTask::Same)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_k: &mut Kernel, _caller: usize) -> Result<NextTask, UserError> {
        Ok(NextTask::Same)
    }

    #[test]
    fn builtins_cover_the_abi() {
        let t = SyscallTable::with_builtins();
        for s in Sysnum::ALL {
            assert!(t.is_registered(u32::from(s)), "{s:?} missing");
        }
        assert!(!t.is_registered(10));
        assert!(!t.is_registered(SYSNUM_LIMIT));
    }

    #[test]
    fn registration_rules() {
        let mut t = SyscallTable::with_builtins();
        assert!(!t.register(u32::from(Sysnum::Print), nop));
        assert!(!t.register(SYSNUM_LIMIT, nop));
        assert!(t.register(12, nop));
        assert!(!t.register(12, nop));
        assert!(t.unregister(12).is_some());
        assert!(t.unregister(12).is_none());
        assert!(t.register(12, nop));
    }

    #[test]
    fn printable_stops_at_bad_utf8() {
        assert_eq!(printable(b"ok"), "ok");
        assert_eq!(printable(b"ab\xffcd"), "ab");
    }
}
