// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Named pipes.
//!
//! A pipe is a byte ring owned by the process that opened it and named within
//! that process's namespace. Other processes reach it by `(owner pid, name)`.
//! Every process holding a pipe does so through a handle in its own handle
//! table, and each handle counts as one reference.
//!
//! Blocking follows one pattern throughout. A process that can't make
//! progress records the pipe it's waiting on in its scheduling state and has
//! its syscall rewound; whoever changes the pipe in a way that might let it
//! progress marks it runnable again, and it retries from scratch.

use abi::{Pid, PipeHandle, PipeId, SchedState, SysError, SYS_PIPE_NAME_MAX};

use crate::config::{MAX_PIPES, MAX_PROCESSES, PIPE_CAPACITY};
use crate::err::UserError;
use crate::startup::Kernel;
use crate::task::{self, ArchState, NextTask, Process};
use crate::umem::{USlice, UStr};
use kerncore::Ring;

pub type PipeName = heapless::Vec<u8, SYS_PIPE_NAME_MAX>;

#[derive(Debug)]
pub struct Pipe {
    owner: Pid,
    name: PipeName,
    ring: Ring<PIPE_CAPACITY>,
    refs: usize,
    /// Holders that have written to the pipe and still hold it.
    writers: heapless::Vec<Pid, MAX_PROCESSES>,
    /// Set when the owner closes, when the last writer lets go, or when only
    /// one holder is left. Nothing more can be written, but buffered bytes
    /// can still be read.
    hung_up: bool,
}

impl Pipe {
    pub fn owner(&self) -> Pid {
        self.owner
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn is_hung_up(&self) -> bool {
        self.hung_up
    }

    pub fn writers(&self) -> &[Pid] {
        &self.writers
    }

    fn note_writer(&mut self, pid: Pid) {
        if !self.writers.contains(&pid) {
            // Every writer holds a reference, so this can't overflow.
            let _ = self.writers.push(pid);
        }
    }

    /// Forgets `pid` as a writer; true if it was the last one.
    fn drop_writer(&mut self, pid: Pid) -> bool {
        match self.writers.iter().position(|w| *w == pid) {
            Some(i) => {
                self.writers.swap_remove(i);
                self.writers.is_empty()
            }
            None => false,
        }
    }
}

/// Every pipe in the system.
#[derive(Debug)]
pub struct PipeTable {
    slots: [Option<Pipe>; MAX_PIPES],
}

impl Default for PipeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    pub fn get(&self, id: PipeId) -> Option<&Pipe> {
        self.slots.get(usize::from(id.0))?.as_ref()
    }

    fn get_mut(&mut self, id: PipeId) -> Option<&mut Pipe> {
        self.slots.get_mut(usize::from(id.0))?.as_mut()
    }

    /// Number of pipes that exist, hung up or not.
    pub fn live_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Finds the pipe `owner` has open under `name`. Hung-up pipes have left
    /// the namespace.
    pub fn lookup(&self, owner: Pid, name: &[u8]) -> Option<PipeId> {
        self.slots.iter().position(|s| {
            s.as_ref().is_some_and(|p| {
                !p.hung_up && p.owner == owner && p.name.as_slice() == name
            })
        })
        .map(|i| PipeId(i as u16))
    }

    fn create(&mut self, owner: Pid, name: PipeName) -> Option<PipeId> {
        let i = self.slots.iter().position(Option::is_none)?;
        self.slots[i] = Some(Pipe {
            owner,
            name,
            ring: Ring::new(),
            refs: 1,
            writers: heapless::Vec::new(),
            hung_up: false,
        });
        Some(PipeId(i as u16))
    }
}

/// Drops one reference to `id` held by `procs[holder]`, whose handle has
/// already been removed. Hangs up and wakes everyone waiting if this was the
/// owner, the last holder to have written, or if it leaves a single holder;
/// frees the pipe when nobody is left.
pub fn release(
    procs: &mut [Process],
    pipes: &mut PipeTable,
    holder: usize,
    id: PipeId,
) -> NextTask {
    let holder_pid = procs[holder].pid();
    let Some(pipe) = pipes.get_mut(id) else {
        crate::fail::die("handle to a pipe that doesn't exist");
    };
    pipe.refs -= 1;
    let last_writer = pipe.drop_writer(holder_pid);

    let mut hint = NextTask::Same;
    if !pipe.hung_up && (pipe.owner == holder_pid || last_writer || pipe.refs == 1) {
        pipe.hung_up = true;
        hint = task::wake(procs, holder, |s| s.is_reading(id) || s.is_writing(id));
    }
    if pipe.refs == 0 {
        pipes.slots[usize::from(id.0)] = None;
    }
    hint
}

/// Reads a pipe name argument. `None` means the name is unusable (empty or
/// too long); a bad pointer faults.
fn read_name(p: &Process, addr: u64) -> Result<Option<PipeName>, UserError> {
    if addr == 0 {
        return Ok(None);
    }
    let name = match p.read_c_str(addr as usize, SYS_PIPE_NAME_MAX)? {
        UStr::Complete(b) if !b.is_empty() => b,
        _ => return Ok(None),
    };
    Ok(PipeName::from_slice(name).ok())
}

/// `pipe_open(name) -> handle`; 0 on any failure.
pub fn sys_pipe_open(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let (procs, pipes) = k.split_mut();
    let req = procs[caller].save().as_request();
    let me = &mut procs[caller];

    let handle = read_name(me, req.args[0])?.and_then(|name| {
        if pipes.lookup(me.pid(), &name).is_some() {
            return None;
        }
        if me.handles_full() {
            return None;
        }
        let id = pipes.create(me.pid(), name)?;
        // Can't fail; checked above.
        me.add_handle(id)
    });

    me.save_mut().ret0(handle.unwrap_or(PipeHandle::NULL).0);
    Ok(NextTask::Same)
}

/// `pipe_get(owner, name) -> handle`; 0 on any failure.
pub fn sys_pipe_get(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let (procs, pipes) = k.split_mut();
    let req = procs[caller].save().as_request();
    let me = &mut procs[caller];
    let owner = match Pid(req.args[0] as u32) {
        p if p.is_current() => me.pid(),
        p => p,
    };

    let handle = read_name(me, req.args[1])?.and_then(|name| {
        let id = pipes.lookup(owner, &name)?;
        if let Some(h) = me.handle_for(id) {
            return Some(h);
        }
        let h = me.add_handle(id)?;
        if let Some(pipe) = pipes.get_mut(id) {
            pipe.refs += 1;
        }
        Some(h)
    });

    me.save_mut().ret0(handle.unwrap_or(PipeHandle::NULL).0);
    Ok(NextTask::Same)
}

/// `pipe_close(handle)`.
pub fn sys_pipe_close(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let (procs, pipes) = k.split_mut();
    let handle = PipeHandle(procs[caller].save().arg0());
    let id = procs[caller]
        .remove_handle(handle)
        .ok_or(SysError::InvalidPipe)?;
    let hint = release(procs, pipes, caller, id);
    procs[caller].save_mut().set_ok();
    Ok(hint)
}

/// Arguments shared by read and write.
struct Transfer {
    id: PipeId,
    buf: u64,
    size: usize,
    out: Option<usize>,
}

fn transfer_args(p: &Process) -> Result<Transfer, UserError> {
    let req = p.save().as_request();
    let id = p
        .handle(PipeHandle(req.args[0]))
        .ok_or(SysError::InvalidPipe)?;
    let size = req.args[2] as usize;
    if size != 0 && req.args[1] == 0 {
        return Err(SysError::Generic.into());
    }
    let out = match req.args[3] {
        0 => None,
        addr => {
            p.check_writable::<u64>(addr as usize)?;
            Some(addr as usize)
        }
    };
    Ok(Transfer {
        id,
        buf: req.args[1],
        size,
        out,
    })
}

fn report(p: &mut Process, out: Option<usize>, n: usize) -> Result<(), UserError> {
    if let Some(addr) = out {
        p.write_value(addr, n as u64)?;
    }
    Ok(())
}

fn block(p: &mut Process, state: SchedState) -> NextTask {
    p.set_healthy_state(state);
    p.save_mut().restart_syscall();
    NextTask::Other
}

/// `pipe_read(handle, buf, size, *transferred)`.
pub fn sys_pipe_read(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let (procs, pipes) = k.split_mut();
    let t = transfer_args(&procs[caller])?;
    let me = &mut procs[caller];

    if t.size == 0 {
        report(me, t.out, 0)?;
        me.save_mut().set_ok();
        return Ok(NextTask::Same);
    }

    let mut buf = USlice::<u8>::from_raw(t.buf as usize, t.size)?;
    me.try_write(&mut buf)?;

    let Some(pipe) = pipes.get_mut(t.id) else {
        return Err(SysError::InvalidPipe.into());
    };
    if pipe.ring.is_empty() {
        if !pipe.hung_up {
            return Ok(block(me, SchedState::InPipeRead(t.id)));
        }
        report(me, t.out, 0)?;
        me.save_mut().set_ok();
        return Ok(NextTask::Same);
    }

    let n = pipe.ring.read(me.try_write(&mut buf)?);
    report(me, t.out, n)?;
    me.save_mut().set_ok();
    Ok(task::wake(procs, caller, |s| s.is_writing(t.id)))
}

/// `pipe_write(handle, buf, size, *transferred)`.
pub fn sys_pipe_write(k: &mut Kernel, caller: usize) -> Result<NextTask, UserError> {
    let (procs, pipes) = k.split_mut();
    let t = transfer_args(&procs[caller])?;
    let me = &mut procs[caller];

    if t.size == 0 {
        report(me, t.out, 0)?;
        me.save_mut().set_ok();
        return Ok(NextTask::Same);
    }

    let buf = USlice::<u8>::from_raw(t.buf as usize, t.size)?;
    me.try_read(&buf)?;

    let Some(pipe) = pipes.get_mut(t.id) else {
        return Err(SysError::InvalidPipe.into());
    };
    if pipe.hung_up {
        report(me, t.out, 0)?;
        return Err(SysError::PipeClosed.into());
    }
    pipe.note_writer(me.pid());
    if pipe.ring.is_full() {
        return Ok(block(me, SchedState::InPipeWrite(t.id)));
    }

    let n = pipe.ring.write(me.try_read(&buf)?);
    report(me, t.out, n)?;
    me.save_mut().set_ok();
    Ok(task::wake(procs, caller, |s| s.is_reading(t.id)))
}
