// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of processes.

use abi::{
    FaultInfo, FaultSource, PipeHandle, PipeId, Pid, Priority, ProcessState,
    RegionAttributes, SchedState, SysError, SYS_OK,
};
use kerncore::MemoryRegion;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::addr::{PhysAddr, VirtAddr};
use crate::config::MAX_HANDLES;
use crate::mmu::UserAccess;
use crate::pipe::{self, PipeTable};
use crate::syscalls::SyscallRequest;
use crate::time::Timestamp;
use crate::umem::{self, USlice, UStr};

/// Most regions a process can have: image segments, stack, arguments, heap.
pub const MAX_REGIONS: usize = 8;

/// A span of a process's address space and what it may do there.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Region {
    pub base: usize,
    pub size: usize,
    pub attributes: RegionAttributes,
}

impl Region {
    pub fn overlaps(&self, other: &Region) -> bool {
        self.base < other.end_addr() && other.base < self.end_addr()
    }
}

impl MemoryRegion for Region {
    fn base_addr(&self) -> usize {
        self.base
    }

    fn end_addr(&self) -> usize {
        self.base + self.size
    }
}

/// The region table is full, or the new region would overlap one already
/// granted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegionConflict;

/// Pages carved out of the boot arena for one process-table slot. These
/// belong to the slot for the life of the kernel and are reused by whatever
/// process occupies it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SlotMemory {
    pub stack: VirtAddr,
    pub args: VirtAddr,
    pub heap: VirtAddr,
    pub tables: VirtAddr,
}

/// Program break bookkeeping. `brk` stays within `base..=base + limit`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Heap {
    pub base: usize,
    pub brk: usize,
    pub limit: usize,
}

/// Internal representation of a process.
///
/// The fields of this struct are private to this module so that we can
/// maintain some invariants, chiefly that the region table stays sorted and
/// that a vacant slot holds no pipe references.
#[repr(C)] // so location of SavedState is predictable
#[derive(Debug)]
pub struct Process {
    /// Saved machine state of the user program.
    save: crate::arch::SavedState,
    // NOTE: it is critical that the above field appear first!
    priority: Priority,
    state: ProcessState,
    pid: Pid,
    /// When a sleeping process should wake.
    deadline: Option<Timestamp>,
    /// Sorted by base address, non-overlapping.
    regions: heapless::Vec<Region, MAX_REGIONS>,
    heap: Heap,
    /// Pipe handle table; a `PipeHandle` is one more than its index here.
    handles: [Option<PipeId>; MAX_HANDLES],
    root_table: PhysAddr,
    /// Why the previous occupant of this slot was killed, if it was.
    last_fault: Option<FaultInfo>,
    memory: SlotMemory,
}

impl Process {
    /// Creates a vacant slot backed by `memory`.
    pub fn vacant(memory: SlotMemory, heap_limit: usize) -> Self {
        Process {
            save: crate::arch::SavedState::default(),
            priority: Priority::DEFAULT,
            state: ProcessState::Vacant,
            pid: Pid(0),
            deadline: None,
            regions: heapless::Vec::new(),
            heap: Heap {
                base: memory.heap.as_usize(),
                brk: memory.heap.as_usize(),
                limit: heap_limit,
            },
            handles: [None; MAX_HANDLES],
            root_table: PhysAddr::new(0),
            last_fault: None,
            memory,
        }
    }

    /// Tests whether this process has read access to `slice` as normal
    /// memory.
    ///
    /// This function is `must_use` because calling it without checking its
    /// return value is incredibly suspicious.
    #[must_use]
    fn can_read<T>(&self, slice: &USlice<T>) -> bool {
        self.can_access(slice, RegionAttributes::READ)
    }

    #[must_use]
    fn can_write<T>(&self, slice: &USlice<T>) -> bool {
        self.can_access(slice, RegionAttributes::WRITE)
    }

    /// Note that all processes can "access" any empty slice.
    #[must_use]
    fn can_access<T>(&self, slice: &USlice<T>, desired: RegionAttributes) -> bool {
        kerncore::can_access(slice.clone(), self.regions.as_slice(), |region| {
            region.attributes.contains(desired)
        })
    }

    /// Obtains access to the memory backing `slice` as a Rust slice, assuming
    /// that the process `self` can access it for read.
    pub fn try_read<'a, T>(
        &'a self,
        slice: &'a USlice<T>,
    ) -> Result<&'a [T], FaultInfo>
    where
        T: FromBytes + Immutable + KnownLayout,
    {
        if self.can_read(slice) {
            // Safety: assume_readable requires us to have validated that the
            // slice refers to normal process memory, which we did on the
            // previous line.
            unsafe { Ok(slice.assume_readable()) }
        } else {
            Err(FaultInfo::MemoryAccess {
                address: Some(slice.base_addr()),
                source: FaultSource::Kernel,
            })
        }
    }

    /// Obtains access to the memory backing `slice` as a Rust slice, assuming
    /// that the process `self` can access it for write.
    pub fn try_write<'a, T>(
        &'a mut self,
        slice: &'a mut USlice<T>,
    ) -> Result<&'a mut [T], FaultInfo>
    where
        T: FromBytes + IntoBytes + Immutable + KnownLayout,
    {
        if self.can_write(slice) {
            // Safety: assume_writable requires us to have validated that the
            // slice refers to normal process memory, which we did on the
            // previous line.
            unsafe { Ok(slice.assume_writable()) }
        } else {
            Err(FaultInfo::MemoryAccess {
                address: Some(slice.base_addr()),
                source: FaultSource::Kernel,
            })
        }
    }

    /// Writes one value to the process's memory at `addr`.
    pub fn write_value<T>(&mut self, addr: usize, value: T) -> Result<(), FaultInfo>
    where
        T: FromBytes + IntoBytes + Immutable + KnownLayout,
    {
        let mut slice = USlice::<T>::single(addr)?;
        self.try_write(&mut slice)?[0] = value;
        Ok(())
    }

    /// Checks that `addr` could take a `write_value::<T>` without faulting.
    pub fn check_writable<T>(&self, addr: usize) -> Result<(), FaultInfo> {
        let slice = USlice::<T>::single(addr)?;
        if self.can_write(&slice) {
            Ok(())
        } else {
            Err(FaultInfo::MemoryAccess {
                address: Some(addr),
                source: FaultSource::Kernel,
            })
        }
    }

    /// Number of readable bytes starting at `addr`, across abutting
    /// regions, up to `max`.
    fn readable_extent(&self, addr: usize, max: usize) -> usize {
        let limit = addr.saturating_add(max);
        let mut cursor = addr;
        let start = self.regions.partition_point(|r| r.end_addr() <= cursor);
        for r in &self.regions[start..] {
            if cursor >= limit
                || !r.contains(cursor)
                || !r.attributes.contains(RegionAttributes::READ)
            {
                break;
            }
            cursor = r.end_addr();
        }
        cursor.min(limit) - addr
    }

    /// Reads a NUL-terminated string of at most `max` bytes from `addr`.
    ///
    /// Faults if `addr` isn't readable, or if readable memory ends before
    /// either a NUL or `max` is reached.
    pub fn read_c_str(&self, addr: usize, max: usize) -> Result<UStr<'_>, FaultInfo> {
        let extent = self.readable_extent(addr, max);
        if extent == 0 {
            return Err(FaultInfo::MemoryAccess {
                address: Some(addr),
                source: FaultSource::Kernel,
            });
        }
        // Safety: every byte in the window is in a readable region of this
        // process, as just established, and we hand out only shared access.
        let window = unsafe { core::slice::from_raw_parts(addr as *const u8, extent) };
        Ok(umem::scan_c_str(window, max)?)
    }

    /// Adds `region` to the region table.
    pub fn grant_region(&mut self, region: Region) -> Result<(), RegionConflict> {
        if self.regions.iter().any(|r| r.overlaps(&region)) {
            return Err(RegionConflict);
        }
        let at = self.regions.partition_point(|r| r.base < region.base);
        self.regions.insert(at, region).map_err(|_| RegionConflict)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn heap(&self) -> Heap {
        self.heap
    }

    /// Moves the program break, resizing the heap region to match. The
    /// caller has checked bounds.
    pub fn set_brk(&mut self, brk: usize) {
        uassert!(brk >= self.heap.base && brk - self.heap.base <= self.heap.limit);
        self.heap.brk = brk;
        let base = self.heap.base;
        if let Some(r) = self.regions.iter_mut().find(|r| r.base == base) {
            r.size = brk - base;
        }
    }

    pub fn handle(&self, handle: PipeHandle) -> Option<PipeId> {
        handle
            .slot()
            .and_then(|i| self.handles.get(i).copied().flatten())
    }

    /// Finds the handle, if any, this process holds on `pipe`.
    pub fn handle_for(&self, pipe: PipeId) -> Option<PipeHandle> {
        self.handles
            .iter()
            .position(|h| *h == Some(pipe))
            .map(PipeHandle::from_slot)
    }

    /// Records a new handle on `pipe`, or returns `None` if the handle table
    /// is full.
    pub fn add_handle(&mut self, pipe: PipeId) -> Option<PipeHandle> {
        let i = self.handles.iter().position(Option::is_none)?;
        self.handles[i] = Some(pipe);
        Some(PipeHandle::from_slot(i))
    }

    pub fn handles_full(&self) -> bool {
        self.handles.iter().all(Option::is_some)
    }

    pub fn remove_handle(&mut self, handle: PipeHandle) -> Option<PipeId> {
        handle.slot().and_then(|i| self.handles.get_mut(i)?.take())
    }

    /// Resets this slot for a new, runnable occupant. Image regions are
    /// copied from `images`; stack, arguments and heap come from the slot.
    pub fn occupy(
        &mut self,
        pid: Pid,
        priority: Priority,
        images: &[Region],
    ) -> Result<(), RegionConflict> {
        self.regions.clear();
        for r in images {
            self.grant_region(*r)?;
        }
        self.grant_region(Region {
            base: self.memory.stack.as_usize(),
            size: abi::STACK_SIZE,
            attributes: RegionAttributes::READ | RegionAttributes::WRITE,
        })?;
        self.grant_region(Region {
            base: abi::SYS_ARGS_ADDRESS,
            size: abi::PAGE_SIZE,
            attributes: RegionAttributes::READ,
        })?;
        self.heap.brk = self.heap.base;
        self.grant_region(Region {
            base: self.heap.base,
            size: 0,
            attributes: RegionAttributes::READ | RegionAttributes::WRITE,
        })?;

        self.pid = pid;
        self.priority = priority;
        self.deadline = None;
        self.handles = [None; MAX_HANDLES];
        self.last_fault = None;
        self.state = ProcessState::Healthy(SchedState::Runnable);
        Ok(())
    }

    /// What EL0 in this process may do in `range`: write if any writable
    /// region of its own overlaps it, read if only read-only ones do.
    pub fn user_access(&self, range: core::ops::Range<usize>) -> UserAccess {
        let probe = Region {
            base: range.start,
            size: range.end - range.start,
            attributes: RegionAttributes::empty(),
        };
        // The whole heap window, not just up to the break, so growing the
        // heap doesn't need a new map.
        let heap = Region {
            base: self.heap.base,
            size: self.heap.limit,
            attributes: RegionAttributes::READ | RegionAttributes::WRITE,
        };
        let mut access = UserAccess::None;
        let owned = self
            .regions
            .iter()
            .filter(|r| r.base != abi::SYS_ARGS_ADDRESS)
            .chain(core::iter::once(&heap));
        for r in owned.filter(|r| r.overlaps(&probe)) {
            if r.attributes.contains(RegionAttributes::WRITE) {
                return UserAccess::ReadWrite;
            }
            access = UserAccess::ReadOnly;
        }
        access
    }

    pub fn is_runnable(&self) -> bool {
        self.state == ProcessState::Healthy(SchedState::Runnable)
    }

    pub fn is_vacant(&self) -> bool {
        self.state.is_vacant()
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, p: Priority) {
        uassert!(p.is_valid());
        self.priority = p;
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    pub fn set_healthy_state(&mut self, s: SchedState) {
        uassert!(!self.is_vacant());
        self.state = ProcessState::Healthy(s);
    }

    /// Puts the process to sleep until `deadline`.
    pub fn sleep_until(&mut self, deadline: Timestamp) {
        self.deadline = Some(deadline);
        self.set_healthy_state(SchedState::Sleeping);
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    pub fn last_fault(&self) -> Option<FaultInfo> {
        self.last_fault
    }

    pub fn memory(&self) -> SlotMemory {
        self.memory
    }

    pub fn root_table(&self) -> PhysAddr {
        self.root_table
    }

    pub fn set_root_table(&mut self, root: PhysAddr) {
        self.root_table = root;
    }

    pub fn save(&self) -> &crate::arch::SavedState {
        &self.save
    }

    pub fn save_mut(&mut self) -> &mut crate::arch::SavedState {
        &mut self.save
    }
}

/// Interface that must be implemented by the `arch::SavedState` type. This
/// gives architecture-independent access to task state for the rest of the
/// kernel.
pub trait ArchState: Default {
    fn stack_pointer(&self) -> u64;
    /// Address the process resumes at.
    fn program_counter(&self) -> u64;

    /// Reads syscall argument register 0.
    fn arg0(&self) -> u64;
    /// Reads syscall argument register 1.
    fn arg1(&self) -> u64;
    /// Reads syscall argument register 2.
    fn arg2(&self) -> u64;
    /// Reads syscall argument register 3.
    fn arg3(&self) -> u64;
    /// Reads syscall argument register 4.
    fn arg4(&self) -> u64;

    /// Reads the syscall descriptor (number).
    fn syscall_descriptor(&self) -> u32;

    /// Writes the syscall return value.
    fn ret0(&mut self, _: u64);

    /// Rewinds the program counter so the trapping syscall runs again when
    /// the process is next resumed.
    fn restart_syscall(&mut self);

    /// Gathers the syscall number and arguments into one request.
    fn as_request(&self) -> SyscallRequest {
        SyscallRequest {
            id: self.syscall_descriptor(),
            args: [
                self.arg0(),
                self.arg1(),
                self.arg2(),
                self.arg3(),
                self.arg4(),
            ],
        }
    }

    fn set_ok(&mut self) {
        self.ret0(SYS_OK)
    }

    fn set_error_response(&mut self, e: SysError) {
        self.ret0(e.code())
    }
}

/// Return value for operations that can have scheduling implications. This is
/// marked `must_use` because forgetting to actually update the scheduler after
/// performing an operation that requires it would be Bad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextTask {
    /// It's fine to keep running whatever process we were just running.
    Same,
    /// We need to switch processes, but this routine has not concluded which
    /// one should now run. The scheduler needs to figure it out.
    Other,
    /// We need to switch, and we already know which process should run next.
    Specific(usize),
}

impl NextTask {
    pub fn combine(self, other: Self) -> Self {
        use NextTask::*; // shorthand for patterns

        match (self, other) {
            // If both agree, our job is easy.
            (x, y) if x == y => x,
            // Specific recommendations that *don't* agree get downgraded to
            // Other.
            (Specific(_), Specific(_)) => Other,
            // If only *one* is specific, it wins.
            (Specific(x), _) | (_, Specific(x)) => Specific(x),
            // Otherwise, if either suggestion says switch, switch.
            (Other, _) | (_, Other) => Other,
            // All we have left is...
            (Same, Same) => Same,
        }
    }
}

/// Wakes every sleeping process whose deadline has passed.
pub fn process_timers(procs: &mut [Process], current_time: Timestamp) -> NextTask {
    let mut sched_hint = NextTask::Same;
    for (index, p) in procs.iter_mut().enumerate() {
        if let Some(deadline) = p.deadline {
            if deadline <= current_time {
                p.deadline = None;
                p.set_healthy_state(SchedState::Runnable);
                sched_hint = sched_hint.combine(NextTask::Specific(index));
            }
        }
    }
    sched_hint
}

/// Makes runnable every process whose state satisfies `blocked`. Suggests a
/// switch if one of them is more important than `caller`.
pub fn wake(
    procs: &mut [Process],
    caller: usize,
    blocked: impl Fn(&ProcessState) -> bool,
) -> NextTask {
    let bar = procs[caller].priority;
    let mut hint = NextTask::Same;
    for (index, p) in procs.iter_mut().enumerate() {
        if blocked(&p.state) {
            p.set_healthy_state(SchedState::Runnable);
            if p.priority.is_more_important_than(bar) {
                hint = hint.combine(NextTask::Specific(index));
            }
        }
    }
    hint
}

/// Finds the live process with `pid`.
pub fn find_pid(procs: &[Process], pid: Pid) -> Option<usize> {
    procs.iter().position(|p| !p.is_vacant() && p.pid == pid)
}

/// Selects a new process to run after `previous`, if any is runnable.
pub fn select(previous: usize, procs: &[Process]) -> Option<usize> {
    priority_scan(previous, procs, |p| p.is_runnable()).map(|(i, _)| i)
}

/// Scans the process table to find a prioritized candidate.
///
/// Scans `procs` for the next process, after `previous`, that satisfies
/// `pred`. If more than one process satisfies `pred`, returns the most
/// important one. If several with the same priority satisfy `pred`, prefers
/// the first one in order after `previous`, mod `procs.len()`. Finally, if no
/// process satisfies `pred`, returns `None`.
pub fn priority_scan(
    previous: usize,
    procs: &[Process],
    pred: impl Fn(&Process) -> bool,
) -> Option<(usize, &Process)> {
    let mut pos = previous;
    let mut choice: Option<(usize, &Process)> = None;
    for _step_no in 0..procs.len() {
        pos = pos.wrapping_add(1);
        if pos >= procs.len() {
            pos = 0;
        }
        let p = &procs[pos];
        if !pred(p) {
            continue;
        }

        if let Some((_, best)) = choice {
            if !p.priority.is_more_important_than(best.priority) {
                continue;
            }
        }

        choice = Some((pos, p));
    }

    choice
}

/// Picks the next process to run, waiting for a sleeper if nothing is
/// runnable. Halts the kernel if nothing ever could be.
pub fn reschedule(procs: &mut [Process], previous: usize) -> usize {
    loop {
        // `select` below looks at everyone, so the hint adds nothing.
        let _ = process_timers(procs, crate::arch::now());
        if let Some(next) = select(previous, procs) {
            return next;
        }
        if !procs.iter().any(|p| p.deadline.is_some()) {
            crate::fail::die("no runnable processes");
        }
        crate::arch::idle();
    }
}

/// Tears down the process in `procs[index]`: drops its pipe references and
/// marks the slot vacant. Returns a hint covering anyone woken by pipes
/// hanging up.
pub fn reap(procs: &mut [Process], pipes: &mut PipeTable, index: usize) -> NextTask {
    let mut hint = NextTask::Other;
    for slot in 0..MAX_HANDLES {
        if let Some(pipe) = procs[index].handles[slot].take() {
            hint = hint.combine(pipe::release(procs, pipes, index, pipe));
        }
    }
    let p = &mut procs[index];
    p.state = ProcessState::Vacant;
    p.deadline = None;
    p.regions.clear();
    p.heap.brk = p.heap.base;
    hint
}

/// Kills a process that broke the rules, keeping the reason in its slot.
pub fn force_fault(
    procs: &mut [Process],
    pipes: &mut PipeTable,
    index: usize,
    fault: FaultInfo,
) -> NextTask {
    klog!(
        "pid {} killed: {:?} (pc {:#x}, sp {:#x})",
        procs[index].pid.0,
        fault,
        procs[index].save.program_counter(),
        procs[index].save.stack_pointer()
    );
    let hint = reap(procs, pipes, index);
    procs[index].last_fault = Some(fault);
    hint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_alloc::host::HostPages;
    use abi::PAGE_SIZE;

    fn slot(mem: &HostPages, first_page: usize) -> SlotMemory {
        let at = |n: usize| VirtAddr::new(mem.base() + n * PAGE_SIZE);
        SlotMemory {
            stack: at(first_page),
            args: at(first_page + 2),
            heap: at(first_page + 3),
            tables: at(first_page + 5),
        }
    }

    fn live(mem: &HostPages, first_page: usize, pid: u32, priority: u32) -> Process {
        let mut p = Process::vacant(slot(mem, first_page), 2 * PAGE_SIZE);
        p.occupy(Pid(pid), Priority(priority), &[]).unwrap();
        p
    }

    #[test]
    fn region_table_stays_sorted_and_disjoint() {
        let mem = HostPages::new(9);
        let mut p = Process::vacant(slot(&mem, 0), PAGE_SIZE);
        let rw = RegionAttributes::READ | RegionAttributes::WRITE;
        p.grant_region(Region { base: 0x9000, size: 0x1000, attributes: rw }).unwrap();
        p.grant_region(Region { base: 0x1000, size: 0x1000, attributes: rw }).unwrap();
        assert_eq!(
            p.grant_region(Region { base: 0x9800, size: 0x1000, attributes: rw }),
            Err(RegionConflict)
        );
        p.grant_region(Region { base: 0x2000, size: 0x1000, attributes: rw }).unwrap();
        let bases: Vec<usize> = p.regions().iter().map(|r| r.base).collect();
        assert_eq!(bases, [0x1000, 0x2000, 0x9000]);
    }

    #[test]
    fn occupy_grants_slot_memory() {
        let mem = HostPages::new(9);
        let p = live(&mem, 0, 7, 10);
        let stack = p.memory().stack.as_usize();
        let mut s = USlice::<u8>::from_raw(stack, abi::STACK_SIZE).unwrap();
        let mut p = p;
        assert!(p.try_write(&mut s).is_ok());
        assert!(p.check_writable::<u64>(abi::SYS_ARGS_ADDRESS).is_err());
        // Heap starts empty.
        assert!(p.check_writable::<u8>(p.heap().base).is_err());
        p.set_brk(p.heap().base + 8);
        assert!(p.check_writable::<u64>(p.heap().base).is_ok());
    }

    #[test]
    fn c_string_reads_are_bounded_by_regions() {
        let mem = HostPages::new(9);
        let mut p = live(&mem, 0, 1, 10);
        let stack = p.memory().stack.as_usize();
        p.write_value::<[u8; 8]>(stack, *b"hello\0zz").unwrap();
        assert_eq!(p.read_c_str(stack, 64), Ok(UStr::Complete(b"hello")));
        assert_eq!(p.read_c_str(stack, 3), Ok(UStr::Truncated(b"hel")));

        // A string running into the end of the stack.
        let tail = stack + abi::STACK_SIZE - 4;
        p.write_value::<[u8; 4]>(tail, *b"abcd").unwrap();
        assert_eq!(
            p.read_c_str(tail, 64),
            Err(FaultInfo::SyscallUsage(abi::UsageError::UnterminatedString))
        );

        assert!(matches!(
            p.read_c_str(0x10, 64),
            Err(FaultInfo::MemoryAccess { address: Some(0x10), .. })
        ));
    }

    #[test]
    fn handles_are_one_based() {
        let mem = HostPages::new(9);
        let mut p = live(&mem, 0, 1, 10);
        let h = p.add_handle(PipeId(3)).unwrap();
        assert_eq!(h, PipeHandle(1));
        assert_eq!(p.handle(h), Some(PipeId(3)));
        assert_eq!(p.handle_for(PipeId(3)), Some(h));
        assert_eq!(p.handle(PipeHandle::NULL), None);
        assert_eq!(p.remove_handle(h), Some(PipeId(3)));
        assert_eq!(p.handle(h), None);
    }

    #[test]
    fn scan_prefers_priority_then_order() {
        let mem = HostPages::new(20);
        let procs = [
            live(&mem, 0, 1, 10),
            live(&mem, 6, 2, 20),
            live(&mem, 12, 3, 20),
        ];
        assert_eq!(select(0, &procs), Some(1));
        assert_eq!(select(1, &procs), Some(2));
        assert_eq!(select(2, &procs), Some(1));
    }

    #[test]
    fn timers_wake_sleepers() {
        let mem = HostPages::new(14);
        let mut procs = [live(&mem, 0, 1, 10), live(&mem, 6, 2, 10)];
        procs[1].sleep_until(Timestamp::from(10));
        assert_eq!(process_timers(&mut procs, Timestamp::from(9)), NextTask::Same);
        assert!(!procs[1].is_runnable());
        assert_eq!(
            process_timers(&mut procs, Timestamp::from(10)),
            NextTask::Specific(1)
        );
        assert!(procs[1].is_runnable());
    }

    #[test]
    fn combine() {
        use NextTask::*;
        assert_eq!(Same.combine(Same), Same);
        assert_eq!(Same.combine(Other), Other);
        assert_eq!(Specific(1).combine(Other), Specific(1));
        assert_eq!(Specific(1).combine(Specific(2)), Other);
    }
}
