// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup, and the kernel context it produces.

use core::ops::Range;

use abi::{
    Pid, Priority, RegionAttributes, SysError, PAGE_SIZE, STACK_SIZE,
    SYS_ARGS_ADDRESS,
};

use crate::addr::{PhysAddr, VirtAddr};
use crate::arch::{self, Cpu};
use crate::args::ArgsWriter;
use crate::boot::BootError;
use crate::config::{DEVICE_BASE, HEAP_LIMIT, MAX_PROCESSES};
use crate::mmu;
use crate::page_alloc::{self, VirtArena};
use crate::pipe::PipeTable;
use crate::syscalls::SyscallTable;
use crate::task::{self, NextTask, Process, Region, SlotMemory};

/// Everything the kernel keeps between exceptions.
pub struct Kernel {
    procs: [Process; MAX_PROCESSES],
    pipes: PipeTable,
    syscalls: SyscallTable,
    next_pid: u32,
    current: usize,
}

/// Where the first process comes from: the image the kernel was linked with.
#[derive(Clone, Debug)]
pub struct FirstProcess {
    pub entry: VirtAddr,
    pub image: Range<VirtAddr>,
}

/// Takes `pages` pages from `arena`, skipping any run that would cover the
/// page processes see their arguments through.
fn carve(arena: &mut VirtArena, pages: usize) -> Result<VirtAddr, BootError> {
    loop {
        let at = arena.allocate(pages).ok_or(BootError::OutOfPages)?;
        let span = at.as_usize()..at.as_usize() + pages * PAGE_SIZE;
        if !span.contains(&SYS_ARGS_ADDRESS) {
            return Ok(at);
        }
    }
}

/// Top of a slot's stack.
pub fn stack_top(stack: VirtAddr) -> VirtAddr {
    VirtAddr::new(stack.as_usize() + STACK_SIZE)
}

impl Kernel {
    /// Builds the kernel tables, giving every process slot its pages out of
    /// `arena`.
    pub fn new(arena: &mut VirtArena) -> Result<Self, BootError> {
        let blank = VirtAddr::new(0);
        let mut memory = [SlotMemory {
            stack: blank,
            args: blank,
            heap: blank,
            tables: blank,
        }; MAX_PROCESSES];
        for m in &mut memory {
            *m = SlotMemory {
                stack: carve(arena, STACK_SIZE / PAGE_SIZE)?,
                args: carve(arena, 1)?,
                heap: carve(arena, HEAP_LIMIT / PAGE_SIZE)?,
                tables: carve(arena, mmu::PROCESS_TABLE_PAGES)?,
            };
        }
        klog!("{} process slots, arena now {:#x}", MAX_PROCESSES, arena.section_end());

        Ok(Self {
            procs: core::array::from_fn(|i| Process::vacant(memory[i], HEAP_LIMIT)),
            pipes: PipeTable::new(),
            syscalls: SyscallTable::with_builtins(),
            next_pid: 1,
            current: 0,
        })
    }

    pub fn process(&self, index: usize) -> &Process {
        &self.procs[index]
    }

    pub fn process_mut(&mut self, index: usize) -> &mut Process {
        &mut self.procs[index]
    }

    pub fn processes(&self) -> &[Process] {
        &self.procs
    }

    pub fn pipes(&self) -> &PipeTable {
        &self.pipes
    }

    pub fn syscalls(&self) -> &SyscallTable {
        &self.syscalls
    }

    /// For subsystems adding their own calls.
    pub fn syscalls_mut(&mut self) -> &mut SyscallTable {
        &mut self.syscalls
    }

    /// Borrows the process and pipe tables at the same time.
    pub fn split_mut(&mut self) -> (&mut [Process], &mut PipeTable) {
        (&mut self.procs, &mut self.pipes)
    }

    /// Index of the process on the CPU.
    pub fn current(&self) -> usize {
        self.current
    }

    pub(crate) fn vacant_slot(&self) -> Option<usize> {
        self.procs.iter().position(Process::is_vacant)
    }

    /// Hands out the next pid that no live process holds. Pids count up from
    /// 1 and wrap back to 1, never 0.
    fn allocate_pid(&mut self) -> Pid {
        loop {
            let pid = Pid(self.next_pid);
            self.next_pid = self.next_pid.checked_add(1).unwrap_or(1);
            // Some pid is free: there are more pids than slots.
            if task::find_pid(&self.procs, pid).is_none() {
                return pid;
            }
        }
    }

    /// Puts a fresh process in vacant `slot`, whose argument page has already
    /// been written, ready to start at `entry`.
    pub(crate) fn start_process(
        &mut self,
        slot: usize,
        entry: VirtAddr,
        images: &[Region],
    ) -> Result<Pid, SysError> {
        uassert!(self.procs[slot].is_vacant());
        let pid = self.allocate_pid();
        let p = &mut self.procs[slot];
        p.occupy(pid, Priority::DEFAULT, images)
            .map_err(|_| SysError::OutOfMem)?;

        let mem = p.memory();
        // Safety: these pages were carved for this slot alone, and the slot
        // was vacant, so nothing refers to them.
        let root = unsafe {
            page_alloc::zero(mem.stack, STACK_SIZE / PAGE_SIZE);
            page_alloc::zero(mem.heap, HEAP_LIMIT / PAGE_SIZE);
            page_alloc::zero(mem.tables, mmu::PROCESS_TABLE_PAGES);
            mmu::write_process_map(
                mem.tables,
                DEVICE_BASE,
                PhysAddr::identity_of(mem.args),
                |r| p.user_access(r),
            )
        };
        p.set_root_table(root);
        arch::reinitialize(p.save_mut(), entry, stack_top(mem.stack));
        Ok(pid)
    }

    /// Creates the first process, with no arguments, from the kernel's
    /// linked-in user image. Returns its slot.
    pub fn spawn_first(&mut self, first: &FirstProcess) -> Result<usize, SysError> {
        let slot = self.vacant_slot().ok_or(SysError::OutOfMem)?;
        let args = self.procs[slot].memory().args;
        // Safety: the slot is vacant and its argument page is its own.
        let page = unsafe {
            core::slice::from_raw_parts_mut(args.as_mut_ptr::<u8>(), PAGE_SIZE)
        };
        page.fill(0);
        ArgsWriter::new(page, 0, SYS_ARGS_ADDRESS)
            .map_err(|_| SysError::OutOfMem)?
            .finish();

        let image = Region {
            base: first.image.start.as_usize(),
            size: first.image.end.as_usize() - first.image.start.as_usize(),
            attributes: RegionAttributes::READ
                | RegionAttributes::WRITE
                | RegionAttributes::EXECUTE
                | RegionAttributes::IMAGE,
        };
        let pid = self.start_process(slot, first.entry, &[image])?;
        klog!("first process pid {} at {:#x}", pid.0, first.entry);
        Ok(slot)
    }

    /// Chooses who runs after `current` returns from the kernel, given the
    /// hint it left, and installs their address space.
    pub fn switch_after(&mut self, current: usize, hint: NextTask) -> usize {
        // Woken sleepers compete on priority like everyone else.
        let hint = match task::process_timers(&mut self.procs, arch::now()) {
            NextTask::Same => hint,
            _ => hint.combine(NextTask::Other),
        };
        let next = match hint {
            NextTask::Same if self.procs[current].is_runnable() => current,
            NextTask::Specific(i) if self.procs[i].is_runnable() => i,
            _ => task::reschedule(&mut self.procs, current),
        };
        self.current = next;
        let p = &self.procs[next];
        arch::apply_memory_protection(p);
        // Safety: `p` lives in the kernel tables, which outlive any return
        // to user mode.
        unsafe { arch::set_current_task(p) };
        next
    }

    /// Makes `first` current and drops to it at EL0.
    pub fn enter_first(&mut self, cpu: &mut Cpu, first: usize) -> ! {
        self.current = first;
        let p = &self.procs[first];
        // Safety: as in `switch_after`.
        unsafe { arch::set_current_task(p) };
        arch::start_first_task(cpu, p)
    }
}

#[cfg(target_os = "none")]
mod global {
    use core::mem::MaybeUninit;
    use core::sync::atomic::{AtomicBool, Ordering};

    use super::Kernel;
    use crate::arch::Cpu;
    use crate::fail;

    /// Set while a `&mut Kernel` exists. Starts out `true` so nothing can
    /// reach the kernel before `launch` has put it in place.
    static KERNEL_IN_USE: AtomicBool = AtomicBool::new(true);

    static mut KERNEL: MaybeUninit<Kernel> = MaybeUninit::uninit();

    /// Runs `body` with exclusive access to the kernel.
    pub fn with_kernel<R>(body: impl FnOnce(&mut Kernel) -> R) -> R {
        if KERNEL_IN_USE.swap(true, Ordering::Acquire) {
            fail::die("kernel re-entered");
        }
        // Safety: `launch` initialized this before clearing the flag, and
        // the flag guarantees this is the only live reference.
        let k = unsafe { (*core::ptr::addr_of_mut!(KERNEL)).assume_init_mut() };
        let r = body(k);
        KERNEL_IN_USE.store(false, Ordering::Release);
        r
    }

    /// Moves `kernel` to its permanent home and runs the first process.
    pub fn launch(kernel: Kernel, cpu: &mut Cpu, first: usize) -> ! {
        // Safety: the flag is still `true` from boot, so nothing else can
        // be looking at the static.
        let k = unsafe { (*core::ptr::addr_of_mut!(KERNEL)).write(kernel) };
        KERNEL_IN_USE.store(false, Ordering::Release);
        k.enter_first(cpu, first)
    }
}

#[cfg(target_os = "none")]
pub use global::{launch, with_kernel};

/// The main kernel entry point, called from `_start` with the device tree
/// address the firmware passed in `x0`.
///
/// # Safety
///
/// Must be called exactly once, on the boot core, with translation off and
/// the kernel stack in place.
#[cfg(target_os = "none")]
#[no_mangle]
pub unsafe extern "C" fn start_kernel(dtb: usize) -> ! {
    use crate::boot::{self, BootLayout, MemoryProperties};
    use crate::fail;
    use crate::page_alloc::IntoIdentityMapped;
    use crate::privilege::PrivilegeControl;

    // Safety: this is the one place a `Cpu` is made.
    let mut cpu = unsafe { Cpu::new() };
    cpu.drop_to_el1();
    arch::install_vectors();
    klog!("kernel entered at {:?}, dtb {:#x}", cpu.current_level(), dtb);

    let Some(record) = boot::claim_record() else {
        fail::die("boot record already claimed");
    };
    let dtb = PhysAddr::new(dtb);
    // Safety: the firmware hands us a readable blob at this address.
    let dtb_size = unsafe { boot::dtb_total_size(dtb) }.unwrap_or_else(|e| fail::die(e));
    let layout = BootLayout {
        kernel: arch::kernel_image(),
        dtb,
        dtb_size,
        properties: MemoryProperties::ARM_ADDRESS_U64
            | MemoryProperties::ARM_SIZE_U64,
    };
    // Safety: translation is off and this is the only code running.
    let arena = unsafe { boot::bootstrap(record, &layout, DEVICE_BASE) }
        .unwrap_or_else(|e| fail::die(e));

    // Safety: the record's root table was just built to identity map all
    // of RAM, the kernel included.
    unsafe { arch::enable_mmu(PhysAddr::new(record.root_table as usize)) };
    let mut arena = arena.into_identity_mapped();

    let mut kernel = Kernel::new(&mut arena).unwrap_or_else(|e| fail::die(e));
    let first = FirstProcess {
        entry: arch::user_entry(),
        image: arch::user_image(),
    };
    let slot = kernel
        .spawn_first(&first)
        .unwrap_or_else(|e| fail::die(format_args!("first process: {e:?}")));
    launch(kernel, &mut cpu, slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_alloc::host::HostPages;
    use crate::privilege::ExceptionLevel;
    use abi::ProcessState;

    /// Pages one slot takes out of the arena.
    const SLOT_PAGES: usize =
        STACK_SIZE / PAGE_SIZE + 1 + HEAP_LIMIT / PAGE_SIZE + mmu::PROCESS_TABLE_PAGES;

    fn kernel(mem: &HostPages) -> Kernel {
        Kernel::new(&mut mem.arena()).unwrap()
    }

    fn first(mem: &HostPages) -> FirstProcess {
        // The arena never hands out its last page, so it can stand in for
        // the image. Nothing executes it.
        let start = VirtAddr::new(mem.end() - PAGE_SIZE);
        FirstProcess {
            entry: start,
            image: start..VirtAddr::new(mem.end()),
        }
    }

    #[test]
    fn slots_start_vacant_with_their_own_pages() {
        let mem = HostPages::new(MAX_PROCESSES * SLOT_PAGES + 1);
        let k = kernel(&mem);
        assert!(k.processes().iter().all(Process::is_vacant));
        let a = k.process(0).memory();
        let b = k.process(1).memory();
        assert_ne!(a.stack, b.stack);
        assert_eq!(a.heap.as_usize() - a.stack.as_usize(), 3 * PAGE_SIZE);
    }

    #[test]
    fn too_few_pages_is_an_error() {
        let mem = HostPages::new(SLOT_PAGES);
        assert_eq!(
            Kernel::new(&mut mem.arena()).err(),
            Some(BootError::OutOfPages)
        );
    }

    #[test]
    fn first_process_is_pid_one_with_empty_args() {
        let mem = HostPages::new(MAX_PROCESSES * SLOT_PAGES + 1);
        let mut k = kernel(&mem);
        let slot = k.spawn_first(&first(&mem)).unwrap();
        let p = k.process(slot);
        assert_eq!(p.pid(), Pid(1));
        assert_eq!(p.priority(), Priority::DEFAULT);
        assert!(matches!(p.state(), ProcessState::Healthy(_)));
        assert_eq!(
            p.save().sp as usize,
            p.memory().stack.as_usize() + STACK_SIZE
        );
        let header = mem.bytes(p.memory().args.as_usize(), 16);
        assert_eq!(header, &[0; 16]);
    }

    #[test]
    fn switch_prefers_same_then_highest_priority() {
        let mem = HostPages::new(MAX_PROCESSES * SLOT_PAGES + 1);
        let mut k = kernel(&mem);
        let a = k.spawn_first(&first(&mem)).unwrap();
        let b = k.spawn_first(&first(&mem)).unwrap();
        k.process_mut(b).set_priority(Priority(20));

        assert_eq!(k.switch_after(a, NextTask::Same), a);
        assert_eq!(k.switch_after(a, NextTask::Other), b);
        assert_eq!(k.current(), b);
    }

    #[test]
    fn wrapped_pids_skip_live_processes() {
        let mem = HostPages::new(MAX_PROCESSES * SLOT_PAGES + 1);
        let mut k = kernel(&mem);
        let a = k.spawn_first(&first(&mem)).unwrap();
        let b = k.spawn_first(&first(&mem)).unwrap();
        assert_eq!((k.process(a).pid(), k.process(b).pid()), (Pid(1), Pid(2)));

        k.next_pid = u32::MAX;
        let c = k.spawn_first(&first(&mem)).unwrap();
        assert_eq!(k.process(c).pid(), Pid(u32::MAX));
        // 1 and 2 are still alive, so the counter lands on 3.
        let d = k.spawn_first(&first(&mem)).unwrap();
        assert_eq!(k.process(d).pid(), Pid(3));
    }

    #[test]
    #[should_panic(expected = "entering EL0")]
    fn entering_first_process_drops_to_el0() {
        let mem = HostPages::new(MAX_PROCESSES * SLOT_PAGES + 1);
        let mut k = kernel(&mem);
        let slot = k.spawn_first(&first(&mem)).unwrap();
        let mut cpu = Cpu::at(ExceptionLevel::EL1);
        k.enter_first(&mut cpu, slot);
    }
}
