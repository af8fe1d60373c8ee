// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for AArch64 (ARMv8-A), as found on the Raspberry Pi 3.
//!
//! # Entry and exit
//!
//! The kernel runs at EL1 on `SP_EL1`, processes at EL0 on `SP_EL0`. Every
//! exception taken from EL0 lands in the same assembly stub, which deposits
//! the full register file into the current process's `SavedState` (found
//! through `CURRENT_TASK_PTR`), calls into Rust, and then reloads the
//! register file from whatever `CURRENT_TASK_PTR` points at by then. Context
//! switching is therefore nothing more than changing that pointer (and the
//! translation table base) before returning.
//!
//! Because we always save everything, a syscall handler can read and write
//! any user register, and rewinding `ELR_EL1` by one instruction re-executes
//! the `svc`, which is how blocked calls retry.
//!
//! # Link-time symbols
//!
//! The application's linker script must provide `__kernel_start`,
//! `__kernel_end`, `__kernel_stack_top`, `__bss_start`, `__bss_end`,
//! `__user_image_start` and `__user_image_end`, and put `.text.boot` at the
//! load address. The first process starts at the user runtime's `_start`.

use core::arch::{asm, global_asm};
use core::sync::atomic::{AtomicPtr, Ordering};

use aarch64_cpu::asm::barrier;
use aarch64_cpu::registers::*;
use abi::{FaultInfo, FaultSource};
use static_assertions::const_assert_eq;

use crate::addr::{PhysAddr, VirtAddr};
use crate::fail;
use crate::privilege::{self, ExceptionLevel, PrivilegeControl, Transition};
use crate::task::{self, Process};
use crate::time::Timestamp;

cfg_if::cfg_if! {
    if #[cfg(feature = "klog-uart")] {
        macro_rules! klog {
            ($($args:tt)*) => {
                $crate::arch::klog_fmt(format_args!($($args)*))
            };
        }
    } else {
        macro_rules! klog {
            ($($args:tt)*) => {{
                let _ = format_args!($($args)*);
            }};
        }
    }
}

macro_rules! uassert {
    ($cond : expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

/// Register file of a process, as the exception stub stores it.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct SavedState {
    x: [u64; 31],
    sp: u64,
    elr: u64,
    spsr: u64,
}

// The assembly below hardcodes these.
const_assert_eq!(core::mem::offset_of!(SavedState, sp), 248);
const_assert_eq!(core::mem::offset_of!(SavedState, elr), 256);
const_assert_eq!(core::mem::offset_of!(SavedState, spsr), 264);

impl task::ArchState for SavedState {
    fn stack_pointer(&self) -> u64 {
        self.sp
    }

    fn program_counter(&self) -> u64 {
        self.elr
    }

    fn arg0(&self) -> u64 {
        self.x[0]
    }
    fn arg1(&self) -> u64 {
        self.x[1]
    }
    fn arg2(&self) -> u64 {
        self.x[2]
    }
    fn arg3(&self) -> u64 {
        self.x[3]
    }
    fn arg4(&self) -> u64 {
        self.x[4]
    }

    fn syscall_descriptor(&self) -> u32 {
        // The number travels in w8.
        self.x[8] as u32
    }

    fn ret0(&mut self, x: u64) {
        self.x[0] = x;
    }

    fn restart_syscall(&mut self) {
        self.elr = self.elr.wrapping_sub(4);
    }
}

/// `SavedState` of the process on the CPU. Read by the exception stub, so
/// it must stay a plain pointer-sized static.
#[no_mangle]
static CURRENT_TASK_PTR: AtomicPtr<SavedState> =
    AtomicPtr::new(core::ptr::null_mut());

/// SPSR for EL1h with D, A, I and F masked.
const SPSR_EL1H_MASKED: u64 = 0x3c5;
/// SPSR for EL0t.
const SPSR_EL0T: u64 = 0;
/// SCR_EL3: NS, RW, and the two RES1 bits.
const SCR_EL3_EL1_AARCH64: u64 = (1 << 10) | (1 << 5) | (1 << 4) | 1;

/// The boot core.
#[derive(Debug)]
pub struct Cpu {
    _private: (),
}

impl Cpu {
    /// # Safety
    ///
    /// There is one CPU in use; create one of these, once.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

fn raw_level() -> u8 {
    ((CurrentEL.get() >> 2) & 0x3) as u8
}

impl PrivilegeControl for Cpu {
    fn current_level(&self) -> ExceptionLevel {
        match ExceptionLevel::try_from(raw_level()) {
            Ok(ExceptionLevel::EL0) | Err(_) => {
                fail::die("exception level read from EL0")
            }
            Ok(level) => level,
        }
    }

    fn drop_to_el1(&mut self) {
        let level = self.current_level();
        match privilege::plan(level, ExceptionLevel::EL1) {
            Transition::Stay => (),
            Transition::Return if level == ExceptionLevel::EL2 => {
                HCR_EL2.write(HCR_EL2::RW::EL1IsAarch64 + HCR_EL2::SWIO::SET);
                CNTHCTL_EL2
                    .write(CNTHCTL_EL2::EL1PCTEN::SET + CNTHCTL_EL2::EL1PCEN::SET);
                // Safety: we're at EL2 and come back at the label on SP_EL1,
                // which we point at the stack we're on, so Rust never
                // notices the level changed.
                unsafe {
                    asm!(
                        "mov {tmp}, sp",
                        "msr sp_el1, {tmp}",
                        "msr cntvoff_el2, xzr",
                        "msr spsr_el2, {spsr}",
                        "adr {tmp}, 1f",
                        "msr elr_el2, {tmp}",
                        "eret",
                        "1:",
                        tmp = out(reg) _,
                        spsr = in(reg) SPSR_EL1H_MASKED,
                    );
                }
            }
            Transition::Return => {
                HCR_EL2.write(HCR_EL2::RW::EL1IsAarch64);
                // Safety: as above, for EL3.
                unsafe {
                    asm!(
                        "msr scr_el3, {scr}",
                        "mov {tmp}, sp",
                        "msr sp_el1, {tmp}",
                        "msr spsr_el3, {spsr}",
                        "adr {tmp}, 1f",
                        "msr elr_el3, {tmp}",
                        "eret",
                        "1:",
                        tmp = out(reg) _,
                        scr = in(reg) SCR_EL3_EL1_AARCH64,
                        spsr = in(reg) SPSR_EL1H_MASKED,
                    );
                }
            }
            Transition::Illegal => fail::die("drop to EL1 from EL0"),
        }
    }

    fn drop_to_el0(&mut self, entry: VirtAddr, stack: VirtAddr) -> ! {
        if privilege::plan(self.current_level(), ExceptionLevel::EL0)
            != Transition::Return
        {
            fail::die("drop to EL0 from outside EL1");
        }
        SP_EL0.set(stack.as_usize() as u64);
        ELR_EL1.set(entry.as_usize() as u64);
        SPSR_EL1.set(SPSR_EL0T);
        // Safety: this frame is abandoned; exceptions come back in on a
        // fresh kernel stack.
        unsafe {
            asm!(
                "mov sp, {top}",
                "eret",
                top = in(reg) core::ptr::addr_of!(__kernel_stack_top),
                options(noreturn),
            )
        }
    }
}

global_asm! {"
    .section .text.boot, \"ax\"
    .globl _kernel_boot
_kernel_boot:
    // Everyone but core 0 waits forever.
    mrs x1, mpidr_el1
    and x1, x1, #3
    cbz x1, 2f
1:  wfe
    b 1b
2:  ldr x1, =__kernel_stack_top
    mov sp, x1
    ldr x1, =__bss_start
    ldr x2, =__bss_end
3:  cmp x1, x2
    b.hs 4f
    str xzr, [x1], #8
    b 3b
    // x0 still holds the device tree address from the firmware.
4:  bl start_kernel
    b 1b

    .section .text.vectors, \"ax\"
    .balign 0x800
    .globl exception_vectors
exception_vectors:
    // Current EL with SP_EL0, then SP_ELx: never expected.
    .rept 8
    .balign 0x80
    b unexpected_exception_stub
    .endr
    // Lower EL, AArch64.
    .balign 0x80
    b el0_sync
    .rept 3
    .balign 0x80
    b unexpected_exception_stub
    .endr
    // Lower EL, AArch32: we don't run any.
    .rept 4
    .balign 0x80
    b unexpected_exception_stub
    .endr

el0_sync:
    stp x0, x1, [sp, #-16]!
    ldr x0, =CURRENT_TASK_PTR
    ldr x0, [x0]
    stp x2, x3, [x0, #16]
    stp x4, x5, [x0, #32]
    stp x6, x7, [x0, #48]
    stp x8, x9, [x0, #64]
    stp x10, x11, [x0, #80]
    stp x12, x13, [x0, #96]
    stp x14, x15, [x0, #112]
    stp x16, x17, [x0, #128]
    stp x18, x19, [x0, #144]
    stp x20, x21, [x0, #160]
    stp x22, x23, [x0, #176]
    stp x24, x25, [x0, #192]
    stp x26, x27, [x0, #208]
    stp x28, x29, [x0, #224]
    str x30, [x0, #240]
    ldp x2, x3, [sp], #16
    stp x2, x3, [x0, #0]
    mrs x2, sp_el0
    mrs x3, elr_el1
    stp x2, x3, [x0, #248]
    mrs x2, spsr_el1
    str x2, [x0, #264]

    mrs x0, esr_el1
    mrs x1, far_el1
    bl exception_entry

    // Possibly someone else now.
    ldr x0, =CURRENT_TASK_PTR
    ldr x0, [x0]
    ldp x2, x3, [x0, #248]
    msr sp_el0, x2
    msr elr_el1, x3
    ldr x2, [x0, #264]
    msr spsr_el1, x2
    ldp x2, x3, [x0, #16]
    ldp x4, x5, [x0, #32]
    ldp x6, x7, [x0, #48]
    ldp x8, x9, [x0, #64]
    ldp x10, x11, [x0, #80]
    ldp x12, x13, [x0, #96]
    ldp x14, x15, [x0, #112]
    ldp x16, x17, [x0, #128]
    ldp x18, x19, [x0, #144]
    ldp x20, x21, [x0, #160]
    ldp x22, x23, [x0, #176]
    ldp x24, x25, [x0, #192]
    ldp x26, x27, [x0, #208]
    ldp x28, x29, [x0, #224]
    ldr x30, [x0, #240]
    ldp x0, x1, [x0, #0]
    eret

unexpected_exception_stub:
    mrs x0, esr_el1
    mrs x1, elr_el1
    bl unexpected_exception
"}

/// Exception classes we tell apart, from ESR_EL1.EC.
const EC_SVC64: u64 = 0x15;
const EC_IABT_LOWER: u64 = 0x20;
const EC_DABT_LOWER: u64 = 0x24;

#[no_mangle]
extern "C" fn exception_entry(esr: u64, far: u64) {
    match (esr >> 26) & 0x3f {
        EC_SVC64 => crate::syscalls::syscall_entry(),
        EC_IABT_LOWER | EC_DABT_LOWER => user_fault(FaultInfo::MemoryAccess {
            address: Some(far as usize),
            source: FaultSource::User,
        }),
        _ => user_fault(FaultInfo::InvalidOperation(esr)),
    }
}

fn user_fault(fault: FaultInfo) {
    crate::startup::with_kernel(|k| {
        let current = k.current();
        let (procs, pipes) = k.split_mut();
        let hint = task::force_fault(procs, pipes, current, fault);
        k.switch_after(current, hint);
    });
}

#[no_mangle]
extern "C" fn unexpected_exception(esr: u64, elr: u64) -> ! {
    fail::die(format_args!(
        "unexpected exception: esr {esr:#x} at {elr:#x}"
    ))
}

pub fn install_vectors() {
    extern "C" {
        static exception_vectors: u8;
    }
    // Safety: we only take the address.
    let base = unsafe { core::ptr::addr_of!(exception_vectors) } as u64;
    VBAR_EL1.set(base);
    barrier::isb(barrier::SY);
}

/// TCR_EL1: 48-bit TTBR0 space, 4 KiB granule, inner shareable write-back
/// walks, TTBR1 walks disabled, 40-bit physical addresses.
const TCR_VALUE: u64 = 16 | (1 << 8) | (1 << 10) | (3 << 12) | (1 << 23) | (2 << 32);

/// Turns on translation with `root` as the TTBR0 table.
///
/// # Safety
///
/// `root` must identity map everything the kernel touches, its own image
/// and stack included.
pub unsafe fn enable_mmu(root: PhysAddr) {
    MAIR_EL1.set(crate::mmu::MAIR_VALUE);
    TCR_EL1.set(TCR_VALUE);
    TTBR0_EL1.set_baddr(root.as_usize() as u64);
    barrier::dsb(barrier::ISH);
    barrier::isb(barrier::SY);
    // Safety: no stale translations can matter yet; this drops them anyway.
    unsafe { asm!("tlbi vmalle1", options(nostack)) };
    barrier::dsb(barrier::ISH);
    barrier::isb(barrier::SY);
    SCTLR_EL1.modify(
        SCTLR_EL1::M::Enable + SCTLR_EL1::C::Cacheable + SCTLR_EL1::I::Cacheable,
    );
    barrier::isb(barrier::SY);
}

/// Switches EL0's view of memory to `process`'s map.
pub fn apply_memory_protection(process: &Process) {
    TTBR0_EL1.set_baddr(process.root_table().as_usize() as u64);
    barrier::dsb(barrier::ISHST);
    // Safety: the kernel is identity mapped identically in every process
    // map, so flushing can't pull the rug out from under us.
    unsafe { asm!("tlbi vmalle1", options(nostack)) };
    barrier::dsb(barrier::ISH);
    barrier::isb(barrier::SY);
}

/// Makes `process` the one the exception stub saves into and restores from.
///
/// # Safety
///
/// `process` must stay put until the next call.
pub unsafe fn set_current_task(process: &Process) {
    let save = process.save() as *const SavedState as *mut SavedState;
    CURRENT_TASK_PTR.store(save, Ordering::Relaxed);
}

pub fn reinitialize(save: &mut SavedState, entry: VirtAddr, stack_top: VirtAddr) {
    *save = SavedState {
        sp: stack_top.as_usize() as u64,
        elr: entry.as_usize() as u64,
        spsr: SPSR_EL0T,
        ..SavedState::default()
    };
}

pub fn start_first_task(cpu: &mut Cpu, process: &Process) -> ! {
    apply_memory_protection(process);
    cpu.drop_to_el0(
        VirtAddr::new(process.save().elr as usize),
        VirtAddr::new(process.save().sp as usize),
    )
}

pub fn now() -> Timestamp {
    let per_tick = (CNTFRQ_EL0.get() * crate::config::TICK_US / 1_000_000).max(1);
    Timestamp::from(CNTPCT_EL0.get() / per_tick)
}

/// Nothing interrupts us, so waiting for time to pass is a spin.
pub fn idle() {
    core::hint::spin_loop();
}

extern "C" {
    static __kernel_stack_top: u8;
    static __kernel_start: u8;
    static __kernel_end: u8;
    static __user_image_start: u8;
    static __user_image_end: u8;
    fn _start() -> !;
}

/// Physical extent of the kernel image.
pub fn kernel_image() -> core::ops::Range<PhysAddr> {
    // Safety: linker symbols; only their addresses are used.
    unsafe {
        PhysAddr::new(core::ptr::addr_of!(__kernel_start) as usize)
            ..PhysAddr::new(core::ptr::addr_of!(__kernel_end) as usize)
    }
}

/// Extent of the program image processes run from.
pub fn user_image() -> core::ops::Range<VirtAddr> {
    // Safety: as above.
    unsafe {
        VirtAddr::new(core::ptr::addr_of!(__user_image_start) as usize)
            ..VirtAddr::new(core::ptr::addr_of!(__user_image_end) as usize)
    }
}

pub fn user_entry() -> VirtAddr {
    VirtAddr::new(_start as usize)
}

#[cfg(feature = "klog-uart")]
mod uart {
    use core::fmt::Write;

    /// PL011 data and flag registers, and the transmit-FIFO-full flag.
    const UART_DR: usize = 0x00;
    const UART_FR: usize = 0x18;
    const UART_FR_TXFF: u32 = 1 << 5;

    struct Pl011;

    impl Write for Pl011 {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let base = crate::config::KLOG_UART;
            for b in s.bytes() {
                // Safety: the UART sits in the device window, identity
                // mapped as device memory in every map.
                unsafe {
                    let fr = (base + UART_FR) as *const u32;
                    while fr.read_volatile() & UART_FR_TXFF != 0 {}
                    ((base + UART_DR) as *mut u32).write_volatile(u32::from(b));
                }
            }
            Ok(())
        }
    }

    pub fn klog_fmt(args: core::fmt::Arguments<'_>) {
        let mut uart = Pl011;
        uart.write_fmt(args).ok();
        uart.write_str("\r\n").ok();
    }
}

#[cfg(feature = "klog-uart")]
pub use uart::klog_fmt;
