// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-in for the architecture layer.
//!
//! Nothing here touches hardware. Saved register state is an ordinary struct
//! that tests fill in before calling into the syscall layer, and time only
//! moves when something idles or a test pushes it along.

use core::cell::Cell;

use crate::addr::VirtAddr;
use crate::fail;
use crate::privilege::{self, ExceptionLevel, PrivilegeControl, Transition};
use crate::task::Process;
use crate::time::Timestamp;

macro_rules! klog {
    ($($args:tt)*) => {
        println!($($args)*)
    };
}

macro_rules! uassert {
    ($cond:expr) => {
        assert!($cond)
    };
}

/// Register file as an exception would leave it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SavedState {
    pub x: [u64; 31],
    pub sp: u64,
    pub elr: u64,
    pub spsr: u64,
}

impl SavedState {
    /// Loads the registers the way `svc #0` would find them.
    pub fn set_syscall(&mut self, id: impl Into<u32>, args: [u64; 5]) {
        self.x[8] = u64::from(id.into());
        self.x[..5].copy_from_slice(&args);
    }

    /// Reads general register `i`.
    pub fn x(&self, i: usize) -> u64 {
        self.x[i]
    }
}

impl crate::task::ArchState for SavedState {
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
        self.x[8] as u32
    }

    fn ret0(&mut self, x: u64) {
        self.x[0] = x;
    }

    fn restart_syscall(&mut self) {
        self.elr = self.elr.wrapping_sub(4);
    }
}

/// A CPU that only remembers which exception level it is at.
#[derive(Debug)]
pub struct FakeCpu {
    level: ExceptionLevel,
}

/// Name the rest of the kernel uses for the CPU.
pub type Cpu = FakeCpu;

impl FakeCpu {
    pub fn at(level: ExceptionLevel) -> Self {
        Self { level }
    }
}

impl PrivilegeControl for FakeCpu {
    fn current_level(&self) -> ExceptionLevel {
        if self.level == ExceptionLevel::EL0 {
            fail::die("exception level read from EL0");
        }
        self.level
    }

    fn drop_to_el1(&mut self) {
        match privilege::plan(self.level, ExceptionLevel::EL1) {
            Transition::Stay => (),
            Transition::Return => self.level = ExceptionLevel::EL1,
            Transition::Illegal => fail::die("drop to EL1 from EL0"),
        }
    }

    fn drop_to_el0(&mut self, entry: VirtAddr, stack: VirtAddr) -> ! {
        match privilege::plan(self.level, ExceptionLevel::EL0) {
            Transition::Return => {
                panic!("entering EL0 at {entry:#x} with sp {stack:#x}")
            }
            _ => fail::die("drop to EL0 from outside EL1"),
        }
    }
}

std::thread_local! {
    static TICKS: Cell<u64> = const { Cell::new(0) };
}

pub fn now() -> Timestamp {
    TICKS.with(|t| t.get()).into()
}

/// Moves the fake clock forward.
pub fn advance(ticks: u64) {
    TICKS.with(|t| t.set(t.get().saturating_add(ticks)));
}

/// Waits for something to happen, which on the host means one tick passes.
pub fn idle() {
    advance(1);
}

/// Puts `save` in the state a fresh process starts from.
pub fn reinitialize(save: &mut SavedState, entry: VirtAddr, stack_top: VirtAddr) {
    *save = SavedState {
        sp: stack_top.as_usize() as u64,
        elr: entry.as_usize() as u64,
        ..SavedState::default()
    };
}

pub fn apply_memory_protection(_process: &Process) {}

/// # Safety
///
/// Always safe on the host. Unsafe to match the hardware version.
pub unsafe fn set_current_task(_process: &Process) {}

pub fn start_first_task(cpu: &mut Cpu, process: &Process) -> ! {
    apply_memory_protection(process);
    let save = process.save();
    cpu.drop_to_el0(
        VirtAddr::new(save.elr as usize),
        VirtAddr::new(save.sp as usize),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_to_el1_from_firmware_levels() {
        for level in [ExceptionLevel::EL3, ExceptionLevel::EL2, ExceptionLevel::EL1] {
            let mut cpu = FakeCpu::at(level);
            cpu.drop_to_el1();
            assert_eq!(cpu.current_level(), ExceptionLevel::EL1);
        }
    }

    #[test]
    #[should_panic(expected = "drop to EL1 from EL0")]
    fn drop_to_el1_from_el0_is_fatal() {
        FakeCpu::at(ExceptionLevel::EL0).drop_to_el1();
    }

    #[test]
    #[should_panic(expected = "exception level read from EL0")]
    fn el0_cannot_read_level() {
        FakeCpu::at(ExceptionLevel::EL0).current_level();
    }

    #[test]
    #[should_panic(expected = "entering EL0 at 0x80000")]
    fn drop_to_el0_from_el1() {
        FakeCpu::at(ExceptionLevel::EL1)
            .drop_to_el0(VirtAddr::new(0x8_0000), VirtAddr::new(0x9_0000));
    }

    #[test]
    #[should_panic(expected = "drop to EL0 from outside EL1")]
    fn drop_to_el0_from_el2_is_fatal() {
        FakeCpu::at(ExceptionLevel::EL2)
            .drop_to_el0(VirtAddr::new(0x8_0000), VirtAddr::new(0x9_0000));
    }

    #[test]
    fn clock_moves_on_idle() {
        let t0 = now();
        idle();
        advance(4);
        assert_eq!(u64::from(now()), u64::from(t0) + 5);
    }
}
