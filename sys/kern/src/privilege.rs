// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CPU exception levels and the transitions between them.

use core::convert::TryFrom;

use crate::addr::VirtAddr;

/// AArch64 exception level. Higher levels are more privileged, and the
/// derived ordering reflects that.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum ExceptionLevel {
    EL0 = 0,
    EL1 = 1,
    EL2 = 2,
    EL3 = 3,
}

impl TryFrom<u8> for ExceptionLevel {
    type Error = u8;

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::EL0),
            1 => Ok(Self::EL1),
            2 => Ok(Self::EL2),
            3 => Ok(Self::EL3),
            other => Err(other),
        }
    }
}

/// What it takes to get from one exception level to another.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transition {
    /// Already at the destination.
    Stay,
    /// One exception return does it.
    Return,
    /// Not something the kernel ever does.
    Illegal,
}

/// Works out how to move from `from` to `to`.
///
/// The kernel only ever moves downward, and only in two shapes: from firmware
/// levels (EL2, EL3) into EL1, and from EL1 into EL0.
pub fn plan(from: ExceptionLevel, to: ExceptionLevel) -> Transition {
    use ExceptionLevel::*;

    match (from, to) {
        (EL1, EL1) => Transition::Stay,
        (EL2 | EL3, EL1) | (EL1, EL0) => Transition::Return,
        _ => Transition::Illegal,
    }
}

/// Control over the current exception level.
///
/// Implemented by `arch::Cpu` on hardware and by the fake CPU on the host.
/// Violating the preconditions below halts the kernel.
pub trait PrivilegeControl {
    /// Reads the current exception level. Must not be called from EL0, which
    /// cannot read it.
    fn current_level(&self) -> ExceptionLevel;

    /// Drops from EL3 or EL2 to EL1; does nothing at EL1.
    fn drop_to_el1(&mut self);

    /// Enters EL0 at `entry` with stack pointer `stack`. Only legal from
    /// EL1, and never returns.
    fn drop_to_el0(&mut self, entry: VirtAddr, stack: VirtAddr) -> !;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExceptionLevel::*;

    #[test]
    fn levels_are_totally_ordered() {
        assert!(EL0 < EL1 && EL1 < EL2 && EL2 < EL3);
        let mut v = [EL3, EL0, EL2, EL1];
        v.sort();
        assert_eq!(v, [EL0, EL1, EL2, EL3]);
    }

    #[test]
    #[allow(clippy::eq_op)]
    fn levels_are_irreflexive() {
        for l in [EL0, EL1, EL2, EL3] {
            assert!(!(l < l));
            assert!(l <= l);
        }
    }

    #[test]
    fn raw_levels() {
        for l in [EL0, EL1, EL2, EL3] {
            assert_eq!(ExceptionLevel::try_from(l as u8), Ok(l));
        }
        assert_eq!(ExceptionLevel::try_from(4), Err(4));
    }

    #[test]
    fn transitions() {
        assert_eq!(plan(EL3, EL1), Transition::Return);
        assert_eq!(plan(EL2, EL1), Transition::Return);
        assert_eq!(plan(EL1, EL1), Transition::Stay);
        assert_eq!(plan(EL0, EL1), Transition::Illegal);
        assert_eq!(plan(EL1, EL0), Transition::Return);
        assert_eq!(plan(EL2, EL0), Transition::Illegal);
        assert_eq!(plan(EL0, EL0), Transition::Illegal);
    }
}
