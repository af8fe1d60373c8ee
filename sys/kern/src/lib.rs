// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Privileged kernel core.
//!
//! This is the part of the operating system that runs at EL1: it brings the
//! CPU down from whatever exception level the firmware left it in, builds the
//! first address space out of a one-way page arena, and then serves syscalls
//! from processes running at EL0. Named pipes are the only way processes talk
//! to each other.
//!
//! Code outside of the `arch` module is portable. On the host, `arch` resolves
//! to a fake implementation whose saved register state can be poked directly,
//! which is how the tests drive the syscall layer.
//!
//! # Design principles
//!
//! 1. Static configuration. Table sizes are fixed at build time (see
//!    `build.rs`), and nothing is allocated after boot.
//! 2. Explicit context. The arena and the kernel tables are values passed
//!    around by reference, not globals, except at the very edge where the
//!    exception vectors need to find them.
//! 3. A strong preference for safe code where reasonable.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

pub mod addr;
pub mod args;
pub mod boot;
pub mod err;
pub mod fail;
pub mod mmu;
pub mod page_alloc;
pub mod pipe;
pub mod privilege;
pub mod startup;
pub mod syscalls;
pub mod task;
pub mod time;
pub mod umem;

/// Build-time tunables. See `build.rs`.
pub mod config {
    include!(concat!(env!("OUT_DIR"), "/consts.rs"));
}
