// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent kernel logic.
//!
//! Everything in this crate is plain data manipulation with no hardware
//! access, so it builds and tests on the host. The kernel proper wraps these
//! types with its own address newtypes and unsafe memory access.

// Allow std-y things to be used in test. Note that this attribute is a bit of a
// trap for the programmer, because rust-analyzer by default seems to build
// things with test set. This means it's easy to introduce code incompatible
// with no_std without your editor hassling you about it. Beware.
#![cfg_attr(not(test), no_std)]
#![forbid(clippy::wildcard_imports)]

mod access;
mod arena;
mod ring;

pub use access::{can_access, MemoryRegion, UserSlice};
pub use arena::{Arena, PageAddress};
pub use ring::Ring;
