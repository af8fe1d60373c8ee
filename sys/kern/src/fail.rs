// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for recording kernel crashes/failures such that they can be found by
//! a debugger attached to the board.
//!
//! This module defines the following binary interface to debuggers:
//!
//! - `kern::fail::KERNEL_HAS_FAILED` is a `bool`. It is false until the kernel
//!   reaches `die` (either explicitly or as a result of a `panic!`), and true
//!   afterwards.
//!
//! - `kern::fail::KERNEL_EPITAPH` is an array of `u8`. The `die` routine
//!   writes as much of the failure reason into this buffer (as UTF-8) as
//!   possible, truncating if the buffer fills. Trailing NULs are padding.
//!
//! On the host there is nobody to read either of those, so `die` panics with
//! the message instead, which is what the tests look for.

use core::fmt::{Display, Write};

/// Length of the epitaph buffer.
pub const EPITAPH_LEN: usize = 128;

/// Writes a message into a fixed buffer, dropping whatever doesn't fit.
pub struct Eulogist<'a> {
    dest: &'a mut [u8],
}

impl<'a> Eulogist<'a> {
    pub fn new(dest: &'a mut [u8]) -> Self {
        Self { dest }
    }
}

impl Write for Eulogist<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = core::mem::take(&mut self.dest).split_at_mut(n);
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}

#[cfg(target_os = "none")]
mod record {
    use core::sync::atomic::{AtomicBool, Ordering};

    use super::EPITAPH_LEN;

    /// Flag that gets set to `true` by all failure reporting functions,
    /// giving tools a one-stop-shop for doing kernel triage.
    #[used]
    #[no_mangle]
    pub static KERNEL_HAS_FAILED: AtomicBool = AtomicBool::new(false);

    #[used]
    #[no_mangle]
    pub static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

    pub fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
        if KERNEL_HAS_FAILED.swap(true, Ordering::SeqCst) {
            // Recursive failure. Panicking again would only make it worse.
            super::halt();
        }

        // Safety: only the one execution that flipped the flag gets here.
        unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
    }
}

#[cfg(target_os = "none")]
pub use record::{KERNEL_EPITAPH, KERNEL_HAS_FAILED};

/// Stops the kernel for good, recording `msg` for whoever comes looking.
#[inline(always)]
pub fn die(msg: impl Display) -> ! {
    die_impl(&msg)
}

#[cfg(target_os = "none")]
#[inline(never)]
fn die_impl(msg: &dyn Display) -> ! {
    let buf = record::begin_epitaph();
    write!(Eulogist::new(buf), "{msg}").ok();
    klog!("kernel died: {}", msg);
    halt()
}

#[cfg(not(target_os = "none"))]
#[inline(never)]
fn die_impl(msg: &dyn Display) -> ! {
    panic!("kernel died: {msg}")
}

#[cfg(target_os = "none")]
fn halt() -> ! {
    loop {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        crate::arch::idle();
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}
