// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reading the argument block the kernel leaves at `SYS_ARGS_ADDRESS`.

use core::ffi::CStr;

use abi::{ArgsHeader, ARGS_POINTER_SIZE};
use zerocopy::FromBytes;

/// The arguments a process was spawned with.
#[derive(Clone, Debug)]
pub struct Args<'a> {
    block: &'a [u8],
    base: usize,
    argc: usize,
    next: usize,
}

impl<'a> Args<'a> {
    /// Interprets `block` as an argument block that the process sees at
    /// address `base`. Returns `None` if the header or pointer array runs
    /// off the end.
    pub fn parse(block: &'a [u8], base: usize) -> Option<Self> {
        let (header, _) = ArgsHeader::read_from_prefix(block).ok()?;
        let argc = usize::try_from(header.argc).ok()?;
        let table_end = argc
            .checked_add(1)?
            .checked_mul(ARGS_POINTER_SIZE)?
            .checked_add(core::mem::size_of::<ArgsHeader>())?;
        if table_end > block.len() {
            return None;
        }
        Some(Self {
            block,
            base,
            argc,
            next: 0,
        })
    }

    pub fn argc(&self) -> usize {
        self.argc
    }

    fn pointer(&self, i: usize) -> u64 {
        let at = core::mem::size_of::<ArgsHeader>() + i * ARGS_POINTER_SIZE;
        let mut word = [0; ARGS_POINTER_SIZE];
        word.copy_from_slice(&self.block[at..at + ARGS_POINTER_SIZE]);
        u64::from_ne_bytes(word)
    }
}

impl<'a> Iterator for Args<'a> {
    type Item = &'a CStr;

    /// Stops early at a pointer that doesn't lead to a string inside the
    /// block.
    fn next(&mut self) -> Option<&'a CStr> {
        if self.next >= self.argc {
            return None;
        }
        let offset = usize::try_from(self.pointer(self.next))
            .ok()?
            .checked_sub(self.base)?;
        let s = CStr::from_bytes_until_nul(self.block.get(offset..)?).ok()?;
        self.next += 1;
        Some(s)
    }
}

/// This process's arguments.
#[cfg(target_os = "none")]
pub fn args() -> Args<'static> {
    // Safety: the kernel maps the argument page read-only into every
    // process before it starts, and never changes it afterwards.
    let block = unsafe {
        core::slice::from_raw_parts(abi::SYS_ARGS_ADDRESS as *const u8, abi::PAGE_SIZE)
    };
    Args::parse(block, abi::SYS_ARGS_ADDRESS).unwrap_or(Args {
        block,
        base: abi::SYS_ARGS_ADDRESS,
        argc: 0,
        next: 0,
    })
}
