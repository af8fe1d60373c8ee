// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Filling in a new process's argument block.
//!
//! See `abi::ArgsHeader` for the layout. The block is written through the
//! kernel's view of the page, but every pointer stored in it is relative to
//! where the process will see the page.

use abi::{ArgsHeader, ARGS_POINTER_SIZE};
use zerocopy::IntoBytes;

/// The arguments don't fit in the page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ArgsOverflow;

pub struct ArgsWriter<'a> {
    page: &'a mut [u8],
    user_base: usize,
    argc: usize,
    pushed: usize,
    next_string: usize,
}

impl<'a> ArgsWriter<'a> {
    /// Prepares `page` for `argc` strings. Fails if even the pointer array
    /// doesn't fit.
    pub fn new(
        page: &'a mut [u8],
        argc: usize,
        user_base: usize,
    ) -> Result<Self, ArgsOverflow> {
        let strings = argc
            .checked_add(1)
            .and_then(|n| n.checked_mul(ARGS_POINTER_SIZE))
            .and_then(|n| n.checked_add(core::mem::size_of::<ArgsHeader>()))
            .filter(|&n| n <= page.len())
            .ok_or(ArgsOverflow)?;
        Ok(Self {
            page,
            user_base,
            argc,
            pushed: 0,
            next_string: strings,
        })
    }

    /// Appends the next argument. `s` must not contain its terminator.
    pub fn push(&mut self, s: &[u8]) -> Result<(), ArgsOverflow> {
        if self.pushed == self.argc {
            return Err(ArgsOverflow);
        }
        let start = self.next_string;
        let end = start + s.len();
        if end >= self.page.len() {
            return Err(ArgsOverflow);
        }
        self.page[start..end].copy_from_slice(s);
        self.page[end] = 0;

        let user_ptr = (self.user_base + start) as u64;
        self.put_pointer(self.pushed, user_ptr);
        self.pushed += 1;
        self.next_string = end + 1;
        Ok(())
    }

    /// Writes the header and the terminating null pointer. Returns the
    /// number of bytes used.
    pub fn finish(mut self) -> usize {
        uassert!(self.pushed == self.argc);
        let header = ArgsHeader {
            argc: self.argc as u64,
        };
        self.page[..core::mem::size_of::<ArgsHeader>()]
            .copy_from_slice(header.as_bytes());
        self.put_pointer(self.argc, 0);
        self.next_string
    }

    fn put_pointer(&mut self, index: usize, value: u64) {
        let at = core::mem::size_of::<ArgsHeader>() + index * ARGS_POINTER_SIZE;
        self.page[at..at + ARGS_POINTER_SIZE].copy_from_slice(&value.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(page: &[u8], i: usize) -> u64 {
        let mut b = [0; 8];
        b.copy_from_slice(&page[i * 8..i * 8 + 8]);
        u64::from_ne_bytes(b)
    }

    #[test]
    fn lays_out_block() {
        let mut page = [0xEEu8; 128];
        let mut w = ArgsWriter::new(&mut page, 2, 0x100_0000).unwrap();
        w.push(b"ls").unwrap();
        w.push(b"-l").unwrap();
        assert_eq!(w.finish(), 32 + 6);

        assert_eq!(word(&page, 0), 2);
        assert_eq!(word(&page, 1), 0x100_0000 + 32);
        assert_eq!(word(&page, 2), 0x100_0000 + 35);
        assert_eq!(word(&page, 3), 0);
        assert_eq!(&page[32..38], b"ls\0-l\0");
    }

    #[test]
    fn empty_argument_list() {
        let mut page = [0xEEu8; 64];
        let w = ArgsWriter::new(&mut page, 0, 0x100_0000).unwrap();
        assert_eq!(w.finish(), 16);
        assert_eq!(word(&page, 0), 0);
        assert_eq!(word(&page, 1), 0);
    }

    #[test]
    fn overflow() {
        let mut page = [0u8; 32];
        assert_eq!(
            ArgsWriter::new(&mut page, 3, 0).err(),
            Some(ArgsOverflow)
        );
        let mut w = ArgsWriter::new(&mut page, 1, 0).unwrap();
        assert_eq!(w.push(b"sixteen-bytes!!!"), Err(ArgsOverflow));
        w.push(b"fits").unwrap();
        assert_eq!(w.push(b"x"), Err(ArgsOverflow));
    }
}
