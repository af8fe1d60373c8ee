// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for safely interacting with untrusted/unprivileged/user memory.

use core::marker::PhantomData;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use abi::UsageError;

/// A (user, untrusted, unprivileged) slice.
///
/// A `USlice` is passed into the kernel by a process, and is intended to refer
/// to memory that process controls -- for instance, as a place where the
/// kernel can deposit bytes read from a pipe. However, the `USlice` type
/// itself simply represents an _allegation_ from the process that a section of
/// address space is suitable; it does _not_ demonstrate that the process has
/// access to that memory. It could point into the kernel, to peripherals, etc.
///
/// Having a `USlice<T>` tells you the following:
///
/// - Some process has claimed it has access to a section of address space
///   (delimited by the `USlice`).
/// - The base of the section is correctly aligned for type `T`.
/// - The section does not wrap around the end of the address space.
///
/// To actually access the memory referred to by a `USlice`, you need to hand it
/// to `Process::try_read` or `Process::try_write` to validate it.
pub struct USlice<T> {
    /// Base address of the slice.
    base_address: usize,
    /// Number of `T` elements in the slice.
    length: usize,
    /// since we don't actually use T...
    _marker: PhantomData<*mut [T]>,
}

impl<T> USlice<T> {
    /// Constructs a `USlice` given a base address and length passed from
    /// untrusted code.
    ///
    /// This will only succeed if such a slice would not overlap or touch the
    /// top of the address space, and if `base_address` is correctly aligned for
    /// `T`.
    ///
    /// This method will categorically reject zero-sized T.
    pub fn from_raw(
        base_address: usize,
        length: usize,
    ) -> Result<Self, UsageError> {
        // NOTE: the properties checked here are critical for the correctness of
        // this type. Think carefully before loosening any of them, or adding a
        // second way to construct a USlice.

        uassert!(core::mem::size_of::<T>() != 0);

        if base_address % core::mem::align_of::<T>() != 0 {
            return Err(UsageError::InvalidSlice);
        }
        let size_in_bytes = length
            .checked_mul(core::mem::size_of::<T>())
            .ok_or(UsageError::InvalidSlice)?;
        // Cannot underflow: any usize can be subtracted from usize::MAX.
        let highest_possible_base = usize::MAX - size_in_bytes;
        if base_address <= highest_possible_base {
            Ok(Self {
                base_address,
                length,
                _marker: PhantomData,
            })
        } else {
            Err(UsageError::InvalidSlice)
        }
    }

    /// Shorthand for a slice of exactly one `T`, as used for out-parameters.
    pub fn single(base_address: usize) -> Result<Self, UsageError> {
        Self::from_raw(base_address, 1)
    }

    /// Returns `true` if this slice is zero-length, `false` otherwise.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the number of `T`s in this slice.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns the bottom address of this slice as a `usize`.
    pub fn base_addr(&self) -> usize {
        self.base_address
    }

    /// Returns the end address of the slice, which is the address one past its
    /// final byte -- or its base address if it's empty.
    pub fn end_addr(&self) -> usize {
        // Can't overflow; checked at construction.
        let size_in_bytes = self.length.wrapping_mul(core::mem::size_of::<T>());
        self.base_address.wrapping_add(size_in_bytes)
    }

    /// Returns a copy of this slice cut down to at most `n` elements.
    pub fn truncated(&self, n: usize) -> Self {
        Self {
            base_address: self.base_address,
            length: self.length.min(n),
            _marker: PhantomData,
        }
    }
}

impl<T> USlice<T>
where
    T: FromBytes + Immutable + KnownLayout,
{
    /// Converts this into an _actual_ slice that can be directly read by the
    /// kernel.
    ///
    /// If you are implementing a syscall, please have a look at
    /// `Process::try_read` instead.
    ///
    /// # Safety
    ///
    /// This operation is totally unchecked, so to use it safely, you must first
    /// convince yourself of the following.
    ///
    /// 1. That the memory region this `USlice` describes is actual memory,
    ///    visible at the same addresses from the kernel.
    /// 2. That this memory is legally readable by whatever process you're
    ///    doing work on behalf of.
    /// 3. That it does not alias any slice you intend to `&mut`-reference with
    ///    `assume_writable`, or any kernel memory.
    pub unsafe fn assume_readable(&self) -> &[T] {
        // Empty slices may have any base, including null, which
        // `from_raw_parts` won't take.
        if self.is_empty() {
            return &[];
        }
        // Safety: this function's contract ensures that the slice we produce
        // here is valid.
        unsafe {
            core::slice::from_raw_parts(
                self.base_address as *const T,
                self.length,
            )
        }
    }
}

impl<T> USlice<T>
where
    T: FromBytes + IntoBytes + Immutable + KnownLayout,
{
    /// Converts this into an _actual_ slice that can be directly read and
    /// written by the kernel.
    ///
    /// If you are implementing a syscall, please have a look at
    /// `Process::try_write` instead.
    ///
    /// # Safety
    ///
    /// As for `assume_readable`, except that the memory must be legally
    /// writable, and must not alias any other slice you intend to access.
    pub unsafe fn assume_writable(&mut self) -> &mut [T] {
        if self.is_empty() {
            return &mut [];
        }
        // Safety: this function's contract ensures that the slice we produce
        // here is valid.
        unsafe {
            core::slice::from_raw_parts_mut(
                self.base_address as *mut T,
                self.length,
            )
        }
    }
}

impl<T> Clone for USlice<T> {
    fn clone(&self) -> Self {
        Self {
            base_address: self.base_address,
            length: self.length,
            _marker: PhantomData,
        }
    }
}

/// Can't `derive(Debug)` for `USlice` because that puts a `Debug` requirement
/// on `T`, and that's silly.
impl<T> core::fmt::Debug for USlice<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("USlice")
            .field("base_address", &self.base_address)
            .field("length", &self.length)
            .finish()
    }
}

/// Compatibility with the generic portable algorithms in `kerncore`.
impl<T> kerncore::UserSlice for USlice<T> {
    fn is_empty(&self) -> bool {
        self.is_empty()
    }

    fn base_addr(&self) -> usize {
        self.base_addr()
    }

    fn end_addr(&self) -> usize {
        self.end_addr()
    }
}

/// Outcome of reading a NUL-terminated string out of process memory.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UStr<'a> {
    /// The whole string, without its terminator.
    Complete(&'a [u8]),
    /// No terminator within the length limit; this is the prefix up to the
    /// limit.
    Truncated(&'a [u8]),
}

impl<'a> UStr<'a> {
    pub fn bytes(self) -> &'a [u8] {
        match self {
            UStr::Complete(b) | UStr::Truncated(b) => b,
        }
    }

    /// The string, but only if it was terminated within the limit.
    pub fn complete(self) -> Option<&'a [u8]> {
        match self {
            UStr::Complete(b) => Some(b),
            UStr::Truncated(_) => None,
        }
    }
}

/// Finds the string at the start of `window`.
///
/// `window` is every readable byte from the string's start, up to `max`.
/// Running out of readable memory before `max` without finding a NUL is a
/// usage error; hitting `max` gives a truncated string.
pub fn scan_c_str(window: &[u8], max: usize) -> Result<UStr<'_>, UsageError> {
    let window = &window[..window.len().min(max)];
    match memchr::memchr(0, window) {
        Some(n) => Ok(UStr::Complete(&window[..n])),
        None if window.len() >= max => Ok(UStr::Truncated(&window[..max])),
        None => Err(UsageError::UnterminatedString),
    }
}
