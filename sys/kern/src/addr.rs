// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Physical and virtual address types.
//!
//! These are deliberately distinct: turning a physical address into something
//! the kernel can dereference always goes through an explicit conversion that
//! names the mapping being relied on.

use abi::PAGE_SIZE;
use kerncore::PageAddress;

/// An address on the physical bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct PhysAddr(usize);

/// An address as seen through the current translation tables.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct VirtAddr(usize);

macro_rules! common_addr_impl {
    ($t:ident) => {
        impl $t {
            pub const fn new(addr: usize) -> Self {
                Self(addr)
            }

            pub const fn as_usize(self) -> usize {
                self.0
            }

            pub const fn is_page_aligned(self) -> bool {
                self.0 % PAGE_SIZE == 0
            }

            /// Rounds down to the start of the containing page.
            pub const fn page_floor(self) -> Self {
                Self(self.0 & !(PAGE_SIZE - 1))
            }

            /// Rounds up to a page boundary, or `None` if that would leave
            /// the address space.
            pub fn page_ceil(self) -> Option<Self> {
                self.0
                    .checked_add(PAGE_SIZE - 1)
                    .map(|a| Self(a & !(PAGE_SIZE - 1)))
            }

            pub fn checked_add(self, bytes: usize) -> Option<Self> {
                self.0.checked_add(bytes).map(Self)
            }
        }

        impl PageAddress for $t {
            fn from_usize(addr: usize) -> Self {
                Self(addr)
            }

            fn to_usize(self) -> usize {
                self.0
            }
        }

        impl core::fmt::LowerHex for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

common_addr_impl!(PhysAddr);
common_addr_impl!(VirtAddr);

impl PhysAddr {
    /// The physical address backing `v` under an identity mapping.
    pub const fn identity_of(v: VirtAddr) -> Self {
        Self(v.0)
    }
}

impl VirtAddr {
    /// The address at which `p` is visible under an identity mapping.
    ///
    /// This is only meaningful while such a mapping is in force: before the
    /// MMU is enabled, or for ranges the boot map covers one-to-one.
    pub const fn identity_mapped(p: PhysAddr) -> Self {
        Self(p.0)
    }

    pub fn from_ptr<T>(p: *const T) -> Self {
        Self(p as usize)
    }

    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        let a = PhysAddr::new(0x4000_1234);
        assert_eq!(a.page_floor(), PhysAddr::new(0x4000_1000));
        assert_eq!(a.page_ceil(), Some(PhysAddr::new(0x4000_2000)));
        assert!(!a.is_page_aligned());

        let b = PhysAddr::new(0x8000);
        assert_eq!(b.page_floor(), b);
        assert_eq!(b.page_ceil(), Some(b));
        assert_eq!(PhysAddr::new(usize::MAX).page_ceil(), None);
    }

    #[test]
    fn identity_is_explicit_and_lossless() {
        let p = PhysAddr::new(0x3F20_1000);
        let v = VirtAddr::identity_mapped(p);
        assert_eq!(v.as_usize(), p.as_usize());
        assert_eq!(PhysAddr::identity_of(v), p);
    }
}
