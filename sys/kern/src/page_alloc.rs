// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Early page allocation.
//!
//! The arena logic itself lives in `kerncore`; this module pins it to the
//! kernel's address types and supplies the operations that actually touch
//! memory.

use abi::PAGE_SIZE;
use kerncore::Arena;

use crate::addr::{PhysAddr, VirtAddr};

/// Arena handing out physical pages, used before translation is enabled.
pub type PhysArena = Arena<PhysAddr>;

/// Arena handing out pages the kernel can dereference.
pub type VirtArena = Arena<VirtAddr>;

/// Conversion of a physical arena once the boot identity map is live.
pub trait IntoIdentityMapped {
    /// Consumes the arena, returning one over the same pages addressed
    /// through the identity map. Allocation state carries over.
    fn into_identity_mapped(self) -> VirtArena;
}

impl IntoIdentityMapped for PhysArena {
    fn into_identity_mapped(self) -> VirtArena {
        self.translate(VirtAddr::identity_mapped)
    }
}

/// Fills `pages` pages starting at `addr` with zeroes, a word at a time.
///
/// # Safety
///
/// `addr` must be page aligned, and the whole range must be mapped, writable,
/// and not aliased by any live Rust reference.
pub unsafe fn zero(addr: VirtAddr, pages: usize) {
    uassert!(addr.is_page_aligned());
    let words = pages * (PAGE_SIZE / core::mem::size_of::<u64>());
    let base = addr.as_mut_ptr::<u64>();
    for i in 0..words {
        // Safety: in range per this function's contract. Volatile so the
        // compiler can't decide the stores are dead before the MMU reads the
        // page as a table.
        unsafe { base.add(i).write_volatile(0) };
    }
}

/// Allocates `pages` pages from `arena` and zeroes them.
///
/// # Safety
///
/// Every page `arena` can hand out must be mapped and writable through the
/// addresses it returns.
pub unsafe fn allocate_zeroed(
    arena: &mut VirtArena,
    pages: usize,
) -> Option<VirtAddr> {
    let addr = arena.allocate(pages)?;
    // Safety: pages fresh from the arena are backed, per our contract, and
    // nobody else has been handed them.
    unsafe { zero(addr, pages) };
    Some(addr)
}

/// Page-aligned host memory standing in for RAM in tests.
#[cfg(test)]
pub(crate) mod host {
    use super::*;

    #[derive(Clone)]
    #[repr(C, align(4096))]
    pub struct Page(pub [u8; PAGE_SIZE]);

    pub struct HostPages {
        pages: Vec<Page>,
    }

    impl HostPages {
        pub fn new(count: usize) -> Self {
            Self {
                pages: vec![Page([0xA5; PAGE_SIZE]); count],
            }
        }

        pub fn base(&self) -> usize {
            self.pages.as_ptr() as usize
        }

        pub fn end(&self) -> usize {
            self.base() + self.pages.len() * PAGE_SIZE
        }

        pub fn arena(&self) -> VirtArena {
            VirtArena::new(VirtAddr::new(self.base()), VirtAddr::new(self.end()))
        }

        pub fn bytes(&self, addr: usize, len: usize) -> &[u8] {
            assert!(addr >= self.base() && addr + len <= self.end());
            // Safety: bounds checked against our own allocation just above.
            unsafe { core::slice::from_raw_parts(addr as *const u8, len) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::host::HostPages;
    use super::*;

    #[test]
    fn zero_clears_whole_pages_only() {
        let mem = HostPages::new(4);
        let mut arena = mem.arena();
        let first = arena.allocate(1).unwrap();
        let second = arena.allocate(2).unwrap();

        unsafe { zero(second, 2) };

        assert!(mem.bytes(second.as_usize(), 2 * PAGE_SIZE).iter().all(|&b| b == 0));
        assert!(mem.bytes(first.as_usize(), PAGE_SIZE).iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn allocate_zeroed_respects_bound() {
        let mem = HostPages::new(3);
        let mut arena = mem.arena();
        let p = unsafe { allocate_zeroed(&mut arena, 2) }.unwrap();
        assert_eq!(p.as_usize(), mem.base());
        assert!(mem.bytes(p.as_usize(), 2 * PAGE_SIZE).iter().all(|&b| b == 0));
        // The last page before the bound is never handed out.
        assert_eq!(unsafe { allocate_zeroed(&mut arena, 1) }, None);
    }

    #[test]
    fn identity_conversion_keeps_state() {
        let mut phys = PhysArena::new(PhysAddr::new(0x8_0000), PhysAddr::new(0x10_0000));
        phys.allocate(3).unwrap();
        let virt = phys.into_identity_mapped();
        assert_eq!(virt.section_start(), VirtAddr::new(0x8_0000));
        assert_eq!(virt.section_end(), VirtAddr::new(0x8_3000));
        assert_eq!(virt.upper_bound(), VirtAddr::new(0x10_0000));
        assert_eq!(virt.allocated_count(), 3);
    }
}
