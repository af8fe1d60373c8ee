// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AArch64 translation table construction.
//!
//! Everything here is plain arithmetic on descriptor words plus volatile
//! stores into pages the caller has allocated, so it runs on the host too.
//! Turning the tables on is the arch module's job.
//!
//! Two shapes of map are built, both covering the low 2 GiB with a 4 KiB
//! granule and a 48-bit input range:
//!
//! - The boot map: L0 -> L1 -> L2, identity 2 MiB blocks for the first GiB
//!   (normal memory below the device window, device memory from it up) and a
//!   1 GiB device block for the second GiB. Nothing is reachable from EL0.
//! - A process map: the same, except that blocks overlapping the process's
//!   own memory are opened to EL0, and the 2 MiB block at
//!   `SYS_ARGS_ADDRESS` is split into pages so the first one can show the
//!   process its own argument page.
//!
//! Blocks are the unit of protection. A block is read-only to EL0 when every
//! region the process has in it is read-only, and writable as soon as one of
//! them is. Kernel code and data must not share a block with process memory.

use abi::{PAGE_SIZE, SYS_ARGS_ADDRESS};
use core::ops::Range;
use static_assertions::const_assert;

use crate::addr::{PhysAddr, VirtAddr};

bitflags::bitflags! {
    /// Bits of a stage 1 descriptor that this kernel uses.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Descriptor: u64 {
        const VALID = 1 << 0;
        /// Next-level table at L0-L2; page (rather than reserved) at L3.
        const TABLE = 1 << 1;
        /// MAIR attribute index 1, device nGnRnE. Index 0 is normal memory.
        const ATTR_DEVICE = 1 << 2;
        const AP_EL0 = 1 << 6;
        const AP_RO = 1 << 7;
        const SH_INNER = 0b11 << 8;
        const AF = 1 << 10;
        const PXN = 1 << 53;
        const UXN = 1 << 54;
    }
}

/// Output address bits of a descriptor.
pub const ADDR_MASK: u64 = 0x0000_ffff_ffff_f000;

/// Entries in one table page.
pub const ENTRIES: usize = PAGE_SIZE / core::mem::size_of::<u64>();

pub const L1_BLOCK: usize = 1 << 30;
pub const L2_BLOCK: usize = 1 << 21;

/// Pages needed for the boot map.
pub const BOOT_TABLE_PAGES: usize = 3;
/// Pages needed for one process map.
pub const PROCESS_TABLE_PAGES: usize = 4;

/// MAIR_EL1 value matching the attribute indices used here: index 0 normal
/// write-back, index 1 device nGnRnE.
pub const MAIR_VALUE: u64 = 0xff;

const_assert!(SYS_ARGS_ADDRESS % L2_BLOCK == 0);
const_assert!(SYS_ARGS_ADDRESS < L1_BLOCK);

pub fn l0_index(va: usize) -> usize {
    (va >> 39) % ENTRIES
}

pub fn l1_index(va: usize) -> usize {
    (va >> 30) % ENTRIES
}

pub fn l2_index(va: usize) -> usize {
    (va >> 21) % ENTRIES
}

pub fn l3_index(va: usize) -> usize {
    (va >> 12) % ENTRIES
}

/// Pointer to the next-level table at `next`.
pub fn table(next: PhysAddr) -> Descriptor {
    Descriptor::from_bits_retain(next.as_usize() as u64 & ADDR_MASK)
        | Descriptor::VALID
        | Descriptor::TABLE
}

/// What EL0 may do in one block or page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UserAccess {
    None,
    ReadOnly,
    ReadWrite,
}

/// Normal memory, privileged read-write, with EL0 access per `user`.
/// Anything EL0 can reach is never executable at EL1.
pub fn normal_block(pa: PhysAddr, user: UserAccess) -> Descriptor {
    let d = Descriptor::from_bits_retain(pa.as_usize() as u64 & ADDR_MASK)
        | Descriptor::VALID
        | Descriptor::SH_INNER
        | Descriptor::AF;
    match user {
        UserAccess::None => d | Descriptor::UXN,
        // AP[2] makes the block read-only at EL1 as well.
        UserAccess::ReadOnly => {
            d | Descriptor::AP_EL0 | Descriptor::AP_RO | Descriptor::PXN
        }
        UserAccess::ReadWrite => d | Descriptor::AP_EL0 | Descriptor::PXN,
    }
}

pub fn device_block(pa: PhysAddr) -> Descriptor {
    Descriptor::from_bits_retain(pa.as_usize() as u64 & ADDR_MASK)
        | Descriptor::VALID
        | Descriptor::ATTR_DEVICE
        | Descriptor::AF
        | Descriptor::PXN
        | Descriptor::UXN
}

/// Turns a block descriptor into the equivalent L3 page descriptor.
pub fn as_page(block: Descriptor) -> Descriptor {
    block | Descriptor::TABLE
}

/// Stores `d` in entry `index` of the table page at `table`.
///
/// # Safety
///
/// `table` must be a mapped, writable page that is not referenced from Rust.
unsafe fn store(table: VirtAddr, index: usize, d: Descriptor) {
    uassert!(index < ENTRIES);
    // Safety: in bounds of the page per our contract.
    unsafe { table.as_mut_ptr::<u64>().add(index).write_volatile(d.bits()) }
}

/// Reads entry `index` of the table page at `table`.
///
/// # Safety
///
/// As for `store`, minus writability.
pub unsafe fn load(table: VirtAddr, index: usize) -> Descriptor {
    uassert!(index < ENTRIES);
    // Safety: per our contract.
    Descriptor::from_bits_retain(unsafe {
        table.as_ptr::<u64>().add(index).read_volatile()
    })
}

fn nth_page(base: VirtAddr, n: usize) -> VirtAddr {
    VirtAddr::new(base.as_usize() + n * PAGE_SIZE)
}

/// Writes the L0/L1/L2 skeleton shared by both map shapes, and returns the
/// L2 page. `user` says what EL0 may do in each 2 MiB block.
///
/// # Safety
///
/// `tables` must point to at least three zeroed, writable, identity-mapped
/// pages.
unsafe fn write_skeleton(
    tables: VirtAddr,
    device_base: usize,
    user: impl Fn(Range<usize>) -> UserAccess,
) -> VirtAddr {
    let l0 = tables;
    let l1 = nth_page(tables, 1);
    let l2 = nth_page(tables, 2);

    // Safety: all three pages are ours, per our contract.
    unsafe {
        store(l0, 0, table(PhysAddr::identity_of(l1)));
        store(l1, 0, table(PhysAddr::identity_of(l2)));
        store(l1, 1, device_block(PhysAddr::new(L1_BLOCK)));

        for i in 0..ENTRIES {
            let base = i * L2_BLOCK;
            let d = if base < device_base {
                normal_block(PhysAddr::new(base), user(base..base + L2_BLOCK))
            } else {
                device_block(PhysAddr::new(base))
            };
            store(l2, i, d);
        }
    }
    l2
}

/// Builds the kernel's boot map and returns the root table.
///
/// # Safety
///
/// `tables` must point to `BOOT_TABLE_PAGES` zeroed, writable pages, visible
/// at their physical address.
pub unsafe fn write_boot_map(tables: VirtAddr, device_base: usize) -> PhysAddr {
    // Safety: passed through from our caller.
    unsafe { write_skeleton(tables, device_base, |_| UserAccess::None) };
    PhysAddr::identity_of(tables)
}

/// Builds a process map and returns the root table.
///
/// `user` decides, per 2 MiB block, what EL0 may do there. The block
/// holding `SYS_ARGS_ADDRESS` is split into pages: the first shows
/// `args_page` read-only to EL0, the rest stay identity mapped.
///
/// # Safety
///
/// `tables` must point to `PROCESS_TABLE_PAGES` zeroed, writable,
/// identity-mapped pages.
pub unsafe fn write_process_map(
    tables: VirtAddr,
    device_base: usize,
    args_page: PhysAddr,
    user: impl Fn(Range<usize>) -> UserAccess,
) -> PhysAddr {
    let l3 = nth_page(tables, 3);
    let window = SYS_ARGS_ADDRESS..SYS_ARGS_ADDRESS + L2_BLOCK;
    let window_user = user(window.clone());

    // Safety: passed through from our caller.
    unsafe {
        let l2 = write_skeleton(tables, device_base, &user);
        store(l2, l2_index(SYS_ARGS_ADDRESS), table(PhysAddr::identity_of(l3)));

        let args = normal_block(args_page, UserAccess::ReadOnly) | Descriptor::UXN;
        store(l3, 0, as_page(args));
        for j in 1..ENTRIES {
            let pa = PhysAddr::new(window.start + j * PAGE_SIZE);
            store(l3, j, as_page(normal_block(pa, window_user)));
        }
    }
    PhysAddr::identity_of(tables)
}

/// Walks `root` to find the descriptor covering `va`, for checking maps.
/// Returns the leaf and the size of what it maps.
///
/// # Safety
///
/// `root` and every table reachable from it must be identity-mapped pages.
pub unsafe fn lookup(root: PhysAddr, va: usize) -> Option<(Descriptor, usize)> {
    let mut tbl = VirtAddr::identity_mapped(root);
    let walk = [
        (l0_index(va), 0),
        (l1_index(va), L1_BLOCK),
        (l2_index(va), L2_BLOCK),
        (l3_index(va), PAGE_SIZE),
    ];
    for (level, (index, size)) in walk.into_iter().enumerate() {
        // Safety: per our contract.
        let d = unsafe { load(tbl, index) };
        if !d.contains(Descriptor::VALID) {
            return None;
        }
        if level == 3 || !d.contains(Descriptor::TABLE) {
            return Some((d, size));
        }
        tbl = VirtAddr::new((d.bits() & ADDR_MASK) as usize);
    }
    None
}
