// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Building the first address space.
//!
//! The kernel image carries one `MmuBootstrapRecord`, placed in `.data` with
//! literal contents so that it is present the moment the image is loaded,
//! before anything has had a chance to clear `.bss`. The boot path claims it
//! exactly once, fills it in while it lays out the boot translation tables,
//! and afterwards it serves as a description of the boot map for anyone
//! inspecting memory.

use core::fmt;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, Ordering};

use static_assertions::{const_assert, const_assert_eq};

use crate::addr::{PhysAddr, VirtAddr};
use crate::mmu;
use crate::page_alloc::{self, PhysArena};

/// First word of the record. Reads "MMUBOOT1" as big-endian ASCII.
pub const MMU_RECORD_MAGIC: u64 = 0x4d4d_5542_4f4f_5431;

/// Filler for fields not yet written. Non-zero so the record can never be
/// mistaken for, or placed as, zero-initialized data.
pub const UNSET: u64 = u64::MAX;

/// Flattened device tree header magic.
pub const DTB_MAGIC: u32 = 0xd00d_feed;

/// Field order is part of the image format; only append.
#[derive(Clone, Debug, Eq, PartialEq)]
#[repr(C)]
pub struct MmuBootstrapRecord {
    pub magic: u64,
    /// Physical address of the L0 table, once built.
    pub root_table: u64,
    pub arena_base: u64,
    pub arena_allocated: u64,
    pub arena_bound: u64,
    /// `MemoryProperties` bits.
    pub memory_properties: u64,
    pub dtb_page_start: u64,
    pub dtb_page_end: u64,
    pub kernel_start: u64,
    pub kernel_end: u64,
}

const_assert_eq!(core::mem::size_of::<MmuBootstrapRecord>(), 80);
const_assert!(core::mem::offset_of!(MmuBootstrapRecord, magic) == 0);

impl MmuBootstrapRecord {
    /// The record as linked into the image.
    pub const UNSET: Self = Self {
        magic: MMU_RECORD_MAGIC,
        root_table: UNSET,
        arena_base: UNSET,
        arena_allocated: UNSET,
        arena_bound: UNSET,
        memory_properties: UNSET,
        dtb_page_start: UNSET,
        dtb_page_end: UNSET,
        kernel_start: UNSET,
        kernel_end: UNSET,
    };
}

#[cfg_attr(target_os = "none", link_section = ".data")]
#[used]
static mut BOOT_RECORD: MmuBootstrapRecord = MmuBootstrapRecord::UNSET;

static BOOT_RECORD_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Hands out the image's bootstrap record. Only the first call gets it.
pub fn claim_record() -> Option<&'static mut MmuBootstrapRecord> {
    if BOOT_RECORD_CLAIMED.swap(true, Ordering::Acquire) {
        return None;
    }
    // Safety: the flag makes this the only reference ever created.
    Some(unsafe { &mut *core::ptr::addr_of_mut!(BOOT_RECORD) })
}

bitflags::bitflags! {
    /// Cell widths the device tree uses for memory nodes.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct MemoryProperties: u64 {
        const ARM_ADDRESS_U64 = 1 << 0;
        const ARM_SIZE_U64 = 1 << 1;
        const SOC_ADDRESS_U64 = 1 << 2;
        const SOC_SIZE_U64 = 1 << 3;
    }
}

/// Where things sit in physical memory when the kernel is entered.
#[derive(Clone, Debug)]
pub struct BootLayout {
    pub kernel: Range<PhysAddr>,
    pub dtb: PhysAddr,
    pub dtb_size: usize,
    pub properties: MemoryProperties,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootError {
    /// The record's magic word is wrong; the image is damaged or stale.
    BadRecord,
    /// The device tree blob has no valid header.
    BadDeviceTree,
    /// Nothing between the end of the kernel and the device tree.
    NoRoomForArena,
    /// The arena ran dry while building kernel structures.
    OutOfPages,
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRecord => f.write_str("MMU bootstrap record corrupt"),
            Self::BadDeviceTree => f.write_str("no device tree header"),
            Self::NoRoomForArena => {
                f.write_str("no free pages between kernel and device tree")
            }
            Self::OutOfPages => f.write_str("out of boot pages"),
        }
    }
}

/// Reads the total size out of a flattened device tree header.
///
/// # Safety
///
/// The first eight bytes at `dtb` must be readable.
pub unsafe fn dtb_total_size(dtb: PhysAddr) -> Result<usize, BootError> {
    let words = VirtAddr::identity_mapped(dtb).as_ptr::<u32>();
    // Safety: per our contract. The header fields are big-endian.
    let (magic, size) = unsafe {
        (
            u32::from_be(words.read_volatile()),
            u32::from_be(words.add(1).read_volatile()),
        )
    };
    if magic != DTB_MAGIC {
        return Err(BootError::BadDeviceTree);
    }
    Ok(size as usize)
}

/// Builds the boot identity map from the pages between the kernel image and
/// the device tree, recording what it did in `record`. Returns the arena
/// with the table pages already taken out of it.
///
/// # Safety
///
/// Must run with translation off (or under an identity map covering the
/// arena), and nothing else may be using the pages between `layout.kernel`
/// and `layout.dtb`.
pub unsafe fn bootstrap(
    record: &mut MmuBootstrapRecord,
    layout: &BootLayout,
    device_base: usize,
) -> Result<PhysArena, BootError> {
    if record.magic != MMU_RECORD_MAGIC {
        return Err(BootError::BadRecord);
    }

    let arena_base = layout
        .kernel
        .end
        .page_ceil()
        .ok_or(BootError::NoRoomForArena)?;
    let dtb_start = layout.dtb.page_floor();
    let dtb_end = layout
        .dtb
        .checked_add(layout.dtb_size)
        .and_then(PhysAddr::page_ceil)
        .ok_or(BootError::BadDeviceTree)?;
    if arena_base >= dtb_start {
        return Err(BootError::NoRoomForArena);
    }

    let mut arena = PhysArena::new(arena_base, dtb_start);
    let tables = arena
        .allocate(mmu::BOOT_TABLE_PAGES)
        .ok_or(BootError::OutOfPages)?;
    let tables = VirtAddr::identity_mapped(tables);
    // Safety: the pages are fresh from the arena, which our caller has
    // promised is ours and reachable at its physical addresses.
    let root = unsafe {
        page_alloc::zero(tables, mmu::BOOT_TABLE_PAGES);
        mmu::write_boot_map(tables, device_base)
    };

    *record = MmuBootstrapRecord {
        magic: MMU_RECORD_MAGIC,
        root_table: root.as_usize() as u64,
        arena_base: arena.section_start().as_usize() as u64,
        arena_allocated: arena.allocated_count() as u64,
        arena_bound: arena.upper_bound().as_usize() as u64,
        memory_properties: layout.properties.bits(),
        dtb_page_start: dtb_start.as_usize() as u64,
        dtb_page_end: dtb_end.as_usize() as u64,
        kernel_start: layout.kernel.start.as_usize() as u64,
        kernel_end: layout.kernel.end.as_usize() as u64,
    };

    klog!(
        "boot map at {:#x}, arena {:#x}..{:#x}",
        root,
        arena.section_start(),
        arena.upper_bound()
    );
    Ok(arena)
}
