// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A kernel running on host memory, driven one syscall at a time.

#![allow(dead_code)]

use abi::{Sysnum, PAGE_SIZE, STACK_SIZE};
use kern::addr::VirtAddr;
use kern::config::{HEAP_LIMIT, MAX_PROCESSES};
use kern::mmu::PROCESS_TABLE_PAGES;
use kern::page_alloc::VirtArena;
use kern::startup::{FirstProcess, Kernel};
use kern::task::NextTask;

/// Pages one process slot takes from the arena.
pub const SLOT_PAGES: usize =
    STACK_SIZE / PAGE_SIZE + 1 + HEAP_LIMIT / PAGE_SIZE + PROCESS_TABLE_PAGES;

/// Size of the shared program image; tests keep their user data in it. Only
/// the first process may write it.
pub const IMAGE_PAGES: usize = 4;

#[derive(Clone)]
#[repr(C, align(4096))]
struct Page([u8; PAGE_SIZE]);

/// Page-aligned host memory.
pub struct Pages(Vec<Page>);

impl Pages {
    pub fn new(count: usize) -> Self {
        Self(vec![Page([0x5A; PAGE_SIZE]); count])
    }

    pub fn base(&self) -> usize {
        self.0.as_ptr() as usize
    }

    pub fn end(&self) -> usize {
        self.base() + self.0.len() * PAGE_SIZE
    }

    pub fn arena(&self) -> VirtArena {
        VirtArena::new(VirtAddr::new(self.base()), VirtAddr::new(self.end()))
    }
}

pub struct Rig {
    pub kernel: Kernel,
    pub first: usize,
    image: Pages,
    // Backs every slot; must outlive `kernel`.
    ram: Pages,
}

impl Rig {
    pub fn new() -> Self {
        let ram = Pages::new(MAX_PROCESSES * SLOT_PAGES + 1);
        let image = Pages::new(IMAGE_PAGES);
        let mut kernel = Kernel::new(&mut ram.arena()).unwrap();
        let first = kernel
            .spawn_first(&FirstProcess {
                entry: VirtAddr::new(image.base()),
                image: VirtAddr::new(image.base())..VirtAddr::new(image.end()),
            })
            .unwrap();
        Self {
            kernel,
            first,
            image,
            ram,
        }
    }

    /// Address of byte `offset` in the image.
    pub fn addr(&self, offset: usize) -> u64 {
        assert!(offset < IMAGE_PAGES * PAGE_SIZE);
        (self.image.base() + offset) as u64
    }

    /// Copies `bytes` into the image at `offset`, returning their address.
    pub fn put(&mut self, offset: usize, bytes: &[u8]) -> u64 {
        assert!(offset + bytes.len() <= IMAGE_PAGES * PAGE_SIZE);
        let at = self.addr(offset);
        // Safety: in bounds of our own allocation, checked above.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), at as *mut u8, bytes.len())
        };
        at
    }

    /// Copies a NUL-terminated string into the image.
    pub fn put_str(&mut self, offset: usize, s: &str) -> u64 {
        let mut v = s.as_bytes().to_vec();
        v.push(0);
        self.put(offset, &v)
    }

    pub fn get(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(offset + len <= IMAGE_PAGES * PAGE_SIZE);
        // Safety: as in `put`.
        unsafe { core::slice::from_raw_parts(self.addr(offset) as *const u8, len) }
            .to_vec()
    }

    pub fn get_u64(&self, offset: usize) -> u64 {
        u64::from_ne_bytes(self.get(offset, 8).try_into().unwrap())
    }

    pub fn get_u32(&self, offset: usize) -> u32 {
        u32::from_ne_bytes(self.get(offset, 4).try_into().unwrap())
    }

    /// Address of byte `offset` in `slot`'s own stack, which only that
    /// process can write.
    pub fn stack(&self, slot: usize, offset: usize) -> u64 {
        assert!(offset < STACK_SIZE);
        (self.kernel.process(slot).memory().stack.as_usize() + offset) as u64
    }

    /// Reads `len` bytes at `addr`, which must lie in the image or in some
    /// slot's memory.
    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        let (lo, hi) = (addr as usize, addr as usize + len);
        let in_image = lo >= self.image.base() && hi <= self.image.end();
        let in_ram = lo >= self.ram.base() && hi <= self.ram.end();
        assert!(in_image || in_ram, "{addr:#x} is outside the rig");
        // Safety: inside one of our allocations, checked above.
        unsafe { core::slice::from_raw_parts(addr as *const u8, len) }.to_vec()
    }

    pub fn peek_u64(&self, addr: u64) -> u64 {
        u64::from_ne_bytes(self.peek(addr, 8).try_into().unwrap())
    }

    /// Traps into the kernel from `slot` with syscall `id`.
    pub fn call(&mut self, slot: usize, id: impl Into<u32>, args: &[u64]) -> NextTask {
        let mut regs = [0; 5];
        regs[..args.len()].copy_from_slice(args);
        let save = self.kernel.process_mut(slot).save_mut();
        save.set_syscall(id, regs);
        // As if `svc` had just retired.
        save.elr = save.elr.wrapping_add(4);
        self.kernel.handle_syscall(slot)
    }

    /// Result register of `slot`.
    pub fn x0(&self, slot: usize) -> u64 {
        self.kernel.process(slot).save().x(0)
    }

    /// Spawns a child of `parent` with no arguments and returns its slot.
    pub fn spawn(&mut self, parent: usize) -> usize {
        let entry = self.addr(0x100);
        let _ = self.call(parent, Sysnum::Spawn, &[entry, 0, 0]);
        assert_eq!(self.x0(parent), 0, "spawn failed");
        let pid = self.kernel.processes().iter().map(|p| p.pid().0).max().unwrap();
        self.slot_of(pid)
    }

    pub fn slot_of(&self, pid: u32) -> usize {
        self.kernel
            .processes()
            .iter()
            .position(|p| !p.is_vacant() && p.pid().0 == pid)
            .unwrap()
    }

    pub fn pid(&self, slot: usize) -> u64 {
        u64::from(self.kernel.process(slot).pid().0)
    }

    pub fn live(&self) -> usize {
        self.kernel.processes().iter().filter(|p| !p.is_vacant()).count()
    }
}
