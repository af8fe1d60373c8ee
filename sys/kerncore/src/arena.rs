// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One-way page arena used while bootstrapping the address space.

use abi::PAGE_SIZE;

/// Address types an [`Arena`] can hand out.
///
/// The kernel implements this for its physical and virtual address newtypes,
/// which keeps the two kinds of arena from being confused with each other.
pub trait PageAddress: Copy {
    fn from_usize(addr: usize) -> Self;
    fn to_usize(self) -> usize;
}

impl PageAddress for usize {
    fn from_usize(addr: usize) -> Self {
        addr
    }

    fn to_usize(self) -> usize {
        self
    }
}

/// A bump allocator over a contiguous range of pages.
///
/// Pages are handed out in address order starting at `base` and are never
/// returned. The allocated prefix `[base, base + count * PAGE_SIZE)` never
/// reaches `upper_bound`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Arena<A> {
    base: A,
    allocated_count: usize,
    upper_bound: A,
}

impl<A: PageAddress> Arena<A> {
    /// Creates an empty arena over `[base, upper_bound)`.
    pub fn new(base: A, upper_bound: A) -> Self {
        Self {
            base,
            allocated_count: 0,
            upper_bound,
        }
    }

    /// Rebuilds an arena from previously recorded state, for instance the
    /// fields of the MMU bootstrap record.
    pub fn from_parts(base: A, allocated_count: usize, upper_bound: A) -> Self {
        Self {
            base,
            allocated_count,
            upper_bound,
        }
    }

    /// Allocates `n` contiguous pages, returning the address of the first.
    ///
    /// Returns `None`, leaving the arena untouched, if the pages would reach
    /// `upper_bound` or the arithmetic overflows. Note that the last page
    /// before `upper_bound` is never handed out; the bound is treated as a
    /// guard.
    pub fn allocate(&mut self, n: usize) -> Option<A> {
        let candidate = self
            .allocated_count
            .checked_mul(PAGE_SIZE)
            .and_then(|off| self.base.to_usize().checked_add(off))?;
        let end = n
            .checked_mul(PAGE_SIZE)
            .and_then(|len| candidate.checked_add(len))?;
        if end >= self.upper_bound.to_usize() {
            return None;
        }
        self.allocated_count += n;
        Some(A::from_usize(candidate))
    }

    /// Address of the first page managed by this arena.
    pub fn section_start(&self) -> A {
        self.base
    }

    /// Address one past the last allocated page.
    pub fn section_end(&self) -> A {
        A::from_usize(
            self.base.to_usize() + self.allocated_count * PAGE_SIZE,
        )
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated_count
    }

    pub fn upper_bound(&self) -> A {
        self.upper_bound
    }

    /// Consumes the arena, producing one over the same range in a different
    /// address space. `translate` maps each address across.
    pub fn translate<B: PageAddress>(self, translate: impl Fn(A) -> B) -> Arena<B> {
        Arena {
            base: translate(self.base),
            allocated_count: self.allocated_count,
            upper_bound: translate(self.upper_bound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_allocation_is_base() {
        let mut a = Arena::new(0x4000_0000usize, 0x4001_0000);
        assert_eq!(a.allocate(1), Some(0x4000_0000));
        assert_eq!(a.allocate(2), Some(0x4000_1000));
        assert_eq!(a.allocated_count(), 3);
        assert_eq!(a.section_start(), 0x4000_0000);
        assert_eq!(a.section_end(), 0x4000_3000);
    }

    #[test]
    fn bound_is_exclusive_of_last_page() {
        // Room for four pages, but the fourth would touch the bound.
        let mut a = Arena::new(0usize, 4 * PAGE_SIZE);
        assert_eq!(a.allocate(4), None);
        assert_eq!(a.allocated_count(), 0);
        assert_eq!(a.allocate(3), Some(0));
        assert_eq!(a.allocate(1), None);
    }

    #[test]
    fn overflow_is_failure() {
        let mut a = Arena::new(usize::MAX - PAGE_SIZE, usize::MAX);
        assert_eq!(a.allocate(usize::MAX), None);
        assert_eq!(a.allocate(2), None);
        assert_eq!(a.allocated_count(), 0);
    }

    #[test]
    fn zero_pages_succeeds_without_moving() {
        let mut a = Arena::new(0x1000usize, 0x3000);
        assert_eq!(a.allocate(0), Some(0x1000));
        assert_eq!(a.allocate(0), Some(0x1000));
        assert_eq!(a.section_end(), 0x1000);
    }

    proptest! {
        #[test]
        fn allocations_are_disjoint_and_in_bounds(
            base_page in 0usize..1024,
            span in 0usize..64,
            requests in proptest::collection::vec(0usize..8, 0..32),
        ) {
            let base = base_page * PAGE_SIZE;
            let bound = base + span * PAGE_SIZE;
            let mut a = Arena::new(base, bound);
            let mut last_end = base;

            for n in requests {
                let before = a.clone();
                match a.allocate(n) {
                    Some(addr) => {
                        prop_assert_eq!(addr, last_end);
                        last_end = addr + n * PAGE_SIZE;
                        prop_assert!(last_end < bound);
                        prop_assert_eq!(a.section_end(), last_end);
                    }
                    None => {
                        prop_assert!(last_end + n * PAGE_SIZE >= bound);
                        prop_assert_eq!(&a, &before);
                    }
                }
                prop_assert!(
                    a.section_start() + a.allocated_count() * PAGE_SIZE
                        <= a.upper_bound()
                );
            }
        }
    }
}
