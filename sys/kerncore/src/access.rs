// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Checking user-supplied memory ranges against a process's region table.

/// A base-length pair naming memory a process passed to a syscall.
///
/// This does not by itself grant access to anything.
///
/// # Invariants
///
/// `s.base_addr() <= s.end_addr()`, with equality exactly when the slice is
/// empty.
pub trait UserSlice {
    /// Empty slices are never checked, so that programs can pass things like
    /// `&[]` with arbitrary base addresses.
    fn is_empty(&self) -> bool;

    /// The address of the first byte included in this slice.
    fn base_addr(&self) -> usize;

    /// The address of the first byte _not_ included in this slice.
    fn end_addr(&self) -> usize;
}

/// One entry in a process's region table.
///
/// # Invariants
///
/// `r.base_addr() <= r.end_addr()`.
pub trait MemoryRegion {
    fn base_addr(&self) -> usize;
    fn end_addr(&self) -> usize;

    fn contains(&self, addr: usize) -> bool {
        addr >= self.base_addr() && addr < self.end_addr()
    }
}

impl<T: MemoryRegion> MemoryRegion for &T {
    fn base_addr(&self) -> usize {
        (**self).base_addr()
    }

    fn end_addr(&self) -> usize {
        (**self).end_addr()
    }

    fn contains(&self, addr: usize) -> bool {
        (**self).contains(addr)
    }
}

/// Decides whether every byte of `slice` lies in regions of `table` that
/// satisfy `region_ok`.
///
/// The slice may span several regions as long as they abut with no gap.
///
/// # Preconditions
///
/// `table` is sorted by base address and its regions do not overlap.
#[must_use]
pub fn can_access<S, R>(
    slice: S,
    table: &[R],
    region_ok: impl Fn(&R) -> bool,
) -> bool
where
    S: UserSlice,
    R: MemoryRegion,
{
    if slice.is_empty() {
        return true;
    }

    let end = slice.end_addr();
    let mut cursor = slice.base_addr();

    // Skip every region that ends at or before the cursor. Because the table
    // is sorted and non-overlapping, region ends are sorted too.
    let first = table.partition_point(|r| r.end_addr() <= cursor);

    for region in &table[first..] {
        if region.base_addr() > cursor || !region_ok(region) {
            // Either a hole, or a region we may not use.
            return false;
        }
        cursor = region.end_addr();
        if cursor >= end {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Debug)]
    struct Span {
        base: usize,
        size: usize,
    }

    impl UserSlice for Span {
        fn is_empty(&self) -> bool {
            self.size == 0
        }

        fn base_addr(&self) -> usize {
            self.base
        }

        fn end_addr(&self) -> usize {
            self.base + self.size
        }
    }

    #[derive(Clone, Debug)]
    struct Region {
        base: usize,
        size: usize,
        writable: bool,
    }

    impl MemoryRegion for Region {
        fn base_addr(&self) -> usize {
            self.base
        }

        fn end_addr(&self) -> usize {
            self.base + self.size
        }
    }

    fn writable(r: &Region) -> bool {
        r.writable
    }

    fn table() -> Vec<Region> {
        vec![
            Region { base: 0x1000, size: 0x1000, writable: true },
            Region { base: 0x2000, size: 0x1000, writable: true },
            Region { base: 0x3000, size: 0x1000, writable: false },
            Region { base: 0x8000, size: 0x2000, writable: true },
        ]
    }

    #[test]
    fn inside_one_region() {
        let t = table();
        assert!(can_access(Span { base: 0x1010, size: 0x10 }, &t, writable));
        assert!(can_access(Span { base: 0x8000, size: 0x2000 }, &t, writable));
    }

    #[test]
    fn across_abutting_regions() {
        let t = table();
        assert!(can_access(Span { base: 0x1800, size: 0x1000 }, &t, writable));
    }

    #[test]
    fn into_forbidden_region() {
        let t = table();
        assert!(!can_access(Span { base: 0x2800, size: 0x1000 }, &t, writable));
        assert!(can_access(Span { base: 0x2800, size: 0x1000 }, &t, |_| true));
    }

    #[test]
    fn across_a_hole() {
        let t = table();
        assert!(!can_access(Span { base: 0x3800, size: 0x5000 }, &t, |_| true));
        assert!(!can_access(Span { base: 0x4000, size: 1 }, &t, |_| true));
        assert!(!can_access(Span { base: 0xA000, size: 1 }, &t, |_| true));
        assert!(!can_access(Span { base: 0, size: 0x1001 }, &t, |_| true));
    }

    #[test]
    fn empty_slices_always_pass() {
        assert!(can_access(Span { base: 0xdead_0000, size: 0 }, &table(), writable));
        assert!(can_access(Span { base: 0, size: 0 }, &[] as &[Region], writable));
    }

    fn region_table() -> impl Strategy<Value = Vec<Region>> {
        // Build sorted, non-overlapping regions from (gap, size, flag)
        // triples.
        proptest::collection::vec((0usize..3, 1usize..4, any::<bool>()), 0..8)
            .prop_map(|parts| {
                let mut base = 0;
                parts
                    .into_iter()
                    .map(|(gap, size, writable)| {
                        base += gap * 16;
                        let r = Region { base, size: size * 16, writable };
                        base += size * 16;
                        r
                    })
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn agrees_with_bytewise_model(
            t in region_table(),
            base in 0usize..256,
            size in 0usize..128,
        ) {
            let expected = (base..base + size).all(|addr| {
                t.iter().any(|r| r.contains(addr) && r.writable)
            });
            prop_assert_eq!(
                can_access(Span { base, size }, &t, writable),
                expected,
            );
        }
    }
}
