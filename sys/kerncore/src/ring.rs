// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Fixed-capacity byte FIFO backing a pipe.
///
/// `read_index` and `write_index` wrap modulo `N`. `len` disambiguates the
/// full and empty cases, which otherwise have equal cursors.
pub struct Ring<const N: usize> {
    buf: [u8; N],
    read_index: usize,
    write_index: usize,
    len: usize,
}

/// Leaves out the buffer contents, which are mostly stale.
impl<const N: usize> core::fmt::Debug for Ring<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &N)
            .field("read_index", &self.read_index)
            .field("write_index", &self.write_index)
            .field("len", &self.len)
            .finish()
    }
}

impl<const N: usize> Default for Ring<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Ring<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            read_index: 0,
            write_index: 0,
            len: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of bytes that can be written before the ring is full.
    pub fn free(&self) -> usize {
        N - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    pub fn read_index(&self) -> usize {
        self.read_index
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Appends as much of `src` as fits, returning the number of bytes taken.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let count = src.len().min(self.free());
        // At most two contiguous runs: up to the end of the buffer, then
        // from the start.
        let first = count.min(N - self.write_index);
        self.buf[self.write_index..self.write_index + first]
            .copy_from_slice(&src[..first]);
        self.buf[..count - first].copy_from_slice(&src[first..count]);

        if N != 0 {
            self.write_index = (self.write_index + count) % N;
        }
        self.len += count;
        count
    }

    /// Removes up to `dst.len()` bytes into `dst`, returning the number of
    /// bytes copied.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let count = dst.len().min(self.len);
        let first = count.min(N - self.read_index);
        dst[..first].copy_from_slice(
            &self.buf[self.read_index..self.read_index + first],
        );
        dst[first..count].copy_from_slice(&self.buf[..count - first]);

        if N != 0 {
            self.read_index = (self.read_index + count) % N;
        }
        self.len -= count;
        count
    }

    /// Discards all buffered data and rewinds both cursors.
    pub fn clear(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[test]
    fn wraps_around() {
        let mut r = Ring::<8>::new();
        assert_eq!(r.write(b"abcdef"), 6);
        let mut out = [0; 4];
        assert_eq!(r.read(&mut out), 4);
        assert_eq!(&out, b"abcd");

        // Six bytes of room now, four of which wrap.
        assert_eq!(r.write(b"ghijklmn"), 6);
        assert!(r.is_full());
        assert_eq!(r.write_index(), 4);

        let mut out = [0; 16];
        assert_eq!(r.read(&mut out), 8);
        assert_eq!(&out[..8], b"efghijkl");
        assert!(r.is_empty());
        assert_eq!(r.read_index(), r.write_index());
    }

    #[test]
    fn short_transfers_at_the_edges() {
        let mut r = Ring::<4>::new();
        assert_eq!(r.read(&mut [0; 3]), 0);
        assert_eq!(r.write(b""), 0);
        assert_eq!(r.write(b"123456"), 4);
        assert_eq!(r.write(b"7"), 0);
        assert_eq!(r.free(), 0);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Write(Vec<u8>),
        Read(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            proptest::collection::vec(any::<u8>(), 0..24).prop_map(Op::Write),
            (0usize..24).prop_map(Op::Read),
        ]
    }

    proptest! {
        #[test]
        fn behaves_like_a_bounded_queue(ops in proptest::collection::vec(op(), 0..64)) {
            let mut ring = Ring::<16>::new();
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    Op::Write(data) => {
                        let took = ring.write(&data);
                        let expect = data.len().min(16 - model.len());
                        prop_assert_eq!(took, expect);
                        model.extend(&data[..took]);
                    }
                    Op::Read(n) => {
                        let mut out = vec![0; n];
                        let got = ring.read(&mut out);
                        let expect: Vec<u8> =
                            model.drain(..n.min(model.len())).collect();
                        prop_assert_eq!(&out[..got], &expect[..]);
                    }
                }
                prop_assert_eq!(ring.len(), model.len());
            }
        }
    }
}
