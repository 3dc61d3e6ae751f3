// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ring-buffer index arithmetic and raw buffer views.
//!
//! Both DMA buffers of a channel are power-of-two rings with *next-element* pointer semantics:
//! the hardware write pointer and the software read pointer each denote the next element to be
//! written/read. The ring is empty iff `write == read` and full iff `(write + 1) mod size ==
//! read`, so at most `size - 1` elements are ever live.
//!
//! [`RingIndex`] carries the ring's size exponent along with the free-running index, so offset
//! masking cannot be performed against the wrong modulus. Indices of different rings do not mix.

/* ---------------------------------------------------------------------------------------------- */

use std::marker::PhantomData;

/* ---------------------------------------------------------------------------------------------- */

/// A free-running index into a power-of-two ring of `1 << size_exp` elements.
///
/// The index itself never wraps; [`RingIndex::offset`] masks it down to a ring offset. Pair
/// predicates panic when given indices of different rings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RingIndex {
    index: u64,
    size_exp: u32,
}

impl RingIndex {
    pub fn new(size_exp: u32) -> RingIndex {
        RingIndex { index: 0, size_exp }
    }

    pub fn at(index: u64, size_exp: u32) -> RingIndex {
        RingIndex { index, size_exp }
    }

    /// Number of elements in the ring.
    pub fn size(&self) -> u64 {
        1 << self.size_exp
    }

    pub fn size_exp(&self) -> u32 {
        self.size_exp
    }

    /// The free-running element count.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// The index masked down to a ring offset, in elements.
    pub fn offset(&self) -> u64 {
        self.index & (self.size() - 1)
    }

    pub fn advance(&mut self, elements: u64) {
        self.index = self.index.wrapping_add(elements);
    }

    /// Whether a ring with write pointer `self` and read pointer `read` is empty.
    pub fn is_empty(&self, read: RingIndex) -> bool {
        self.check_same_ring(read);
        self.offset() == read.offset()
    }

    /// Whether a ring with write pointer `self` and read pointer `read` is full, i.e. one more
    /// written element would make the pointers ambiguous.
    pub fn is_full(&self, read: RingIndex) -> bool {
        self.check_same_ring(read);
        (self.offset() + 1) & (self.size() - 1) == read.offset()
    }

    /// Number of live elements between read pointer `read` and write pointer `self`.
    pub fn fill(&self, read: RingIndex) -> u64 {
        self.check_same_ring(read);
        self.offset().wrapping_sub(read.offset()) & (self.size() - 1)
    }

    fn check_same_ring(&self, other: RingIndex) {
        assert_eq!(
            self.size_exp, other.size_exp,
            "ring indices of different buffer sizes must not be mixed"
        );
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// A read-only view of a power-of-two ring of `1 << size_exp` elements of `T`, over raw memory
/// written by another party (hardware DMA or another process).
///
/// All reads are volatile; element accesses mask the given free-running index down to the ring.
#[derive(Debug)]
pub struct RingBufferView<T> {
    ptr: *const T,
    size_exp: u32,
    phantom: PhantomData<T>,
}

// The view only ever reads through the pointer; the memory it covers is shared by design.
unsafe impl<T: Copy + Send> Send for RingBufferView<T> {}
unsafe impl<T: Copy + Send> Sync for RingBufferView<T> {}

impl<T: Copy> RingBufferView<T> {
    /// # Safety
    ///
    /// `ptr` must point to `1 << size_exp` readable elements of `T` that outlive the view.
    pub unsafe fn new(ptr: *const T, size_exp: u32) -> RingBufferView<T> {
        RingBufferView {
            ptr,
            size_exp,
            phantom: PhantomData,
        }
    }

    /// Number of elements in the ring.
    pub fn size(&self) -> u64 {
        1 << self.size_exp
    }

    pub fn size_exp(&self) -> u32 {
        self.size_exp
    }

    /// Read the element at `index mod size`.
    pub fn get(&self, index: u64) -> T {
        let masked = index & (self.size() - 1);
        unsafe { self.ptr.add(masked as usize).read_volatile() }
    }
}

impl RingBufferView<u8> {
    /// Copy `out.len()` bytes starting at ring offset `index mod size`, following the
    /// wraparound. Panics if `out` is larger than the ring.
    pub fn copy_into(&self, index: u64, out: &mut [u8]) {
        assert!(out.len() as u64 <= self.size());

        let start = (index & (self.size() - 1)) as usize;
        let until_wrap = (self.size() as usize - start).min(out.len());

        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.add(start), out.as_mut_ptr(), until_wrap);
            if until_wrap < out.len() {
                std::ptr::copy_nonoverlapping(
                    self.ptr,
                    out.as_mut_ptr().add(until_wrap),
                    out.len() - until_wrap,
                );
            }
        }
    }
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_full_fill_for_all_small_rings() {
        for size_exp in 1..=8 {
            let size = 1u64 << size_exp;
            for w in 0..size {
                for r in 0..size {
                    let write = RingIndex::at(w, size_exp);
                    let read = RingIndex::at(r, size_exp);

                    assert_eq!(write.is_empty(read), w == r);
                    assert_eq!(write.is_full(read), (w + 1) % size == r);
                    assert!(write.fill(read) <= size - 1);
                    if write.is_empty(read) {
                        assert_eq!(write.fill(read), 0);
                    }
                    if write.is_full(read) {
                        assert_eq!(write.fill(read), size - 1);
                    }
                }
            }
        }
    }

    #[test]
    fn offset_masks_free_running_index() {
        let mut index = RingIndex::new(4);
        index.advance(16 + 3);
        assert_eq!(index.index(), 19);
        assert_eq!(index.offset(), 3);
    }

    #[test]
    #[should_panic(expected = "different buffer sizes")]
    fn mixing_ring_sizes_panics() {
        let a = RingIndex::new(4);
        let b = RingIndex::new(5);
        a.fill(b);
    }

    #[test]
    fn view_wraps_element_access() {
        let backing: Vec<u32> = (0..8).collect();
        let view = unsafe { RingBufferView::new(backing.as_ptr(), 3) };

        assert_eq!(view.get(2), 2);
        assert_eq!(view.get(8 + 2), 2);
        assert_eq!(view.get(7), 7);
    }

    #[test]
    fn byte_copy_follows_wraparound() {
        let backing: Vec<u8> = (0..16).collect();
        let view = unsafe { RingBufferView::new(backing.as_ptr(), 4) };

        let mut out = [0u8; 6];
        view.copy_into(13, &mut out);
        assert_eq!(out, [13, 14, 15, 0, 1, 2]);
    }
}

/* ---------------------------------------------------------------------------------------------- */
