//! Growable staged buffer built from fixed-size pages.
//!
//! A [`PagedBuffer`] presents a logically contiguous byte sequence without
//! ever asking for one large allocation. Capacity grows a page at a time,
//! pages are obtained from an injected [`PageSupplier`], and every page goes
//! back to its supplier exactly once, when the bytes it holds have all been
//! released.
//!
//! # Accounting
//!
//! ```text
//!   page 0            page 1            page 2
//! ┌─────────────────┬─────────────────┬─────────────────┐
//! │ released │ committed        │ writable           │
//! └─────────────────┴─────────────────┴─────────────────┘
//!            ↑ offset            ↑ offset + index      ↑ offset + capacity
//! ```
//!
//! - `offset`: start of live data inside the first page
//! - `index`: number of committed bytes (written, not yet released)
//! - `capacity`: bytes addressable from `offset` to the end of the last page
//!
//! # Invariants
//!
//! - `index <= capacity`
//! - `capacity == pages * PAGE_SIZE - offset`
//! - Slicing never copies: a view that crosses a page boundary comes back as
//!   one slice per page touched.
//!
//! Out-of-range slicing, releasing or index movement is a programming error
//! and panics.

use std::{
    collections::VecDeque,
    fmt,
    io::IoSlice,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Buf;

/// Size of a single backing page (16 KiB).
pub const PAGE_SIZE: usize = 1 << 14;

const PAGE_MASK: usize = PAGE_SIZE - 1;
const PAGE_SHIFT: u32 = PAGE_SIZE.trailing_zeros();

type Recycler = Box<dyn FnOnce(Vec<u8>)>;

/// One fixed-size block of backing memory.
///
/// A page optionally carries a recycler that hands the memory back to
/// whoever supplied it. The recycler runs in [`Page::release`] and nowhere
/// else, so a page is returned at most once.
pub struct Page {
    bytes: Vec<u8>,
    recycler: Option<Recycler>,
}

impl Page {
    /// Allocate a fresh zeroed page with no recycler.
    #[must_use]
    pub fn allocate() -> Self {
        Self { bytes: vec![0; PAGE_SIZE], recycler: None }
    }

    /// Wrap existing memory as a page that is returned through `recycler`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes.len() != PAGE_SIZE`.
    pub fn with_recycler(bytes: Vec<u8>, recycler: impl FnOnce(Vec<u8>) + 'static) -> Self {
        assert_eq!(bytes.len(), PAGE_SIZE, "page memory must be exactly PAGE_SIZE bytes");
        Self { bytes, recycler: Some(Box::new(recycler)) }
    }

    /// Return the page to its supplier.
    pub fn release(mut self) {
        if let Some(recycler) = self.recycler.take() {
            recycler(std::mem::take(&mut self.bytes));
        }
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("len", &self.bytes.len())
            .field("recycled", &self.recycler.is_some())
            .finish()
    }
}

/// Source of pages for a [`PagedBuffer`].
///
/// Decouples the allocation strategy (fresh allocation, pooling, arena) from
/// the buffer logic. Any `FnMut() -> Page` closure is a supplier.
pub trait PageSupplier {
    /// Hand out one page. Called only when the buffer needs more capacity.
    fn acquire(&mut self) -> Page;
}

impl<F> PageSupplier for F
where
    F: FnMut() -> Page,
{
    fn acquire(&mut self) -> Page {
        self()
    }
}

/// Shared free list of pages.
///
/// Clones share the same pool. Pages handed out by [`PageSupplier::acquire`]
/// come back to the free list when released, which makes the pool useful for
/// checking that every page is returned exactly once.
#[derive(Clone, Default)]
pub struct RecyclingPagePool {
    inner: Arc<Mutex<PoolInner>>,
}

#[derive(Default)]
struct PoolInner {
    free: Vec<Vec<u8>>,
    outstanding: usize,
    allocated: usize,
}

impl RecyclingPagePool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages currently handed out and not yet released.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Pages sitting in the free list.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.lock().free.len()
    }

    /// Total pages ever allocated by this pool.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.lock().allocated
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PageSupplier for RecyclingPagePool {
    fn acquire(&mut self) -> Page {
        let bytes = {
            let mut inner = self.lock();
            inner.outstanding += 1;
            match inner.free.pop() {
                Some(bytes) => bytes,
                None => {
                    inner.allocated += 1;
                    vec![0; PAGE_SIZE]
                },
            }
        };

        let pool = Arc::clone(&self.inner);
        Page::with_recycler(bytes, move |bytes| {
            let mut inner = pool.lock().unwrap_or_else(PoisonError::into_inner);
            debug_assert!(inner.outstanding > 0, "page released more times than acquired");
            inner.outstanding = inner.outstanding.saturating_sub(1);
            inner.free.push(bytes);
        })
    }
}

impl fmt::Debug for RecyclingPagePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("RecyclingPagePool")
            .field("outstanding", &inner.outstanding)
            .field("pooled", &inner.free.len())
            .field("allocated", &inner.allocated)
            .finish()
    }
}

/// Page-based byte buffer that grows on demand.
///
/// Used both as the driver's outbound ciphertext staging area and as the
/// caller-owned destination for decrypted application data.
pub struct PagedBuffer {
    pages: VecDeque<Page>,
    supplier: Box<dyn PageSupplier>,
    capacity: usize,
    index: usize,
    offset: usize,
    closed: bool,
}

impl PagedBuffer {
    /// Create a buffer drawing pages from `supplier`. One page is acquired
    /// immediately.
    pub fn new(supplier: impl PageSupplier + 'static) -> Self {
        let mut buffer = Self {
            pages: VecDeque::new(),
            supplier: Box::new(supplier),
            capacity: 0,
            index: 0,
            offset: 0,
            closed: false,
        };
        buffer.ensure_capacity(PAGE_SIZE);
        buffer
    }

    /// Create a buffer whose pages are plain allocations.
    #[must_use]
    pub fn allocating() -> Self {
        Self::new(Page::allocate)
    }

    /// Grow until at least `required` bytes are addressable.
    ///
    /// # Panics
    ///
    /// Panics if the buffer has been closed.
    pub fn ensure_capacity(&mut self, required: usize) {
        assert!(!self.closed, "cannot allocate pages for a closed buffer");

        if self.capacity < required {
            let wanted = num_pages(required + self.offset);
            let to_add = wanted - self.pages.len();
            for _ in 0..to_add {
                self.pages.push_back(self.supplier.acquire());
            }
            self.capacity += to_add * PAGE_SIZE;
        }

        debug_assert_eq!(self.capacity, self.pages.len() * PAGE_SIZE - self.offset);
    }

    /// Release `bytes` from the head of the buffer.
    ///
    /// Every page passed over entirely is returned to its supplier. Releasing
    /// past the committed index truncates the index to zero.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` exceeds the capacity.
    pub fn release(&mut self, bytes: usize) {
        assert!(
            bytes <= self.capacity,
            "releasing {bytes} bytes exceeds buffer capacity {}",
            self.capacity
        );

        let pages_to_release = page_index(self.offset + bytes);
        for page in self.pages.drain(..pages_to_release) {
            page.release();
        }

        self.capacity -= bytes;
        self.index = self.index.saturating_sub(bytes);
        self.offset = index_in_page(self.offset + bytes);
    }

    /// Views of the first `to` committed bytes, one slice per page touched.
    ///
    /// # Panics
    ///
    /// Panics if `to` exceeds the committed index.
    #[must_use]
    pub fn slice_to(&self, to: usize) -> Vec<&[u8]> {
        assert!(to <= self.index, "slice end {to} exceeds committed bytes {}", self.index);
        if to == 0 {
            return Vec::new();
        }

        let end = to + self.offset;
        let final_limit = index_in_page(end);
        let mut count = page_index(end);
        if final_limit != 0 {
            count += 1;
        }

        self.pages
            .iter()
            .take(count)
            .enumerate()
            .map(|(i, page)| {
                let start = if i == 0 { self.offset } else { 0 };
                let stop = if i + 1 == count && final_limit != 0 { final_limit } else { PAGE_SIZE };
                &page.bytes[start..stop]
            })
            .collect()
    }

    /// Writable views from `from` to the end of capacity, one slice per page.
    ///
    /// # Panics
    ///
    /// Panics if `from` exceeds the capacity.
    pub fn slice_from(&mut self, from: usize) -> Vec<&mut [u8]> {
        assert!(from <= self.capacity, "slice start {from} exceeds capacity {}", self.capacity);
        if from == self.capacity {
            return Vec::new();
        }

        let start = from + self.offset;
        let within = index_in_page(start);

        self.pages
            .iter_mut()
            .skip(page_index(start))
            .enumerate()
            .map(|(i, page)| if i == 0 { &mut page.bytes[within..] } else { &mut page.bytes[..] })
            .collect()
    }

    /// Copy `data` after the committed bytes, growing as needed.
    pub fn append(&mut self, data: &[u8]) {
        self.ensure_capacity(self.index + data.len());

        let mut rest = data;
        let index = self.index;
        for dst in self.slice_from(index) {
            if rest.is_empty() {
                break;
            }
            let n = dst.len().min(rest.len());
            dst[..n].copy_from_slice(&rest[..n]);
            rest = &rest[n..];
        }

        self.index += data.len();
    }

    /// Mark `delta` more bytes as committed.
    ///
    /// # Panics
    ///
    /// Panics if the new index would exceed the capacity.
    pub fn increment_index(&mut self, delta: usize) {
        let new_index = self.index + delta;
        assert!(
            new_index <= self.capacity,
            "index {new_index} would exceed buffer capacity {}",
            self.capacity
        );
        self.index = new_index;
    }

    /// Committed bytes.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Addressable bytes from the release boundary to the end of the last
    /// page.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writable bytes after the committed index.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.index
    }

    /// Number of pages currently held.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Copy the committed bytes into one contiguous vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.slice_to(self.index).concat()
    }

    /// Return every page to its supplier. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for page in self.pages.drain(..) {
            page.release();
        }
        self.capacity = 0;
        self.index = 0;
        self.offset = 0;
    }

    /// Whether [`PagedBuffer::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for PagedBuffer {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PagedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedBuffer")
            .field("pages", &self.pages.len())
            .field("capacity", &self.capacity)
            .field("index", &self.index)
            .field("offset", &self.offset)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Reading through [`Buf`] walks the committed bytes; advancing releases them.
impl Buf for PagedBuffer {
    fn remaining(&self) -> usize {
        self.index
    }

    fn chunk(&self) -> &[u8] {
        match self.pages.front() {
            Some(page) if self.index > 0 => {
                let end = (self.offset + self.index).min(PAGE_SIZE);
                &page.bytes[self.offset..end]
            },
            _ => &[],
        }
    }

    fn chunks_vectored<'a>(&'a self, dst: &mut [IoSlice<'a>]) -> usize {
        let mut filled = 0;
        for (slot, slice) in dst.iter_mut().zip(self.slice_to(self.index)) {
            *slot = IoSlice::new(slice);
            filled += 1;
        }
        filled
    }

    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.index, "cannot advance {cnt} bytes past {} committed", self.index);
        self.release(cnt);
    }
}

fn num_pages(capacity: usize) -> usize {
    (capacity + PAGE_MASK) >> PAGE_SHIFT
}

fn page_index(index: usize) -> usize {
    index >> PAGE_SHIFT
}

fn index_in_page(index: usize) -> usize {
    index & PAGE_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn new_buffer_holds_one_page() {
        let buffer = PagedBuffer::allocating();
        assert_eq!(buffer.capacity(), PAGE_SIZE);
        assert_eq!(buffer.index(), 0);
        assert_eq!(buffer.remaining(), PAGE_SIZE);
        assert_eq!(buffer.page_count(), 1);
    }

    #[test]
    fn ensure_capacity_adds_whole_pages() {
        let mut buffer = PagedBuffer::allocating();

        buffer.ensure_capacity(PAGE_SIZE + 1);
        assert_eq!(buffer.capacity(), 2 * PAGE_SIZE);

        buffer.ensure_capacity(3 * PAGE_SIZE);
        assert_eq!(buffer.capacity(), 3 * PAGE_SIZE);

        // Already large enough: no growth
        buffer.ensure_capacity(10);
        assert_eq!(buffer.page_count(), 3);
    }

    #[test]
    fn append_spanning_pages_slices_per_page() {
        let mut buffer = PagedBuffer::allocating();
        let data = pattern(PAGE_SIZE + 100);
        buffer.append(&data);

        let slices = buffer.slice_to(buffer.index());
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), PAGE_SIZE);
        assert_eq!(slices[1].len(), 100);
        assert_eq!(buffer.to_vec(), data);
    }

    #[test]
    fn slice_to_page_boundary_has_no_empty_tail() {
        let mut buffer = PagedBuffer::allocating();
        buffer.append(&pattern(2 * PAGE_SIZE));

        let slices = buffer.slice_to(PAGE_SIZE);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), PAGE_SIZE);

        let slices = buffer.slice_to(2 * PAGE_SIZE);
        assert_eq!(slices.len(), 2);
        assert!(slices.iter().all(|s| s.len() == PAGE_SIZE));
    }

    #[test]
    fn slice_to_zero_is_empty() {
        let buffer = PagedBuffer::allocating();
        assert!(buffer.slice_to(0).is_empty());
    }

    #[test]
    #[should_panic(expected = "exceeds committed bytes")]
    fn slice_to_beyond_committed_panics() {
        let mut buffer = PagedBuffer::allocating();
        buffer.append(b"abc");
        let _ = buffer.slice_to(4);
    }

    #[test]
    fn slice_from_honors_offset_after_release() {
        let mut buffer = PagedBuffer::allocating();
        buffer.ensure_capacity(2 * PAGE_SIZE);
        buffer.append(&pattern(10));
        buffer.release(4);

        assert_eq!(buffer.index(), 6);
        assert_eq!(buffer.capacity(), 2 * PAGE_SIZE - 4);

        let slices = buffer.slice_from(6);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), PAGE_SIZE - 10);
        assert_eq!(slices[1].len(), PAGE_SIZE);
    }

    #[test]
    fn slice_from_capacity_is_empty() {
        let mut buffer = PagedBuffer::allocating();
        let capacity = buffer.capacity();
        assert!(buffer.slice_from(capacity).is_empty());
    }

    #[test]
    fn writes_through_slice_from_become_visible_after_increment() {
        let mut buffer = PagedBuffer::allocating();
        {
            let mut slices = buffer.slice_from(0);
            slices[0][..4].copy_from_slice(b"ping");
        }
        buffer.increment_index(4);
        assert_eq!(buffer.slice_to(4), vec![&b"ping"[..]]);
    }

    #[test]
    #[should_panic(expected = "would exceed buffer capacity")]
    fn increment_past_capacity_panics() {
        let mut buffer = PagedBuffer::allocating();
        buffer.increment_index(PAGE_SIZE + 1);
    }

    #[test]
    fn release_past_index_truncates_index() {
        let mut buffer = PagedBuffer::allocating();
        buffer.append(b"abc");
        buffer.release(10);
        assert_eq!(buffer.index(), 0);
        assert_eq!(buffer.capacity(), PAGE_SIZE - 10);
    }

    #[test]
    #[should_panic(expected = "exceeds buffer capacity")]
    fn release_past_capacity_panics() {
        let mut buffer = PagedBuffer::allocating();
        buffer.release(PAGE_SIZE + 1);
    }

    #[test]
    fn released_pages_return_to_pool_once() {
        let pool = RecyclingPagePool::new();
        let mut buffer = PagedBuffer::new(pool.clone());
        buffer.append(&pattern(3 * PAGE_SIZE));
        assert_eq!(pool.outstanding(), 3);

        // Half a page: nothing released yet
        buffer.release(PAGE_SIZE / 2);
        assert_eq!(pool.outstanding(), 3);

        // Crossing the first page boundary returns exactly one page
        buffer.release(PAGE_SIZE);
        assert_eq!(pool.outstanding(), 2);
        assert_eq!(pool.pooled(), 1);

        buffer.close();
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.pooled(), 3);

        // Idempotent
        buffer.close();
        assert_eq!(pool.pooled(), 3);
    }

    #[test]
    fn pool_reuses_released_pages() {
        let pool = RecyclingPagePool::new();
        let mut buffer = PagedBuffer::new(pool.clone());
        buffer.append(&pattern(PAGE_SIZE));
        buffer.release(PAGE_SIZE);
        buffer.append(&pattern(10));

        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn drop_returns_pages() {
        let pool = RecyclingPagePool::new();
        {
            let mut buffer = PagedBuffer::new(pool.clone());
            buffer.ensure_capacity(4 * PAGE_SIZE);
            assert_eq!(pool.outstanding(), 4);
        }
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    #[should_panic(expected = "closed buffer")]
    fn closed_buffer_refuses_growth() {
        let mut buffer = PagedBuffer::allocating();
        buffer.close();
        buffer.ensure_capacity(1);
    }

    #[test]
    fn close_is_idempotent_and_empties_buffer() {
        let pool = RecyclingPagePool::new();
        let mut buffer = PagedBuffer::new(pool.clone());
        buffer.append(&[1, 2, 3]);
        assert!(!buffer.is_closed());

        buffer.close();
        assert!(buffer.is_closed());
        assert_eq!(buffer.index(), 0);
        assert_eq!(buffer.capacity(), 0);
        assert_eq!(pool.outstanding(), 0);

        buffer.close();
        assert!(buffer.is_closed());
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn buf_walks_committed_bytes_across_pages() {
        let mut buffer = PagedBuffer::allocating();
        let data = pattern(PAGE_SIZE + 7);
        buffer.append(&data);

        let mut out = Vec::new();
        while buffer.has_remaining() {
            let chunk = buffer.chunk().to_vec();
            out.extend_from_slice(&chunk);
            buffer.advance(chunk.len());
        }

        assert_eq!(out, data);
        assert_eq!(buffer.index(), 0);
    }

    #[test]
    fn buf_vectored_chunks_cover_every_page() {
        let mut buffer = PagedBuffer::allocating();
        buffer.append(&pattern(2 * PAGE_SIZE + 1));

        let mut slots = [IoSlice::new(&[]); 4];
        let filled = buffer.chunks_vectored(&mut slots);
        assert_eq!(filled, 3);
        assert_eq!(slots[2].len(), 1);
    }

    #[test]
    fn closure_supplier_is_called_per_page() {
        let calls = std::rc::Rc::new(std::cell::Cell::new(0));
        let seen = calls.clone();
        let mut buffer = PagedBuffer::new(move || {
            seen.set(seen.get() + 1);
            Page::allocate()
        });

        buffer.ensure_capacity(3 * PAGE_SIZE);
        assert_eq!(calls.get(), 3);
    }
}
