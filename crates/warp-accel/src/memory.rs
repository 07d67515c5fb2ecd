//! Physically contiguous buffers for DMA
//!
//! The accelerator reads and writes host memory directly, so every job
//! buffer must be page aligned and backed by one contiguous run of page
//! frames. Small requests are served from the linear (direct) map, where a
//! page frame follows from the virtual address alone. Large requests take
//! the virtually-mapped path and get their own run of frames, recorded in a
//! region map so translation can find them again.
//!
//! A [`ContigBuffer`] owns its allocation and releases it on drop. `free`
//! consumes the handle, so freeing twice or touching a freed buffer does not
//! compile.

use std::alloc::{self, Layout};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// log2 of the page size
pub const PAGE_SHIFT: u32 = 12;

/// Page size used for alignment and translation
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// First frame handed to virtually-mapped regions, above anything the
/// linear map can produce for a 48-bit address space
const VMAP_BASE_PFN: u64 = 1 << 40;

/// Which allocation path produced a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOrigin {
    /// Linear map; frame derived from the address
    Direct,
    /// Virtually mapped; frame looked up in the region map
    VirtMapped,
}

/// Physical page frame number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysPage(pub u64);

impl PhysPage {
    /// Frame number
    #[must_use]
    pub fn pfn(&self) -> u64 {
        self.0
    }

    /// Physical address of the first byte of the frame
    #[must_use]
    pub fn addr(&self) -> u64 {
        self.0 << PAGE_SHIFT
    }
}

#[derive(Debug)]
struct VmapRegion {
    len: usize,
    base_pfn: u64,
}

#[derive(Debug)]
struct AllocatorInner {
    capacity: usize,
    direct_limit: usize,
    in_use: AtomicUsize,
    allocations: AtomicU64,
    frees: AtomicU64,
    next_vmap_pfn: AtomicU64,
    vmap: RwLock<BTreeMap<usize, VmapRegion>>,
}

impl AllocatorInner {
    fn reserve(&self, bytes: usize) -> Result<()> {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.capacity)
            })
            .map(|_| ())
            .map_err(|used| {
                Error::alloc_failed(
                    bytes,
                    format!("{used} of {} bytes in use", self.capacity),
                )
            })
    }

    fn unreserve(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn resolve(&self, addr: usize) -> PhysPage {
        self.vmap_page(addr)
            .unwrap_or(PhysPage((addr >> PAGE_SHIFT) as u64))
    }

    fn vmap_page(&self, addr: usize) -> Option<PhysPage> {
        let map = self.vmap.read();
        let (&start, region) = map.range(..=addr).next_back()?;
        if addr >= start + region.len {
            return None;
        }
        Some(PhysPage(
            region.base_pfn + ((addr - start) >> PAGE_SHIFT) as u64,
        ))
    }

    fn release(&self, ptr: NonNull<u8>, layout: Layout, origin: MemOrigin) {
        if origin == MemOrigin::VirtMapped {
            self.vmap.write().remove(&(ptr.as_ptr() as usize));
        }
        // SAFETY: `ptr` came from `alloc_zeroed` with this exact layout and
        // is released once, from the owning buffer's drop.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        self.unreserve(layout.size());
        self.frees.fetch_add(1, Ordering::Relaxed);
    }
}

/// Allocator for DMA-addressable buffers with a fixed byte budget
#[derive(Debug, Clone)]
pub struct ContigAllocator {
    inner: Arc<AllocatorInner>,
}

impl ContigAllocator {
    /// Create an allocator that hands out at most `capacity` bytes, serving
    /// requests up to `direct_limit` bytes from the linear map
    #[must_use]
    pub fn new(capacity: usize, direct_limit: usize) -> Self {
        Self {
            inner: Arc::new(AllocatorInner {
                capacity,
                direct_limit,
                in_use: AtomicUsize::new(0),
                allocations: AtomicU64::new(0),
                frees: AtomicU64::new(0),
                next_vmap_pfn: AtomicU64::new(VMAP_BASE_PFN),
                vmap: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Allocate a zeroed, page-aligned buffer of at least `size` bytes
    ///
    /// # Errors
    /// `InvalidInput` for a zero-byte request, `AllocationFailure` when the
    /// budget or the host allocator cannot satisfy it.
    pub fn allocate(&self, size: usize) -> Result<ContigBuffer> {
        if size == 0 {
            return Err(Error::InvalidInput("Cannot allocate 0 bytes".into()));
        }
        let rounded = size
            .checked_add(PAGE_SIZE - 1)
            .map(|s| s & !(PAGE_SIZE - 1))
            .ok_or_else(|| Error::alloc_failed(size, "size overflow"))?;
        let layout = Layout::from_size_align(rounded, PAGE_SIZE)
            .map_err(|e| Error::alloc_failed(size, e.to_string()))?;

        self.inner.reserve(rounded)?;

        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            self.inner.unreserve(rounded);
            return Err(Error::alloc_failed(size, "host allocator returned null"));
        };

        let origin = if rounded <= self.inner.direct_limit {
            MemOrigin::Direct
        } else {
            let pages = (rounded >> PAGE_SHIFT) as u64;
            let base_pfn = self.inner.next_vmap_pfn.fetch_add(pages, Ordering::Relaxed);
            self.inner.vmap.write().insert(
                ptr.as_ptr() as usize,
                VmapRegion {
                    len: rounded,
                    base_pfn,
                },
            );
            MemOrigin::VirtMapped
        };

        self.inner.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(ContigBuffer {
            ptr,
            len: size,
            layout,
            origin,
            allocator: Arc::clone(&self.inner),
        })
    }

    /// Release a buffer
    pub fn free(&self, buffer: ContigBuffer) {
        drop(buffer);
    }

    /// Translate a virtual address to the page frame backing it
    ///
    /// Addresses inside a virtually-mapped region go through the region map;
    /// everything else is taken to be in the linear map.
    #[must_use]
    pub fn resolve_physical_page(&self, addr: usize) -> PhysPage {
        self.inner.resolve(addr)
    }

    /// Bytes currently allocated (page-rounded)
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Byte budget
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Total successful allocations
    #[must_use]
    pub fn allocations(&self) -> u64 {
        self.inner.allocations.load(Ordering::Relaxed)
    }

    /// Total frees
    #[must_use]
    pub fn frees(&self) -> u64 {
        self.inner.frees.load(Ordering::Relaxed)
    }
}

/// Owned, page-aligned DMA buffer
pub struct ContigBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
    origin: MemOrigin,
    allocator: Arc<AllocatorInner>,
}

// SAFETY: the buffer exclusively owns its allocation; shared access only
// hands out `&[u8]`.
unsafe impl Send for ContigBuffer {}
// SAFETY: see above.
unsafe impl Sync for ContigBuffer {}

impl ContigBuffer {
    /// Requested length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Page-rounded size of the allocation
    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Allocation path that produced this buffer
    #[inline]
    pub fn origin(&self) -> MemOrigin {
        self.origin
    }

    /// Virtual address of the first byte
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Physical address of the first byte
    pub fn phys_addr(&self) -> u64 {
        self.allocator.resolve(self.addr()).addr()
    }

    /// Page frames backing the buffer, in order
    pub fn dma_pages(&self) -> Vec<PhysPage> {
        let base = self.addr();
        (0..self.capacity() >> PAGE_SHIFT)
            .map(|i| self.allocator.resolve(base + (i << PAGE_SHIFT)))
            .collect()
    }

    /// Check every frame follows the previous one
    pub fn is_phys_contiguous(&self) -> bool {
        self.dma_pages()
            .windows(2)
            .all(|pair| pair[1].0 == pair[0].0 + 1)
    }

    /// Copy `src` into the start of the buffer
    ///
    /// # Errors
    /// Returns `InvalidInput` if `src` does not fit
    pub fn copy_from(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.len {
            return Err(Error::InvalidInput(format!(
                "{} bytes do not fit a {}-byte buffer",
                src.len(),
                self.len
            )));
        }
        self[..src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl Deref for ContigBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `layout.size() >= len` initialized bytes
        // for as long as `self` lives.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for ContigBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for ContigBuffer {
    fn drop(&mut self) {
        self.allocator.release(self.ptr, self.layout, self.origin);
    }
}

impl fmt::Debug for ContigBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContigBuffer")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len)
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> ContigAllocator {
        ContigAllocator::new(1024 * 1024, 64 * 1024)
    }

    #[test]
    fn test_allocation_is_page_aligned_and_zeroed() {
        let alloc = allocator();
        let buf = alloc.allocate(5000).unwrap();
        assert_eq!(buf.len(), 5000);
        assert_eq!(buf.capacity(), 2 * PAGE_SIZE);
        assert_eq!(buf.addr() % PAGE_SIZE, 0);
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(alloc.in_use(), 2 * PAGE_SIZE);
    }

    #[test]
    fn test_zero_allocation() {
        assert!(matches!(
            allocator().allocate(0),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_capacity_exhausted() {
        let alloc = ContigAllocator::new(4 * PAGE_SIZE, 64 * 1024);
        let held = alloc.allocate(3 * PAGE_SIZE).unwrap();
        let err = alloc.allocate(2 * PAGE_SIZE).unwrap_err();
        assert!(matches!(err, Error::AllocationFailure { .. }));
        // The failed request leaves nothing behind
        assert_eq!(alloc.in_use(), 3 * PAGE_SIZE);
        assert_eq!(alloc.allocations(), 1);
        drop(held);
        assert!(alloc.allocate(2 * PAGE_SIZE).is_ok());
    }

    #[test]
    fn test_direct_origin_translation() {
        let alloc = allocator();
        let buf = alloc.allocate(PAGE_SIZE).unwrap();
        assert_eq!(buf.origin(), MemOrigin::Direct);
        let page = alloc.resolve_physical_page(buf.addr());
        assert_eq!(page.pfn(), (buf.addr() >> PAGE_SHIFT) as u64);
        assert_eq!(buf.phys_addr(), page.addr());
    }

    #[test]
    fn test_virt_mapped_origin_translation() {
        let alloc = allocator();
        let buf = alloc.allocate(128 * 1024).unwrap();
        assert_eq!(buf.origin(), MemOrigin::VirtMapped);

        let first = alloc.resolve_physical_page(buf.addr());
        assert!(first.pfn() >= VMAP_BASE_PFN);
        let third = alloc.resolve_physical_page(buf.addr() + 2 * PAGE_SIZE + 17);
        assert_eq!(third.pfn(), first.pfn() + 2);
        assert!(buf.is_phys_contiguous());
        assert_eq!(buf.dma_pages().len(), 32);
    }

    #[test]
    fn test_free_unregisters_region() {
        let alloc = allocator();
        let buf = alloc.allocate(96 * 1024).unwrap();
        let addr = buf.addr();
        assert!(alloc.resolve_physical_page(addr).pfn() >= VMAP_BASE_PFN);

        alloc.free(buf);
        assert_eq!(alloc.in_use(), 0);
        assert_eq!(alloc.frees(), 1);
        assert_eq!(
            alloc.resolve_physical_page(addr).pfn(),
            (addr >> PAGE_SHIFT) as u64
        );
    }

    #[test]
    fn test_copy_from() {
        let alloc = allocator();
        let mut buf = alloc.allocate(10).unwrap();
        buf.copy_from(b"hello test").unwrap();
        assert_eq!(&buf[..], b"hello test");
        assert!(buf.copy_from(&[0u8; 11]).is_err());
    }
}
