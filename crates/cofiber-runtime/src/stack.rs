//! Fiber stack memory
//!
//! A `Stack` is a single-owner buffer tied 1:1 to a sub-fiber. The strategy
//! that produces the memory is a `StackAllocator`, injected when the fiber
//! is created. Two strategies are provided:
//!
//! - `MallocStackAllocator` - plain `malloc`/`free`, the default
//! - `MmapStackAllocator` - page-rounded anonymous mapping with a
//!   `PROT_NONE` guard page below the usable stack, so an overflow faults
//!   instead of corrupting the heap

use cofiber_core::error::{FiberResult, MemoryError};
use cofiber_core::kprint::SYSTEM_LOGGER;
use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

/// Allocation strategy for fiber stacks
pub trait StackAllocator: Send + Sync {
    /// Allocate `size` usable bytes; the returned pointer is the lowest
    /// usable address
    fn alloc(&self, size: usize) -> FiberResult<NonNull<u8>>;

    /// Release a block returned by `alloc`
    ///
    /// # Safety
    ///
    /// `ptr` and `size` must come from a previous `alloc` on this allocator,
    /// and the block must not be in use by any context.
    unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize);

    /// Short name for diagnostics
    fn name(&self) -> &'static str;
}

/// `malloc`-backed stacks
#[derive(Debug, Default, Clone, Copy)]
pub struct MallocStackAllocator;

impl StackAllocator for MallocStackAllocator {
    fn alloc(&self, size: usize) -> FiberResult<NonNull<u8>> {
        if size == 0 {
            return Err(MemoryError::InvalidSize(size).into());
        }
        let ptr = unsafe { libc::malloc(size) } as *mut u8;
        NonNull::new(ptr).ok_or_else(|| MemoryError::AllocationFailed.into())
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, _size: usize) {
        libc::free(ptr.as_ptr() as *mut libc::c_void);
    }

    fn name(&self) -> &'static str {
        "malloc"
    }
}

/// Page-rounded `mmap` stacks with a guard page
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapStackAllocator;

impl MmapStackAllocator {
    fn page_size() -> usize {
        static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
        *PAGE_SIZE.get_or_init(|| {
            let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if sz > 0 {
                sz as usize
            } else {
                4096
            }
        })
    }

    /// Usable size rounded up to whole pages
    fn round_up(size: usize) -> Option<usize> {
        let page = Self::page_size();
        size.checked_add(page - 1).map(|s| s & !(page - 1))
    }
}

impl StackAllocator for MmapStackAllocator {
    fn alloc(&self, size: usize) -> FiberResult<NonNull<u8>> {
        if size == 0 {
            return Err(MemoryError::InvalidSize(size).into());
        }
        let page = Self::page_size();
        let total = Self::round_up(size)
            .and_then(|s| s.checked_add(page))
            .ok_or(MemoryError::InvalidSize(size))?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed.into());
        }

        // Lowest page becomes the guard; stacks grow down into it
        let ret = unsafe { libc::mprotect(base, page, libc::PROT_NONE) };
        if ret != 0 {
            unsafe { libc::munmap(base, total) };
            return Err(MemoryError::ProtectionFailed.into());
        }

        let usable = unsafe { (base as *mut u8).add(page) };
        NonNull::new(usable).ok_or_else(|| MemoryError::AllocationFailed.into())
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize) {
        let page = Self::page_size();
        let Some(rounded) = Self::round_up(size) else {
            return;
        };
        let base = ptr.as_ptr().sub(page);
        if libc::munmap(base as *mut libc::c_void, rounded + page) != 0 {
            cofiber_core::kerror!(
                target: SYSTEM_LOGGER,
                "munmap of fiber stack {:p} ({} bytes) failed: {}",
                base,
                rounded + page,
                std::io::Error::last_os_error()
            );
        }
    }

    fn name(&self) -> &'static str {
        "mmap"
    }
}

/// The allocator used when a fiber is created without one
pub fn default_allocator() -> Arc<dyn StackAllocator> {
    static DEFAULT: OnceLock<Arc<dyn StackAllocator>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Arc::new(MallocStackAllocator))
        .clone()
}

/// A live stack buffer, released on drop
pub struct Stack {
    base: NonNull<u8>,
    size: usize,
    allocator: Arc<dyn StackAllocator>,
}

impl Stack {
    /// Allocate `size` bytes through `allocator`
    pub fn new(size: usize, allocator: Arc<dyn StackAllocator>) -> FiberResult<Self> {
        let base = allocator.alloc(size)?;
        Ok(Self {
            base,
            size,
            allocator,
        })
    }

    /// Lowest usable address
    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// One past the highest usable address
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // Safety: base..base+size is the allocated block
        unsafe { self.base.as_ptr().add(self.size) }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether `addr` lies within this stack
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        let lo = self.base.as_ptr() as usize;
        addr >= lo && addr <= lo + self.size
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // Safety: allocated by this allocator with this size, and the owning
        // fiber only drops its stack in a non-running state
        unsafe { self.allocator.dealloc(self.base, self.size) };
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.base)
            .field("size", &self.size)
            .field("allocator", &self.allocator.name())
            .finish()
    }
}
