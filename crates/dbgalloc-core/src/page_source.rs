//! Component A — Page Source.
//!
//! Obtains/releases page-sized, page-aligned memory from the operating
//! system and applies read/write/no-access protection to ranges. This is
//! the only component that talks to the OS directly; everything above it
//! addresses memory as plain `usize` base/len pairs.

#![allow(unsafe_code)]

use crate::error::AllocError;

/// A page-aligned, page-multiple range of OS-backed memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: usize,
    pub len: usize,
}

impl Region {
    #[must_use]
    pub const fn end(self) -> usize {
        self.base + self.len
    }

    #[must_use]
    pub const fn contains(self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// Page protection modes. `protect` is advisory in environments without
/// page protection support (the capability reports this at construction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectMode {
    ReadWrite,
    ReadOnly,
    NoAccess,
}

/// Static facts about the host's page model.
#[derive(Debug, Clone, Copy)]
pub struct PageDescriptor {
    pub page_size: usize,
    pub stack_grows_down: bool,
    /// Whether `protect` actually changes access on this host, or is a
    /// pure no-op advisory call.
    pub protection_supported: bool,
}

/// Capability object for obtaining raw OS memory. Implementers must
/// guarantee reservations are page-aligned and page-multiple in size.
///
/// `reserve` is never retried internally; the caller (Component E) is
/// responsible for any retry policy (Component G).
pub trait PageSource: Send + Sync {
    /// Reserve `n` bytes, rounded up to a whole number of pages.
    fn reserve(&self, n: usize) -> Result<Region, AllocError>;

    /// Release a region previously returned by `reserve`.
    fn release(&self, region: Region);

    /// Change protection on a region. Advisory-only where unsupported.
    fn protect(&self, region: Region, mode: ProtectMode);

    /// Static facts about this page source's host.
    fn descriptor(&self) -> PageDescriptor;
}

/// `mmap`/`munmap`/`mprotect`-backed page source for Unix-like hosts.
pub struct MmapPageSource {
    page_size: usize,
}

impl MmapPageSource {
    #[must_use]
    pub fn new() -> Self {
        // SAFETY: sysconf with a well-known name argument is always sound.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = if page_size > 0 { page_size as usize } else { 4096 };
        Self { page_size }
    }

    fn round_up_to_pages(&self, n: usize) -> usize {
        let n = n.max(1);
        let mask = self.page_size - 1;
        (n + mask) & !mask
    }
}

impl Default for MmapPageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PageSource for MmapPageSource {
    fn reserve(&self, n: usize) -> Result<Region, AllocError> {
        let len = self.round_up_to_pages(n);
        let pages = len / self.page_size;
        // SAFETY: MAP_ANONYMOUS|MAP_PRIVATE with a null address hint is the
        // standard "give me fresh pages" request; the returned pointer (or
        // MAP_FAILED) is checked below before use.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(AllocError::OutOfAddressSpace { pages });
        }
        Ok(Region {
            base: ptr as usize,
            len,
        })
    }

    fn release(&self, region: Region) {
        // SAFETY: `region` was produced by `reserve` on this same source and
        // has not been released before (caller contract); length matches
        // the original mapping.
        unsafe {
            libc::munmap(region.base as *mut libc::c_void, region.len);
        }
    }

    fn protect(&self, region: Region, mode: ProtectMode) {
        let prot = match mode {
            ProtectMode::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            ProtectMode::ReadOnly => libc::PROT_READ,
            ProtectMode::NoAccess => libc::PROT_NONE,
        };
        // SAFETY: `region` is a live mapping owned by this page source;
        // mprotect never changes the mapping's extent, only its access.
        unsafe {
            libc::mprotect(region.base as *mut libc::c_void, region.len, prot);
        }
    }

    fn descriptor(&self) -> PageDescriptor {
        PageDescriptor {
            page_size: self.page_size,
            // Stacks grow down on every architecture this library targets.
            stack_grows_down: true,
            protection_supported: true,
        }
    }
}

/// In-memory, non-protecting page source for tests: backs regions with
/// ordinary heap allocations rather than real OS mappings, so it runs
/// under Miri-style sanitizers and never exhausts real address space.
pub struct HeapPageSource {
    page_size: usize,
}

impl HeapPageSource {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }
}

impl PageSource for HeapPageSource {
    fn reserve(&self, n: usize) -> Result<Region, AllocError> {
        let mask = self.page_size - 1;
        let len = (n.max(1) + mask) & !mask;
        let layout = std::alloc::Layout::from_size_align(len, self.page_size)
            .map_err(|_| AllocError::OutOfAddressSpace { pages: len / self.page_size })?;
        // SAFETY: layout is non-zero-sized and validated above.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(AllocError::OutOfAddressSpace {
                pages: len / self.page_size,
            });
        }
        Ok(Region {
            base: ptr as usize,
            len,
        })
    }

    fn release(&self, region: Region) {
        let layout = std::alloc::Layout::from_size_align(region.len, self.page_size)
            .expect("region was reserved with a valid layout");
        // SAFETY: `region` was allocated by `reserve` with this same layout.
        unsafe {
            std::alloc::dealloc(region.base as *mut u8, layout);
        }
    }

    fn protect(&self, _region: Region, _mode: ProtectMode) {
        // Advisory only: a plain heap allocation cannot be protected
        // without real page mappings.
    }

    fn descriptor(&self) -> PageDescriptor {
        PageDescriptor {
            page_size: self.page_size,
            stack_grows_down: true,
            protection_supported: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_source_rounds_up_to_pages() {
        let src = HeapPageSource::new(4096);
        let r = src.reserve(1).unwrap();
        assert_eq!(r.len, 4096);
        let r2 = src.reserve(4097).unwrap();
        assert_eq!(r2.len, 8192);
        src.release(r);
        src.release(r2);
    }

    #[test]
    fn region_contains() {
        let r = Region { base: 0x1000, len: 0x1000 };
        assert!(r.contains(0x1000));
        assert!(r.contains(0x1fff));
        assert!(!r.contains(0x2000));
    }

    #[test]
    fn mmap_descriptor_reports_protection_supported() {
        let src = MmapPageSource::new();
        assert!(src.descriptor().protection_supported);
        assert!(src.descriptor().page_size >= 4096);
    }

    #[test]
    fn mmap_reserve_release_roundtrip() {
        let src = MmapPageSource::new();
        let region = src.reserve(8192).unwrap();
        assert_eq!(region.len % src.descriptor().page_size, 0);
        src.release(region);
    }
}
