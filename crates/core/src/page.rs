//! Page Source
//!
//! Stack arenas never talk to the OS directly. They go through a
//! [`PageSource`], which lets tests substitute a double that counts map and
//! unmap calls while still handing out real memory.
//!
//! ```text
//! StackArena::acquire ──► PageSource::map ──► mmap(PROT_READ|PROT_WRITE)
//!                    └──► PageSource::protect(guard, None) ──► mprotect
//! StackArena::release ──► PageSource::protect(guard, ReadWrite)
//!                    └──► PageSource::unmap ──► munmap
//! ```

use std::io;
use std::ptr::NonNull;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Access rights applied to a range of pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Any access faults (guard pages)
    None,
    /// Normal stack memory
    ReadWrite,
}

/// Provider of page-granular memory for stack arenas
///
/// Implementations must hand out page-aligned regions. `Send + Sync` so one
/// source can be shared by coroutines created on different threads.
pub trait PageSource: Send + Sync {
    /// Size of one page in bytes (a power of two)
    fn page_size(&self) -> usize;

    /// Reserve and commit `len` bytes of read/write memory
    ///
    /// `len` is always a multiple of [`PageSource::page_size`].
    fn map(&self, len: usize) -> io::Result<NonNull<u8>>;

    /// Change the protection of `len` bytes starting at `addr`
    ///
    /// # Safety
    /// `addr..addr+len` must lie inside a region returned by `map` on this
    /// source that has not been unmapped.
    unsafe fn protect(&self, addr: NonNull<u8>, len: usize, prot: Protection) -> io::Result<()>;

    /// Return a region to the OS
    ///
    /// # Safety
    /// `addr` and `len` must describe exactly one region returned by `map`,
    /// and nothing may access it afterwards.
    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> io::Result<()>;
}

/// The operating system's virtual memory, via libc
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPages;

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Platform page size, queried once
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 { 4096 } else { size as usize }
    })
}

/// Round `len` up to a whole number of pages, `None` on overflow
pub fn round_to_pages(len: usize, page: usize) -> Option<usize> {
    debug_assert!(page.is_power_of_two());
    len.checked_add(page - 1).map(|n| n & !(page - 1))
}

#[cfg(target_os = "linux")]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK;

#[cfg(not(target_os = "linux"))]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

impl PageSource for SystemPages {
    fn page_size(&self) -> usize {
        page_size()
    }

    fn map(&self, len: usize) -> io::Result<NonNull<u8>> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_FLAGS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| io::Error::from_raw_os_error(libc::ENOMEM))
    }

    unsafe fn protect(&self, addr: NonNull<u8>, len: usize, prot: Protection) -> io::Result<()> {
        let flags = match prot {
            Protection::None => libc::PROT_NONE,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        };
        let rc = unsafe { libc::mprotect(addr.as_ptr().cast(), len, flags) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        let rc = unsafe { libc::munmap(addr.as_ptr().cast(), len) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// A [`PageSource`] wrapper that counts every call it forwards
///
/// Used to check that arenas are mapped and unmapped exactly once, including
/// when their coroutine is abandoned mid-flight.
#[derive(Debug, Default)]
pub struct TrackingPages<S = SystemPages> {
    inner: S,
    maps: AtomicUsize,
    unmaps: AtomicUsize,
    protects: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl<S: PageSource> TrackingPages<S> {
    pub fn new(inner: S) -> Self {
        TrackingPages {
            inner,
            maps: AtomicUsize::new(0),
            unmaps: AtomicUsize::new(0),
            protects: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
        }
    }

    /// Successful `map` calls
    pub fn maps(&self) -> usize {
        self.maps.load(Ordering::SeqCst)
    }

    /// Successful `unmap` calls
    pub fn unmaps(&self) -> usize {
        self.unmaps.load(Ordering::SeqCst)
    }

    /// Successful `protect` calls
    pub fn protects(&self) -> usize {
        self.protects.load(Ordering::SeqCst)
    }

    /// Bytes mapped and not yet unmapped
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }
}

impl<S: PageSource> PageSource for TrackingPages<S> {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn map(&self, len: usize) -> io::Result<NonNull<u8>> {
        let region = self.inner.map(len)?;
        self.maps.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_add(len, Ordering::SeqCst);
        Ok(region)
    }

    unsafe fn protect(&self, addr: NonNull<u8>, len: usize, prot: Protection) -> io::Result<()> {
        unsafe { self.inner.protect(addr, len, prot)? };
        self.protects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        unsafe { self.inner.unmap(addr, len)? };
        self.unmaps.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_sub(len, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let page = page_size();
        assert!(page >= 4096);
        assert!(page.is_power_of_two());
    }

    #[test]
    fn test_round_to_pages() {
        assert_eq!(round_to_pages(0, 4096), Some(0));
        assert_eq!(round_to_pages(1, 4096), Some(4096));
        assert_eq!(round_to_pages(4096, 4096), Some(4096));
        assert_eq!(round_to_pages(4097, 4096), Some(8192));
        assert_eq!(round_to_pages(usize::MAX, 4096), None);
    }

    #[test]
    fn test_system_pages_map_write_unmap() {
        let pages = SystemPages;
        let len = pages.page_size() * 2;
        let region = pages.map(len).expect("map two pages");
        assert_eq!(region.as_ptr() as usize % pages.page_size(), 0);

        unsafe {
            region.as_ptr().write(0xAB);
            region.as_ptr().add(len - 1).write(0xCD);
            assert_eq!(region.as_ptr().read(), 0xAB);
            pages.unmap(region, len).expect("unmap");
        }
    }

    #[test]
    fn test_tracking_pages_counts_calls() {
        let pages = TrackingPages::new(SystemPages);
        let len = pages.page_size();
        let region = pages.map(len).expect("map");
        assert_eq!(pages.maps(), 1);
        assert_eq!(pages.live_bytes(), len);

        unsafe {
            pages.protect(region, len, Protection::None).expect("protect");
            pages.protect(region, len, Protection::ReadWrite).expect("unprotect");
            pages.unmap(region, len).expect("unmap");
        }
        assert_eq!(pages.protects(), 2);
        assert_eq!(pages.unmaps(), 1);
        assert_eq!(pages.live_bytes(), 0);
    }
}
