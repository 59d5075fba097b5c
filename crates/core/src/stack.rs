//! Stack Arena
//!
//! A private call stack for one coroutine: a page-aligned mapping with a guard
//! page at the low end, the end a downward-growing stack runs into when it
//! overflows.
//!
//! ## Layout
//!
//! ```text
//!  base                                                    top
//!   ├──────────────┬────────────────────────────────────────┤
//!   │ guard (1 pg) │ usable (size rounded up to pages)       │
//!   │  PROT_NONE   │  PROT_READ | PROT_WRITE                 │
//!   └──────────────┴────────────────────────────────────────┘
//!                   ▲ usable_base                   SP starts ▲
//! ```
//!
//! Overflowing into the guard page faults immediately. That is fatal by
//! construction; size arenas generously instead of trying to recover.

use crate::error::AllocError;
use crate::page::{PageSource, Protection, round_to_pages};
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, warn};

/// Address range a stack may legally use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBounds {
    /// Lowest usable address (just above the guard page)
    pub base: usize,
    /// Usable bytes; the initial stack pointer is `base + size`
    pub size: usize,
}

impl StackBounds {
    /// One past the highest usable address
    pub fn top(&self) -> usize {
        self.base + self.size
    }

    /// Whether `addr` falls inside the usable range
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.top()
    }
}

/// One coroutine's stack memory
///
/// Owns its mapping exclusively. Released on drop or by an explicit
/// [`StackArena::release`], whichever happens first.
pub struct StackArena {
    region: Option<NonNull<u8>>,
    total: usize,
    page: usize,
    guarded: bool,
    source: Arc<dyn PageSource>,
}

impl StackArena {
    /// Map a stack of at least `size` usable bytes
    ///
    /// The usable size is `size` rounded up to whole pages (minimum one page);
    /// one extra page sits below it and is made inaccessible when `guard` is set.
    pub fn acquire(
        source: Arc<dyn PageSource>,
        size: usize,
        guard: bool,
    ) -> Result<Self, AllocError> {
        let page = source.page_size();
        let usable = round_to_pages(size.max(1), page)
            .ok_or(AllocError::Overflow { requested: size })?;
        let total = usable
            .checked_add(page)
            .ok_or(AllocError::Overflow { requested: size })?;

        let region = source
            .map(total)
            .map_err(|source| AllocError::Map { len: total, source })?;

        if guard {
            // SAFETY: the first page lies inside the region just mapped.
            if let Err(err) = unsafe { source.protect(region, page, Protection::None) } {
                // SAFETY: region/total came straight from map and are unused.
                if let Err(unmap_err) = unsafe { source.unmap(region, total) } {
                    warn!(error = %unmap_err, "failed to unmap stack after guard failure");
                }
                return Err(AllocError::Protect { source: err });
            }
        }

        debug!(
            base = region.as_ptr() as usize,
            usable,
            guard,
            "stack arena acquired"
        );

        Ok(StackArena {
            region: Some(region),
            total,
            page,
            guarded: guard,
            source,
        })
    }

    /// Address just past the end of the usable region
    ///
    /// Page aligned, so it satisfies every ABI's initial stack alignment.
    pub fn top(&self) -> usize {
        self.region
            .map(|r| r.as_ptr() as usize + self.total)
            .unwrap_or(0)
    }

    /// Usable bytes, excluding the guard page
    pub fn usable_size(&self) -> usize {
        self.total - self.page
    }

    /// Total mapped bytes, including the guard page
    pub fn mapped_size(&self) -> usize {
        self.total
    }

    /// Whether the low page is currently protected
    pub fn is_guarded(&self) -> bool {
        self.guarded && self.region.is_some()
    }

    /// Whether the memory is still mapped
    pub fn is_mapped(&self) -> bool {
        self.region.is_some()
    }

    /// Usable address range, `None` once released
    pub fn bounds(&self) -> Option<StackBounds> {
        self.region.map(|r| StackBounds {
            base: r.as_ptr() as usize + self.page,
            size: self.usable_size(),
        })
    }

    /// Return all pages to the OS. Idempotent.
    ///
    /// Nothing may still be executing on this stack.
    pub fn release(&mut self) {
        let Some(region) = self.region.take() else {
            return;
        };

        if self.guarded {
            // SAFETY: the guard page belongs to a mapping we still own.
            if let Err(err) = unsafe { self.source.protect(region, self.page, Protection::ReadWrite) }
            {
                warn!(error = %err, "failed to unprotect stack guard page");
            }
        }

        // SAFETY: region/total describe the mapping made in acquire, taken above
        // so it cannot be unmapped twice.
        if let Err(err) = unsafe { self.source.unmap(region, self.total) } {
            warn!(error = %err, "failed to unmap stack arena");
        }

        debug!(base = region.as_ptr() as usize, len = self.total, "stack arena released");
    }
}

impl Drop for StackArena {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for StackArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackArena")
            .field("bounds", &self.bounds())
            .field("mapped", &self.total)
            .field("guarded", &self.is_guarded())
            .finish()
    }
}
