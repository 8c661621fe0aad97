//! Device memory windows and address sanitization.
//!
//! A crash dump runs inside an environment that cannot be trusted: the
//! scheduler state it walks may be partially overwritten, so every address
//! range taken from it must be checked with pure range arithmetic before
//! anything dereferences it. This crate owns that check. A [`MemoryLayout`]
//! is the fixed, build-configured set of [`MemoryWindow`]s the device
//! considers valid RAM/ROM, plus the reserved window that substitute
//! ("fake") stacks are carved from.
//!
//! No predicate in this crate dereferences memory. The only accessor that
//! does, [`MemoryLayout::bytes`], refuses any range that the predicates
//! would reject.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

#[cfg(test)]
mod tests;

use core::fmt;
use core::marker::PhantomData;

/// Natural word size of the device, in bytes. Every encoded data length is
/// rounded up to this so a reader can predict lengths from address bounds.
pub const WORD_SIZE: u32 = 4;

/// Rounds `n` up to the next multiple of [`WORD_SIZE`].
#[inline]
pub const fn round_up_word(n: u32) -> u32 {
    (n + (WORD_SIZE - 1)) & !(WORD_SIZE - 1)
}

/// One contiguous region of device memory.
///
/// On the device itself a window is identity-backed: the bytes live at the
/// addresses they describe. Host tests back windows with ordinary buffers
/// so the full capture pipeline runs under `cargo test` with synthetic
/// device addresses.
#[derive(Clone, Copy, Debug)]
pub struct MemoryWindow<'a> {
    start: u32,
    len: u32,
    backing: *const u8,
    _marker: PhantomData<&'a [u8]>,
}

// The backing pointer is only ever read, and only through `bytes()` on
// ranges inside the window.
unsafe impl Send for MemoryWindow<'_> {}
unsafe impl Sync for MemoryWindow<'_> {}

impl<'a> MemoryWindow<'a> {
    /// A window whose bytes live at the addresses it describes.
    ///
    /// # Safety
    ///
    /// `start..start + len` must be readable for the lifetime of the window.
    pub const unsafe fn identity(start: u32, len: u32) -> Self {
        Self {
            start,
            len,
            backing: start as usize as *const u8,
            _marker: PhantomData,
        }
    }

    /// A window backed by `bytes`, describing synthetic device addresses
    /// starting at `start`. This is how tests stand in for device RAM.
    pub fn backed(start: u32, bytes: &'a [u8]) -> Self {
        Self {
            start,
            len: bytes.len() as u32,
            backing: bytes.as_ptr(),
            _marker: PhantomData,
        }
    }

    /// First address of the window.
    pub const fn start(&self) -> u32 {
        self.start
    }

    /// Length of the window in bytes.
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Whether the window covers no addresses.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn contains(&self, addr: u32, size: u32) -> bool {
        if size == 0 {
            return false;
        }
        let Some(end) = addr.checked_add(size) else {
            return false;
        };
        let Some(win_end) = self.start.checked_add(self.len) else {
            return false;
        };
        addr >= self.start && end <= win_end
    }

    fn bytes(&self, addr: u32, size: u32) -> Option<&'a [u8]> {
        if !self.contains(addr, size) {
            return None;
        }
        let off = (addr - self.start) as usize;
        // Safe per the constructor contracts: the whole window is readable.
        Some(unsafe { core::slice::from_raw_parts(self.backing.add(off), size as usize) })
    }
}

/// Errors detected while assembling a [`MemoryLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// A window wraps past the end of the address space.
    WindowWraps,
    /// The reserved fake-stack window overlaps a real memory window.
    FakeWindowOverlap,
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::WindowWraps => write!(f, "memory window wraps the address space"),
            Self::FakeWindowOverlap => {
                write!(f, "fake-stack window overlaps a real memory window")
            }
        }
    }
}

/// The device's fixed memory map, as the dump pipeline sees it.
#[derive(Clone, Copy, Debug)]
pub struct MemoryLayout<'a> {
    windows: &'a [MemoryWindow<'a>],
    max_task_stack: u32,
    fake_start: u32,
    fake_len: u32,
}

impl<'a> MemoryLayout<'a> {
    /// Builds a layout from the configured windows.
    ///
    /// `max_task_stack` bounds how long any single task stack may claim to
    /// be; a corrupted stack-end pointer must never turn into an unbounded
    /// read. `fake_start..fake_start + fake_len` is the reserved window for
    /// substitute stacks and must not intersect any real window, so offline
    /// readers can recognize substituted ranges by address alone.
    pub fn new(
        windows: &'a [MemoryWindow<'a>],
        max_task_stack: u32,
        fake_start: u32,
        fake_len: u32,
    ) -> Result<Self, LayoutError> {
        let Some(fake_end) = fake_start.checked_add(fake_len) else {
            return Err(LayoutError::WindowWraps);
        };
        for win in windows {
            let Some(win_end) = win.start.checked_add(win.len) else {
                return Err(LayoutError::WindowWraps);
            };
            if fake_start < win_end && win.start < fake_end {
                error!(
                    "fake-stack window {:#x}..{:#x} overlaps device window {:#x}..{:#x}",
                    fake_start, fake_end, win.start, win_end
                );
                return Err(LayoutError::FakeWindowOverlap);
            }
        }
        Ok(Self {
            windows,
            max_task_stack,
            fake_start,
            fake_len,
        })
    }

    /// Whether `addr..addr + size` lies entirely inside one device window.
    ///
    /// Pure range arithmetic; the address may be garbage and is never
    /// dereferenced here.
    pub fn is_memory_region_ok(&self, addr: u32, size: u32) -> bool {
        self.windows.iter().any(|w| w.contains(addr, size))
    }

    /// Whether `start..end` is acceptable as a task stack.
    ///
    /// On top of [`Self::is_memory_region_ok`] this requires `start < end`
    /// and caps the length at the configured maximum task-stack size.
    pub fn is_stack_ok(&self, start: u32, end: u32) -> bool {
        if start >= end {
            return false;
        }
        let len = end - start;
        if len > self.max_task_stack {
            return false;
        }
        self.is_memory_region_ok(start, len)
    }

    /// Resolves a sane range to its backing bytes.
    ///
    /// Returns `None` exactly when [`Self::is_memory_region_ok`] would
    /// reject the range. This is the single point where validated device
    /// addresses become readable slices.
    pub fn bytes(&self, addr: u32, size: u32) -> Option<&'a [u8]> {
        self.windows.iter().find_map(|w| w.bytes(addr, size))
    }

    /// First address of the reserved fake-stack window.
    pub const fn fake_window_start(&self) -> u32 {
        self.fake_start
    }

    /// Length of the reserved fake-stack window.
    pub const fn fake_window_len(&self) -> u32 {
        self.fake_len
    }

    /// Whether `addr` falls inside the reserved fake-stack window.
    pub const fn is_fake_address(&self, addr: u32) -> bool {
        addr >= self.fake_start && (addr - self.fake_start) < self.fake_len
    }

    /// Configured upper bound for a single task stack length.
    pub const fn max_task_stack(&self) -> u32 {
        self.max_task_stack
    }
}
