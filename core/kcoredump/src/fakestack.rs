// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Substitute stacks for tasks whose real stack failed validation.
//!
//! Dropping a task from the dump is worse than recording it with a
//! synthetic stack, so each such task gets a fixed-size block carved from
//! the reserved fake-stack window. The window never overlaps real memory,
//! which is how offline readers tell "stack corrupted" apart from real
//! data. Blocks are handed out at monotonically increasing addresses so
//! no two broken tasks within one dump share a range.

use kdumpcpu::CpuPort;

use crate::config::{FAKE_STACK_SIZE, FAKE_STACK_SLOTS};
use crate::{DumpError, Result};

pub(crate) struct FakeStackPool {
    storage: [[u8; FAKE_STACK_SIZE as usize]; FAKE_STACK_SLOTS],
    base: u32,
    slots: usize,
    used: usize,
}

impl FakeStackPool {
    /// `base` is the first address of the reserved window; `window_len`
    /// caps how many blocks may be carved from it.
    pub(crate) fn new(base: u32, window_len: u32) -> Self {
        let slots = ((window_len / FAKE_STACK_SIZE) as usize).min(FAKE_STACK_SLOTS);
        Self {
            storage: [[0; FAKE_STACK_SIZE as usize]; FAKE_STACK_SLOTS],
            base,
            slots,
            used: 0,
        }
    }

    /// Carves the next block, lays the port's placeholder frame into it,
    /// and returns its (address, size) within the reserved window.
    pub(crate) fn allocate<P: CpuPort>(&mut self) -> Result<(u32, u32)> {
        if self.used == self.slots {
            error!("out of fake stacks after {} substitutions", self.used);
            return Err(DumpError::FakeStacksExhausted);
        }
        let slot = self.used;
        self.used += 1;
        P::write_fake_frame(&mut self.storage[slot]);
        let addr = self.base + slot as u32 * FAKE_STACK_SIZE;
        Ok((addr, FAKE_STACK_SIZE))
    }

    /// Resolves a range inside an allocated block to its bytes, the same
    /// way `MemoryLayout::bytes` does for real windows.
    pub(crate) fn bytes(&self, addr: u32, size: u32) -> Option<&[u8]> {
        if size == 0 || addr < self.base {
            return None;
        }
        let off = addr - self.base;
        let slot = (off / FAKE_STACK_SIZE) as usize;
        let within = (off % FAKE_STACK_SIZE) as usize;
        if slot >= self.used || within + size as usize > FAKE_STACK_SIZE as usize {
            return None;
        }
        Some(&self.storage[slot][within..within + size as usize])
    }
}
