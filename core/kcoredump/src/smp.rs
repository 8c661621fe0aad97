// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Cross-core capture barrier.
//!
//! The scheduler is frozen on every core before the dump starts, so the
//! usual blocking primitives are unusable. Each non-owning core records
//! which task it was executing and where its fault-adjacent frame lives,
//! then parks; the dump-owning core spin-waits until every slot is
//! published before it enumerates the task table. Nothing else can run at
//! that point, so the spin needs no timeout and no lock is taken.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::MAX_CORES;
use crate::task::TaskHandle;

/// What one core publishes about itself before parking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreState {
    /// The task that was executing on the core at fault time.
    pub task: TaskHandle,
    /// Address of the frame its interrupt entry saved.
    pub frame_addr: u32,
}

/// Shared publication slots, one per core.
///
/// Lives in a static owned by the fault handler; written by each core for
/// its own slot only, read by the dump owner.
pub struct CorePublish {
    ready: [AtomicBool; MAX_CORES],
    tasks: [AtomicU32; MAX_CORES],
    frames: [AtomicU32; MAX_CORES],
}

impl CorePublish {
    pub const fn new() -> Self {
        Self {
            ready: [const { AtomicBool::new(false) }; MAX_CORES],
            tasks: [const { AtomicU32::new(0) }; MAX_CORES],
            frames: [const { AtomicU32::new(0) }; MAX_CORES],
        }
    }

    /// Records `state` as `core`'s contribution and makes it visible to
    /// the dump owner. Called once per core per dump, by that core.
    pub fn publish(&self, core: usize, state: CoreState) {
        self.tasks[core].store(state.task.0, Ordering::Relaxed);
        self.frames[core].store(state.frame_addr, Ordering::Relaxed);
        self.ready[core].store(true, Ordering::Release);
    }

    /// Returns `core`'s published state, if it has arrived.
    pub fn get(&self, core: usize) -> Option<CoreState> {
        if !self.ready[core].load(Ordering::Acquire) {
            return None;
        }
        Some(CoreState {
            task: TaskHandle(self.tasks[core].load(Ordering::Relaxed)),
            frame_addr: self.frames[core].load(Ordering::Relaxed),
        })
    }

    /// Spins until `core` has published.
    pub fn wait_published(&self, core: usize) -> CoreState {
        loop {
            if let Some(state) = self.get(core) {
                return state;
            }
            core::hint::spin_loop();
        }
    }

    /// Clears all slots for the next dump. Only meaningful on a device
    /// that survives a dump attempt (and in tests).
    pub fn clear(&self) {
        for flag in &self.ready {
            flag.store(false, Ordering::Release);
        }
    }
}

impl Default for CorePublish {
    fn default() -> Self {
        Self::new()
    }
}
