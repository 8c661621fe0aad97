// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Per-architecture support for the crash-dump pipeline.
//!
//! Each supported CPU is a [`CpuPort`]: it knows the saved-frame layout a
//! suspended task leaves on its stack, recovers a normalized register set
//! from it, and lays down the placeholder frame used when a task's real
//! stack failed validation. The active port is a build-time choice: the
//! [`CurrentPort`] alias is selected by cargo feature and there is no
//! run-time dispatch, since a device only ever targets one architecture.
//! Both port modules always compile, so host tests can exercise either
//! one.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

#[cfg(test)]
mod tests;

pub mod riscv;
pub mod xtensa;

mod stack;

pub use stack::{DumpStack, run_on_dump_stack};

use core::fmt;

use bytemuck::Pod;

cfg_if::cfg_if! {
    if #[cfg(feature = "xtensa")] {
        /// The port the device is built for.
        pub use crate::xtensa::XtensaPort as CurrentPort;
    } else {
        /// The port the device is built for.
        pub use crate::riscv::RiscvPort as CurrentPort;
    }
}

/// Value stamped into register fields that do not apply to a frame, e.g.
/// the exception cause of a task that was merely preempted.
pub const REG_NOT_APPLICABLE: u32 = 0xffff_ffff;

/// Upper bound on side-table entries a single frame can produce.
pub const MAX_EXTRA_REGS: usize = 16;

/// Where a saved frame came from, as known to the task enumerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// The frame of the task that took the fatal fault.
    Fault,
    /// A task that was merely suspended or preempted at fault time.
    Preempted,
}

/// Errors raised while decoding a saved frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    /// The supplied frame is smaller than the architecture's minimum;
    /// reading past it would dereference unvalidated memory.
    FrameTooShort,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FrameTooShort => write!(f, "saved frame shorter than architecture minimum"),
        }
    }
}

/// One entry of the interrupt-context side table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegPair {
    pub id: u32,
    pub value: u32,
}

/// Variable-length side table of interrupt-context registers recovered
/// alongside the normalized set. Empty for every preempted task and for
/// flat-register architectures.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtraRegs {
    pairs: [RegPair; MAX_EXTRA_REGS],
    len: usize,
}

impl ExtraRegs {
    pub const fn new() -> Self {
        Self {
            pairs: [RegPair { id: 0, value: 0 }; MAX_EXTRA_REGS],
            len: 0,
        }
    }

    pub fn push(&mut self, id: u32, value: u32) {
        if self.len == MAX_EXTRA_REGS {
            warn!("extra register table full, dropping reg {:#x}", id);
            return;
        }
        self.pairs[self.len] = RegPair { id, value };
        self.len += 1;
    }

    pub fn as_slice(&self) -> &[RegPair] {
        &self.pairs[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A normalized register set plus its interrupt-context side table,
/// produced fresh per task per dump.
pub struct RegisterFile<P: CpuPort> {
    pub regs: P::Registers,
    pub extras: ExtraRegs,
}

impl<P: CpuPort> Clone for RegisterFile<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: CpuPort> Copy for RegisterFile<P> {}

/// One CPU architecture's view of saved task state.
pub trait CpuPort: Sized {
    /// The normalized register record emitted into the program-status
    /// note. Plain old data so encoders can take its raw bytes.
    type Registers: Pod;

    /// Smallest frame this port will touch; shorter input fails fast.
    const MIN_FRAME: usize;

    /// ELF `e_machine` value for this architecture.
    const ELF_MACHINE: u16;

    /// Recovers the register set from the saved frame at the top of a
    /// task's stack.
    fn extract(frame: &[u8], origin: FrameOrigin) -> Result<RegisterFile<Self>, PortError>;

    /// Lays a minimal placeholder frame into a substitute stack block.
    /// The frame's return link is the terminator value, so any backtrace
    /// walker stops immediately instead of wandering into unrelated
    /// memory.
    fn write_fake_frame(block: &mut [u8]);
}
