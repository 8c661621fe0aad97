// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]

#[macro_use]
extern crate log;


pub mod config;
pub mod stats;

mod binary;
mod elf;
mod fakestack;
mod smp;
mod task;
mod writer;

pub use config::{BinaryVersion, DumpConfig, MemSegment};
pub use smp::{CorePublish, CoreState};
pub use stats::DumpStats;
pub use task::{DumpSession, FrozenScheduler, RawTaskRegion, TaskHandle, TaskSnapshot};
pub use writer::DumpSink;

use core::fmt;

use kdumpcpu::{CpuPort, PortError};

/// Result type for dump operations.
pub type Result<T> = core::result::Result<T, DumpError>;

/// Everything that can end a dump early.
///
/// Per-task damage (a corrupted TCB or stack) is *not* an error: those
/// tasks are skipped or substituted and counted in [`DumpStats`]. The
/// variants here abort the remaining pipeline stages immediately; there is
/// no retry anywhere in this subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpError {
    /// The sink reported too little capacity for the computed total
    /// length. Raised by `prepare` before any destructive write.
    InsufficientSpace,
    /// The sink failed while erasing, writing or finalizing.
    SinkIo,
    /// A saved frame was smaller than the architecture's minimum.
    FrameTooShort,
    /// The frozen scheduler reported more tasks than the fixed snapshot
    /// array can hold.
    TooManyTasks,
    /// More tasks needed substitute stacks than the reserved window holds.
    FakeStacksExhausted,
    /// The frozen scheduler reported no tasks at all.
    NoTasks,
    /// A range that passed validation could not be resolved to bytes;
    /// the configured memory windows are inconsistent.
    Unmapped,
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InsufficientSpace => write!(f, "sink capacity below computed dump length"),
            Self::SinkIo => write!(f, "write sink failed"),
            Self::FrameTooShort => write!(f, "saved frame shorter than architecture minimum"),
            Self::TooManyTasks => write!(f, "task table exceeds snapshot capacity"),
            Self::FakeStacksExhausted => write!(f, "fake stack window exhausted"),
            Self::NoTasks => write!(f, "frozen scheduler reported no tasks"),
            Self::Unmapped => write!(f, "validated range not backed by any window"),
        }
    }
}

impl From<PortError> for DumpError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::FrameTooShort => Self::FrameTooShort,
        }
    }
}

/// Register and exception state captured by the fault trap itself.
///
/// Built once by the fault handler, immutable afterwards, borrowed by the
/// pipeline for the duration of one dump.
#[derive(Debug, Clone, Copy)]
pub struct PanicContext {
    /// Program counter at the trap.
    pub exc_pc: u32,
    /// Faulting address, when the cause has one.
    pub exc_addr: u32,
    /// Architecture exception cause code.
    pub exc_cause: u32,
    /// Address of the interrupted-context frame saved by the trap entry.
    pub frame_addr: u32,
    /// The core the fault was taken on; it owns the dump.
    pub core: usize,
}

/// Captures the frozen system and writes the compact binary artifact.
///
/// Call exactly once, from the fault handler, after scheduling has been
/// suspended on every core and execution has moved to the dump stack.
/// The broken-task counts in the returned [`DumpStats`] are meaningful
/// even though the call succeeded: they distinguish a partial-fidelity
/// dump from a complete one.
pub fn dump_binary<P, S, F>(
    cfg: &DumpConfig,
    sched: &F,
    ctx: &PanicContext,
    cores: &CorePublish,
    sink: &mut S,
) -> Result<DumpStats>
where
    P: CpuPort,
    S: DumpSink,
    F: FrozenScheduler,
{
    stats::record_attempt();
    info!("core dump (binary) starting on core {}", ctx.core);

    let mut session = DumpSession::new(cfg);
    task::enumerate::<P, F>(&mut session, cfg, sched, ctx, cores)?;
    let written = binary::encode(&session, cfg, sink)?;

    let stats = session.stats(written);
    stats::record_completed(&stats);
    info!(
        "core dump done: {} tasks ({} broken), {} bytes",
        stats.tasks,
        stats.broken_total(),
        stats.bytes_written
    );
    Ok(stats)
}

/// Captures the frozen system and writes the ELF32 core-image artifact.
///
/// Same contract as [`dump_binary`].
pub fn dump_elf<P, S, F>(
    cfg: &DumpConfig,
    sched: &F,
    ctx: &PanicContext,
    cores: &CorePublish,
    sink: &mut S,
) -> Result<DumpStats>
where
    P: CpuPort,
    S: DumpSink,
    F: FrozenScheduler,
{
    stats::record_attempt();
    info!("core dump (elf) starting on core {}", ctx.core);

    let mut session = DumpSession::new(cfg);
    task::enumerate::<P, F>(&mut session, cfg, sched, ctx, cores)?;
    let written = elf::encode::<P, S>(&session, cfg, ctx, sink)?;

    let stats = session.stats(written);
    stats::record_completed(&stats);
    info!(
        "core dump done: {} tasks ({} broken), {} bytes",
        stats.tasks,
        stats.broken_total(),
        stats.bytes_written
    );
    Ok(stats)
}
