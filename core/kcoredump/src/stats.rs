// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Dump accounting.
//!
//! Two views of the same numbers: [`DumpStats`] is returned to the fault
//! handler for the dump it just ran, and a small set of module statics
//! accumulates across dumps so the shell's `coredump` command can report
//! after the fact (on devices that survive a dump, and in tests).

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// Outcome counters for one dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    /// Tasks recorded in the artifact.
    pub tasks: u32,
    /// Tasks skipped because their control block failed validation.
    pub broken_tcb: u32,
    /// Tasks recorded with a substitute stack.
    pub broken_stack: u32,
    /// Artifact length, header and trailer included.
    pub bytes_written: u32,
}

impl DumpStats {
    /// Damaged tasks of either kind; zero means full fidelity.
    pub fn broken_total(&self) -> u32 {
        self.broken_tcb + self.broken_stack
    }
}

static DUMPS_ATTEMPTED: AtomicU32 = AtomicU32::new(0);
static DUMPS_COMPLETED: AtomicU32 = AtomicU32::new(0);
static LAST_BROKEN: AtomicU32 = AtomicU32::new(0);
static LAST_BYTES: AtomicU32 = AtomicU32::new(0);

pub(crate) fn record_attempt() {
    DUMPS_ATTEMPTED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_completed(stats: &DumpStats) {
    DUMPS_COMPLETED.fetch_add(1, Ordering::Relaxed);
    LAST_BROKEN.store(stats.broken_total(), Ordering::Relaxed);
    LAST_BYTES.store(stats.bytes_written, Ordering::Relaxed);
}

/// Writes the accumulated counters, one per line, to `out`.
pub fn report(out: &mut dyn fmt::Write) -> fmt::Result {
    writeln!(
        out,
        "dumps attempted: {}",
        DUMPS_ATTEMPTED.load(Ordering::Relaxed)
    )?;
    writeln!(
        out,
        "dumps completed: {}",
        DUMPS_COMPLETED.load(Ordering::Relaxed)
    )?;
    writeln!(out, "last broken tasks: {}", LAST_BROKEN.load(Ordering::Relaxed))?;
    writeln!(out, "last bytes written: {}", LAST_BYTES.load(Ordering::Relaxed))
}

/// Resets the accumulated counters.
pub fn clear() {
    DUMPS_ATTEMPTED.store(0, Ordering::Relaxed);
    DUMPS_COMPLETED.store(0, Ordering::Relaxed);
    LAST_BROKEN.store(0, Ordering::Relaxed);
    LAST_BYTES.store(0, Ordering::Relaxed);
}
