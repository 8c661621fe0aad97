// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Task enumeration over the frozen scheduler.
//!
//! The scheduler's task table is walked exactly as the fault left it.
//! Nothing reported by the table is trusted: the control-block range and
//! the stack range of every task are validated with pure range arithmetic
//! before any byte is read. A task with a corrupted control block is
//! skipped and counted; a task with a corrupted stack is kept but has its
//! stack replaced by a substitute block, since omitting a task from the
//! dump is worse than recording it with a synthetic stack.
//!
//! After enumeration every snapshot satisfies `stack_start < stack_end`
//! and resolves through [`DumpSession::stack_bytes`]; downstream encoders
//! rely on that and re-check nothing.

use kdumpcpu::CpuPort;
use kregions::{WORD_SIZE, round_up_word};

use crate::config::{DumpConfig, FRAGMENT_CAPTURE, MAX_CORES, MAX_TASKS, MemSegment};
use crate::fakestack::FakeStackPool;
use crate::smp::CorePublish;
use crate::stats::DumpStats;
use crate::{DumpError, PanicContext, Result};

/// Opaque task identity, used only for comparison and lookup. The value
/// happens to be the control-block address on the schedulers we embed
/// into, but nothing here dereferences it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskHandle(pub u32);

/// What the frozen scheduler reports for one task, before validation.
#[derive(Debug, Clone, Copy)]
pub struct RawTaskRegion {
    pub tcb_addr: u32,
    /// Saved top of stack; for a suspended task this is where its frame
    /// was spilled.
    pub stack_start: u32,
    pub stack_end: u32,
}

/// Read-only view of the scheduler state frozen by the fault handler.
///
/// Implemented by the embedding kernel over its real task table; tests
/// drive the pipeline with synthetic implementations.
pub trait FrozenScheduler {
    fn first_task(&self) -> Option<TaskHandle>;
    fn next_task(&self, task: TaskHandle) -> Option<TaskHandle>;
    fn task_region(&self, task: TaskHandle) -> RawTaskRegion;
    /// The task that was executing on `core` when the fault hit.
    fn running_task(&self, core: usize) -> TaskHandle;
    fn core_count(&self) -> usize;
}

/// One validated task, as the encoders will record it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSnapshot {
    pub handle: TaskHandle,
    pub tcb_addr: u32,
    pub stack_start: u32,
    /// Word-aligned; `stack_end - stack_start` is exactly the encoded
    /// stack length.
    pub stack_end: u32,
    /// Whether the stack range is a substitute block.
    pub fake_stack: bool,
}

impl TaskSnapshot {
    pub fn stack_len(&self) -> u32 {
        self.stack_end - self.stack_start
    }
}

/// All mutable state of one dump.
///
/// Exactly one session exists per dump; the pipeline is not re-entrant.
/// Holding the scratch arrays here rather than in statics makes that
/// explicit and keeps the dump stack budget predictable.
pub struct DumpSession {
    tasks: [TaskSnapshot; MAX_TASKS],
    task_count: usize,
    fault_index: Option<usize>,
    fragments: [MemSegment; MAX_CORES],
    fragment_count: usize,
    pool: FakeStackPool,
    broken_tcb: u32,
    broken_stack: u32,
}

impl DumpSession {
    pub fn new(cfg: &DumpConfig) -> Self {
        Self {
            tasks: [TaskSnapshot::default(); MAX_TASKS],
            task_count: 0,
            fault_index: None,
            fragments: [MemSegment::default(); MAX_CORES],
            fragment_count: 0,
            pool: FakeStackPool::new(
                cfg.layout.fake_window_start(),
                cfg.layout.fake_window_len(),
            ),
            broken_tcb: 0,
            broken_stack: 0,
        }
    }

    /// Snapshots in the scheduler's native order.
    pub fn tasks(&self) -> &[TaskSnapshot] {
        &self.tasks[..self.task_count]
    }

    /// Snapshot indices with the fault-origin task first, so a reader can
    /// find it without scanning. The remaining tasks keep their native
    /// order.
    pub(crate) fn order(&self) -> impl Iterator<Item = usize> + '_ {
        let fault = self.fault_index;
        fault
            .into_iter()
            .chain((0..self.task_count).filter(move |&i| Some(i) != fault))
    }

    /// Snapshots in encoding order (fault-origin task first).
    pub fn tasks_ordered(&self) -> impl Iterator<Item = &TaskSnapshot> + '_ {
        self.order().map(|i| &self.tasks[i])
    }

    pub(crate) fn fault_index(&self) -> Option<usize> {
        self.fault_index
    }

    /// Interrupt-context fragments found during enumeration.
    pub fn fragments(&self) -> &[MemSegment] {
        &self.fragments[..self.fragment_count]
    }

    /// Resolves a snapshot's stack range to bytes, through the fake pool
    /// for substituted stacks and the memory windows for real ones.
    pub(crate) fn stack_bytes<'s>(
        &'s self,
        cfg: &DumpConfig<'s>,
        snap: &TaskSnapshot,
    ) -> Result<&'s [u8]> {
        let got = if snap.fake_stack {
            self.pool.bytes(snap.stack_start, snap.stack_len())
        } else {
            cfg.layout.bytes(snap.stack_start, snap.stack_len())
        };
        got.ok_or(DumpError::Unmapped)
    }

    pub(crate) fn stats(&self, bytes_written: u32) -> DumpStats {
        DumpStats {
            tasks: self.task_count as u32,
            broken_tcb: self.broken_tcb,
            broken_stack: self.broken_stack,
            bytes_written,
        }
    }
}

/// Walks the frozen task table into `session`.
///
/// Waits for every other core to publish its running task first; the
/// published frame addresses replace the stale stack tops the scheduler
/// still holds for the tasks that were executing.
pub(crate) fn enumerate<P, F>(
    session: &mut DumpSession,
    cfg: &DumpConfig,
    sched: &F,
    ctx: &PanicContext,
    cores: &CorePublish,
) -> Result<()>
where
    P: CpuPort,
    F: FrozenScheduler,
{
    let core_count = sched.core_count().min(MAX_CORES);
    let mut running: [(TaskHandle, u32); MAX_CORES] = [(TaskHandle(0), 0); MAX_CORES];
    for core in 0..core_count {
        running[core] = if core == ctx.core {
            (sched.running_task(core), ctx.frame_addr)
        } else {
            let state = cores.wait_published(core);
            (state.task, state.frame_addr)
        };
    }
    let fault_task = running[ctx.core.min(core_count.saturating_sub(1))].0;

    let tcb_len = round_up_word(cfg.tcb_size);
    let mut next = sched.first_task();
    while let Some(handle) = next {
        next = sched.next_task(handle);

        if session.task_count == MAX_TASKS {
            error!("task table exceeds {} entries", MAX_TASKS);
            return Err(DumpError::TooManyTasks);
        }

        let region = sched.task_region(handle);
        if !cfg.layout.is_memory_region_ok(region.tcb_addr, tcb_len) {
            warn!(
                "task {:#x}: control block {:#x} not in any window, skipping",
                handle.0, region.tcb_addr
            );
            session.broken_tcb += 1;
            continue;
        }

        // For a task that was executing, the scheduler's saved stack top
        // is stale; the frame its core published is the real top.
        let mut stack_start = region.stack_start;
        for &(task, frame) in &running[..core_count] {
            if task == handle {
                stack_start = frame;
            }
        }

        // Sanitize the raw bounds before any arithmetic on them; garbage
        // values must fail the checks, never wrap.
        let mut stack_end = region.stack_end;
        let mut sane = cfg.layout.is_stack_ok(stack_start, stack_end);
        if sane {
            sane = false;
            let len = stack_end - stack_start;
            if let Some(rounded) = len.checked_next_multiple_of(WORD_SIZE) {
                if cfg.layout.is_memory_region_ok(stack_start, rounded) {
                    stack_end = stack_start + rounded;
                    sane = true;
                }
            }
        }

        let mut fake_stack = false;
        if !sane {
            warn!(
                "task {:#x}: stack {:#x}..{:#x} failed sanitization, substituting",
                handle.0, stack_start, stack_end
            );
            let (addr, size) = session.pool.allocate::<P>()?;
            stack_start = addr;
            stack_end = addr + size;
            fake_stack = true;
            session.broken_stack += 1;
        }

        let index = session.task_count;
        session.tasks[index] = TaskSnapshot {
            handle,
            tcb_addr: region.tcb_addr,
            stack_start,
            stack_end,
            fake_stack,
        };
        if handle == fault_task {
            session.fault_index = Some(index);
        }
        session.task_count += 1;
    }

    if session.task_count == 0 {
        return Err(DumpError::NoTasks);
    }

    // A frame that lives outside its task's recorded stack sits on an
    // interrupt stack; capture that region too so the interrupted context
    // is not lost.
    for &(task, frame) in &running[..core_count] {
        let covered = session
            .tasks()
            .iter()
            .find(|s| s.handle == task)
            .is_some_and(|s| frame >= s.stack_start && frame < s.stack_end);
        if covered {
            continue;
        }
        let size = round_up_word(FRAGMENT_CAPTURE);
        if cfg.layout.is_memory_region_ok(frame, size) {
            session.fragments[session.fragment_count] = MemSegment { start: frame, size };
            session.fragment_count += 1;
        } else {
            debug!("interrupted frame {:#x} not capturable, dropping fragment", frame);
        }
    }

    debug!(
        "enumerated {} tasks, {} broken tcb, {} broken stack, {} fragments",
        session.task_count, session.broken_tcb, session.broken_stack, session.fragment_count
    );
    Ok(())
}
