// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! End-to-end capture and decode over buffer-backed device memory.

use kchecksum::{CHECKSUM_LEN, checksum_of};
use kcoredump::config::{ELF_FORMAT_VERSION, FAKE_STACK_SIZE};
use kcoredump::{
    BinaryVersion, CorePublish, DumpConfig, DumpError, DumpSink, FrozenScheduler, MemSegment,
    PanicContext, RawTaskRegion, Result, TaskHandle, dump_binary, dump_elf,
};
use kdumpcpu::{CpuPort, CurrentPort};
use kregions::{MemoryLayout, MemoryWindow};
use object::read::elf::{FileHeader, ProgramHeader};
use object::{LittleEndian, elf};

const RAM_BASE: u32 = 0x3ffb_0000;
const FAKE_BASE: u32 = 0x2000_0000;
const TCB_SIZE: u32 = 40;

struct VecSink {
    buf: Vec<u8>,
    capacity: Option<u32>,
    ended: bool,
}

impl VecSink {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            capacity: None,
            ended: false,
        }
    }
}

impl DumpSink for VecSink {
    fn prepare(&mut self, total_len: &mut u32) -> Result<()> {
        match self.capacity {
            Some(cap) if *total_len > cap => Err(DumpError::InsufficientSpace),
            _ => Ok(()),
        }
    }

    fn start(&mut self, _total_len: u32) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.ended = true;
        Ok(())
    }
}

struct FakeSched {
    tasks: Vec<(TaskHandle, RawTaskRegion)>,
    running: Vec<TaskHandle>,
}

impl FrozenScheduler for FakeSched {
    fn first_task(&self) -> Option<TaskHandle> {
        self.tasks.first().map(|t| t.0)
    }

    fn next_task(&self, task: TaskHandle) -> Option<TaskHandle> {
        let pos = self.tasks.iter().position(|t| t.0 == task)?;
        self.tasks.get(pos + 1).map(|t| t.0)
    }

    fn task_region(&self, task: TaskHandle) -> RawTaskRegion {
        self.tasks.iter().find(|t| t.0 == task).map(|t| t.1).unwrap()
    }

    fn running_task(&self, core: usize) -> TaskHandle {
        self.running[core]
    }

    fn core_count(&self) -> usize {
        self.running.len()
    }
}

fn device_ram() -> Vec<u8> {
    (0..0x1000)
        .map(|i| (i as u8).wrapping_mul(29).wrapping_add(11))
        .collect()
}

fn config_over<'a>(ram: &'a [u8], segments: &'static [MemSegment]) -> DumpConfig<'a> {
    let windows = Box::leak(Box::new([MemoryWindow::backed(RAM_BASE, ram)]));
    DumpConfig {
        layout: MemoryLayout::new(windows, 0x800, FAKE_BASE, 0x600).unwrap(),
        tcb_size: TCB_SIZE,
        bin_version: BinaryVersion::Current,
        mem_segments: segments,
        build_id: b"roundtrip-build",
    }
}

fn region(tcb_off: u32, stack_off: u32, stack_len: u32) -> RawTaskRegion {
    RawTaskRegion {
        tcb_addr: RAM_BASE + tcb_off,
        stack_start: RAM_BASE + stack_off,
        stack_end: RAM_BASE + stack_off + stack_len,
    }
}

/// Two healthy tasks, task 2 running on the only core, plus one
/// configured device region.
fn two_task_sched() -> FakeSched {
    FakeSched {
        tasks: vec![
            (TaskHandle(1), region(0x10, 0x100, 0x100)),
            (TaskHandle(2), region(0x40, 0x300, 0x80)),
        ],
        running: vec![TaskHandle(2)],
    }
}

const FRAME_ADDR: u32 = RAM_BASE + 0x310;

fn fault_ctx() -> PanicContext {
    PanicContext {
        exc_pc: 0x4008_1234,
        exc_addr: 0x0000_00a4,
        exc_cause: 29,
        frame_addr: FRAME_ADDR,
        core: 0,
    }
}

const SEGMENTS: &[MemSegment] = &[MemSegment {
    start: RAM_BASE + 0xc00,
    size: 0x100,
}];

fn rd_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn ram_slice(ram: &[u8], addr: u32, len: u32) -> &[u8] {
    let off = (addr - RAM_BASE) as usize;
    &ram[off..off + len as usize]
}

#[test]
fn binary_artifact_round_trips() {
    let ram = device_ram();
    let cfg = config_over(&ram, SEGMENTS);
    let sched = two_task_sched();
    let mut sink = VecSink::new();

    let stats = dump_binary::<CurrentPort, _, _>(
        &cfg,
        &sched,
        &fault_ctx(),
        &CorePublish::new(),
        &mut sink,
    )
    .unwrap();
    let buf = &sink.buf;

    assert!(sink.ended);
    assert_eq!(stats.tasks, 2);
    assert_eq!(stats.broken_total(), 0);
    assert_eq!(stats.bytes_written as usize, buf.len());

    // Device header.
    assert_eq!(rd_u32(buf, 0) as usize, buf.len());
    assert_eq!(rd_u32(buf, 4), BinaryVersion::Current as u32);
    assert_eq!(rd_u32(buf, 8), 2); // tasks
    assert_eq!(rd_u32(buf, 12), TCB_SIZE);
    assert_eq!(rd_u32(buf, 16), 1); // configured segment, no fragments

    // Task records, fault-origin task first. Its stack top was moved to
    // the published frame.
    let mut off = 20;
    let expected = [
        (RAM_BASE + 0x40, FRAME_ADDR, RAM_BASE + 0x380),
        (RAM_BASE + 0x10, RAM_BASE + 0x100, RAM_BASE + 0x200),
    ];
    for (tcb_addr, stack_start, stack_end) in expected {
        assert_eq!(rd_u32(buf, off), tcb_addr);
        assert_eq!(rd_u32(buf, off + 4), stack_start);
        assert_eq!(rd_u32(buf, off + 8), stack_end);
        off += 12;

        let tcb = ram_slice(&ram, tcb_addr, TCB_SIZE);
        assert_eq!(&buf[off..off + TCB_SIZE as usize], tcb);
        off += TCB_SIZE as usize;

        let stack_len = stack_end - stack_start;
        let stack = ram_slice(&ram, stack_start, stack_len);
        assert_eq!(&buf[off..off + stack_len as usize], stack);
        off += stack_len as usize;
    }

    // Configured segment.
    assert_eq!(rd_u32(buf, off), SEGMENTS[0].start);
    assert_eq!(rd_u32(buf, off + 4), SEGMENTS[0].size);
    off += 8;
    assert_eq!(
        &buf[off..off + SEGMENTS[0].size as usize],
        ram_slice(&ram, SEGMENTS[0].start, SEGMENTS[0].size)
    );
    off += SEGMENTS[0].size as usize;

    // Checksum trailer covers everything before it.
    let body = &buf[..off];
    assert_eq!(off + CHECKSUM_LEN, buf.len());
    assert_eq!(&buf[off..], &checksum_of(body)[..]);
}

#[test]
fn elf_artifact_is_a_core_image() {
    let ram = device_ram();
    let cfg = config_over(&ram, SEGMENTS);
    let sched = two_task_sched();
    let mut sink = VecSink::new();

    let stats = dump_elf::<CurrentPort, _, _>(
        &cfg,
        &sched,
        &fault_ctx(),
        &CorePublish::new(),
        &mut sink,
    )
    .unwrap();
    let buf = &sink.buf;

    assert_eq!(stats.bytes_written as usize, buf.len());
    assert_eq!(rd_u32(buf, 0) as usize, buf.len());
    assert_eq!(rd_u32(buf, 4), ELF_FORMAT_VERSION);
    assert_eq!(&buf[buf.len() - CHECKSUM_LEN..], &checksum_of(
        &buf[..buf.len() - CHECKSUM_LEN]
    )[..]);

    // The image sits between the device header and the trailer.
    let image = &buf[20..buf.len() - CHECKSUM_LEN];
    let endian = LittleEndian;
    let header = elf::FileHeader32::<LittleEndian>::parse(image).unwrap();
    assert_eq!(header.e_type.get(endian), elf::ET_CORE);
    assert_eq!(header.e_machine.get(endian), CurrentPort::ELF_MACHINE);

    let phdrs = header.program_headers(endian, image).unwrap();
    // 3 notes, stack + control block per task, one configured segment.
    assert_eq!(phdrs.len(), 3 + 2 * 2 + 1);
    for ph in &phdrs[..3] {
        assert_eq!(ph.p_type.get(endian), elf::PT_NOTE);
    }
    for ph in &phdrs[3..] {
        assert_eq!(ph.p_type.get(endian), elf::PT_LOAD);
    }

    // First load is the fault task's stack, trimmed to the frame.
    let fault_stack = &phdrs[3];
    assert_eq!(fault_stack.p_vaddr.get(endian), FRAME_ADDR);
    let len = fault_stack.p_filesz.get(endian);
    assert_eq!(len, RAM_BASE + 0x380 - FRAME_ADDR);
    assert_eq!(
        fault_stack.data(endian, image).unwrap(),
        ram_slice(&ram, FRAME_ADDR, len)
    );

    // Every load's file bytes match the memory they claim to be.
    for ph in &phdrs[3..] {
        let vaddr = ph.p_vaddr.get(endian);
        let len = ph.p_filesz.get(endian);
        assert_eq!(
            ph.data(endian, image).unwrap(),
            ram_slice(&ram, vaddr, len)
        );
    }

    // First note segment: one program-status note per task, fault task
    // first, with the task handle after the signal word.
    let notes = phdrs[0].data(endian, image).unwrap();
    assert_eq!(rd_u32(notes, 0), 5); // "CORE" plus NUL
    assert_eq!(rd_u32(notes, 8), 1); // NT_PRSTATUS
    assert_eq!(&notes[12..16], b"CORE");
    let desc_len = rd_u32(notes, 4) as usize;
    assert_eq!(desc_len, 8 + size_of::<<CurrentPort as CpuPort>::Registers>());
    assert_eq!(rd_u32(notes, 20), 0); // signal slot
    assert_eq!(rd_u32(notes, 24), 2); // fault task handle

    // Producer-info note: format version word, then the build id.
    let info = phdrs[1].data(endian, image).unwrap();
    assert_eq!(rd_u32(info, 0), 10); // "KCOREDUMP" plus NUL
    assert_eq!(&info[12..21], b"KCOREDUMP");
    assert_eq!(rd_u32(info, 24), ELF_FORMAT_VERSION);
    assert_eq!(&info[28..28 + 15], b"roundtrip-build");

    // Fault-detail note: handle and trap state from the panic context.
    // No marker in the synthetic frame, so no extra register pairs.
    let extra = phdrs[2].data(endian, image).unwrap();
    let ctx = fault_ctx();
    assert_eq!(rd_u32(extra, 24), 2);
    assert_eq!(rd_u32(extra, 28), ctx.exc_pc);
    assert_eq!(rd_u32(extra, 32), ctx.exc_addr);
    assert_eq!(rd_u32(extra, 36), ctx.exc_cause);
    assert_eq!(rd_u32(extra, 40), 0);
}

#[test]
fn corrupted_stack_is_substituted_in_the_artifact() {
    let ram = device_ram();
    let cfg = config_over(&ram, &[]);
    let sched = FakeSched {
        tasks: vec![
            (
                TaskHandle(1),
                RawTaskRegion {
                    tcb_addr: RAM_BASE + 0x10,
                    stack_start: 0xffff_fff0, // garbage
                    stack_end: 0x0000_0010,
                },
            ),
            (TaskHandle(2), region(0x40, 0x300, 0x80)),
        ],
        running: vec![TaskHandle(2)],
    };
    let mut sink = VecSink::new();

    let stats = dump_binary::<CurrentPort, _, _>(
        &cfg,
        &sched,
        &fault_ctx(),
        &CorePublish::new(),
        &mut sink,
    )
    .unwrap();
    let buf = &sink.buf;

    assert_eq!(stats.broken_stack, 1);
    assert_eq!(stats.tasks, 2);

    // Fault task first; the damaged task is the second record.
    let fault_len = (TCB_SIZE + (RAM_BASE + 0x380 - FRAME_ADDR)) as usize;
    let off = 20 + 12 + fault_len;
    let stack_start = rd_u32(buf, off + 4);
    let stack_end = rd_u32(buf, off + 8);
    assert!(stack_start >= FAKE_BASE && stack_start < FAKE_BASE + 0x600);
    assert_eq!(stack_end - stack_start, FAKE_STACK_SIZE);

    // The substitute block is the placeholder frame, all zeroes.
    let stack = &buf[off + 12 + TCB_SIZE as usize..][..FAKE_STACK_SIZE as usize];
    assert!(stack.iter().all(|&b| b == 0));
}

#[test]
fn truncated_frame_aborts_the_elf_dump() {
    let ram = device_ram();
    let cfg = config_over(&ram, &[]);
    // A sane but tiny stack: its frame cannot hold the architecture's
    // minimum saved state.
    let sched = FakeSched {
        tasks: vec![(TaskHandle(1), region(0x10, 0x100, 0x10))],
        running: vec![TaskHandle(1)],
    };
    let ctx = PanicContext {
        exc_pc: 0x4008_1234,
        exc_addr: 0,
        exc_cause: 3,
        frame_addr: RAM_BASE + 0x100,
        core: 0,
    };
    let mut sink = VecSink::new();

    let err = dump_elf::<CurrentPort, _, _>(&cfg, &sched, &ctx, &CorePublish::new(), &mut sink)
        .unwrap_err();
    assert_eq!(err, DumpError::FrameTooShort);
}

#[test]
fn undersized_sink_aborts_before_any_write() {
    let ram = device_ram();
    let cfg = config_over(&ram, &[]);
    let sched = two_task_sched();
    let mut sink = VecSink::new();
    sink.capacity = Some(16);

    let err = dump_binary::<CurrentPort, _, _>(
        &cfg,
        &sched,
        &fault_ctx(),
        &CorePublish::new(),
        &mut sink,
    )
    .unwrap_err();

    assert_eq!(err, DumpError::InsufficientSpace);
    assert!(sink.buf.is_empty());
    assert!(!sink.ended);
}
