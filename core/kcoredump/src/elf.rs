// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! ELF32 core-image encoder.
//!
//! The artifact is a device header, then a complete `ET_CORE` image, then
//! the checksum trailer. The image carries three `PT_NOTE` segments (one
//! program-status note per task, a producer-info note, a fault-detail
//! note) followed by one `PT_LOAD` per task stack, per task control block
//! and per memory segment.
//!
//! Nothing here buffers the image: the encoder streams it in file order
//! through the write session. One traversal routine runs three times in
//! identical segment order: `CalcSpace` sizes the image for the sink's
//! `prepare` without touching it, `PlaceHeaders` emits the file and
//! program headers, `PlaceData` emits the payloads. The stages share all
//! layout arithmetic, so they cannot disagree.
//!
//! All multi-byte fields are little-endian, same as every device we
//! target, so plain `bytemuck` raw views are the wire encoding.

use bytemuck::{Pod, Zeroable, bytes_of};
use kdumpcpu::{CpuPort, FrameOrigin, RegisterFile};
use kregions::{WORD_SIZE, round_up_word};

use crate::binary::BinHeader;
use crate::config::{DumpConfig, ELF_FORMAT_VERSION};
use crate::task::{DumpSession, TaskSnapshot};
use crate::writer::{DumpSink, WriteSession, sealed_len};
use crate::{DumpError, PanicContext, Result};

const ET_CORE: u16 = 4;
const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;
const PF_RW: u32 = 6;
const EV_CURRENT: u32 = 1;

const EHDR_LEN: u32 = size_of::<Ehdr>() as u32;
const PHDR_LEN: u32 = size_of::<Phdr>() as u32;
const NHDR_LEN: u32 = size_of::<Nhdr>() as u32;

/// Program-status notes carry the conventional core-file owner name so
/// stock tooling recognizes them.
const NOTE_NAME_CORE: &[u8] = b"CORE";
/// Producer-specific notes carry our own owner name.
const NOTE_NAME_DUMP: &[u8] = b"KCOREDUMP";

const NT_PRSTATUS: u32 = 1;
const NT_DUMP_INFO: u32 = 0x0101;
const NT_DUMP_EXTRA: u32 = 0x0102;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Phdr {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Nhdr {
    n_namesz: u32,
    n_descsz: u32,
    n_type: u32,
}

static_assertions::const_assert_eq!(size_of::<Ehdr>(), 52);
static_assertions::const_assert_eq!(size_of::<Phdr>(), 32);
static_assertions::const_assert_eq!(size_of::<Nhdr>(), 12);

/// Fixed head of the program-status note descriptor; the port's register
/// record follows it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PrStatusHead {
    /// Signal slot of the conventional prstatus layout; no POSIX signals
    /// here, so always zero.
    signal: u32,
    task_handle: u32,
}

/// Fixed head of the fault-detail note descriptor; the interrupt-context
/// register pairs follow it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ExtraHead {
    task_handle: u32,
    exc_pc: u32,
    exc_addr: u32,
    exc_cause: u32,
    pair_count: u32,
}

/// What one run of the traversal routine does.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Count every byte of the image, emit nothing.
    CalcSpace,
    /// Emit the file header and program headers.
    PlaceHeaders,
    /// Emit the note and load payloads.
    PlaceData,
}

/// Byte destination of one traversal run.
enum Out<'w, 'a, S: DumpSink> {
    Count(&'w mut u32),
    Sink(&'w mut WriteSession<'a, S>),
}

impl<S: DumpSink> Out<'_, '_, S> {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Count(n) => {
                **n += bytes.len() as u32;
                Ok(())
            }
            Self::Sink(ws) => ws.write(bytes),
        }
    }

    /// Zero padding up to the next word boundary after `len` bytes.
    fn pad(&mut self, len: u32) -> Result<()> {
        let pad = round_up_word(len) - len;
        self.put(&[0u8; WORD_SIZE as usize][..pad as usize])
    }
}

fn note_len(name: &[u8], desc_len: u32) -> u32 {
    // namesz counts the terminating NUL; name and desc pad to a word.
    NHDR_LEN + round_up_word(name.len() as u32 + 1) + round_up_word(desc_len)
}

/// Layout quantities every stage derives from the session alone.
struct ImagePlan {
    phnum: u32,
    prstatus_seg: u32,
    info_seg: u32,
    extra_seg: u32,
    tcb_len: u32,
}

impl ImagePlan {
    fn new<P: CpuPort>(session: &DumpSession, cfg: &DumpConfig, fault_extras: u32) -> Self {
        let tasks = session.tasks().len() as u32;
        let segs = (session.fragments().len() + cfg.mem_segments.len()) as u32;
        let regs_len = size_of::<P::Registers>() as u32;
        Self {
            phnum: 3 + 2 * tasks + segs,
            prstatus_seg: tasks
                * note_len(
                    NOTE_NAME_CORE,
                    size_of::<PrStatusHead>() as u32 + regs_len,
                ),
            info_seg: note_len(NOTE_NAME_DUMP, 4 + cfg.build_id.len() as u32),
            extra_seg: note_len(
                NOTE_NAME_DUMP,
                size_of::<ExtraHead>() as u32 + 8 * fault_extras,
            ),
            tcb_len: round_up_word(cfg.tcb_size),
        }
    }
}

fn put_note<S: DumpSink>(
    out: &mut Out<'_, '_, S>,
    name: &[u8],
    n_type: u32,
    desc_parts: &[&[u8]],
) -> Result<()> {
    let desc_len: u32 = desc_parts.iter().map(|p| p.len() as u32).sum();
    let nhdr = Nhdr {
        n_namesz: name.len() as u32 + 1,
        n_descsz: desc_len,
        n_type,
    };
    out.put(bytes_of(&nhdr))?;
    out.put(name)?;
    out.put(&[0])?;
    out.pad(name.len() as u32 + 1)?;
    for part in desc_parts {
        out.put(part)?;
    }
    out.pad(desc_len)
}

/// Recovers a task's register file from the frame at the top of its
/// stack. A frame shorter than the architecture minimum aborts the dump;
/// an artifact with invented register state would be worse than none.
fn registers_of<P: CpuPort>(
    session: &DumpSession,
    cfg: &DumpConfig,
    snap: &TaskSnapshot,
    origin: FrameOrigin,
) -> Result<RegisterFile<P>> {
    let stack = session.stack_bytes(cfg, snap)?;
    Ok(P::extract(stack, origin)?)
}

/// One run over the image in file order. Every stage takes the identical
/// walk; `stage` selects which parts reach `out`.
fn traverse<P: CpuPort, S: DumpSink>(
    stage: Stage,
    out: &mut Out<'_, '_, S>,
    session: &DumpSession,
    cfg: &DumpConfig,
    ctx: &PanicContext,
    fault_file: &RegisterFile<P>,
    plan: &ImagePlan,
) -> Result<()> {
    if stage != Stage::PlaceData {
        let mut ident = [0u8; 16];
        ident[..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        ident[4] = 1; // ELFCLASS32
        ident[5] = 1; // ELFDATA2LSB
        ident[6] = 1;
        let ehdr = Ehdr {
            e_ident: ident,
            e_type: ET_CORE,
            e_machine: P::ELF_MACHINE,
            e_version: EV_CURRENT,
            e_entry: 0,
            e_phoff: EHDR_LEN,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: EHDR_LEN as u16,
            e_phentsize: PHDR_LEN as u16,
            e_phnum: plan.phnum as u16,
            e_shentsize: 0,
            e_shnum: 0,
            e_shstrndx: 0,
        };
        out.put(bytes_of(&ehdr))?;

        // Program headers, offsets assigned in file order.
        let mut offset = EHDR_LEN + plan.phnum * PHDR_LEN;
        let mut put_phdr = |out: &mut Out<'_, '_, S>, p_type: u32, vaddr: u32, size: u32| {
            let phdr = Phdr {
                p_type,
                p_offset: offset,
                p_vaddr: vaddr,
                p_paddr: 0,
                p_filesz: size,
                p_memsz: size,
                p_flags: PF_RW,
                p_align: WORD_SIZE,
            };
            offset += size;
            out.put(bytes_of(&phdr))
        };

        put_phdr(out, PT_NOTE, 0, plan.prstatus_seg)?;
        put_phdr(out, PT_NOTE, 0, plan.info_seg)?;
        put_phdr(out, PT_NOTE, 0, plan.extra_seg)?;
        for snap in session.tasks_ordered() {
            put_phdr(out, PT_LOAD, snap.stack_start, snap.stack_len())?;
        }
        for snap in session.tasks_ordered() {
            put_phdr(out, PT_LOAD, snap.tcb_addr, plan.tcb_len)?;
        }
        for frag in session.fragments() {
            put_phdr(out, PT_LOAD, frag.start, frag.size)?;
        }
        for seg in cfg.mem_segments {
            put_phdr(out, PT_LOAD, seg.start, round_up_word(seg.size))?;
        }
    }

    if stage == Stage::PlaceHeaders {
        return Ok(());
    }

    // Note data. The fault task's file was extracted up front because the
    // fault-detail note size depends on it; the rest decode here.
    let fault_index = session.fault_index();
    for (index, snap) in session.order().zip(session.tasks_ordered()) {
        let file = if Some(index) == fault_index {
            *fault_file
        } else {
            registers_of::<P>(session, cfg, snap, FrameOrigin::Preempted)?
        };
        let head = PrStatusHead {
            signal: 0,
            task_handle: snap.handle.0,
        };
        put_note(
            out,
            NOTE_NAME_CORE,
            NT_PRSTATUS,
            &[bytes_of(&head), bytes_of(&file.regs)],
        )?;
    }

    put_note(
        out,
        NOTE_NAME_DUMP,
        NT_DUMP_INFO,
        &[&ELF_FORMAT_VERSION.to_le_bytes(), cfg.build_id],
    )?;

    let fault_handle = fault_index
        .map(|i| session.tasks()[i].handle.0)
        .unwrap_or(0);
    let extra_head = ExtraHead {
        task_handle: fault_handle,
        exc_pc: ctx.exc_pc,
        exc_addr: ctx.exc_addr,
        exc_cause: ctx.exc_cause,
        pair_count: fault_file.extras.len() as u32,
    };
    out.put(bytes_of(&Nhdr {
        n_namesz: NOTE_NAME_DUMP.len() as u32 + 1,
        n_descsz: size_of::<ExtraHead>() as u32 + 8 * fault_file.extras.len() as u32,
        n_type: NT_DUMP_EXTRA,
    }))?;
    out.put(NOTE_NAME_DUMP)?;
    out.put(&[0])?;
    out.pad(NOTE_NAME_DUMP.len() as u32 + 1)?;
    out.put(bytes_of(&extra_head))?;
    for pair in fault_file.extras.as_slice() {
        out.put(&pair.id.to_le_bytes())?;
        out.put(&pair.value.to_le_bytes())?;
    }

    // Load data, same order as the headers.
    for snap in session.tasks_ordered() {
        out.put(session.stack_bytes(cfg, snap)?)?;
    }
    for snap in session.tasks_ordered() {
        let tcb = cfg
            .layout
            .bytes(snap.tcb_addr, plan.tcb_len)
            .ok_or(DumpError::Unmapped)?;
        out.put(tcb)?;
    }
    for frag in session.fragments() {
        let bytes = cfg
            .layout
            .bytes(frag.start, frag.size)
            .ok_or(DumpError::Unmapped)?;
        out.put(bytes)?;
    }
    for seg in cfg.mem_segments {
        let size = round_up_word(seg.size);
        let bytes = cfg
            .layout
            .bytes(seg.start, size)
            .ok_or(DumpError::Unmapped)?;
        out.put(bytes)?;
    }
    Ok(())
}

/// Writes the ELF artifact for an enumerated session. Returns the byte
/// count actually emitted, which equals the device header's `data_len`.
pub(crate) fn encode<P: CpuPort, S: DumpSink>(
    session: &DumpSession,
    cfg: &DumpConfig,
    ctx: &PanicContext,
    sink: &mut S,
) -> Result<u32> {
    let fault_file: RegisterFile<P> = match session.fault_index() {
        Some(i) => registers_of::<P>(session, cfg, &session.tasks()[i], FrameOrigin::Fault)?,
        None => RegisterFile {
            regs: Zeroable::zeroed(),
            extras: kdumpcpu::ExtraRegs::new(),
        },
    };
    let plan = ImagePlan::new::<P>(session, cfg, fault_file.extras.len() as u32);

    let mut image_len = 0u32;
    traverse::<P, S>(
        Stage::CalcSpace,
        &mut Out::Count(&mut image_len),
        session,
        cfg,
        ctx,
        &fault_file,
        &plan,
    )?;

    let header_len = size_of::<BinHeader>() as u32;
    let total = sealed_len(header_len + image_len);
    let mut reserved = total;
    sink.prepare(&mut reserved)?;
    sink.start(reserved)?;

    let mut ws = WriteSession::new(sink);
    let header = BinHeader {
        data_len: total,
        version: ELF_FORMAT_VERSION,
        task_count: session.tasks().len() as u32,
        tcb_size: cfg.tcb_size,
        mem_seg_count: (session.fragments().len() + cfg.mem_segments.len()) as u32,
    };
    ws.write(bytes_of(&header))?;
    for stage in [Stage::PlaceHeaders, Stage::PlaceData] {
        traverse::<P, S>(
            stage,
            &mut Out::Sink(&mut ws),
            session,
            cfg,
            ctx,
            &fault_file,
            &plan,
        )?;
    }

    let written = ws.end()?;
    debug!("elf artifact sealed, {} bytes", written);
    Ok(written)
}
