// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Compact binary artifact encoder.
//!
//! Layout, all words little-endian:
//!
//! ```text
//! BinHeader
//! per task (fault-origin task first):
//!     TaskHeader, control block bytes, stack bytes
//! per memory segment (fragments, then configured regions):
//!     SegHeader, segment bytes
//! checksum trailer
//! ```
//!
//! `data_len` in the header covers the whole artifact including the
//! header itself and the trailer, so a reader can checksum-verify an
//! artifact without knowing the checksum algorithm's length in advance.
//! The encoder computes the total with a dry pass over the session before
//! `prepare`, then emits exactly that many bytes; the two passes share no
//! state besides the session, which is immutable by then.

use bytemuck::{Pod, Zeroable, bytes_of};
use kregions::round_up_word;

use crate::config::DumpConfig;
use crate::task::DumpSession;
use crate::writer::{DumpSink, WriteSession, sealed_len};
use crate::{DumpError, Result};

/// Device header opening both artifact formats. The ELF encoder emits it
/// too, ahead of its image, with the ELF format version word.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct BinHeader {
    pub(crate) data_len: u32,
    pub(crate) version: u32,
    pub(crate) task_count: u32,
    pub(crate) tcb_size: u32,
    pub(crate) mem_seg_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TaskHeader {
    tcb_addr: u32,
    stack_start: u32,
    stack_end: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SegHeader {
    start: u32,
    size: u32,
}

const BIN_HEADER_LEN: u32 = size_of::<BinHeader>() as u32;
const TASK_HEADER_LEN: u32 = size_of::<TaskHeader>() as u32;
const SEG_HEADER_LEN: u32 = size_of::<SegHeader>() as u32;

/// Artifact length including header and trailer, from session state alone.
fn total_len(session: &DumpSession, cfg: &DumpConfig) -> u32 {
    let tcb_len = round_up_word(cfg.tcb_size);
    let mut len = BIN_HEADER_LEN;
    for snap in session.tasks() {
        len += TASK_HEADER_LEN + tcb_len + snap.stack_len();
    }
    for frag in session.fragments() {
        len += SEG_HEADER_LEN + frag.size;
    }
    for seg in cfg.mem_segments {
        len += SEG_HEADER_LEN + round_up_word(seg.size);
    }
    sealed_len(len)
}

/// Writes the binary artifact for an enumerated session. Returns the
/// byte count actually emitted, which equals the header's `data_len`.
pub(crate) fn encode<S: DumpSink>(
    session: &DumpSession,
    cfg: &DumpConfig,
    sink: &mut S,
) -> Result<u32> {
    let total = total_len(session, cfg);
    // The sink may round its reservation up (erase granularity); the
    // artifact itself stays exactly `total` bytes.
    let mut reserved = total;
    sink.prepare(&mut reserved)?;
    sink.start(reserved)?;

    let mut ws = WriteSession::new(sink);
    let tcb_len = round_up_word(cfg.tcb_size);
    let seg_count = session.fragments().len() + cfg.mem_segments.len();

    let header = BinHeader {
        data_len: total,
        version: cfg.bin_version as u32,
        task_count: session.tasks().len() as u32,
        tcb_size: cfg.tcb_size,
        mem_seg_count: seg_count as u32,
    };
    ws.write(bytes_of(&header))?;

    for snap in session.tasks_ordered() {
        let th = TaskHeader {
            tcb_addr: snap.tcb_addr,
            stack_start: snap.stack_start,
            stack_end: snap.stack_end,
        };
        ws.write(bytes_of(&th))?;

        let tcb = cfg
            .layout
            .bytes(snap.tcb_addr, tcb_len)
            .ok_or(DumpError::Unmapped)?;
        ws.write(tcb)?;
        ws.write(session.stack_bytes(cfg, snap)?)?;
    }

    for frag in session.fragments() {
        let sh = SegHeader {
            start: frag.start,
            size: frag.size,
        };
        ws.write(bytes_of(&sh))?;
        let bytes = cfg
            .layout
            .bytes(frag.start, frag.size)
            .ok_or(DumpError::Unmapped)?;
        ws.write(bytes)?;
    }
    for seg in cfg.mem_segments {
        let size = round_up_word(seg.size);
        let sh = SegHeader {
            start: seg.start,
            size,
        };
        ws.write(bytes_of(&sh))?;
        let bytes = cfg
            .layout
            .bytes(seg.start, size)
            .ok_or(DumpError::Unmapped)?;
        ws.write(bytes)?;
    }

    let written = ws.end()?;
    debug!("binary artifact sealed, {} bytes", written);
    Ok(written)
}
