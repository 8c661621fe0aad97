// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Windowed-register (Xtensa) port.
//!
//! Only a sliding window of the physical register file is visible at a
//! time on this architecture, so the exception entry code spills the live
//! window into the saved frame; the extractor reads the spilled `a0..a15`
//! back and reports the window as already rotated flat (`windowbase = 0`,
//! `windowstart = 1`).
//!
//! The fault handler stamps [`FAULT_FRAME_MARKER`] into the `exit` word of
//! the frame belonging to the task that actually trapped. Only that frame
//! carries trustworthy `exccause`/`excvaddr` values and the table of
//! outstanding nested-interrupt program counters; every other frame has
//! those fields reset to [`REG_NOT_APPLICABLE`].

use bytemuck::{Pod, Zeroable, bytes_of, pod_read_unaligned};
use static_assertions::const_assert_eq;

use crate::{
    CpuPort, ExtraRegs, FrameOrigin, PortError, REG_NOT_APPLICABLE, RegisterFile,
};

/// Interrupt nesting depth the device is configured for; levels above it
/// have no EPC/EPS registers to recover.
pub const INT_NESTING_DEPTH: usize = 7;

/// Written into [`ExcFrame::exit`] by the fault handler, and only by it.
pub const FAULT_FRAME_MARKER: u32 = 0xdead_c0de;

/// Side-table id of `EXCCAUSE`.
pub const REG_ID_EXCCAUSE: u32 = 0xe0;
/// Side-table id of `EXCVADDR`.
pub const REG_ID_EXCVADDR: u32 = 0xe1;
/// Side-table id of `EPC<n>` is `REG_ID_EPC_BASE + n`.
pub const REG_ID_EPC_BASE: u32 = 0x70;
/// Side-table id of `EPS<n>` is `REG_ID_EPS_BASE + n`.
pub const REG_ID_EPS_BASE: u32 = 0xc0;

/// The frame the exception entry code spills onto a task's stack.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ExcFrame {
    /// [`FAULT_FRAME_MARKER`] for the trapping task, anything else for a
    /// solicited context switch.
    pub exit: u32,
    pub pc: u32,
    pub ps: u32,
    pub a: [u32; 16],
    pub sar: u32,
    pub exccause: u32,
    pub excvaddr: u32,
    pub lbeg: u32,
    pub lend: u32,
    pub lcount: u32,
}

const_assert_eq!(core::mem::size_of::<ExcFrame>(), 100);

/// Nested-interrupt registers the fault handler appends after the frame of
/// the trapping task. Dead levels hold zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FaultRegs {
    pub epc: [u32; INT_NESTING_DEPTH],
    pub eps: [u32; INT_NESTING_DEPTH],
}

/// Normalized Xtensa register set, window already rotated flat.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Registers {
    pub pc: u32,
    pub ps: u32,
    pub lbeg: u32,
    pub lend: u32,
    pub lcount: u32,
    pub sar: u32,
    pub windowstart: u32,
    pub windowbase: u32,
    pub a: [u32; 16],
    pub exccause: u32,
    pub excvaddr: u32,
}

/// The windowed-register port.
pub struct XtensaPort;

impl CpuPort for XtensaPort {
    type Registers = Registers;

    const MIN_FRAME: usize = core::mem::size_of::<ExcFrame>();
    const ELF_MACHINE: u16 = 94; // EM_XTENSA

    fn extract(frame: &[u8], origin: FrameOrigin) -> Result<RegisterFile<Self>, PortError> {
        if frame.len() < Self::MIN_FRAME {
            return Err(PortError::FrameTooShort);
        }
        let saved: ExcFrame = pod_read_unaligned(&frame[..Self::MIN_FRAME]);

        let mut regs = Registers {
            pc: saved.pc,
            ps: saved.ps,
            lbeg: saved.lbeg,
            lend: saved.lend,
            lcount: saved.lcount,
            sar: saved.sar,
            windowstart: 1,
            windowbase: 0,
            a: saved.a,
            exccause: saved.exccause,
            excvaddr: saved.excvaddr,
        };
        let mut extras = ExtraRegs::new();

        let is_fault = origin == FrameOrigin::Fault && saved.exit == FAULT_FRAME_MARKER;
        if is_fault {
            extras.push(REG_ID_EXCCAUSE, saved.exccause);
            extras.push(REG_ID_EXCVADDR, saved.excvaddr);

            let fault_len = core::mem::size_of::<FaultRegs>();
            if frame.len() >= Self::MIN_FRAME + fault_len {
                let fault: FaultRegs =
                    pod_read_unaligned(&frame[Self::MIN_FRAME..Self::MIN_FRAME + fault_len]);
                // Levels start at 2: EPC1 is the trap pc already in the frame.
                for level in 2..=INT_NESTING_DEPTH {
                    let epc = fault.epc[level - 1];
                    if epc != 0 {
                        extras.push(REG_ID_EPC_BASE + level as u32, epc);
                        extras.push(REG_ID_EPS_BASE + level as u32, fault.eps[level - 1]);
                    }
                }
            } else {
                debug!("fault frame carries no nested-interrupt table");
            }
        } else {
            regs.exccause = REG_NOT_APPLICABLE;
            regs.excvaddr = REG_NOT_APPLICABLE;
        }

        Ok(RegisterFile { regs, extras })
    }

    fn write_fake_frame(block: &mut [u8]) {
        // An all-zero frame: a0 is the return link, and a zero link
        // terminates any backtrace walk immediately.
        let frame = ExcFrame::zeroed();
        block.fill(0);
        let len = Self::MIN_FRAME.min(block.len());
        block[..len].copy_from_slice(&bytes_of(&frame)[..len]);
    }
}
