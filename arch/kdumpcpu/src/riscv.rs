// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Flat general-purpose-register (RISC-V) port.
//!
//! The saved frame is a fixed-layout record of the whole integer register
//! file; extraction is a field-for-field copy into the `pc, x1..x31`
//! ordering debuggers expect. There is no interrupt-context side table on
//! this architecture.

use bytemuck::{Pod, Zeroable, bytes_of, pod_read_unaligned};
use static_assertions::const_assert_eq;

use crate::{CpuPort, ExtraRegs, FrameOrigin, PortError, RegisterFile};

/// The frame the trap entry code stores onto a task's stack.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ExcFrame {
    pub mepc: u32,
    pub ra: u32,
    pub sp: u32,
    pub gp: u32,
    pub tp: u32,
    pub t0: u32,
    pub t1: u32,
    pub t2: u32,
    pub s0: u32,
    pub s1: u32,
    pub a: [u32; 8],
    pub s2_s11: [u32; 10],
    pub t3_t6: [u32; 4],
    pub mstatus: u32,
    pub mtvec: u32,
    pub mcause: u32,
    pub mtval: u32,
    pub mhartid: u32,
}

const_assert_eq!(core::mem::size_of::<ExcFrame>(), 148);

/// Normalized RISC-V register set: `pc` plus `x1..x31`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Registers {
    pub pc: u32,
    pub x: [u32; 31],
}

/// The flat-register port.
pub struct RiscvPort;

impl CpuPort for RiscvPort {
    type Registers = Registers;

    const MIN_FRAME: usize = core::mem::size_of::<ExcFrame>();
    const ELF_MACHINE: u16 = 243; // EM_RISCV

    fn extract(frame: &[u8], _origin: FrameOrigin) -> Result<RegisterFile<Self>, PortError> {
        if frame.len() < Self::MIN_FRAME {
            return Err(PortError::FrameTooShort);
        }
        let saved: ExcFrame = pod_read_unaligned(&frame[..Self::MIN_FRAME]);

        let mut x = [0u32; 31];
        x[0] = saved.ra; // x1
        x[1] = saved.sp; // x2
        x[2] = saved.gp; // x3
        x[3] = saved.tp; // x4
        x[4] = saved.t0; // x5
        x[5] = saved.t1; // x6
        x[6] = saved.t2; // x7
        x[7] = saved.s0; // x8
        x[8] = saved.s1; // x9
        x[9..17].copy_from_slice(&saved.a); // x10..x17
        x[17..27].copy_from_slice(&saved.s2_s11); // x18..x27
        x[27..31].copy_from_slice(&saved.t3_t6); // x28..x31

        Ok(RegisterFile {
            regs: Registers { pc: saved.mepc, x },
            extras: ExtraRegs::new(),
        })
    }

    fn write_fake_frame(block: &mut [u8]) {
        // All zero: mepc and ra both terminate a backtrace walk.
        let frame = ExcFrame::zeroed();
        block.fill(0);
        let len = Self::MIN_FRAME.min(block.len());
        block[..len].copy_from_slice(&bytes_of(&frame)[..len]);
    }
}
