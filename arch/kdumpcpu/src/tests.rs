#![cfg(test)]

use bytemuck::{Zeroable, bytes_of};

use super::riscv::{self, RiscvPort};
use super::xtensa::{self, FAULT_FRAME_MARKER, XtensaPort};
use super::*;

#[test]
fn riscv_maps_frame_fields() {
    let mut frame = riscv::ExcFrame::zeroed();
    frame.mepc = 0x4200_0000;
    frame.ra = 0x4000_1111;
    frame.sp = 0x3f00_2222;
    frame.gp = 3;
    frame.tp = 4;
    frame.t0 = 5;
    frame.t1 = 6;
    frame.t2 = 7;
    frame.s0 = 8;
    frame.s1 = 9;
    frame.a = [10, 11, 12, 13, 14, 15, 16, 17];
    frame.s2_s11 = [18, 19, 20, 21, 22, 23, 24, 25, 26, 27];
    frame.t3_t6 = [28, 29, 30, 31];

    let file = RiscvPort::extract(bytes_of(&frame), FrameOrigin::Fault).unwrap();

    assert_eq!(file.regs.pc, 0x4200_0000);
    assert_eq!(file.regs.x[0], 0x4000_1111); // ra = x1
    assert_eq!(file.regs.x[1], 0x3f00_2222); // sp = x2
    assert_eq!(file.regs.x[9], 10); // a0 = x10
    assert_eq!(file.regs.x[16], 17); // a7 = x17
    assert_eq!(file.regs.x[17], 18); // s2 = x18
    assert_eq!(file.regs.x[26], 27); // s11 = x27
    assert_eq!(file.regs.x[30], 31); // t6 = x31
    assert!(file.extras.is_empty());
}

#[test]
fn riscv_short_frame_fails_fast() {
    let frame = riscv::ExcFrame::zeroed();
    let bytes = bytes_of(&frame);
    let err = RiscvPort::extract(&bytes[..bytes.len() - 1], FrameOrigin::Fault)
        .err()
        .unwrap();
    assert_eq!(err, PortError::FrameTooShort);
}

fn xtensa_fault_frame(epc: [u32; xtensa::INT_NESTING_DEPTH]) -> Vec<u8> {
    let mut frame = xtensa::ExcFrame::zeroed();
    frame.exit = FAULT_FRAME_MARKER;
    frame.pc = 0x4008_1234;
    frame.ps = 0x60021;
    frame.exccause = 29; // store prohibited
    frame.excvaddr = 0xdead_0000;
    for (i, a) in frame.a.iter_mut().enumerate() {
        *a = 0xa000 + i as u32;
    }
    let mut fault = xtensa::FaultRegs::zeroed();
    fault.epc = epc;
    for (i, eps) in fault.eps.iter_mut().enumerate() {
        *eps = 0x5000 + i as u32;
    }

    let mut bytes = bytes_of(&frame).to_vec();
    bytes.extend_from_slice(bytes_of(&fault));
    bytes
}

#[test]
fn xtensa_fault_frame_surfaces_trap_state() {
    // Levels 2 and 4 outstanding, the rest dead.
    let mut epc = [0u32; xtensa::INT_NESTING_DEPTH];
    epc[1] = 0x4010_0002;
    epc[3] = 0x4010_0004;
    let bytes = xtensa_fault_frame(epc);

    let file = XtensaPort::extract(&bytes, FrameOrigin::Fault).unwrap();

    assert_eq!(file.regs.pc, 0x4008_1234);
    assert_eq!(file.regs.exccause, 29);
    assert_eq!(file.regs.excvaddr, 0xdead_0000);
    assert_eq!(file.regs.windowbase, 0);
    assert_eq!(file.regs.windowstart, 1);
    assert_eq!(file.regs.a[3], 0xa003);

    let extras = file.extras.as_slice();
    assert_eq!(extras[0], RegPair { id: xtensa::REG_ID_EXCCAUSE, value: 29 });
    assert_eq!(extras[1], RegPair { id: xtensa::REG_ID_EXCVADDR, value: 0xdead_0000 });
    // Only the live EPC levels, each with its EPS.
    assert_eq!(
        &extras[2..],
        &[
            RegPair { id: xtensa::REG_ID_EPC_BASE + 2, value: 0x4010_0002 },
            RegPair { id: xtensa::REG_ID_EPS_BASE + 2, value: 0x5001 },
            RegPair { id: xtensa::REG_ID_EPC_BASE + 4, value: 0x4010_0004 },
            RegPair { id: xtensa::REG_ID_EPS_BASE + 4, value: 0x5003 },
        ]
    );
}

#[test]
fn xtensa_preempted_frame_gets_sentinels() {
    let mut frame = xtensa::ExcFrame::zeroed();
    frame.exit = FAULT_FRAME_MARKER; // marker alone is not enough
    frame.exccause = 3;
    frame.excvaddr = 0x1234;

    let file = XtensaPort::extract(bytes_of(&frame), FrameOrigin::Preempted).unwrap();

    assert_eq!(file.regs.exccause, REG_NOT_APPLICABLE);
    assert_eq!(file.regs.excvaddr, REG_NOT_APPLICABLE);
    assert!(file.extras.is_empty());
}

#[test]
fn xtensa_unmarked_frame_is_treated_as_preempted() {
    let mut frame = xtensa::ExcFrame::zeroed();
    frame.exit = 0; // solicited switch frame
    frame.exccause = 3;

    let file = XtensaPort::extract(bytes_of(&frame), FrameOrigin::Fault).unwrap();

    assert_eq!(file.regs.exccause, REG_NOT_APPLICABLE);
    assert!(file.extras.is_empty());
}

#[test]
fn xtensa_fault_frame_without_table_still_extracts() {
    let mut frame = xtensa::ExcFrame::zeroed();
    frame.exit = FAULT_FRAME_MARKER;
    frame.exccause = 9;

    let file = XtensaPort::extract(bytes_of(&frame), FrameOrigin::Fault).unwrap();

    assert_eq!(file.regs.exccause, 9);
    // Cause and address only; no nested-interrupt entries available.
    assert_eq!(file.extras.len(), 2);
}

#[test]
fn fake_frames_terminate_backtraces() {
    let mut block = [0xffu8; 192];
    XtensaPort::write_fake_frame(&mut block);
    let file = XtensaPort::extract(&block, FrameOrigin::Preempted).unwrap();
    assert_eq!(file.regs.pc, 0);
    assert_eq!(file.regs.a[0], 0);

    let mut block = [0xffu8; 192];
    RiscvPort::write_fake_frame(&mut block);
    let file = RiscvPort::extract(&block, FrameOrigin::Preempted).unwrap();
    assert_eq!(file.regs.pc, 0);
    assert_eq!(file.regs.x[0], 0);
}

#[test]
fn extra_table_drops_overflow() {
    let mut extras = ExtraRegs::new();
    for i in 0..(MAX_EXTRA_REGS as u32 + 4) {
        extras.push(i, i);
    }
    assert_eq!(extras.len(), MAX_EXTRA_REGS);
}
