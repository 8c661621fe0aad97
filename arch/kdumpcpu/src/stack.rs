// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Dedicated dump stack.
//!
//! The faulting task's stack may be near-exhausted or the very thing that
//! is corrupted, so the dump pipeline never runs on it. Execution moves
//! once onto a statically sized arena and returns once when the pipeline
//! finishes: a one-shot control transfer, not a coroutine.
//!
//! On RISC-V targets the switch is a real `sp` retarget around a single
//! call. The windowed Xtensa ABI cannot retarget `sp` mid-function, so on
//! those devices the fault handler's assembly trampoline performs the
//! switch before entering the pipeline and this function reduces to a
//! plain call, as it does on test hosts.

/// Statically sized, suitably aligned arena for one dump.
#[repr(C, align(16))]
pub struct DumpStack<const N: usize> {
    mem: [u8; N],
}

impl<const N: usize> DumpStack<N> {
    pub const fn new() -> Self {
        Self { mem: [0; N] }
    }

    /// Highest address of the arena, 16-byte aligned, suitable as an
    /// initial stack pointer.
    pub fn top(&mut self) -> *mut u8 {
        let top = self.mem.as_mut_ptr() as usize + N;
        (top & !0xf) as *mut u8
    }
}

impl<const N: usize> Default for DumpStack<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `entry(arg)` with the stack pointer moved to `top` for the
/// duration of the call.
///
/// # Safety
///
/// `top` must point at the top of an arena large enough for the whole
/// pipeline, interrupts and scheduling must already be disabled, and
/// nothing may unwind out of `entry`.
#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub unsafe fn run_on_dump_stack(top: *mut u8, entry: extern "C" fn(*mut ()) -> i32, arg: *mut ()) -> i32 {
    let ret: usize;
    unsafe {
        core::arch::asm!(
            "mv {save}, sp",
            "mv sp, {top}",
            "jalr {entry}",
            "mv sp, {save}",
            save = out(reg) _,
            top = in(reg) top,
            entry = in(reg) entry,
            inout("a0") arg as usize => ret,
            clobber_abi("C"),
        );
    }
    ret as i32
}

/// Runs `entry(arg)` directly; the stack switch happened before entry (or
/// this is a test host).
///
/// # Safety
///
/// Same contract as the switching variant, kept so call sites are
/// identical across targets.
#[cfg(not(any(target_arch = "riscv32", target_arch = "riscv64")))]
pub unsafe fn run_on_dump_stack(
    top: *mut u8,
    entry: extern "C" fn(*mut ()) -> i32,
    arg: *mut (),
) -> i32 {
    let _ = top;
    entry(arg)
}
