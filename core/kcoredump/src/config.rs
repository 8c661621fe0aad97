// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Build-configured limits and per-dump configuration.

use kregions::MemoryLayout;

/// Capacity of the per-dump task snapshot array.
pub const MAX_TASKS: usize = 32;

/// Most processing cores any supported device carries.
pub const MAX_CORES: usize = 4;

/// Substitute stack blocks available within one dump.
pub const FAKE_STACK_SLOTS: usize = 8;

/// Fixed size of one substitute stack, large enough for either port's
/// placeholder frame.
pub const FAKE_STACK_SIZE: u32 = 192;

/// Bytes captured around an interrupt-context frame that lives outside
/// the owning task's stack.
pub const FRAGMENT_CAPTURE: u32 = 256;

/// `version` word stamped into the ELF artifact's device header.
pub const ELF_FORMAT_VERSION: u32 = 0x0100;

/// `version` word stamped into the binary artifact header.
///
/// The two legacy values identify older producers; the layout is the same
/// for all three, and readers treat the value as a compatibility flag, not
/// a structural switch.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryVersion {
    V1 = 1,
    V2 = 2,
    Current = 3,
}

/// One contiguous memory region recorded in the artifact: a whole-device
/// region configured at build time, or an interrupt-stack fragment found
/// during enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemSegment {
    pub start: u32,
    pub size: u32,
}

/// Everything the pipeline needs to know about the device build.
///
/// Constructed once by the embedding kernel and borrowed for the duration
/// of a dump.
pub struct DumpConfig<'a> {
    /// The device memory map and sanitization bounds.
    pub layout: MemoryLayout<'a>,
    /// Size of one task control block, uniform across tasks.
    pub tcb_size: u32,
    /// Version word for binary-format artifacts.
    pub bin_version: BinaryVersion,
    /// Whole-device regions appended after the task data.
    pub mem_segments: &'a [MemSegment],
    /// Build identifier embedded in the ELF version note.
    pub build_id: &'a [u8],
}
