#![cfg(test)]

use super::*;

const RAM: u32 = 0x3f00_0000;
const FAKE: u32 = 0x2000_0000;

fn layout<'a>(windows: &'a [MemoryWindow<'a>]) -> MemoryLayout<'a> {
    MemoryLayout::new(windows, 0x1000, FAKE, 0x1000).unwrap()
}

#[test]
fn region_inside_window_is_ok() {
    let ram = [0u8; 256];
    let windows = [MemoryWindow::backed(RAM, &ram)];
    let layout = layout(&windows);

    assert!(layout.is_memory_region_ok(RAM, 256));
    assert!(layout.is_memory_region_ok(RAM + 16, 16));
    assert!(!layout.is_memory_region_ok(RAM + 255, 2));
    assert!(!layout.is_memory_region_ok(RAM - 1, 4));
    assert!(!layout.is_memory_region_ok(0, 4));
}

#[test]
fn zero_and_wrapping_ranges_are_rejected() {
    let ram = [0u8; 64];
    let windows = [MemoryWindow::backed(RAM, &ram)];
    let layout = layout(&windows);

    assert!(!layout.is_memory_region_ok(RAM, 0));
    assert!(!layout.is_memory_region_ok(u32::MAX - 1, 4));
}

#[test]
fn stack_sanity_requires_order_and_bound() {
    let ram = [0u8; 0x2000];
    let windows = [MemoryWindow::backed(RAM, &ram)];
    let layout = MemoryLayout::new(&windows, 0x800, FAKE, 0x1000).unwrap();

    assert!(layout.is_stack_ok(RAM, RAM + 0x800));
    // start >= end
    assert!(!layout.is_stack_ok(RAM + 8, RAM + 8));
    assert!(!layout.is_stack_ok(RAM + 16, RAM));
    // longer than the configured maximum
    assert!(!layout.is_stack_ok(RAM, RAM + 0x801));
    // outside every window
    assert!(!layout.is_stack_ok(0x1000_0000, 0x1000_0100));
}

#[test]
fn bytes_resolves_only_sane_ranges() {
    let mut ram = [0u8; 64];
    for (i, b) in ram.iter_mut().enumerate() {
        *b = i as u8;
    }
    let windows = [MemoryWindow::backed(RAM, &ram)];
    let layout = layout(&windows);

    let got = layout.bytes(RAM + 4, 8).unwrap();
    assert_eq!(got, &[4, 5, 6, 7, 8, 9, 10, 11]);
    assert!(layout.bytes(RAM + 60, 8).is_none());
    assert!(layout.bytes(FAKE, 8).is_none());
}

#[test]
fn fake_window_must_not_overlap() {
    let ram = [0u8; 64];
    let windows = [MemoryWindow::backed(RAM, &ram)];
    let err = MemoryLayout::new(&windows, 0x1000, RAM + 32, 0x100).unwrap_err();
    assert_eq!(err, LayoutError::FakeWindowOverlap);

    let layout = layout(&windows);
    assert!(layout.is_fake_address(FAKE));
    assert!(layout.is_fake_address(FAKE + 0xfff));
    assert!(!layout.is_fake_address(FAKE + 0x1000));
    assert!(!layout.is_fake_address(RAM));
}

#[test]
fn word_rounding() {
    assert_eq!(round_up_word(0), 0);
    assert_eq!(round_up_word(1), 4);
    assert_eq!(round_up_word(4), 4);
    assert_eq!(round_up_word(5), 8);
    assert_eq!(round_up_word(0x7b), 0x7c);
}
