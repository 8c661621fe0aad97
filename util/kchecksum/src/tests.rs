#![cfg(test)]

use super::*;

#[test]
fn incremental_matches_one_shot() {
    let data: Vec<u8> = (0u16..1024).map(|i| (i % 251) as u8).collect();

    let mut ck = Checksum::new();
    for chunk in data.chunks(7) {
        ck.update(chunk);
    }

    assert_eq!(ck.finalize(), checksum_of(&data));
}

#[test]
fn empty_update_is_identity() {
    let mut ck = Checksum::new();
    ck.update(b"abc");
    ck.update(&[]);
    ck.update(b"def");

    assert_eq!(ck.finalize(), checksum_of(b"abcdef"));
}

#[cfg(not(feature = "sha256"))]
#[test]
fn crc32_known_vector() {
    // The standard CRC32 (IEEE) check value.
    assert_eq!(checksum_of(b"123456789"), 0xcbf4_3926u32.to_le_bytes());
}

#[cfg(feature = "sha256")]
#[test]
fn sha256_known_vector() {
    let expected: [u8; 32] = [
        0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae,
        0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61,
        0xf2, 0x00, 0x15, 0xad,
    ];
    assert_eq!(checksum_of(b"abc"), expected);
}
