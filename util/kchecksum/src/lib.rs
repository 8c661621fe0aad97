//! Incremental checksumming of the dump byte stream.
//!
//! Every byte handed to the write sink is folded into one accumulator which
//! is finalized exactly once, at the end of the dump, and appended as the
//! artifact trailer. The algorithm is a build-time choice: CRC32 (IEEE) by
//! default, or SHA-256 behind the `sha256` feature for devices that want a
//! cryptographic digest. The trailer always covers every byte written to
//! the sink, padding included, and never covers itself.

#![cfg_attr(not(test), no_std)]

#[cfg(test)]
mod tests;

cfg_if::cfg_if! {
    if #[cfg(feature = "sha256")] {
        use sha2::{Digest, Sha256};

        /// Byte length of the finalized trailer.
        pub const CHECKSUM_LEN: usize = 32;

        /// Running SHA-256 accumulator over the dump stream.
        pub struct Checksum {
            inner: Sha256,
        }

        impl Checksum {
            /// Starts a fresh accumulator.
            pub fn new() -> Self {
                Self { inner: Sha256::new() }
            }

            /// Folds `data` into the accumulator.
            pub fn update(&mut self, data: &[u8]) {
                self.inner.update(data);
            }

            /// Consumes the accumulator and returns the trailer bytes.
            pub fn finalize(self) -> [u8; CHECKSUM_LEN] {
                self.inner.finalize().into()
            }
        }
    } else {
        use crc::crc32::{self, Hasher32};

        /// Byte length of the finalized trailer.
        pub const CHECKSUM_LEN: usize = 4;

        /// Running CRC32 (IEEE) accumulator over the dump stream.
        pub struct Checksum {
            inner: crc32::Digest,
        }

        impl Checksum {
            /// Starts a fresh accumulator.
            pub fn new() -> Self {
                Self { inner: crc32::Digest::new(crc32::IEEE) }
            }

            /// Folds `data` into the accumulator.
            pub fn update(&mut self, data: &[u8]) {
                self.inner.write(data);
            }

            /// Consumes the accumulator and returns the trailer bytes,
            /// little-endian like every other word in the artifact.
            pub fn finalize(self) -> [u8; CHECKSUM_LEN] {
                self.inner.sum32().to_le_bytes()
            }
        }
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot convenience over [`Checksum`], mainly for readers verifying a
/// finished artifact.
pub fn checksum_of(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut ck = Checksum::new();
    ck.update(data);
    ck.finalize()
}
