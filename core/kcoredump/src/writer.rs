// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Sink contract and the checksummed, word-batching write session.
//!
//! Every artifact byte flows through one [`WriteSession`]. The session
//! batches arbitrary-length writes into whole words so sinks that require
//! word-granular programming (flash) never see a misaligned write, and it
//! folds every byte into the running checksum so encoders never touch the
//! checksum directly.

use kchecksum::{CHECKSUM_LEN, Checksum};
use kregions::WORD_SIZE;

use crate::Result;

/// Destination for one dump artifact.
///
/// The pipeline drives a sink through exactly this sequence:
/// `prepare`, `start`, zero or more `write` calls, `end`. Implementations
/// cover flash partitions, UART streaming and host-side buffers; none of
/// them may allocate or block on a lock, since they run from the fault
/// handler.
pub trait DumpSink {
    /// Announces the computed total artifact length before anything is
    /// written. The sink checks capacity here and may adjust `total_len`
    /// upward (flash sinks round to an erase unit); returning an error
    /// aborts the dump before any destructive operation.
    fn prepare(&mut self, total_len: &mut u32) -> Result<()>;

    /// Begins the write pass. Erasure of `total_len` bytes happens here.
    fn start(&mut self, total_len: u32) -> Result<()>;

    /// Appends bytes. The session guarantees `data.len()` is a multiple
    /// of the word size except possibly in the final trailer write.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Finalizes the artifact (flush, header stamp, whatever the medium
    /// needs). Called exactly once after the last `write`.
    fn end(&mut self) -> Result<()>;
}

/// Accumulates writes into whole words, checksums them, and appends the
/// checksum trailer on completion.
pub(crate) struct WriteSession<'a, S: DumpSink> {
    sink: &'a mut S,
    checksum: Checksum,
    cache: [u8; WORD_SIZE as usize],
    cached: usize,
    written: u32,
}

impl<'a, S: DumpSink> WriteSession<'a, S> {
    pub(crate) fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            checksum: Checksum::new(),
            cache: [0; WORD_SIZE as usize],
            cached: 0,
            written: 0,
        }
    }

    /// Appends `data` to the artifact. Byte order is preserved across any
    /// sequence of calls regardless of how the lengths split.
    pub(crate) fn write(&mut self, mut data: &[u8]) -> Result<()> {
        // Top up a partially filled word first.
        if self.cached != 0 {
            let take = data.len().min(WORD_SIZE as usize - self.cached);
            self.cache[self.cached..self.cached + take].copy_from_slice(&data[..take]);
            self.cached += take;
            data = &data[take..];
            if self.cached < WORD_SIZE as usize {
                return Ok(());
            }
            self.flush_word()?;
        }

        // Whole words go straight through.
        let aligned = data.len() - data.len() % WORD_SIZE as usize;
        if aligned != 0 {
            self.checksum.update(&data[..aligned]);
            self.sink.write(&data[..aligned])?;
            self.written += aligned as u32;
        }

        // Stash the remainder for the next call.
        let rest = &data[aligned..];
        self.cache[..rest.len()].copy_from_slice(rest);
        self.cached = rest.len();
        Ok(())
    }

    fn flush_word(&mut self) -> Result<()> {
        self.checksum.update(&self.cache);
        self.sink.write(&self.cache)?;
        self.written += WORD_SIZE;
        self.cached = 0;
        Ok(())
    }

    /// Pads the data to a whole word, writes the checksum trailer and
    /// finalizes the sink. Returns the full artifact length.
    pub(crate) fn end(mut self) -> Result<u32> {
        if self.cached != 0 {
            self.cache[self.cached..].fill(0);
            self.flush_word()?;
        }
        let trailer = self.checksum.finalize();
        self.sink.write(&trailer)?;
        self.sink.end()?;
        Ok(self.written + CHECKSUM_LEN as u32)
    }
}

/// Total artifact length for `data_len` bytes of payload: the payload
/// padded to a whole word, plus the checksum trailer.
pub(crate) fn sealed_len(data_len: u32) -> u32 {
    kregions::round_up_word(data_len) + CHECKSUM_LEN as u32
}
