//! Nested length-delimited regions of a [`BitCursor`].
//!
//! A chunk is opened with its length in bits. Closing it moves the cursor to
//! the chunk end whether or not the contents were decoded: skipped chunks
//! larger than the buffered data are jumped over with a source seek when the
//! source supports it.

use crate::utils::bit_cursor::{BitCursor, Source};
use crate::utils::errors::BitError;

impl<S: Source> BitCursor<S> {
    pub fn begin_chunk(&mut self, length_bits: u64) {
        let target = self.global_bit_position() + length_bits;
        self.chunk_targets.push(target);
    }

    pub fn end_chunk(&mut self) -> Result<(), BitError> {
        let target = self.chunk_targets.pop().ok_or(BitError::UnbalancedChunk)?;
        let position = self.global_bit_position();

        if position > target {
            return Err(BitError::ChunkOverrun { target, position });
        }

        let delta = target - position;
        if delta == 0 {
            return Ok(());
        }

        if delta > self.buffered_bits() && self.seek_forward(delta)? {
            return Ok(());
        }

        self.skip_bits(delta)
    }

    /// Whether the cursor has reached the end of the innermost chunk.
    pub fn chunk_finished(&self) -> bool {
        self.chunk_targets
            .last()
            .is_some_and(|&target| self.global_bit_position() >= target)
    }

    /// Bits left in the innermost chunk, zero outside any chunk.
    pub fn chunk_remaining(&self) -> u64 {
        self.chunk_targets
            .last()
            .map_or(0, |&target| target.saturating_sub(self.global_bit_position()))
    }

    pub fn chunk_depth(&self) -> usize {
        self.chunk_targets.len()
    }
}

#[cfg(test)]
use crate::utils::bit_cursor::{SliceCursor, Streamed};
#[cfg(test)]
use std::io;

#[test]
fn skips_unread_chunk_contents() -> anyhow::Result<()> {
    let data: Vec<u8> = (0..64u8).collect();
    let mut c = SliceCursor::from_slice(&data);

    c.begin_chunk(10 * 8);
    assert_eq!(c.read_byte()?, 0);
    assert_eq!(c.chunk_remaining(), 72);
    assert!(!c.chunk_finished());
    c.end_chunk()?;

    assert_eq!(c.global_bit_position(), 80);
    assert_eq!(c.read_byte()?, 10);
    Ok(())
}

#[test]
fn nested_chunks() -> anyhow::Result<()> {
    let data: Vec<u8> = (0..64u8).collect();
    let mut c = SliceCursor::from_slice(&data);

    c.begin_chunk(32 * 8);
    c.begin_chunk(4 * 8);
    assert_eq!(c.chunk_depth(), 2);
    assert_eq!(c.read_bytes(4)?, [0, 1, 2, 3]);
    assert!(c.chunk_finished());
    c.end_chunk()?;
    assert_eq!(c.read_byte()?, 4);
    c.end_chunk()?;
    assert_eq!(c.chunk_depth(), 0);
    assert_eq!(c.read_byte()?, 32);
    Ok(())
}

#[test]
fn overrun_is_an_error() -> anyhow::Result<()> {
    let data = [0u8; 8];
    let mut c = SliceCursor::from_slice(&data);

    c.begin_chunk(4);
    c.read_byte()?;
    assert!(matches!(
        c.end_chunk(),
        Err(BitError::ChunkOverrun { target: 4, position: 8 })
    ));
    assert!(matches!(c.end_chunk(), Err(BitError::UnbalancedChunk)));
    Ok(())
}

#[test]
fn large_skip_seeks_or_streams() -> anyhow::Result<()> {
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();

    let mut seekable = BitCursor::new(io::Cursor::new(&data[..]), 64);
    seekable.begin_chunk(9_000 * 8);
    seekable.read_byte()?;
    seekable.end_chunk()?;
    assert_eq!(seekable.read_byte()?, data[9_000]);

    let mut streamed = BitCursor::new(Streamed(&data[..]), 64);
    streamed.begin_chunk(9_000 * 8);
    streamed.read_byte()?;
    streamed.end_chunk()?;
    assert_eq!(streamed.read_byte()?, data[9_000]);
    Ok(())
}

#[test]
fn chunk_past_end_of_stream() -> anyhow::Result<()> {
    let data = [0u8; 16];

    let mut streamed = BitCursor::new(Streamed(&data[..]), 16);
    streamed.begin_chunk(1_000 * 8);
    assert!(matches!(
        streamed.end_chunk(),
        Err(BitError::UnexpectedEndOfStream { .. })
    ));

    let mut seekable = BitCursor::new(io::Cursor::new(&data[..]), 16);
    seekable.begin_chunk(1_000 * 8);
    assert!(matches!(
        seekable.end_chunk(),
        Err(BitError::UnexpectedEndOfStream { position: 128 })
    ));
    assert!(seekable.at_end()?);
    assert!(matches!(
        seekable.read_bit(),
        Err(BitError::UnexpectedEndOfStream { position: 128 })
    ));
    Ok(())
}
