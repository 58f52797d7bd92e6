//! Buffered bit-level cursor over a byte source.
//!
//! Bits are consumed least-significant first. The cursor reads the source in
//! generations of `capacity` bytes and keeps the last [`SLED`] bytes of every
//! generation as lookahead, so an unaligned 8-byte load near the end of a
//! generation never touches uninitialized memory. When a read crosses into
//! the sled, the sled is copied to the head of the buffer and the next
//! generation is read behind it.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};

use crate::utils::errors::BitError;

/// Size of the lookahead region kept between buffer generations, in bytes.
pub const SLED: usize = 4;

const SLED_BITS: u64 = (SLED as u64) << 3;

/// Default limit of [`BitCursor::read_string`].
pub const MAX_STRING_LEN: usize = 4096;

/// A byte source a [`BitCursor`] can read from.
///
/// Sources that support random access override [`skip_bytes`](Self::skip_bytes)
/// so large uninteresting regions can be jumped over instead of read.
pub trait Source: Read {
    /// Moves the source forward by up to `n` bytes without reading them.
    ///
    /// Returns the number of bytes skipped, which is less than `n` only when
    /// the source ended first, or `None` when the source cannot seek and
    /// nothing was consumed.
    fn skip_bytes(&mut self, n: u64) -> io::Result<Option<u64>> {
        let _ = n;
        Ok(None)
    }
}

impl Source for &[u8] {
    fn skip_bytes(&mut self, n: u64) -> io::Result<Option<u64>> {
        let n = n.min(self.len() as u64) as usize;
        *self = &self[n..];
        Ok(Some(n as u64))
    }
}

impl<T: AsRef<[u8]>> Source for io::Cursor<T> {
    fn skip_bytes(&mut self, n: u64) -> io::Result<Option<u64>> {
        let len = self.get_ref().as_ref().len() as u64;
        let pos = self.position().min(len);
        let n = n.min(len - pos);
        self.set_position(pos + n);
        Ok(Some(n))
    }
}

/// Seeks `source` forward by at most `n` bytes, stopping at its end.
fn seek_clamped<S: Seek>(source: &mut S, n: u64) -> io::Result<Option<u64>> {
    let pos = source.stream_position()?;
    let end = source.seek(SeekFrom::End(0))?;
    let n = n.min(end.saturating_sub(pos));
    source.seek(SeekFrom::Start(pos + n))?;
    Ok(Some(n))
}

impl Source for File {
    fn skip_bytes(&mut self, n: u64) -> io::Result<Option<u64>> {
        seek_clamped(self, n)
    }
}

impl<R: Read + Seek> Source for BufReader<R> {
    fn skip_bytes(&mut self, n: u64) -> io::Result<Option<u64>> {
        seek_clamped(self, n)
    }
}

impl Source for io::StdinLock<'_> {}

impl<S: Source + ?Sized> Source for Box<S> {
    fn skip_bytes(&mut self, n: u64) -> io::Result<Option<u64>> {
        (**self).skip_bytes(n)
    }
}

impl<S: Source + ?Sized> Source for &mut S {
    fn skip_bytes(&mut self, n: u64) -> io::Result<Option<u64>> {
        (**self).skip_bytes(n)
    }
}

/// Wraps any reader as a forward-only [`Source`].
#[derive(Debug)]
pub struct Streamed<R>(pub R);

impl<R: Read> Read for Streamed<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read> Source for Streamed<R> {}

#[derive(Debug)]
pub struct BitCursor<S> {
    source: S,
    buffer: Vec<u8>,
    capacity: usize,
    /// Bit offset into `buffer`.
    offset: u64,
    /// Consumable bits of the current generation, excluding the sled unless
    /// the source is exhausted.
    bits_in_buffer: u64,
    /// Bits actually loaded into `buffer`.
    valid_bits: u64,
    /// Bits consumed by previous generations.
    lazy_position: u64,
    primed: bool,
    exhausted: bool,
    pub(crate) chunk_targets: Vec<u64>,
}

pub type SliceCursor<'a> = BitCursor<&'a [u8]>;

impl<'a> SliceCursor<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self::new(buf, crate::utils::buffer_pool::SMALL_BUFFER)
    }
}

impl<S: Source> BitCursor<S> {
    /// Opens a cursor reading `capacity` bytes per buffer generation.
    pub fn new(source: S, capacity: usize) -> Self {
        Self::with_buffer(source, Vec::new(), capacity)
    }

    /// Opens a cursor over a caller-provided buffer, typically one taken from
    /// a [`BufferPool`](crate::utils::buffer_pool::BufferPool).
    pub fn with_buffer(source: S, mut buffer: Vec<u8>, capacity: usize) -> Self {
        let capacity = capacity.max(4 * SLED).next_multiple_of(SLED);

        buffer.clear();
        buffer.resize(capacity + SLED, 0);

        Self {
            source,
            buffer,
            capacity,
            offset: 0,
            bits_in_buffer: 0,
            valid_bits: 0,
            lazy_position: 0,
            primed: false,
            exhausted: false,
            chunk_targets: Vec::new(),
        }
    }

    /// Detaches the cursor, handing back its source and its buffer.
    pub fn into_parts(self) -> (S, Vec<u8>) {
        (self.source, self.buffer)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    pub fn global_bit_position(&self) -> u64 {
        self.lazy_position + self.offset
    }

    /// Bits that can be read without touching the source again.
    #[inline(always)]
    pub fn buffered_bits(&self) -> u64 {
        self.valid_bits.saturating_sub(self.offset)
    }

    #[inline(always)]
    pub fn read_bit(&mut self) -> Result<bool, BitError> {
        self.ensure(1)?;

        let byte = self.buffer[(self.offset >> 3) as usize];
        let bit = (byte >> (self.offset & 7)) & 1 != 0;
        self.advance(1)?;

        Ok(bit)
    }

    #[inline(always)]
    pub fn read_bits(&mut self, n: u32) -> Result<u32, BitError> {
        if n > 32 {
            return Err(BitError::OversizeRead(n));
        }
        if n == 0 {
            return Ok(0);
        }

        self.ensure(n as u64)?;
        let (word, shift) = self.load_word();
        self.advance(n as u64)?;

        Ok(((word << (64 - shift - n)) >> (64 - n)) as u32)
    }

    #[inline(always)]
    pub fn read_signed_bits(&mut self, n: u32) -> Result<i32, BitError> {
        if n > 32 {
            return Err(BitError::OversizeRead(n));
        }
        if n == 0 {
            return Ok(0);
        }

        self.ensure(n as u64)?;
        let (word, shift) = self.load_word();
        self.advance(n as u64)?;

        Ok(((word << (64 - shift - n)) as i64 >> (64 - n)) as i32)
    }

    #[inline(always)]
    pub fn read_byte(&mut self) -> Result<u8, BitError> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, BitError> {
        let mut out = Vec::new();
        self.read_bytes_into(&mut out, n)?;
        Ok(out)
    }

    /// Appends `n` bytes to `out`. Byte-aligned reads copy straight out of
    /// the buffer.
    pub fn read_bytes_into(&mut self, out: &mut Vec<u8>, n: usize) -> Result<(), BitError> {
        // `n` comes off the wire; only reserve what is already buffered.
        out.reserve(n.min((self.buffered_bits() >> 3) as usize));

        if self.offset & 7 != 0 {
            for _ in 0..n {
                out.push(self.read_byte()?);
            }
            return Ok(());
        }

        let mut remaining = n;
        while remaining > 0 {
            self.ensure(8)?;

            let start = (self.offset >> 3) as usize;
            let take = ((self.buffered_bits() >> 3) as usize).min(remaining);
            out.extend_from_slice(&self.buffer[start..start + take]);
            self.advance((take as u64) << 3)?;
            remaining -= take;
        }

        Ok(())
    }

    /// Reads `n` bits into bytes; the last byte holds the leftover bits when
    /// `n` is not a multiple of 8.
    pub fn read_bits_to_bytes(&mut self, n: u64) -> Result<Vec<u8>, BitError> {
        let mut out = self.read_bytes((n >> 3) as usize)?;
        let rest = (n & 7) as u32;
        if rest > 0 {
            out.push(self.read_bits(rest)? as u8);
        }
        Ok(out)
    }

    /// Reads exactly `max_len` bytes and keeps everything before the first NUL.
    pub fn read_cstring(&mut self, max_len: usize) -> Result<String, BitError> {
        let bytes = self.read_bytes(max_len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Reads a NUL-terminated string of at most [`MAX_STRING_LEN`] bytes.
    pub fn read_string(&mut self) -> Result<String, BitError> {
        self.read_string_limited(MAX_STRING_LEN, false)
    }

    pub fn read_string_limited(
        &mut self,
        limit: usize,
        stop_at_newline: bool,
    ) -> Result<String, BitError> {
        let bytes = self.read_string_bytes(limit, stop_at_newline)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads bytes one at a time until a NUL (not included), an optional
    /// newline, or `limit` bytes.
    pub fn read_string_bytes(
        &mut self,
        limit: usize,
        stop_at_newline: bool,
    ) -> Result<Vec<u8>, BitError> {
        let mut out = Vec::new();
        for _ in 0..limit {
            let b = self.read_byte()?;
            if b == 0 || (stop_at_newline && b == b'\n') {
                break;
            }
            out.push(b);
        }
        Ok(out)
    }

    /// Discards `n` bits by decoding past them.
    pub fn skip_bits(&mut self, n: u64) -> Result<(), BitError> {
        if !self.primed {
            self.prime()?;
        }

        self.advance(n)?;
        if self.offset > self.valid_bits {
            return Err(self.end_of_stream());
        }

        Ok(())
    }

    /// Jumps `n` bits forward by seeking the source past everything not yet
    /// buffered, then reloads the buffer at the new position.
    ///
    /// Returns `false` without moving when the source cannot seek or the jump
    /// stays inside the buffered data.
    pub fn seek_forward(&mut self, n: u64) -> Result<bool, BitError> {
        if !self.primed {
            self.prime()?;
        }
        if self.exhausted || n <= self.buffered_bits() {
            return Ok(false);
        }

        let target = self.global_bit_position() + n;
        let loaded_end = self.lazy_position + self.valid_bits;
        let skip = (target - loaded_end) >> 3;

        let Some(skipped) = self.source.skip_bytes(skip)? else {
            return Ok(false);
        };

        log::trace!("seek_forward: skipped {skipped} of {skip} bytes to reach bit {target}");

        self.lazy_position = loaded_end + (skipped << 3);
        if skipped < skip {
            // The source ended inside the jump.
            self.offset = 0;
            self.prime()?;
            return Err(self.end_of_stream());
        }

        self.offset = target - self.lazy_position;
        self.prime()?;

        if self.offset > self.valid_bits {
            return Err(self.end_of_stream());
        }

        Ok(true)
    }

    /// Whether every bit of the source has been consumed.
    pub fn at_end(&mut self) -> Result<bool, BitError> {
        if !self.primed {
            self.prime()?;
        }
        Ok(self.exhausted && self.offset >= self.valid_bits)
    }

    #[inline(always)]
    fn load_word(&self) -> (u64, u32) {
        let start = ((self.offset >> 3) as usize) & !(SLED - 1);
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.buffer[start..start + 8]);
        (u64::from_le_bytes(word), (self.offset & 31) as u32)
    }

    #[inline(always)]
    fn ensure(&mut self, n: u64) -> Result<(), BitError> {
        if self.offset + n <= self.valid_bits {
            return Ok(());
        }
        self.ensure_slow(n)
    }

    #[cold]
    fn ensure_slow(&mut self, n: u64) -> Result<(), BitError> {
        if !self.primed {
            self.prime()?;
        }
        while self.offset > self.bits_in_buffer && !self.exhausted {
            self.refill()?;
        }
        if self.offset + n > self.valid_bits {
            return Err(self.end_of_stream());
        }
        Ok(())
    }

    #[inline(always)]
    fn advance(&mut self, n: u64) -> Result<(), BitError> {
        self.offset += n;
        while self.offset > self.bits_in_buffer && !self.exhausted {
            self.refill()?;
        }
        Ok(())
    }

    /// Loads a fresh generation into the whole buffer, without a sled from a
    /// previous one.
    fn prime(&mut self) -> Result<(), BitError> {
        let read = fill(&mut self.source, &mut self.buffer[..self.capacity])?;

        self.primed = true;
        self.valid_bits = (read as u64) << 3;
        if read < self.capacity {
            self.exhausted = true;
            self.bits_in_buffer = self.valid_bits;
        } else {
            self.bits_in_buffer = self.valid_bits - SLED_BITS;
        }

        Ok(())
    }

    fn refill(&mut self) -> Result<(), BitError> {
        let tail = (self.bits_in_buffer >> 3) as usize;
        self.buffer.copy_within(tail..tail + SLED, 0);

        self.lazy_position += self.bits_in_buffer;
        self.offset -= self.bits_in_buffer;

        let wanted = self.capacity - SLED;
        let read = fill(&mut self.source, &mut self.buffer[SLED..self.capacity])?;

        self.bits_in_buffer = (read as u64) << 3;
        self.valid_bits = self.bits_in_buffer + SLED_BITS;
        if read < wanted {
            // No more lookahead is coming, the sled is plain data now.
            self.exhausted = true;
            self.bits_in_buffer += SLED_BITS;
        }

        Ok(())
    }

    fn end_of_stream(&self) -> BitError {
        BitError::UnexpectedEndOfStream {
            position: self.global_bit_position(),
        }
    }
}

/// Reads until `buf` is full or the source reports end of input.
fn fill<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match source.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
use crate::utils::fixture::Fixture;

#[test]
fn reads_unaligned_fields() -> anyhow::Result<()> {
    let mut f = Fixture::new();
    f.bit(true).bits(3, 0b101).bits(17, 0x1_2345).bits(32, 0xDEAD_BEEF).bits(5, 0b10011);
    let data = f.finish();

    let mut c = SliceCursor::from_slice(&data);
    assert!(c.read_bit()?);
    assert_eq!(c.read_bits(3)?, 0b101);
    assert_eq!(c.read_bits(17)?, 0x1_2345);
    assert_eq!(c.read_bits(32)?, 0xDEAD_BEEF);
    assert_eq!(c.global_bit_position(), 53);
    assert_eq!(c.read_signed_bits(5)?, -13);
    Ok(())
}

#[test]
fn oversize_read_fails() {
    let mut c = SliceCursor::from_slice(&[0; 16]);
    assert!(matches!(c.read_bits(33), Err(BitError::OversizeRead(33))));
    assert!(matches!(c.read_signed_bits(40), Err(BitError::OversizeRead(40))));
}

#[test]
fn signed_reads_sign_extend() -> anyhow::Result<()> {
    let mut f = Fixture::new();
    f.bits(4, 0b1000).bits(4, 0b0111).bits(32, 0xFFFF_FFFF).bits(1, 1);
    let data = f.finish();

    let mut c = SliceCursor::from_slice(&data);
    assert_eq!(c.read_signed_bits(4)?, -8);
    assert_eq!(c.read_signed_bits(4)?, 7);
    assert_eq!(c.read_signed_bits(32)?, -1);
    assert_eq!(c.read_signed_bits(1)?, -1);
    Ok(())
}

#[test]
fn refills_across_generations() -> anyhow::Result<()> {
    // 16-byte generations force a refill every 12 consumable bytes.
    let mut f = Fixture::new();
    for i in 0..100u32 {
        f.bits(13, i * 37 % 8192).bit(i % 3 == 0);
    }
    let data = f.finish();

    let mut c = BitCursor::new(Streamed(&data[..]), 16);
    for i in 0..100u32 {
        assert_eq!(c.read_bits(13)?, i * 37 % 8192, "field {i}");
        assert_eq!(c.read_bit()?, i % 3 == 0);
    }
    assert_eq!(c.global_bit_position(), 1400);
    Ok(())
}

#[test]
fn end_of_stream_is_reported() -> anyhow::Result<()> {
    let data = [0xFFu8, 0x01];
    let mut c = BitCursor::new(&data[..], 16);
    assert_eq!(c.read_bits(12)?, 0x1FF);
    assert!(!c.at_end()?);
    assert_eq!(c.read_bits(4)?, 0);
    assert!(c.at_end()?);
    assert!(matches!(
        c.read_bit(),
        Err(BitError::UnexpectedEndOfStream { position: 16 })
    ));

    let mut empty = SliceCursor::from_slice(&[]);
    assert!(empty.at_end()?);
    assert!(matches!(
        empty.read_byte(),
        Err(BitError::UnexpectedEndOfStream { position: 0 })
    ));
    Ok(())
}

#[test]
fn byte_helpers() -> anyhow::Result<()> {
    let mut f = Fixture::new();
    f.bytes(b"abc\0zz").bit(true).bytes(b"line\nrest\0").bytes(b"xy");
    let data = f.finish();

    let mut c = SliceCursor::from_slice(&data);
    assert_eq!(c.read_cstring(6)?, "abc");
    assert!(c.read_bit()?);
    assert_eq!(c.read_string_limited(64, true)?, "line");
    assert_eq!(c.read_string()?, "rest");
    assert_eq!(c.read_string_limited(1, false)?, "x");
    assert_eq!(c.read_bytes(1)?, b"y");
    Ok(())
}

#[test]
fn aligned_bulk_reads_span_generations() -> anyhow::Result<()> {
    let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

    let mut c = BitCursor::new(Streamed(&data[..]), 32);
    assert_eq!(c.read_bytes(3)?, &data[..3]);
    assert_eq!(c.read_bytes(900)?, &data[3..903]);
    assert_eq!(c.read_bits_to_bytes(20)?, vec![data[903], data[904], data[905] & 0xF]);
    Ok(())
}

#[test]
fn seeks_past_unbuffered_data() -> anyhow::Result<()> {
    let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();

    let mut c = BitCursor::new(io::Cursor::new(&data[..]), 64);
    assert_eq!(c.read_byte()?, 0);
    assert!(!c.seek_forward(8)?);
    assert!(c.seek_forward(3000 * 8 + 4)?);
    assert_eq!(c.global_bit_position(), 3001 * 8 + 4);
    assert_eq!(c.read_bits(4)?, (data[3001] >> 4) as u32);
    assert_eq!(c.read_byte()?, data[3002]);

    let mut streamed = BitCursor::new(Streamed(&data[..]), 64);
    assert!(!streamed.seek_forward(3000 * 8)?);
    Ok(())
}

#[test]
fn seek_past_the_end_is_an_error() -> anyhow::Result<()> {
    let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();

    let mut c = BitCursor::new(io::Cursor::new(&data[..]), 64);
    c.read_byte()?;
    assert!(matches!(
        c.seek_forward(5_000 * 8),
        Err(BitError::UnexpectedEndOfStream { position: 8_000 })
    ));
    assert!(c.at_end()?);

    // Landing exactly on the end is fine.
    let mut c = BitCursor::new(&data[..], 64);
    assert!(c.seek_forward(1_000 * 8)?);
    assert!(c.at_end()?);

    let mut file = BitCursor::new(io::BufReader::new(io::Cursor::new(data.clone())), 64);
    assert!(matches!(
        file.seek_forward(2_000 * 8),
        Err(BitError::UnexpectedEndOfStream { position: 8_000 })
    ));
    Ok(())
}

#[test]
fn oversized_byte_reads_fail_cleanly() -> anyhow::Result<()> {
    let data = [1u8, 2, 3];

    let mut c = SliceCursor::from_slice(&data);
    assert!(matches!(
        c.read_bytes(u32::MAX as usize),
        Err(BitError::UnexpectedEndOfStream { .. })
    ));

    let mut out = Vec::new();
    let mut c = BitCursor::new(Streamed(&data[..]), 16);
    assert!(c.read_bytes_into(&mut out, usize::MAX >> 1).is_err());
    assert!(out.capacity() < 1024);
    Ok(())
}
