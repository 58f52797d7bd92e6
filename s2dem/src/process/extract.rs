use log::trace;

use crate::structs::command::{
    COMPRESSED_FLAG, DemoCommand, HeaderEncoding, PriorityTable, TICK_SENTINEL,
};
use crate::utils::bit_cursor::{BitCursor, Source};
use crate::utils::buffer_pool::{CursorPool, SizeClass};
use crate::utils::errors::BitError;

/// Header of one outer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub command: DemoCommand,
    pub compressed: bool,
    pub tick: u32,
    pub size: u32,
}

/// A sub-record waiting for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub tag: u32,
    pub payload: Vec<u8>,
}

/// Splits outer records into headers, payloads and sub-records.
///
/// Sub-records are returned in dispatch order: stable-sorted by the
/// [`PriorityTable`] so records that set up per-tick context come before
/// records that consume it.
#[derive(Debug, Clone)]
pub struct Demuxer {
    encoding: HeaderEncoding,
    priorities: PriorityTable,
    pool: CursorPool,
}

impl Demuxer {
    pub fn new(encoding: HeaderEncoding, priorities: PriorityTable, pool: CursorPool) -> Self {
        Self {
            encoding,
            priorities,
            pool,
        }
    }

    pub fn priorities(&self) -> &PriorityTable {
        &self.priorities
    }

    pub fn read_header<S: Source>(&self, cursor: &mut BitCursor<S>) -> Result<RecordHeader, BitError> {
        let raw = match self.encoding {
            HeaderEncoding::VarUint32 => cursor.read_varuint32()?,
            HeaderEncoding::TagInt => cursor.read_ubit_int()?,
        };

        let tick = match cursor.read_varuint32()? {
            TICK_SENTINEL => 0,
            tick => tick,
        };

        let header = RecordHeader {
            command: DemoCommand::from(raw & !COMPRESSED_FLAG),
            compressed: raw & COMPRESSED_FLAG != 0,
            tick,
            size: cursor.read_varuint32()?,
        };

        trace!("{header:?}");

        Ok(header)
    }

    pub fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, snap::Error> {
        snap::raw::Decoder::new().decompress_vec(payload)
    }

    /// Reads `(tag, size, bytes)` sub-records until fewer than 8 bits remain
    /// and returns them in dispatch order.
    pub fn extract(&self, data: &[u8]) -> Result<Vec<PendingRecord>, BitError> {
        let mut records = Vec::new();
        if data.is_empty() {
            return Ok(records);
        }

        let total_bits = (data.len() as u64) << 3;
        let mut cursor = self.pool.acquire(SizeClass::Small, data);

        let result = (|| -> Result<(), BitError> {
            while total_bits - cursor.global_bit_position() > 7 {
                let tag = cursor.read_ubit_int()?;
                let size = cursor.read_varuint32()? as usize;
                let payload = cursor.read_bytes(size)?;
                trace!("Sub-record {tag} ({size} bytes)");
                records.push(PendingRecord { tag, payload });
            }
            Ok(())
        })();

        self.pool.release(cursor);
        result?;

        self.priorities.sort(&mut records, |r| r.tag);

        Ok(records)
    }
}

#[cfg(test)]
use crate::structs::command::tags;
#[cfg(test)]
use crate::utils::bit_cursor::SliceCursor;
#[cfg(test)]
use crate::utils::fixture::{Fixture, outer_record, sub_records};

#[cfg(test)]
fn demuxer(encoding: HeaderEncoding) -> Demuxer {
    Demuxer::new(encoding, PriorityTable::default(), CursorPool::default())
}

#[test]
fn reads_record_headers() -> anyhow::Result<()> {
    let mut data = outer_record(COMPRESSED_FLAG | 7, u32::MAX, &[0xAA; 3]);
    data.extend(outer_record(2, 300, &[]));

    let demuxer = demuxer(HeaderEncoding::VarUint32);
    let mut cursor = SliceCursor::from_slice(&data);

    let first = demuxer.read_header(&mut cursor)?;
    assert_eq!(first.command, DemoCommand::Packet);
    assert!(first.compressed);
    assert_eq!(first.tick, 0);
    assert_eq!(first.size, 3);
    cursor.skip_bits(24)?;

    let second = demuxer.read_header(&mut cursor)?;
    assert_eq!(
        second,
        RecordHeader {
            command: DemoCommand::FileInfo,
            compressed: false,
            tick: 300,
            size: 0,
        }
    );
    Ok(())
}

#[test]
fn reads_tag_int_headers() -> anyhow::Result<()> {
    let mut f = Fixture::new();
    f.tag_int(COMPRESSED_FLAG | 13).varuint32(12).varuint32(5);
    let data = f.finish();

    let header = demuxer(HeaderEncoding::TagInt).read_header(&mut SliceCursor::from_slice(&data))?;
    assert_eq!(header.command, DemoCommand::FullPacket);
    assert!(header.compressed);
    assert_eq!((header.tick, header.size), (12, 5));
    Ok(())
}

#[test]
fn context_records_are_extracted_first() -> anyhow::Result<()> {
    let data = sub_records(&[
        (tags::SVC_PACKET_ENTITIES, b"delta"),
        (23, b"event"),
        (tags::SVC_CREATE_STRING_TABLE, b"table"),
    ]);

    let records = demuxer(HeaderEncoding::VarUint32).extract(&data)?;
    let order: Vec<_> = records.iter().map(|r| r.tag).collect();
    assert_eq!(order, [tags::SVC_CREATE_STRING_TABLE, 23, tags::SVC_PACKET_ENTITIES]);
    assert_eq!(records[0].payload, b"table");
    assert_eq!(records[2].payload, b"delta");
    Ok(())
}

#[test]
fn trailing_padding_is_ignored() -> anyhow::Result<()> {
    // One 6-bit tag, a 1-byte size and one byte leave 2 padding bits.
    let data = sub_records(&[(9, &[0x42])]);
    assert_eq!(data.len(), 3);

    let records = demuxer(HeaderEncoding::VarUint32).extract(&data)?;
    assert_eq!(records, [PendingRecord { tag: 9, payload: vec![0x42] }]);
    assert!(demuxer(HeaderEncoding::VarUint32).extract(&[])?.is_empty());
    Ok(())
}

#[test]
fn truncated_sub_record_is_an_error() {
    let mut data = sub_records(&[(9, &[1, 2, 3, 4])]);
    data.truncate(3);
    assert!(matches!(
        demuxer(HeaderEncoding::VarUint32).extract(&data),
        Err(BitError::UnexpectedEndOfStream { .. })
    ));
}

#[test]
fn decompresses_snappy_payloads() -> anyhow::Result<()> {
    let demuxer = demuxer(HeaderEncoding::VarUint32);
    let compressed = snap::raw::Encoder::new().compress_vec(b"payload payload payload")?;
    assert_eq!(demuxer.decompress(&compressed)?, b"payload payload payload");
    assert!(demuxer.decompress(&[0xFF, 0xFF]).is_err());
    Ok(())
}
