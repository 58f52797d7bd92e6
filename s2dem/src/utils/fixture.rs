//! Bit-level builders for hand-made test recordings.

use bitstream_io::{BitWrite, BitWriter, LittleEndian};

pub struct Fixture {
    writer: BitWriter<Vec<u8>, LittleEndian>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            writer: BitWriter::endian(Vec::new(), LittleEndian),
        }
    }

    pub fn bit(&mut self, bit: bool) -> &mut Self {
        self.writer.write_bit(bit).unwrap();
        self
    }

    pub fn bits(&mut self, n: u32, value: u32) -> &mut Self {
        if n > 0 {
            let value = if n == 32 { value } else { value & ((1 << n) - 1) };
            self.writer.write_var::<u32>(n, value).unwrap();
        }
        self
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        for &b in bytes {
            self.bits(8, b as u32);
        }
        self
    }

    pub fn cstring(&mut self, s: &str) -> &mut Self {
        self.bytes(s.as_bytes()).bits(8, 0)
    }

    pub fn varuint32(&mut self, value: u32) -> &mut Self {
        let mut buf = Vec::new();
        encode_varuint(value as u64, &mut buf);
        self.bytes(&buf)
    }

    pub fn varint32(&mut self, value: i32) -> &mut Self {
        self.varuint32(((value << 1) ^ (value >> 31)) as u32)
    }

    /// Writes `value` in the 6-bit tag-int layout.
    pub fn tag_int(&mut self, value: u32) -> &mut Self {
        let low = value & 15;
        let high = value >> 4;
        match high {
            0 => self.bits(6, low),
            1..16 => self.bits(6, low | 16).bits(4, high),
            16..256 => self.bits(6, low | 32).bits(8, high),
            _ => self.bits(6, low | 48).bits(28, high),
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.writer.byte_align().unwrap();
        self.writer.into_writer()
    }
}

pub fn encode_varuint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// A byte-aligned outer record: command, tick, size, payload.
pub fn outer_record(command: u32, tick: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varuint(command as u64, &mut out);
    encode_varuint(tick as u64, &mut out);
    encode_varuint(payload.len() as u64, &mut out);
    out.extend_from_slice(payload);
    out
}

/// Concatenated sub-records in the tag-int / varint-size / bytes layout.
pub fn sub_records(records: &[(u32, &[u8])]) -> Vec<u8> {
    let mut f = Fixture::new();
    for (tag, body) in records {
        f.tag_int(*tag).varuint32(body.len() as u32).bytes(body);
    }
    f.finish()
}
