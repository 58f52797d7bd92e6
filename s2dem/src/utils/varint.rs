use crate::utils::bit_cursor::{BitCursor, Source};
use crate::utils::errors::BitError;

/// Longest encoding of a 32-bit varint, in bytes.
pub const MAX_VARINT32_BYTES: usize = 5;

impl<S: Source> BitCursor<S> {
    /// Reads a base-128 varint, least significant group first.
    ///
    /// Encodings longer than [`MAX_VARINT32_BYTES`] are cut off after the
    /// fifth byte and the excess high bits are dropped.
    pub fn read_varuint32(&mut self) -> Result<u32, BitError> {
        let mut value = 0u32;
        for i in 0..MAX_VARINT32_BYTES {
            let b = self.read_byte()? as u32;
            value |= (b & 0x7F).wrapping_shl(7 * i as u32);
            if b & 0x80 == 0 {
                break;
            }
        }
        Ok(value)
    }

    /// Reads a zigzag-encoded signed varint.
    pub fn read_varint32(&mut self) -> Result<i32, BitError> {
        let raw = self.read_varuint32()?;
        Ok((raw >> 1) as i32 ^ -((raw & 1) as i32))
    }

    /// Reads the 6-bit tag-int used for sub-record types.
    ///
    /// Bits 4 and 5 of the leading group select how many extension bits
    /// follow: none, 4, 8 or 28.
    pub fn read_ubit_int(&mut self) -> Result<u32, BitError> {
        let lead = self.read_bits(6)?;
        let extra = match lead & 0x30 {
            0x10 => self.read_bits(4)?,
            0x20 => self.read_bits(8)?,
            0x30 => self.read_bits(28)?,
            _ => return Ok(lead),
        };
        Ok((lead & 0x0F) | (extra << 4))
    }
}

#[cfg(test)]
use crate::utils::{bit_cursor::SliceCursor, fixture::Fixture};

#[test]
fn varuint32_values() -> anyhow::Result<()> {
    let data = [
        0x00, 0x7F, 0x80, 0x01, 0xAC, 0x02, 0x80, 0x80, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F,
    ];
    let mut c = SliceCursor::from_slice(&data);
    assert_eq!(c.read_varuint32()?, 0);
    assert_eq!(c.read_varuint32()?, 127);
    assert_eq!(c.read_varuint32()?, 128);
    assert_eq!(c.read_varuint32()?, 300);
    assert_eq!(c.read_varuint32()?, 16384);
    assert_eq!(c.read_varuint32()?, u32::MAX);
    assert!(c.at_end()?);
    Ok(())
}

#[test]
fn overlong_varuint32_stops_after_five_bytes() -> anyhow::Result<()> {
    // Six continuation bytes: only five are consumed.
    let data = [0x81, 0x80, 0x80, 0x80, 0x80, 0x80, 0x05];
    let mut c = SliceCursor::from_slice(&data);
    assert_eq!(c.read_varuint32()?, 1);
    assert_eq!(c.global_bit_position(), 40);
    assert_eq!(c.read_byte()?, 0x80);
    Ok(())
}

#[test]
fn zigzag_values() -> anyhow::Result<()> {
    let data = [0x00, 0x01, 0x02, 0x03, 0xFE, 0xFF, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F];
    let mut c = SliceCursor::from_slice(&data);
    assert_eq!(c.read_varint32()?, 0);
    assert_eq!(c.read_varint32()?, -1);
    assert_eq!(c.read_varint32()?, 1);
    assert_eq!(c.read_varint32()?, -2);
    assert_eq!(c.read_varint32()?, i32::MAX);
    assert_eq!(c.read_varint32()?, i32::MIN);

    // Values straddling the one and two byte boundaries.
    let mut f = Fixture::new();
    for v in [-64, 63, 64, -65, -12_345] {
        f.varint32(v);
    }
    let data = f.finish();
    assert_eq!(data[..4], [0x7F, 0x7E, 0x80, 0x01]);

    let mut c = SliceCursor::from_slice(&data);
    for v in [-64, 63, 64, -65, -12_345] {
        assert_eq!(c.read_varint32()?, v);
    }
    assert!(c.at_end()?);
    Ok(())
}

#[test]
fn ubit_int_layouts() -> anyhow::Result<()> {
    let mut f = Fixture::new();
    f.bits(6, 0b00_1011)
        .bits(6, 0b01_0011)
        .bits(4, 0xA)
        .bits(6, 0b10_0001)
        .bits(8, 0x5C)
        .bits(6, 0b11_1111)
        .bits(28, 0x0FFF_FFFF)
        .tag_int(55)
        .tag_int(4);
    let data = f.finish();

    let mut c = SliceCursor::from_slice(&data);
    assert_eq!(c.read_ubit_int()?, 11);
    assert_eq!(c.read_ubit_int()?, 0xA3);
    assert_eq!(c.read_ubit_int()?, 0x5C1);
    assert_eq!(c.read_ubit_int()?, u32::MAX);
    assert_eq!(c.read_ubit_int()?, 55);
    assert_eq!(c.read_ubit_int()?, 4);
    Ok(())
}
