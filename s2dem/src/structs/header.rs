//! Recording signature and the fixed-size preamble that follows it.

use anyhow::{Result, bail};
use log::debug;

use crate::utils::bit_cursor::{BitCursor, Source};
use crate::utils::errors::FormatError;

pub const SIGNATURE: [u8; 8] = *b"PBDEMS2\0";

/// Byte offsets stored right after the signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preamble {
    /// Offset of the trailing `FileInfo` record.
    pub file_info_offset: u32,
    pub spawn_groups_offset: u32,
}

impl Preamble {
    /// Checks the signature and reads the two offsets behind it.
    pub fn read<S: Source>(cursor: &mut BitCursor<S>) -> Result<Self> {
        let mut signature = [0u8; 8];
        for b in &mut signature {
            *b = cursor.read_byte()?;
        }

        if signature != SIGNATURE {
            bail!(FormatError::InvalidSignature(signature));
        }

        let preamble = Self {
            file_info_offset: cursor.read_bits(32)?,
            spawn_groups_offset: cursor.read_bits(32)?,
        };

        debug!("{preamble:?}");

        Ok(preamble)
    }
}

#[cfg(test)]
use crate::utils::bit_cursor::SliceCursor;

#[test]
fn reads_offsets() -> anyhow::Result<()> {
    let mut data = SIGNATURE.to_vec();
    data.extend_from_slice(&0x1234u32.to_le_bytes());
    data.extend_from_slice(&7u32.to_le_bytes());

    let mut cursor = SliceCursor::from_slice(&data);
    let preamble = Preamble::read(&mut cursor)?;
    assert_eq!(preamble.file_info_offset, 0x1234);
    assert_eq!(preamble.spawn_groups_offset, 7);
    assert!(cursor.at_end()?);
    Ok(())
}

#[test]
fn rejects_other_signatures() {
    let data = *b"HL2DEMO\0\0\0\0\0\0\0\0\0";
    let mut cursor = SliceCursor::from_slice(&data);
    let err = Preamble::read(&mut cursor).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FormatError>(),
        Some(FormatError::InvalidSignature(sig)) if sig == b"HL2DEMO\0"
    ));
}
