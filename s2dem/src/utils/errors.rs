/// Reports a non-fatal [`Warning`](crate::utils::diagnostics::Warning), or
/// returns it as an error when the state's `fail_level` is `Warn`.
///
/// The state expression must expose `fail_level: log::Level` and
/// `sink: Box<dyn DiagnosticSink>`.
#[macro_export]
macro_rules! report_or_err {
    ($state:expr, $warning:expr $(,)?) => {{
        let warning = $warning;
        if ::log::Level::Warn <= $state.fail_level {
            return Err(warning.into());
        } else {
            $state.sink.warn(&warning);
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum BitError {
    #[error("Stream ended unexpectedly at bit {position}")]
    UnexpectedEndOfStream { position: u64 },

    #[error("Cannot read {0} bits into a 32-bit integer")]
    OversizeRead(u32),

    #[error("Chunk overrun: target bit {target}, cursor at bit {position}")]
    ChunkOverrun { target: u64, position: u64 },

    #[error("end_chunk called without a matching begin_chunk")]
    UnbalancedChunk,

    #[error("I/O error on the underlying source: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum StringTableError {
    #[error("Entry index {index} out of range for table {table:?} (max entries {max})")]
    IndexOutOfRange { table: String, index: i64, max: u32 },

    #[error("History index {index} out of range for table {table:?} (history holds {len})")]
    HistoryIndexOutOfRange {
        table: String,
        index: usize,
        len: usize,
    },

    #[error("Table {table:?} declares a fixed payload of {bits} bits, wider than one byte")]
    FixedPayloadTooWide { table: String, bits: u32 },

    #[error("Table {table:?} uses the unsupported dictionary encoding")]
    DictionaryEncoded { table: String },

    #[error("Snappy-compressed data in table {table:?} is corrupt: {source}")]
    Decompression {
        table: String,
        #[source]
        source: snap::Error,
    },

    #[error(transparent)]
    Bits(#[from] BitError),
}

#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("Invalid file signature {0:02X?}, expecting PBDEMS2")]
    InvalidSignature([u8; 8]),

    #[error("Failed to decode {what} envelope: {source}")]
    Envelope {
        what: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    #[error("Duplicate priority entry for sub-record tag {0}")]
    DuplicatePriority(u32),

    #[error("Dispatch queue is closed")]
    QueueClosed,
}

/// Coarse classification of a fatal decode failure for caller-facing
/// reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The recording ends mid-record; everything before it was decoded.
    Truncated,
    /// The recording is not in a recognized format at all.
    InvalidFormat,
    /// The recording is structurally broken.
    Corrupt,
    /// I/O, strict-mode warnings and anything else.
    Other,
}

impl ErrorClass {
    pub fn of(err: &anyhow::Error) -> Self {
        let bits = err.downcast_ref::<BitError>().or_else(|| {
            match err.downcast_ref::<StringTableError>() {
                Some(StringTableError::Bits(inner)) => Some(inner),
                _ => None,
            }
        });

        match bits {
            Some(BitError::UnexpectedEndOfStream { .. }) => return Self::Truncated,
            Some(BitError::Io(_)) => return Self::Other,
            Some(_) => return Self::Corrupt,
            None => {}
        }

        if let Some(err) = err.downcast_ref::<FormatError>() {
            return match err {
                FormatError::InvalidSignature(_) => Self::InvalidFormat,
                FormatError::Envelope { .. } => Self::Corrupt,
                _ => Self::Other,
            };
        }

        if err.downcast_ref::<StringTableError>().is_some() {
            return Self::Corrupt;
        }

        Self::Other
    }
}

#[test]
fn classify_errors() {
    let truncated = anyhow::Error::from(BitError::UnexpectedEndOfStream { position: 12 });
    assert_eq!(ErrorClass::of(&truncated), ErrorClass::Truncated);

    let nested = anyhow::Error::from(StringTableError::Bits(
        BitError::UnexpectedEndOfStream { position: 3 },
    ));
    assert_eq!(ErrorClass::of(&nested), ErrorClass::Truncated);

    let overrun = anyhow::Error::from(BitError::ChunkOverrun {
        target: 8,
        position: 9,
    });
    assert_eq!(ErrorClass::of(&overrun), ErrorClass::Corrupt);

    let signature = anyhow::Error::from(FormatError::InvalidSignature(*b"HL2DEMO\0"));
    assert_eq!(ErrorClass::of(&signature), ErrorClass::InvalidFormat);

    let table = anyhow::Error::from(StringTableError::IndexOutOfRange {
        table: "userinfo".into(),
        index: 70,
        max: 64,
    });
    assert_eq!(ErrorClass::of(&table), ErrorClass::Corrupt);

    assert_eq!(ErrorClass::of(&anyhow::anyhow!("other")), ErrorClass::Other);
}
