/// Outer record framing and sub-record extraction.
///
/// Provides the [`Demuxer`](extract::Demuxer) that reads record headers,
/// decompresses payloads and splits packets into sub-records in dispatch
/// order.
pub mod extract;

/// Record decoding.
///
/// Provides the [`Registry`](decode::Registry) mapping command ids and
/// sub-record tags to decoders, and the [`Record`](decode::Record) values it
/// produces.
pub mod decode;

/// Hand-off to record consumers.
///
/// Provides the bounded [`DispatchQueue`](dispatch::DispatchQueue) and the
/// [`CancelToken`](dispatch::CancelToken) that stops it.
pub mod dispatch;

/// Frame-by-frame decoding of a whole recording.
///
/// Provides the [`DemoParser`](parse::DemoParser) tying the other stages
/// together.
pub mod parse;

/// The smallest valid recording: signature, zeroed offsets and a stop record.
pub const EXAMPLE_DATA: &[u8] = &[
    0x50, 0x42, 0x44, 0x45, 0x4D, 0x53, 0x32, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00,
];
