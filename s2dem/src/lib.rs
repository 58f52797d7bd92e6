#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! A recording is an 8-byte signature, two 32-bit offsets and a sequence of
//! outer records, each `command | compressed flag`, tick and size followed by
//! the payload. Packet records carry sub-records of their own, packed at bit
//! granularity.
//!
//! ### Bit Cursor
//!
//! All reads go through a buffered little-endian [`BitCursor`](utils::bit_cursor::BitCursor)
//! with a 4-byte sled, so unaligned 32-bit loads never touch uninitialized
//! memory. Varints and tag integers are layered on top, and chunks bound
//! nested reads and skip whatever a decoder left unread.
//!
//! ### String Tables
//!
//! Tables are created and patched by sub-records. Keys may copy a prefix
//! from one of the last 32 keys; payloads may be fixed-width, length
//! prefixed or Snappy-compressed.
//!
//! ### Dispatch
//!
//! Sub-records are stable-sorted so that records setting up per-tick
//! context come before the records that use it, then queued for consumers
//! running on their own thread. A full queue blocks the decoder.
//!
//! ## Quick Start
//!
//! 1. Open a recording with [`process::parse::DemoParser`]
//! 2. Register consumers or subscribe to the item stream
//! 3. Decode frame by frame or to the end
//!
//! ```rust,no_run
//! use s2dem::process::{EXAMPLE_DATA, dispatch::Item, parse::{DemoParser, ParserConfig}};
//!
//! let mut parser = DemoParser::new(EXAMPLE_DATA, ParserConfig::default());
//! let items = parser.subscribe()?;
//!
//! // Decode everything up to the stop record
//! let termination = parser.parse_to_end()?;
//!
//! for item in items.try_iter() {
//!     if let Item::Record(record) = item {
//!         println!("{record:?}");
//!     }
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Processing stages for recordings.
///
/// 1. **Extraction** ([`process::extract`]): Reads outer record headers and
///    splits packets into sub-records.
///
/// 2. **Decoding** ([`process::decode`]): Turns payloads into typed records.
///
/// 3. **Dispatch** ([`process::dispatch`]): Bounded queue towards consumers.
///
/// 4. **Parsing** ([`process::parse`]): Drives the stages frame by frame.
pub mod process;

/// Data structures of the recording format.
///
/// - **Commands** ([`structs::command`]): Outer command ids and sub-record priorities
/// - **Header** ([`structs::header`]): Signature and preamble
/// - **Messages** ([`structs::messages`]): Protobuf envelopes
/// - **String Tables** ([`structs::string_table`]): Table state and entry decoding
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bit Cursor** ([`utils::bit_cursor`]): Bit-level reading
/// - **Varints** ([`utils::varint`]): Variable-length integers
/// - **Chunks** ([`utils::chunk`]): Bounded sub-parses
/// - **Buffer Management** ([`utils::buffer_pool`]): Pooled cursor buffers
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Diagnostics** ([`utils::diagnostics`]): Warnings and their sink
pub mod utils;
