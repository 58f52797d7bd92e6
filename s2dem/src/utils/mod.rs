//! Utility functions and supporting infrastructure.
//!
//! Provides the bit cursor with its varint and chunk extensions, pooled
//! cursor buffers, error types and the diagnostic sink.

pub mod bit_cursor;
pub mod buffer_pool;
pub mod chunk;
pub mod diagnostics;
pub mod errors;
pub mod varint;

#[cfg(test)]
pub(crate) mod fixture;
