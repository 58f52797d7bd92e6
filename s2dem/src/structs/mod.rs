//! Data structures of the recording format.

pub mod command;
pub mod header;
pub mod messages;
pub mod string_table;
