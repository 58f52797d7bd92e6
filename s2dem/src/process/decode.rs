use std::any::Any;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use anyhow::Result;
use prost::Message;

use crate::structs::command::{DemoCommand, tags};
use crate::structs::messages::{DemoFileHeader, DemoFileInfo, NetTick};
use crate::structs::string_table::TableChange;

/// A decoded record value. Consumers downcast it to the registered type.
pub type RecordValue = Arc<dyn Any + Send + Sync>;

type DecodeFn = Box<dyn Fn(&[u8]) -> Result<RecordValue> + Send + Sync>;

/// A typed record produced by the decoder.
#[derive(Clone)]
pub enum Record {
    /// An outer record decoded as a whole.
    Command {
        command: DemoCommand,
        tick: u32,
        value: RecordValue,
    },
    /// A sub-record of a packet.
    Message {
        tag: u32,
        tick: u32,
        value: RecordValue,
    },
    /// The committed effect of a string table create or update.
    StringTable { tick: u32, change: TableChange },
}

impl Record {
    pub fn tick(&self) -> u32 {
        match self {
            Record::Command { tick, .. }
            | Record::Message { tick, .. }
            | Record::StringTable { tick, .. } => *tick,
        }
    }

    /// The decoded value as `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Record::Command { value, .. } | Record::Message { value, .. } => {
                value.downcast_ref::<T>()
            }
            Record::StringTable { .. } => None,
        }
    }

    pub fn table_change(&self) -> Option<&TableChange> {
        match self {
            Record::StringTable { change, .. } => Some(change),
            _ => None,
        }
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Record::Command { command, tick, .. } => f
                .debug_struct("Command")
                .field("command", command)
                .field("tick", tick)
                .finish_non_exhaustive(),
            Record::Message { tag, tick, .. } => f
                .debug_struct("Message")
                .field("tag", tag)
                .field("tick", tick)
                .finish_non_exhaustive(),
            Record::StringTable { tick, change } => f
                .debug_struct("StringTable")
                .field("tick", tick)
                .field("change", change)
                .finish(),
        }
    }
}

/// Outcome of looking up a decoder for a payload.
#[derive(Debug)]
pub enum Decoded {
    Known(Record),
    /// No decoder is registered; the raw bytes are kept for diagnostics.
    Unknown { tag: u32, bytes: Vec<u8> },
}

/// Maps command ids and sub-record tags to payload decoders.
#[derive(Default)]
pub struct Registry {
    commands: HashMap<u32, DecodeFn>,
    messages: HashMap<u32, DecodeFn>,
}

impl Registry {
    /// A registry that knows the file header, the file info and the per-tick
    /// marker.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register_command::<DemoFileHeader>(DemoCommand::FileHeader);
        registry.register_command::<DemoFileInfo>(DemoCommand::FileInfo);
        registry.register_message::<NetTick>(tags::NET_TICK);
        registry
    }

    /// Decodes payloads of `command` as the protobuf message `M`.
    pub fn register_command<M>(&mut self, command: DemoCommand)
    where
        M: Message + Default + Send + Sync + 'static,
    {
        self.register_command_with(command, decode_protobuf::<M>);
    }

    pub fn register_command_with<F>(&mut self, command: DemoCommand, decode: F)
    where
        F: Fn(&[u8]) -> Result<RecordValue> + Send + Sync + 'static,
    {
        self.commands.insert(command.id(), Box::new(decode));
    }

    /// Decodes sub-records with `tag` as the protobuf message `M`.
    pub fn register_message<M>(&mut self, tag: u32)
    where
        M: Message + Default + Send + Sync + 'static,
    {
        self.register_message_with(tag, decode_protobuf::<M>);
    }

    pub fn register_message_with<F>(&mut self, tag: u32, decode: F)
    where
        F: Fn(&[u8]) -> Result<RecordValue> + Send + Sync + 'static,
    {
        self.messages.insert(tag, Box::new(decode));
    }

    pub fn handles_command(&self, command: DemoCommand) -> bool {
        self.commands.contains_key(&command.id())
    }

    pub fn handles_message(&self, tag: u32) -> bool {
        self.messages.contains_key(&tag)
    }

    pub fn decode_command(&self, command: DemoCommand, tick: u32, bytes: Vec<u8>) -> Result<Decoded> {
        let Some(decode) = self.commands.get(&command.id()) else {
            return Ok(Decoded::Unknown {
                tag: command.id(),
                bytes,
            });
        };

        Ok(Decoded::Known(Record::Command {
            command,
            tick,
            value: decode(&bytes)?,
        }))
    }

    pub fn decode_message(&self, tag: u32, tick: u32, bytes: Vec<u8>) -> Result<Decoded> {
        let Some(decode) = self.messages.get(&tag) else {
            return Ok(Decoded::Unknown { tag, bytes });
        };

        Ok(Decoded::Known(Record::Message {
            tag,
            tick,
            value: decode(&bytes)?,
        }))
    }
}

fn decode_protobuf<M>(bytes: &[u8]) -> Result<RecordValue>
where
    M: Message + Default + Send + Sync + 'static,
{
    let value: RecordValue = Arc::new(M::decode(bytes)?);
    Ok(value)
}

#[test]
fn decodes_registered_messages() -> anyhow::Result<()> {
    let registry = Registry::with_defaults();
    assert!(registry.handles_message(tags::NET_TICK));
    assert!(registry.handles_command(DemoCommand::FileInfo));
    assert!(!registry.handles_command(DemoCommand::SendTables));

    let tick = NetTick {
        tick: Some(1234),
        ..Default::default()
    };
    let Decoded::Known(record) = registry.decode_message(tags::NET_TICK, 9, tick.encode_to_vec())? else {
        panic!("tick marker should be known");
    };
    assert_eq!(record.tick(), 9);
    assert_eq!(record.downcast_ref::<NetTick>().and_then(|t| t.tick), Some(1234));
    assert!(record.downcast_ref::<DemoFileInfo>().is_none());
    Ok(())
}

#[test]
fn unknown_and_broken_payloads() -> anyhow::Result<()> {
    let mut registry = Registry::default();
    registry.register_message_with(30, |bytes| {
        anyhow::ensure!(bytes.len() == 2, "expected two bytes");
        let value: RecordValue = Arc::new(u16::from_le_bytes([bytes[0], bytes[1]]));
        Ok(value)
    });

    assert!(matches!(
        registry.decode_message(31, 0, vec![1, 2, 3])?,
        Decoded::Unknown { tag: 31, ref bytes } if bytes.len() == 3
    ));
    assert!(registry.decode_message(30, 0, vec![1]).is_err());

    let Decoded::Known(record) = registry.decode_message(30, 0, vec![0x34, 0x12])? else {
        panic!("tag 30 is registered");
    };
    assert_eq!(record.downcast_ref::<u16>(), Some(&0x1234));

    assert!(
        Registry::with_defaults()
            .decode_command(DemoCommand::FileHeader, 0, vec![0x10, 0xFF])
            .is_err()
    );
    Ok(())
}
