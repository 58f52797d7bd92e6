//! Outer command ids, sub-record tags and the reorder priorities.
//!
//! ## Outer Records
//!
//! Every outer record starts with a command id. Bit 6 of the id marks a
//! Snappy-compressed payload; the remaining bits select a [`DemoCommand`].
//!
//! ## Sub-Records
//!
//! `Packet`, `SignonPacket` and `FullPacket` payloads carry a run of
//! sub-records, each identified by a tag. Tags that set up per-tick context
//! are dispatched before tags that consume it, see [`PriorityTable`].

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use crate::utils::errors::FormatError;

/// Set on the outer command id when the payload is Snappy-compressed.
pub const COMPRESSED_FLAG: u32 = 64;

/// Raw tick value of records written before the first game tick.
pub const TICK_SENTINEL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DemoCommand {
    Stop = 0,
    FileHeader,
    FileInfo,
    SyncTick,
    SendTables,
    ClassInfo,
    StringTables,
    Packet,
    SignonPacket,
    ConsoleCmd,
    CustomData,
    CustomDataCallbacks,
    UserCmd,
    FullPacket,
    SaveGame,
    SpawnGroups,
    AnimationData,
    AnimationHeader,
    Unknown(u32) = 0xFF,
}

impl From<u32> for DemoCommand {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Stop,
            1 => Self::FileHeader,
            2 => Self::FileInfo,
            3 => Self::SyncTick,
            4 => Self::SendTables,
            5 => Self::ClassInfo,
            6 => Self::StringTables,
            7 => Self::Packet,
            8 => Self::SignonPacket,
            9 => Self::ConsoleCmd,
            10 => Self::CustomData,
            11 => Self::CustomDataCallbacks,
            12 => Self::UserCmd,
            13 => Self::FullPacket,
            14 => Self::SaveGame,
            15 => Self::SpawnGroups,
            16 => Self::AnimationData,
            17 => Self::AnimationHeader,
            _ => Self::Unknown(value),
        }
    }
}

impl From<DemoCommand> for u32 {
    fn from(value: DemoCommand) -> Self {
        match value {
            DemoCommand::Stop => 0,
            DemoCommand::FileHeader => 1,
            DemoCommand::FileInfo => 2,
            DemoCommand::SyncTick => 3,
            DemoCommand::SendTables => 4,
            DemoCommand::ClassInfo => 5,
            DemoCommand::StringTables => 6,
            DemoCommand::Packet => 7,
            DemoCommand::SignonPacket => 8,
            DemoCommand::ConsoleCmd => 9,
            DemoCommand::CustomData => 10,
            DemoCommand::CustomDataCallbacks => 11,
            DemoCommand::UserCmd => 12,
            DemoCommand::FullPacket => 13,
            DemoCommand::SaveGame => 14,
            DemoCommand::SpawnGroups => 15,
            DemoCommand::AnimationData => 16,
            DemoCommand::AnimationHeader => 17,
            DemoCommand::Unknown(v) => v,
        }
    }
}

impl DemoCommand {
    pub fn id(self) -> u32 {
        self.into()
    }

    /// Whether the payload is a packet envelope holding sub-records.
    pub fn has_sub_records(self) -> bool {
        matches!(self, Self::Packet | Self::SignonPacket | Self::FullPacket)
    }
}

impl Display for DemoCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DemoCommand::Stop => "Stop",
            DemoCommand::FileHeader => "FileHeader",
            DemoCommand::FileInfo => "FileInfo",
            DemoCommand::SyncTick => "SyncTick",
            DemoCommand::SendTables => "SendTables",
            DemoCommand::ClassInfo => "ClassInfo",
            DemoCommand::StringTables => "StringTables",
            DemoCommand::Packet => "Packet",
            DemoCommand::SignonPacket => "SignonPacket",
            DemoCommand::ConsoleCmd => "ConsoleCmd",
            DemoCommand::CustomData => "CustomData",
            DemoCommand::CustomDataCallbacks => "CustomDataCallbacks",
            DemoCommand::UserCmd => "UserCmd",
            DemoCommand::FullPacket => "FullPacket",
            DemoCommand::SaveGame => "SaveGame",
            DemoCommand::SpawnGroups => "SpawnGroups",
            DemoCommand::AnimationData => "AnimationData",
            DemoCommand::AnimationHeader => "AnimationHeader",
            DemoCommand::Unknown(v) => &format!("Unknown({v})"),
        };

        f.write_str(name)
    }
}

/// How the outer command id is encoded on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeaderEncoding {
    /// Base-128 varint, as written by the engine.
    #[default]
    VarUint32,
    /// The 6-bit tag-int layout of sub-record types.
    TagInt,
}

/// Sub-record tags the decoder itself acts on.
pub mod tags {
    pub const NET_TICK: u32 = 4;
    pub const NET_SPAWN_GROUP_LOAD: u32 = 8;
    pub const SVC_SERVER_INFO: u32 = 40;
    pub const SVC_CREATE_STRING_TABLE: u32 = 44;
    pub const SVC_UPDATE_STRING_TABLE: u32 = 45;
    pub const SVC_PACKET_ENTITIES: u32 = 55;
}

/// Dispatch priority of sub-record tags. Lower values go first.
///
/// Records are reordered with a stable sort, so records of equal priority
/// keep their wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable {
    default: i32,
    classes: HashMap<u32, i32>,
}

impl Default for PriorityTable {
    fn default() -> Self {
        let classes = HashMap::from([
            (tags::NET_TICK, -10),
            (tags::SVC_CREATE_STRING_TABLE, -10),
            (tags::SVC_UPDATE_STRING_TABLE, -10),
            (tags::NET_SPAWN_GROUP_LOAD, -10),
            (tags::SVC_PACKET_ENTITIES, 5),
        ]);

        Self { default: 0, classes }
    }
}

impl PriorityTable {
    /// Builds a table from explicit `(tag, priority)` pairs. Each tag may
    /// appear once.
    pub fn new(
        default: i32,
        entries: impl IntoIterator<Item = (u32, i32)>,
    ) -> Result<Self, FormatError> {
        let mut classes = HashMap::new();
        for (tag, priority) in entries {
            if classes.insert(tag, priority).is_some() {
                return Err(FormatError::DuplicatePriority(tag));
            }
        }

        Ok(Self { default, classes })
    }

    pub fn priority(&self, tag: u32) -> i32 {
        self.classes.get(&tag).copied().unwrap_or(self.default)
    }

    pub fn default_priority(&self) -> i32 {
        self.default
    }

    /// Explicit entries ordered by tag.
    pub fn entries(&self) -> Vec<(u32, i32)> {
        let mut entries: Vec<_> = self.classes.iter().map(|(&t, &p)| (t, p)).collect();
        entries.sort_unstable();
        entries
    }

    /// Stable-sorts items by the priority of the tag `tag_of` returns.
    pub fn sort<T>(&self, items: &mut [T], tag_of: impl Fn(&T) -> u32) {
        items.sort_by_key(|item| self.priority(tag_of(item)));
    }
}

#[test]
fn command_ids() {
    assert_eq!(DemoCommand::from(7), DemoCommand::Packet);
    assert_eq!(DemoCommand::from(17), DemoCommand::AnimationHeader);
    assert_eq!(DemoCommand::from(99), DemoCommand::Unknown(99));
    assert_eq!(DemoCommand::FullPacket.id(), 13);
    assert_eq!(DemoCommand::Unknown(42).id(), 42);
    assert!(DemoCommand::SignonPacket.has_sub_records());
    assert!(!DemoCommand::FileInfo.has_sub_records());
    assert_eq!(DemoCommand::Unknown(30).to_string(), "Unknown(30)");
}

#[test]
fn context_records_sort_first() {
    let table = PriorityTable::default();
    let mut order = vec![55, 23, tags::SVC_CREATE_STRING_TABLE, 7, tags::NET_TICK, 23];
    table.sort(&mut order, |&t| t);
    assert_eq!(order, [44, 4, 23, 7, 23, 55]);
}

#[test]
fn duplicate_priorities_are_rejected() {
    assert!(matches!(
        PriorityTable::new(0, [(4, -1), (4, 2)]),
        Err(FormatError::DuplicatePriority(4))
    ));

    let table = PriorityTable::new(3, [(9, -1)]).unwrap();
    assert_eq!(table.priority(9), -1);
    assert_eq!(table.priority(10), 3);
    assert_eq!(table.entries(), [(9, -1)]);
}
