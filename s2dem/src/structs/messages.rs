//! Protobuf envelopes of the records the decoder reads itself.
//!
//! Only the fields the decoder needs are declared; unknown fields are
//! skipped by the protobuf decoder.

use prost::Message;

use crate::utils::errors::FormatError;

/// Decodes `bytes` as `M`, naming the envelope in the error.
pub fn decode_envelope<M: Message + Default>(what: &'static str, bytes: &[u8]) -> Result<M, FormatError> {
    M::decode(bytes).map_err(|source| FormatError::Envelope { what, source })
}

#[derive(Clone, PartialEq, Message)]
pub struct DemoPacket {
    #[prost(bytes = "vec", optional, tag = "3")]
    pub data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DemoFullPacket {
    #[prost(message, optional, tag = "2")]
    pub packet: Option<DemoPacket>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DemoFileHeader {
    #[prost(string, optional, tag = "1")]
    pub demo_file_stamp: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub network_protocol: Option<i32>,
    #[prost(string, optional, tag = "3")]
    pub server_name: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub client_name: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub map_name: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub game_directory: Option<String>,
    #[prost(int32, optional, tag = "13")]
    pub build_num: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DemoFileInfo {
    #[prost(float, optional, tag = "1")]
    pub playback_time: Option<f32>,
    #[prost(int32, optional, tag = "2")]
    pub playback_ticks: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub playback_frames: Option<i32>,
}

/// Per-tick marker sub-record.
#[derive(Clone, PartialEq, Message)]
pub struct NetTick {
    #[prost(uint32, optional, tag = "1")]
    pub tick: Option<u32>,
    #[prost(uint32, optional, tag = "4")]
    pub host_computation_time: Option<u32>,
}

/// Table creation in the layout that carries `max_entries`.
#[derive(Clone, PartialEq, Message)]
pub struct CreateStringTableLegacy {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub max_entries: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub num_entries: Option<i32>,
    #[prost(bool, optional, tag = "4")]
    pub user_data_fixed_size: Option<bool>,
    #[prost(int32, optional, tag = "5")]
    pub user_data_size: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub user_data_size_bits: Option<i32>,
    #[prost(int32, optional, tag = "7")]
    pub flags: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub string_data: Option<Vec<u8>>,
}

/// Table creation in the current layout.
#[derive(Clone, PartialEq, Message)]
pub struct CreateStringTable {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub num_entries: Option<i32>,
    #[prost(bool, optional, tag = "3")]
    pub user_data_fixed_size: Option<bool>,
    #[prost(int32, optional, tag = "4")]
    pub user_data_size: Option<i32>,
    #[prost(int32, optional, tag = "5")]
    pub user_data_size_bits: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub flags: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub string_data: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "8")]
    pub uncompressed_size: Option<i32>,
    #[prost(bool, optional, tag = "9")]
    pub data_compressed: Option<bool>,
    #[prost(bool, optional, tag = "10")]
    pub using_varint_bitcounts: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateStringTable {
    #[prost(int32, optional, tag = "1")]
    pub table_id: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub num_changed_entries: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub string_data: Option<Vec<u8>>,
}

#[test]
fn envelope_errors_name_the_record() {
    let err = decode_envelope::<DemoPacket>("packet", &[0x1A, 0x05, 0x01]).unwrap_err();
    assert!(matches!(err, FormatError::Envelope { what: "packet", .. }));
}

#[test]
fn full_packet_wraps_packet() -> anyhow::Result<()> {
    let inner = DemoPacket {
        data: Some(vec![1, 2, 3]),
    };
    let full = DemoFullPacket {
        packet: Some(inner.clone()),
    };

    let decoded: DemoFullPacket = decode_envelope("full packet", &full.encode_to_vec())?;
    assert_eq!(decoded.packet, Some(inner));
    Ok(())
}
