use anyhow::{Context, Result, bail};
use log::{debug, trace};

use crate::process::decode::{Decoded, Record, Registry};
use crate::process::dispatch::{
    CancelToken, Consumer, DispatchQueue, Item, queue_capacity_for, subscriber,
};
use crate::process::extract::{Demuxer, PendingRecord, RecordHeader};
use crate::report_or_err;
use crate::structs::command::{DemoCommand, HeaderEncoding, PriorityTable, tags};
use crate::structs::header::Preamble;
use crate::structs::messages::{
    CreateStringTable, CreateStringTableLegacy, DemoFullPacket, DemoPacket, UpdateStringTable,
    decode_envelope,
};
use crate::structs::string_table::{
    StringTables, TableChange, TableCreate, TableEncoding, TableEntry,
};
use crate::utils::bit_cursor::{BitCursor, Source};
use crate::utils::buffer_pool::{CursorPool, SizeClass};
use crate::utils::diagnostics::{DiagnosticSink, LogSink, Warning};
use crate::utils::errors::FormatError;

/// Decoder settings.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Fixed dispatch queue capacity. `None` sizes the queue from
    /// `expected_records`.
    pub queue_capacity: Option<usize>,
    pub expected_records: Option<usize>,
    /// `Warn` turns every recoverable condition into an error.
    pub fail_level: log::Level,
    pub command_encoding: HeaderEncoding,
    pub table_encoding: TableEncoding,
    pub priorities: PriorityTable,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            expected_records: None,
            fail_level: log::Level::Error,
            command_encoding: HeaderEncoding::default(),
            table_encoding: TableEncoding::default(),
            priorities: PriorityTable::default(),
        }
    }
}

pub struct ParserState {
    pub fail_level: log::Level,
    pub sink: Box<dyn DiagnosticSink>,
}

impl Default for ParserState {
    fn default() -> Self {
        Self {
            fail_level: log::Level::Error,
            sink: Box::new(LogSink),
        }
    }
}

/// Outcome of decoding one outer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was decoded and more may follow.
    More,
    /// The stop record was reached, or the input ended between records.
    Finished,
    Cancelled,
}

/// Outcome of decoding a whole recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Finished,
    Cancelled,
}

/// Decodes a recording frame by frame and feeds the records to consumers.
///
/// Consumers run on a dispatcher thread behind a bounded queue and see, for
/// every outer record, an [`Item::Tick`], the decoded records in dispatch
/// order and an [`Item::FrameBoundary`]. String table changes are committed
/// to [`string_tables`](Self::string_tables) before they are queued.
pub struct DemoParser<S: Source> {
    cursor: BitCursor<S>,
    pool: CursorPool,
    demuxer: Demuxer,
    registry: Registry,
    tables: StringTables,
    state: ParserState,

    queue_capacity: usize,
    consumers: Vec<Consumer>,
    queue: Option<DispatchQueue>,
    cancel: CancelToken,

    preamble: Option<Preamble>,
    frames: u64,
    tick: u32,
    finished: bool,
}

impl<S: Source> DemoParser<S> {
    pub fn new(source: S, config: ParserConfig) -> Self {
        Self::with_pool(source, config, CursorPool::default())
    }

    /// Creates a parser whose cursors come from `pool`.
    pub fn with_pool(source: S, config: ParserConfig, pool: CursorPool) -> Self {
        let queue_capacity = config
            .queue_capacity
            .unwrap_or_else(|| queue_capacity_for(config.expected_records.unwrap_or_default()));

        Self {
            cursor: pool.acquire(SizeClass::Large, source),
            demuxer: Demuxer::new(config.command_encoding, config.priorities, pool.clone()),
            registry: Registry::with_defaults(),
            tables: StringTables::new(config.table_encoding, pool.clone()),
            state: ParserState {
                fail_level: config.fail_level,
                ..Default::default()
            },
            pool,

            queue_capacity,
            consumers: Vec::new(),
            queue: None,
            cancel: CancelToken::default(),

            preamble: None,
            frames: 0,
            tick: 0,
            finished: false,
        }
    }

    pub fn set_sink(&mut self, sink: impl DiagnosticSink + 'static) {
        self.state.sink = Box::new(sink);
    }

    /// Sets the failure level for recoverable conditions.
    ///
    /// - `log::Level::Error`: warn and skip (default)
    /// - `log::Level::Warn`: fail on the first warning (strict mode)
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.state.fail_level = level;
    }

    /// Adds a consumer. Consumers must be registered before the first frame.
    pub fn register_consumer<F>(&mut self, consumer: F) -> Result<()>
    where
        F: FnMut(&Item) -> Result<()> + Send + 'static,
    {
        if self.queue.is_some() {
            bail!("Consumers must be registered before the first frame is decoded");
        }
        self.consumers.push(Box::new(consumer));
        Ok(())
    }

    /// Adds a consumer forwarding every item into the returned channel.
    pub fn subscribe(&mut self) -> Result<crossbeam::channel::Receiver<Item>> {
        let (consumer, items) = subscriber();
        if self.queue.is_some() {
            bail!("Consumers must be registered before the first frame is decoded");
        }
        self.consumers.push(consumer);
        Ok(items)
    }

    pub fn register_table_interpreter<F>(&mut self, table: impl Into<String>, interpreter: F)
    where
        F: FnMut(u32, &TableEntry) -> Result<()> + Send + 'static,
    {
        self.tables.register_interpreter(table, interpreter);
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn string_tables(&self) -> &StringTables {
        &self.tables
    }

    pub fn preamble(&self) -> Option<&Preamble> {
        self.preamble.as_ref()
    }

    /// Outer records decoded so far, the stop record excluded.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this parser from another thread.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Decodes one outer record and waits until the consumers have handled
    /// it.
    pub fn parse_next_frame(&mut self) -> Result<FrameStatus> {
        let status = self.step()?;
        if status != FrameStatus::Cancelled && !self.sync()? {
            return Ok(self.cancelled());
        }
        Ok(status)
    }

    /// Decodes every remaining outer record.
    pub fn parse_to_end(&mut self) -> Result<Termination> {
        loop {
            match self.step()? {
                FrameStatus::More => {}
                FrameStatus::Finished => break,
                FrameStatus::Cancelled => return Ok(Termination::Cancelled),
            }
        }

        if !self.sync()? {
            self.cancelled();
            return Ok(Termination::Cancelled);
        }

        Ok(Termination::Finished)
    }

    /// Finishes dispatch and hands back the source.
    pub fn into_source(mut self) -> S {
        if let Some(mut queue) = self.queue.take() {
            queue.close();
        }
        let (source, buffer) = self.cursor.into_parts();
        self.pool.pool(SizeClass::Large).release(buffer);
        source
    }

    fn step(&mut self) -> Result<FrameStatus> {
        if self.finished {
            return Ok(FrameStatus::Finished);
        }
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled());
        }

        if self.preamble.is_none() {
            self.preamble = Some(Preamble::read(&mut self.cursor)?);
        }
        if self.queue.is_none() {
            let consumers = std::mem::take(&mut self.consumers);
            self.queue = Some(DispatchQueue::start(
                self.queue_capacity,
                consumers,
                self.cancel.clone(),
            )?);
        }

        if self.cursor.at_end()? {
            self.finished = true;
            report_or_err!(self.state, Warning::MissingStop);
            return Ok(FrameStatus::Finished);
        }

        let header = self.demuxer.read_header(&mut self.cursor)?;
        self.tick = header.tick;

        if !self.push(Item::Tick(header.tick))? {
            return Ok(self.cancelled());
        }

        self.cursor.begin_chunk(u64::from(header.size) << 3);

        if header.command == DemoCommand::Stop {
            self.cursor.end_chunk()?;
            self.finished = true;
            debug!("Stop at tick {} after {} frames", header.tick, self.frames);
            return Ok(FrameStatus::Finished);
        }

        if !self.dispatch_command(&header)? {
            return Ok(self.cancelled());
        }

        self.cursor.end_chunk()?;

        if !self.push(Item::FrameBoundary)? {
            return Ok(self.cancelled());
        }
        self.frames += 1;

        Ok(FrameStatus::More)
    }

    /// Returns `false` once cancelled.
    fn dispatch_command(&mut self, header: &RecordHeader) -> Result<bool> {
        let RecordHeader {
            command,
            compressed,
            tick,
            size,
        } = *header;

        if let DemoCommand::Unknown(command) = command {
            report_or_err!(
                self.state,
                Warning::UnknownCommand {
                    command,
                    tick,
                    size
                }
            );
            return Ok(true);
        }

        if !command.has_sub_records() && !self.registry.handles_command(command) {
            trace!("Skipping {command} at tick {tick} ({size} bytes)");
            return Ok(true);
        }

        let mut payload = self.cursor.read_bytes(size as usize)?;
        if compressed {
            match self.demuxer.decompress(&payload) {
                Ok(data) => payload = data,
                Err(err) => {
                    report_or_err!(
                        self.state,
                        Warning::DecompressionFailure {
                            command: command.id(),
                            tick,
                            message: err.to_string(),
                        }
                    );
                    return Ok(true);
                }
            }
        }

        if command.has_sub_records() {
            let data = match command {
                DemoCommand::FullPacket => {
                    decode_envelope::<DemoFullPacket>("full packet", &payload)?
                        .packet
                        .and_then(|packet| packet.data)
                }
                _ => decode_envelope::<DemoPacket>("packet", &payload)?.data,
            };
            return self.dispatch_packet(tick, &data.unwrap_or_default());
        }

        match self.registry.decode_command(command, tick, payload) {
            Ok(Decoded::Known(record)) => self.push(Item::Record(record)),
            Ok(Decoded::Unknown { .. }) => Ok(true),
            Err(err) => {
                report_or_err!(
                    self.state,
                    Warning::RecordDecodeFailure {
                        tag: command.id(),
                        message: format!("{err:#}"),
                    }
                );
                Ok(true)
            }
        }
    }

    fn dispatch_packet(&mut self, tick: u32, data: &[u8]) -> Result<bool> {
        let records = self
            .demuxer
            .extract(data)
            .with_context(|| format!("Malformed packet at tick {tick}"))?;

        for PendingRecord { tag, payload } in records {
            let record = match tag {
                tags::SVC_CREATE_STRING_TABLE => self.create_table(tick, &payload)?,
                tags::SVC_UPDATE_STRING_TABLE => self.update_table(tick, &payload)?,
                _ => self.decode_message(tag, tick, payload)?,
            };

            if let Some(record) = record {
                if !self.push(Item::Record(record))? {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    fn create_table(&mut self, tick: u32, payload: &[u8]) -> Result<Option<Record>> {
        let created = decode_create(self.tables.encoding(), payload)
            .map_err(anyhow::Error::from)
            .and_then(|create| Ok(self.tables.create(create)?));

        match created {
            Ok(change) => self.committed(tick, change),
            Err(err) => {
                report_or_err!(
                    self.state,
                    Warning::RecordDecodeFailure {
                        tag: tags::SVC_CREATE_STRING_TABLE,
                        message: format!("{err:#}"),
                    }
                );
                Ok(None)
            }
        }
    }

    fn update_table(&mut self, tick: u32, payload: &[u8]) -> Result<Option<Record>> {
        let updated = decode_envelope::<UpdateStringTable>("string table update", payload)
            .map_err(anyhow::Error::from)
            .and_then(|msg| {
                // Negative ids never match a table.
                let table_id = u32::try_from(msg.table_id.unwrap_or_default()).unwrap_or(u32::MAX);
                let count = msg.num_changed_entries.unwrap_or_default().max(0) as u32;
                let data = msg.string_data.unwrap_or_default();
                Ok((table_id, self.tables.update(table_id, count, &data)?))
            });

        match updated {
            Ok((_, Some(change))) => self.committed(tick, change),
            Ok((table_id, None)) => {
                report_or_err!(self.state, Warning::UnknownStringTable(table_id));
                Ok(None)
            }
            Err(err) => {
                report_or_err!(
                    self.state,
                    Warning::RecordDecodeFailure {
                        tag: tags::SVC_UPDATE_STRING_TABLE,
                        message: format!("{err:#}"),
                    }
                );
                Ok(None)
            }
        }
    }

    fn committed(&mut self, tick: u32, change: TableChange) -> Result<Option<Record>> {
        for warning in self.tables.interpret(&change) {
            report_or_err!(self.state, warning);
        }
        Ok(Some(Record::StringTable { tick, change }))
    }

    fn decode_message(&mut self, tag: u32, tick: u32, payload: Vec<u8>) -> Result<Option<Record>> {
        match self.registry.decode_message(tag, tick, payload) {
            Ok(Decoded::Known(record)) => Ok(Some(record)),
            Ok(Decoded::Unknown { tag, bytes }) => {
                trace!("Unknown sub-record {tag}: {:02X?}", &bytes[..bytes.len().min(16)]);
                report_or_err!(
                    self.state,
                    Warning::UnknownRecordType {
                        tag,
                        size: bytes.len()
                    }
                );
                Ok(None)
            }
            Err(err) => {
                report_or_err!(
                    self.state,
                    Warning::RecordDecodeFailure {
                        tag,
                        message: format!("{err:#}"),
                    }
                );
                Ok(None)
            }
        }
    }

    fn push(&self, item: Item) -> Result<bool> {
        let Some(queue) = &self.queue else {
            bail!(FormatError::QueueClosed);
        };
        Ok(queue.push(item)?)
    }

    fn sync(&self) -> Result<bool> {
        match &self.queue {
            Some(queue) => Ok(queue.sync()?),
            None => Ok(!self.cancel.is_cancelled()),
        }
    }

    fn cancelled(&self) -> FrameStatus {
        if let Some(queue) = &self.queue {
            queue.drain();
        }
        FrameStatus::Cancelled
    }
}

fn decode_create(encoding: TableEncoding, payload: &[u8]) -> Result<TableCreate, FormatError> {
    Ok(match encoding {
        TableEncoding::BitIndexed => {
            decode_envelope::<CreateStringTableLegacy>("string table create", payload)?.into()
        }
        TableEncoding::VarintIndexed => {
            decode_envelope::<CreateStringTable>("string table create", payload)?.into()
        }
    })
}

#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(test)]
use prost::Message;

#[cfg(test)]
use crate::process::EXAMPLE_DATA;
#[cfg(test)]
use crate::process::decode::RecordValue;
#[cfg(test)]
use crate::structs::command::COMPRESSED_FLAG;
#[cfg(test)]
use crate::structs::header::SIGNATURE;
#[cfg(test)]
use crate::structs::messages::{DemoFileInfo, NetTick};
#[cfg(test)]
use crate::utils::diagnostics::CollectingSink;
#[cfg(test)]
use crate::utils::errors::ErrorClass;
#[cfg(test)]
use crate::utils::fixture::{Fixture, outer_record, sub_records};

#[cfg(test)]
struct Recording(Vec<u8>);

#[cfg(test)]
impl Recording {
    fn new() -> Self {
        let mut data = SIGNATURE.to_vec();
        data.extend_from_slice(&[0; 8]);
        Self(data)
    }

    fn record(mut self, command: u32, tick: u32, payload: &[u8]) -> Self {
        self.0.extend(outer_record(command, tick, payload));
        self
    }

    fn packet(self, tick: u32, records: &[(u32, &[u8])]) -> Self {
        let packet = DemoPacket {
            data: Some(sub_records(records)),
        };
        self.record(DemoCommand::Packet.id(), tick, &packet.encode_to_vec())
    }

    fn stop(self, tick: u32) -> Self {
        self.record(DemoCommand::Stop.id(), tick, &[])
    }
}

#[cfg(test)]
fn net_tick(tick: u32) -> Vec<u8> {
    NetTick {
        tick: Some(tick),
        ..Default::default()
    }
    .encode_to_vec()
}

#[cfg(test)]
fn parser(data: &[u8]) -> (DemoParser<&[u8]>, CollectingSink) {
    let sink = CollectingSink::default();
    let mut parser = DemoParser::new(data, ParserConfig::default());
    parser.set_sink(sink.clone());
    (parser, sink)
}

#[test]
fn stop_record_ends_cleanly() -> anyhow::Result<()> {
    let (mut parser, sink) = parser(EXAMPLE_DATA);
    let items = parser.subscribe()?;

    assert_eq!(parser.parse_next_frame()?, FrameStatus::Finished);
    assert_eq!(parser.parse_next_frame()?, FrameStatus::Finished);
    assert_eq!(parser.frames(), 0);
    assert!(sink.is_empty());
    assert_eq!(parser.preamble(), Some(&Preamble::default()));

    let received: Vec<_> = items.try_iter().collect();
    assert!(matches!(received.as_slice(), [Item::Tick(0)]));
    Ok(())
}

#[test]
fn unknown_signature_is_invalid_format() {
    let mut data = b"HL2DEMO\0".to_vec();
    data.extend_from_slice(&EXAMPLE_DATA[8..]);

    let (mut parser, _) = parser(&data);
    let err = parser.parse_to_end().unwrap_err();
    assert_eq!(ErrorClass::of(&err), ErrorClass::InvalidFormat);
}

#[test]
fn table_creates_dispatch_before_entity_deltas() -> anyhow::Result<()> {
    let create = CreateStringTableLegacy {
        name: Some("instancebaseline".into()),
        max_entries: Some(64),
        ..Default::default()
    }
    .encode_to_vec();

    let data = Recording::new()
        .packet(
            10,
            &[
                (tags::SVC_PACKET_ENTITIES, b"delta"),
                (tags::SVC_CREATE_STRING_TABLE, &create),
            ],
        )
        .stop(11)
        .0;

    let (mut parser, sink) = parser(&data);
    parser
        .registry_mut()
        .register_message_with(tags::SVC_PACKET_ENTITIES, |bytes| {
            let value: RecordValue = Arc::new(bytes.to_vec());
            Ok(value)
        });
    let items = parser.subscribe()?;

    assert_eq!(parser.parse_to_end()?, Termination::Finished);
    assert!(sink.is_empty());
    assert_eq!(parser.string_tables().len(), 1);

    let received: Vec<_> = items.try_iter().collect();
    assert_eq!(received.len(), 5);
    assert!(matches!(received[0], Item::Tick(10)));
    let Item::Record(Record::StringTable { change, .. }) = &received[1] else {
        panic!("expected the table create first, got {:?}", received[1]);
    };
    assert_eq!(change.name, "instancebaseline");
    let Item::Record(delta) = &received[2] else {
        panic!("expected the entity delta second, got {:?}", received[2]);
    };
    assert_eq!(delta.downcast_ref::<Vec<u8>>().map(Vec::as_slice), Some(&b"delta"[..]));
    assert!(matches!(received[3], Item::FrameBoundary));
    assert!(matches!(received[4], Item::Tick(11)));
    Ok(())
}

#[test]
fn unknown_sub_records_are_skipped() -> anyhow::Result<()> {
    let data = Recording::new()
        .packet(
            3,
            &[
                (tags::NET_TICK, &net_tick(3)),
                (99, b"unregistered"),
                (tags::NET_TICK, &net_tick(4)),
            ],
        )
        .stop(4)
        .0;

    let (mut parser, sink) = parser(&data);
    let items = parser.subscribe()?;
    assert_eq!(parser.parse_to_end()?, Termination::Finished);

    let ticks: Vec<_> = items
        .try_iter()
        .filter_map(|item| match item {
            Item::Record(record) => record.downcast_ref::<NetTick>().and_then(|t| t.tick),
            _ => None,
        })
        .collect();
    assert_eq!(ticks, [3, 4]);
    assert_eq!(
        sink.warnings(),
        [Warning::UnknownRecordType { tag: 99, size: 12 }]
    );
    Ok(())
}

#[test]
fn strict_mode_fails_on_the_first_warning() -> anyhow::Result<()> {
    let data = Recording::new()
        .packet(0, &[(99, b"unregistered")])
        .stop(1)
        .0;

    let (mut parser, sink) = parser(&data);
    parser.set_fail_level(log::Level::Warn);

    let err = parser.parse_to_end().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Warning>(),
        Some(Warning::UnknownRecordType { tag: 99, .. })
    ));
    assert!(sink.is_empty());
    Ok(())
}

#[cfg(test)]
fn cancel_after(frames: usize, cancels: usize) -> anyhow::Result<(usize, FrameStatus, Termination)> {
    let mut recording = Recording::new();
    for tick in 0..6 {
        recording = recording.packet(tick, &[(tags::NET_TICK, &net_tick(tick))]);
    }
    let data = recording.stop(6).0;

    let boundaries = Arc::new(AtomicUsize::new(0));
    let counter = boundaries.clone();

    let (mut parser, _) = parser(&data);
    parser.register_consumer(move |item| {
        if let Item::FrameBoundary = item {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    })?;

    for _ in 0..frames {
        assert_eq!(parser.parse_next_frame()?, FrameStatus::More);
    }
    for _ in 0..cancels {
        parser.cancel();
    }

    let status = parser.parse_next_frame()?;
    let termination = parser.parse_to_end()?;
    drop(parser);

    Ok((boundaries.load(Ordering::SeqCst), status, termination))
}

#[test]
fn cancellation_is_idempotent() -> anyhow::Result<()> {
    let once = cancel_after(2, 1)?;
    assert_eq!(once, (2, FrameStatus::Cancelled, Termination::Cancelled));
    assert_eq!(cancel_after(2, 5)?, once);
    Ok(())
}

#[test]
fn cancel_handle_stops_parse_to_end() -> anyhow::Result<()> {
    let data = Recording::new()
        .packet(0, &[(tags::NET_TICK, &net_tick(0))])
        .stop(1)
        .0;

    let (mut parser, _) = parser(&data);
    let handle = parser.cancel_handle();
    handle.cancel();

    assert_eq!(parser.parse_to_end()?, Termination::Cancelled);
    assert_eq!(parser.frames(), 0);
    Ok(())
}

#[test]
fn missing_stop_is_a_warning() -> anyhow::Result<()> {
    let data = Recording::new()
        .packet(0, &[(tags::NET_TICK, &net_tick(0))])
        .0;

    let (mut parser, sink) = parser(&data);
    assert_eq!(parser.parse_next_frame()?, FrameStatus::More);
    assert_eq!(parser.parse_next_frame()?, FrameStatus::Finished);
    assert_eq!(sink.warnings(), [Warning::MissingStop]);
    Ok(())
}

#[test]
fn truncated_recording_is_classified() {
    let mut data = Recording::new()
        .packet(0, &[(tags::NET_TICK, &net_tick(0))])
        .stop(1)
        .0;
    data.truncate(data.len() - 6);

    let (mut parser, _) = parser(&data);
    let err = parser.parse_to_end().unwrap_err();
    assert_eq!(ErrorClass::of(&err), ErrorClass::Truncated);
}

#[test]
fn compressed_records() -> anyhow::Result<()> {
    let packet = DemoPacket {
        data: Some(sub_records(&[(tags::NET_TICK, &net_tick(77))])),
    }
    .encode_to_vec();
    let compressed = snap::raw::Encoder::new().compress_vec(&packet)?;
    let info = DemoFileInfo {
        playback_time: Some(12.5),
        playback_ticks: Some(800),
        playback_frames: Some(400),
    }
    .encode_to_vec();

    let data = Recording::new()
        .record(COMPRESSED_FLAG | DemoCommand::Packet.id(), 1, &[0xFF, 0xFF, 0xFF])
        .record(COMPRESSED_FLAG | DemoCommand::Packet.id(), 2, &compressed)
        .record(DemoCommand::FileInfo.id(), 3, &info)
        .stop(3)
        .0;

    let (mut parser, sink) = parser(&data);
    let items = parser.subscribe()?;
    assert_eq!(parser.parse_to_end()?, Termination::Finished);
    assert_eq!(parser.frames(), 3);

    assert!(matches!(
        sink.warnings().as_slice(),
        [Warning::DecompressionFailure { command: 7, tick: 1, .. }]
    ));

    let records: Vec<_> = items
        .try_iter()
        .filter_map(|item| match item {
            Item::Record(record) => Some(record),
            _ => None,
        })
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].downcast_ref::<NetTick>().and_then(|t| t.tick), Some(77));
    assert_eq!(
        records[1].downcast_ref::<DemoFileInfo>().and_then(|i| i.playback_ticks),
        Some(800)
    );
    Ok(())
}

#[test]
fn unknown_and_unhandled_commands_are_skipped() -> anyhow::Result<()> {
    let data = Recording::new()
        .record(40, 5, &[1, 2, 3, 4])
        .record(DemoCommand::SendTables.id(), 5, &[0xAB; 300])
        .stop(6)
        .0;

    let (mut parser, sink) = parser(&data);
    let items = parser.subscribe()?;
    assert_eq!(parser.parse_to_end()?, Termination::Finished);
    assert_eq!(parser.frames(), 2);
    assert_eq!(
        sink.warnings(),
        [Warning::UnknownCommand {
            command: 40,
            tick: 5,
            size: 4
        }]
    );
    assert!(items.try_iter().all(|item| !matches!(item, Item::Record(_))));
    Ok(())
}

#[test]
fn table_records_update_the_tables() -> anyhow::Result<()> {
    let mut f = Fixture::new();
    f.bit(false); // dictionary flag
    f.bit(true).bit(true).bit(false).cstring("alpha");
    f.bit(true).bits(14, 2).bytes(&[1, 2]);
    let initial = f.finish();

    let mut f = Fixture::new();
    f.bit(false);
    f.bit(false).bits(2, 0).bit(false).bit(true).bits(14, 1).bytes(&[9]);
    let changed = f.finish();

    let create = CreateStringTableLegacy {
        name: Some("userinfo".into()),
        max_entries: Some(4),
        num_entries: Some(1),
        string_data: Some(initial),
        ..Default::default()
    }
    .encode_to_vec();
    let update = UpdateStringTable {
        table_id: Some(0),
        num_changed_entries: Some(1),
        string_data: Some(changed),
    }
    .encode_to_vec();
    let orphan = UpdateStringTable {
        table_id: Some(3),
        num_changed_entries: Some(1),
        string_data: Some(vec![0]),
    }
    .encode_to_vec();

    let data = Recording::new()
        .packet(1, &[(tags::SVC_CREATE_STRING_TABLE, &create)])
        .packet(2, &[(tags::SVC_UPDATE_STRING_TABLE, &update), (tags::SVC_UPDATE_STRING_TABLE, &orphan)])
        .stop(3)
        .0;

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();

    let (mut parser, sink) = parser(&data);
    parser.register_table_interpreter("userinfo", move |index, entry| {
        assert_eq!((index, entry.key.as_str()), (0, "alpha"));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert_eq!(parser.parse_to_end()?, Termination::Finished);

    let table = parser
        .string_tables()
        .by_name("userinfo")
        .ok_or_else(|| anyhow::anyhow!("table missing"))?;
    let entry = table.get(0).ok_or_else(|| anyhow::anyhow!("entry missing"))?;
    assert_eq!(entry.key, "alpha");
    assert_eq!(entry.payload.as_deref(), Some(&[9][..]));
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(sink.warnings(), [Warning::UnknownStringTable(3)]);
    Ok(())
}

#[test]
fn seeking_into_a_truncated_record_is_truncated() {
    let mut recording = Recording::new();
    for tick in 0..150 {
        recording = recording.record(DemoCommand::SendTables.id(), tick, &[0x5A; 1000]);
    }
    let mut data = recording
        .record(DemoCommand::SendTables.id(), 150, &vec![0; 1_000_000])
        .0;
    data.truncate(data.len() - 700_000);

    let sink = CollectingSink::default();
    let mut parser = DemoParser::new(std::io::Cursor::new(data), ParserConfig::default());
    parser.set_sink(sink.clone());

    let err = parser.parse_to_end().unwrap_err();
    assert_eq!(ErrorClass::of(&err), ErrorClass::Truncated);
    assert!(!sink.warnings().contains(&Warning::MissingStop));
}

#[test]
fn huge_table_entry_counts_are_record_failures() -> anyhow::Result<()> {
    let create = CreateStringTableLegacy {
        name: Some("modelprecache".into()),
        max_entries: Some(64),
        num_entries: Some(i32::MAX),
        string_data: Some(vec![0x00, 0x00]),
        ..Default::default()
    }
    .encode_to_vec();

    let data = Recording::new()
        .packet(1, &[(tags::SVC_CREATE_STRING_TABLE, &create)])
        .stop(2)
        .0;

    let (mut parser, sink) = parser(&data);
    assert_eq!(parser.parse_to_end()?, Termination::Finished);
    assert!(matches!(
        sink.warnings().as_slice(),
        [Warning::RecordDecodeFailure { tag, .. }] if *tag == tags::SVC_CREATE_STRING_TABLE
    ));
    assert!(parser.string_tables().get(0).is_some_and(|t| t.is_empty()));
    Ok(())
}
