//! String tables and their incremental entry codec.
//!
//! ## Entry Encoding
//!
//! A table record holds a run of entries. Each entry names its index either
//! as "previous + 1" (one set bit) or explicitly, then optionally a key and a
//! payload. Keys may copy a prefix of one of the last [`HISTORY_SIZE`] keys.
//!
//! Two generations of the encoding exist, see [`TableEncoding`].
//!
//! ## Commit Rule
//!
//! A record is decoded in full against a scratch copy of the key history
//! before anything is written to the table. A record that fails to decode
//! leaves the table exactly as it was.

use std::collections::{BTreeMap, HashMap, VecDeque};

use log::{debug, trace};

use crate::structs::messages::{CreateStringTable, CreateStringTableLegacy};
use crate::utils::bit_cursor::{BitCursor, MAX_STRING_LEN, Source};
use crate::utils::buffer_pool::{CursorPool, SizeClass};
use crate::utils::diagnostics::Warning;
use crate::utils::errors::StringTableError;

/// Capacity of the key history ring.
pub const HISTORY_SIZE: usize = 32;

/// Bit width of the explicit payload length in bit-indexed tables.
const PAYLOAD_LENGTH_BITS: u32 = 14;

/// Bit width of the payload byte count in varint-indexed tables without
/// varint bit counts.
const VALUE_LENGTH_BITS: u32 = 17;

/// Generation of the entry encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableEncoding {
    /// Explicit indices of `ceil(log2(max_entries))` bits, a 14-bit payload
    /// length and a key history that persists across the table's records.
    #[default]
    BitIndexed,
    /// Explicit indices as `varuint32 + 1`, variable payload bit counts with
    /// optional per-value Snappy, and a key history local to each record.
    VarintIndexed,
}

/// Static layout parameters of a table, fixed at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableShape {
    pub max_entries: u32,
    pub fixed_payload: bool,
    pub payload_size: u32,
    pub payload_bits: u32,
    pub flags: i32,
    pub varint_bit_counts: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableEntry {
    pub key: String,
    pub payload: Option<Vec<u8>>,
}

/// One decoded entry of a table record. `None` fields were absent on the
/// wire and leave the stored value untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryUpdate {
    pub index: u32,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
}

/// A fully decoded record, not yet applied to its table.
#[derive(Debug, Clone)]
pub struct DecodedEntries {
    pub updates: Vec<EntryUpdate>,
    history: VecDeque<Vec<u8>>,
}

/// The committed effect of one create or update record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableChange {
    pub table_id: u32,
    pub name: String,
    pub created: bool,
    pub updates: Vec<EntryUpdate>,
}

/// Table creation normalized from either wire layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableCreate {
    pub name: String,
    pub shape: TableShape,
    pub num_entries: u32,
    pub data: Vec<u8>,
    pub data_compressed: bool,
}

fn non_negative(v: Option<i32>) -> u32 {
    v.unwrap_or_default().max(0) as u32
}

impl From<CreateStringTableLegacy> for TableCreate {
    fn from(msg: CreateStringTableLegacy) -> Self {
        Self {
            name: msg.name.unwrap_or_default(),
            shape: TableShape {
                max_entries: non_negative(msg.max_entries),
                fixed_payload: msg.user_data_fixed_size.unwrap_or_default(),
                payload_size: non_negative(msg.user_data_size),
                payload_bits: non_negative(msg.user_data_size_bits),
                flags: msg.flags.unwrap_or_default(),
                varint_bit_counts: false,
            },
            num_entries: non_negative(msg.num_entries),
            data: msg.string_data.unwrap_or_default(),
            data_compressed: false,
        }
    }
}

impl From<CreateStringTable> for TableCreate {
    fn from(msg: CreateStringTable) -> Self {
        Self {
            name: msg.name.unwrap_or_default(),
            shape: TableShape {
                max_entries: 0,
                fixed_payload: msg.user_data_fixed_size.unwrap_or_default(),
                payload_size: non_negative(msg.user_data_size),
                payload_bits: non_negative(msg.user_data_size_bits),
                flags: msg.flags.unwrap_or_default(),
                varint_bit_counts: msg.using_varint_bitcounts.unwrap_or_default(),
            },
            num_entries: non_negative(msg.num_entries),
            data: msg.string_data.unwrap_or_default(),
            data_compressed: msg.data_compressed.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StringTable {
    id: u32,
    name: String,
    shape: TableShape,
    encoding: TableEncoding,
    entries: BTreeMap<u32, TableEntry>,
    history: VecDeque<Vec<u8>>,
}

impl StringTable {
    pub fn new(id: u32, name: impl Into<String>, shape: TableShape, encoding: TableEncoding) -> Self {
        Self {
            id,
            name: name.into(),
            shape,
            encoding,
            entries: BTreeMap::new(),
            history: VecDeque::with_capacity(HISTORY_SIZE + 1),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &TableShape {
        &self.shape
    }

    pub fn encoding(&self) -> TableEncoding {
        self.encoding
    }

    pub fn get(&self, index: u32) -> Option<&TableEntry> {
        self.entries.get(&index)
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, &TableEntry)> {
        self.entries.iter().map(|(&i, e)| (i, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in the history ring, oldest first.
    pub fn history(&self) -> impl Iterator<Item = String> + '_ {
        self.history
            .iter()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }

    /// Width of an explicit entry index in bit-indexed tables.
    pub fn index_bits(&self) -> u32 {
        match self.shape.max_entries {
            0 | 1 => 0,
            max => u32::BITS - (max - 1).leading_zeros(),
        }
    }

    /// Decodes `count` entries without touching the table.
    pub fn decode_entries<S: Source>(
        &self,
        cursor: &mut BitCursor<S>,
        count: u32,
    ) -> Result<DecodedEntries, StringTableError> {
        match self.encoding {
            TableEncoding::BitIndexed => self.decode_bit_indexed(cursor, count),
            TableEncoding::VarintIndexed => self.decode_varint_indexed(cursor, count),
        }
    }

    /// Applies a decoded record and returns its updates.
    pub fn commit(&mut self, decoded: DecodedEntries) -> Vec<EntryUpdate> {
        for update in &decoded.updates {
            let entry = self.entries.entry(update.index).or_default();
            if let Some(key) = &update.key {
                entry.key.clone_from(key);
            }
            if let Some(payload) = &update.payload {
                entry.payload = Some(payload.clone());
            }
        }

        if self.encoding == TableEncoding::BitIndexed {
            self.history = decoded.history;
        }

        decoded.updates
    }

    /// Decodes and commits one record's entry blob.
    pub fn apply_blob(
        &mut self,
        pool: &CursorPool,
        data: &[u8],
        count: u32,
    ) -> Result<Vec<EntryUpdate>, StringTableError> {
        if data.is_empty() || count == 0 {
            return Ok(Vec::new());
        }

        let mut cursor = pool.acquire(SizeClass::Small, data);
        let decoded = self.decode_blob(&mut cursor, count);
        pool.release(cursor);

        let updates = self.commit(decoded?);
        debug!(
            "Table {:?}: {} entries changed, {} stored",
            self.name,
            updates.len(),
            self.entries.len()
        );

        Ok(updates)
    }

    fn decode_blob<S: Source>(
        &self,
        cursor: &mut BitCursor<S>,
        count: u32,
    ) -> Result<DecodedEntries, StringTableError> {
        // Bit-indexed blobs open with a flag for a dictionary encoding that
        // recordings never use.
        if self.encoding == TableEncoding::BitIndexed && cursor.read_bit()? {
            return Err(StringTableError::DictionaryEncoded {
                table: self.name.clone(),
            });
        }

        self.decode_entries(cursor, count)
    }

    fn decode_bit_indexed<S: Source>(
        &self,
        cursor: &mut BitCursor<S>,
        count: u32,
    ) -> Result<DecodedEntries, StringTableError> {
        let index_bits = self.index_bits();
        let mut history = self.history.clone();
        let mut updates = Vec::new();
        let mut index = -1i64;

        for _ in 0..count {
            index = if cursor.read_bit()? {
                index + 1
            } else {
                cursor.read_bits(index_bits)? as i64
            };

            if index < 0 || index >= self.shape.max_entries as i64 {
                return Err(StringTableError::IndexOutOfRange {
                    table: self.name.clone(),
                    index,
                    max: self.shape.max_entries,
                });
            }

            let key = if cursor.read_bit()? {
                let mut key = Vec::new();
                if cursor.read_bit()? {
                    let slot = cursor.read_bits(5)? as usize;
                    let prefix = cursor.read_bits(5)? as usize;
                    let base = history.get(slot).ok_or_else(|| {
                        StringTableError::HistoryIndexOutOfRange {
                            table: self.name.clone(),
                            index: slot,
                            len: history.len(),
                        }
                    })?;
                    key.extend_from_slice(&base[..prefix.min(base.len())]);
                }
                key.extend(cursor.read_string_bytes(MAX_STRING_LEN, false)?);
                Some(key)
            } else {
                None
            };

            push_history(&mut history, key.clone().unwrap_or_default());

            let payload = if cursor.read_bit()? {
                if self.shape.fixed_payload {
                    if self.shape.payload_bits > 8 {
                        return Err(StringTableError::FixedPayloadTooWide {
                            table: self.name.clone(),
                            bits: self.shape.payload_bits,
                        });
                    }
                    Some(vec![cursor.read_bits(self.shape.payload_bits)? as u8])
                } else {
                    let len = cursor.read_bits(PAYLOAD_LENGTH_BITS)? as usize;
                    Some(cursor.read_bytes(len)?)
                }
            } else {
                None
            };

            trace!("{}[{index}] key={key:?} payload={:?}", self.name, payload.as_ref().map(Vec::len));

            updates.push(EntryUpdate {
                index: index as u32,
                key: key.map(|k| String::from_utf8_lossy(&k).into_owned()),
                payload,
            });
        }

        Ok(DecodedEntries { updates, history })
    }

    fn decode_varint_indexed<S: Source>(
        &self,
        cursor: &mut BitCursor<S>,
        count: u32,
    ) -> Result<DecodedEntries, StringTableError> {
        let mut history: VecDeque<Vec<u8>> = VecDeque::with_capacity(HISTORY_SIZE + 1);
        let mut updates = Vec::new();
        let mut index = -1i64;

        for _ in 0..count {
            index = if cursor.read_bit()? {
                index + 1
            } else {
                cursor.read_varuint32()? as i64 + 1
            };

            // Entries without a key carry nothing else.
            if !cursor.read_bit()? {
                continue;
            }

            let mut key = Vec::new();
            if cursor.read_bit()? {
                let slot = cursor.read_bits(5)? as usize;
                let prefix = cursor.read_bits(5)? as usize;
                if let Some(base) = history.get(slot) {
                    key.extend_from_slice(&base[..prefix.min(base.len())]);
                }
            }
            key.extend(cursor.read_string_bytes(MAX_STRING_LEN, false)?);
            push_history(&mut history, key.clone());

            let payload = if cursor.read_bit()? {
                let mut compressed = false;
                let bits = if self.shape.fixed_payload {
                    self.shape.payload_size as u64
                } else {
                    if self.shape.flags & 1 != 0 {
                        compressed = cursor.read_bit()?;
                    }
                    if self.shape.varint_bit_counts {
                        cursor.read_ubit_int()? as u64 * 8
                    } else {
                        cursor.read_bits(VALUE_LENGTH_BITS)? as u64 * 8
                    }
                };

                let value = cursor.read_bits_to_bytes(bits)?;
                if compressed {
                    Some(decompress(&self.name, &value)?)
                } else {
                    Some(value)
                }
            } else {
                None
            };

            updates.push(EntryUpdate {
                index: index as u32,
                key: Some(String::from_utf8_lossy(&key).into_owned()),
                payload,
            });
        }

        Ok(DecodedEntries { updates, history })
    }
}

fn push_history(history: &mut VecDeque<Vec<u8>>, key: Vec<u8>) {
    history.push_back(key);
    if history.len() > HISTORY_SIZE {
        history.pop_front();
    }
}

fn decompress(table: &str, data: &[u8]) -> Result<Vec<u8>, StringTableError> {
    snap::raw::Decoder::new()
        .decompress_vec(data)
        .map_err(|source| StringTableError::Decompression {
            table: table.to_owned(),
            source,
        })
}

/// Called with the index and committed state of every entry a record touched.
pub type PayloadInterpreter = Box<dyn FnMut(u32, &TableEntry) -> anyhow::Result<()> + Send>;

/// Every string table of a recording, by id in creation order.
pub struct StringTables {
    encoding: TableEncoding,
    tables: Vec<StringTable>,
    interpreters: HashMap<String, Vec<PayloadInterpreter>>,
    pool: CursorPool,
}

impl Default for StringTables {
    fn default() -> Self {
        Self::new(TableEncoding::default(), CursorPool::default())
    }
}

impl StringTables {
    pub fn new(encoding: TableEncoding, pool: CursorPool) -> Self {
        Self {
            encoding,
            tables: Vec::new(),
            interpreters: HashMap::new(),
            pool,
        }
    }

    pub fn encoding(&self) -> TableEncoding {
        self.encoding
    }

    /// Registers a payload interpreter for the table called `table`.
    pub fn register_interpreter<F>(&mut self, table: impl Into<String>, interpreter: F)
    where
        F: FnMut(u32, &TableEntry) -> anyhow::Result<()> + Send + 'static,
    {
        self.interpreters
            .entry(table.into())
            .or_default()
            .push(Box::new(interpreter));
    }

    /// Creates a table and decodes its initial entries.
    ///
    /// The table is registered even when its entry data fails to decode, so
    /// the ids of later tables stay aligned with the recording.
    pub fn create(&mut self, create: TableCreate) -> Result<TableChange, StringTableError> {
        let id = self.tables.len() as u32;
        let mut table = StringTable::new(id, &create.name, create.shape, self.encoding);

        debug!("Creating string table {id} {:?}", create.name);

        let updates = if create.data_compressed {
            decompress(&create.name, &create.data)
                .and_then(|data| table.apply_blob(&self.pool, &data, create.num_entries))
        } else {
            table.apply_blob(&self.pool, &create.data, create.num_entries)
        };

        self.tables.push(table);

        Ok(TableChange {
            table_id: id,
            name: create.name,
            created: true,
            updates: updates?,
        })
    }

    /// Applies an update record. Returns `None` for a table that was never
    /// created.
    pub fn update(
        &mut self,
        table_id: u32,
        count: u32,
        data: &[u8],
    ) -> Result<Option<TableChange>, StringTableError> {
        let Some(table) = self.tables.get_mut(table_id as usize) else {
            return Ok(None);
        };

        let updates = table.apply_blob(&self.pool, data, count)?;

        Ok(Some(TableChange {
            table_id,
            name: table.name.clone(),
            created: false,
            updates,
        }))
    }

    /// Runs the payload interpreters registered for the changed table over
    /// every entry the change touched. Failures come back as warnings.
    pub fn interpret(&mut self, change: &TableChange) -> Vec<Warning> {
        let Self {
            tables,
            interpreters,
            ..
        } = self;

        let (Some(table), Some(handlers)) = (
            tables.get(change.table_id as usize),
            interpreters.get_mut(&change.name),
        ) else {
            return Vec::new();
        };

        let mut warnings = Vec::new();
        for update in &change.updates {
            let Some(entry) = table.get(update.index) else {
                continue;
            };
            for handler in handlers.iter_mut() {
                if let Err(err) = handler(update.index, entry) {
                    warnings.push(Warning::InterpreterFailure {
                        table: change.name.clone(),
                        index: update.index,
                        message: format!("{err:#}"),
                    });
                }
            }
        }

        warnings
    }

    pub fn get(&self, table_id: u32) -> Option<&StringTable> {
        self.tables.get(table_id as usize)
    }

    pub fn by_name(&self, name: &str) -> Option<&StringTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StringTable> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
use crate::utils::{bit_cursor::SliceCursor, fixture::Fixture};

#[cfg(test)]
fn shape(max_entries: u32) -> TableShape {
    TableShape {
        max_entries,
        ..Default::default()
    }
}

#[test]
fn back_references_copy_history_prefixes() -> anyhow::Result<()> {
    let mut f = Fixture::new();
    // ammo_pickup
    f.bit(true).bit(true).bit(false).cstring("ammo_pickup").bit(false);
    // "ammo_" from history slot 0, then "refill"
    f.bit(true).bit(true).bit(true).bits(5, 0).bits(5, 5).cstring("refill").bit(false);
    // explicit index 2, the whole of slot 0, with a 3-byte payload
    f.bit(false).bits(6, 2).bit(true).bit(true).bits(5, 0).bits(5, 11).cstring("");
    f.bit(true).bits(14, 3).bytes(&[7, 8, 9]);
    let data = f.finish();

    let mut table = StringTable::new(0, "soundprecache", shape(64), TableEncoding::BitIndexed);
    assert_eq!(table.index_bits(), 6);

    let mut cursor = SliceCursor::from_slice(&data);
    let decoded = table.decode_entries(&mut cursor, 3)?;
    assert!(table.is_empty());
    table.commit(decoded);

    let keys: Vec<_> = table.entries().map(|(_, e)| e.key.as_str()).collect();
    assert_eq!(keys, ["ammo_pickup", "ammo_refill", "ammo_pickup"]);
    assert_eq!(table.get(2).and_then(|e| e.payload.as_deref()), Some(&[7, 8, 9][..]));
    assert_eq!(table.history().count(), 3);
    Ok(())
}

#[test]
fn bad_records_leave_the_table_untouched() -> anyhow::Result<()> {
    let mut table = StringTable::new(0, "models", shape(5), TableEncoding::BitIndexed);
    assert_eq!(table.index_bits(), 3);

    let mut f = Fixture::new();
    f.bit(true).bit(true).bit(false).cstring("first").bit(false);
    let data = f.finish();
    let decoded = table.decode_entries(&mut SliceCursor::from_slice(&data), 1)?;
    table.commit(decoded);

    // Second entry points past max_entries.
    let mut f = Fixture::new();
    f.bit(true).bit(true).bit(false).cstring("second").bit(false);
    f.bit(false).bits(3, 6);
    let data = f.finish();
    let err = table
        .decode_entries(&mut SliceCursor::from_slice(&data), 2)
        .unwrap_err();
    assert!(matches!(
        err,
        StringTableError::IndexOutOfRange { index: 6, max: 5, .. }
    ));

    // Back-reference to an empty history slot.
    let mut f = Fixture::new();
    f.bit(true).bit(true).bit(true).bits(5, 4).bits(5, 1);
    let data = f.finish();
    let err = table
        .decode_entries(&mut SliceCursor::from_slice(&data), 1)
        .unwrap_err();
    assert!(matches!(
        err,
        StringTableError::HistoryIndexOutOfRange { index: 4, len: 1, .. }
    ));

    assert_eq!(table.len(), 1);
    assert_eq!(table.get(0).map(|e| e.key.as_str()), Some("first"));
    assert_eq!(table.history().collect::<Vec<_>>(), ["first"]);
    Ok(())
}

#[test]
fn updates_keep_absent_fields_and_history() -> anyhow::Result<()> {
    let pool = CursorPool::default();
    let shape = TableShape {
        max_entries: 16,
        fixed_payload: true,
        payload_bits: 3,
        ..Default::default()
    };
    let mut table = StringTable::new(0, "lightstyles", shape, TableEncoding::BitIndexed);

    let mut f = Fixture::new();
    f.bit(false);
    f.bit(true).bit(true).bit(false).cstring("style_a").bit(true).bits(3, 5);
    let data = f.finish();
    table.apply_blob(&pool, &data, 1)?;

    // Same index with no key, new payload; then a key built from the
    // history left by the previous record.
    let mut f = Fixture::new();
    f.bit(false);
    f.bit(false).bits(4, 0).bit(false).bit(true).bits(3, 2);
    f.bit(true).bit(true).bit(true).bits(5, 0).bits(5, 6).cstring("b").bit(false);
    let data = f.finish();
    let updates = table.apply_blob(&pool, &data, 2)?;

    assert_eq!(updates[0].key, None);
    assert_eq!(table.get(0).map(|e| e.key.as_str()), Some("style_a"));
    assert_eq!(table.get(0).and_then(|e| e.payload.clone()), Some(vec![2]));
    assert_eq!(table.get(1).map(|e| e.key.as_str()), Some("style_b"));
    assert_eq!(pool.pool(SizeClass::Small).idle(), 1);
    Ok(())
}

#[test]
fn wide_fixed_payloads_are_rejected() {
    let shape = TableShape {
        max_entries: 2,
        fixed_payload: true,
        payload_bits: 12,
        ..Default::default()
    };
    let table = StringTable::new(0, "wide", shape, TableEncoding::BitIndexed);

    let mut f = Fixture::new();
    f.bit(true).bit(false).bit(true);
    let data = f.finish();
    assert!(matches!(
        table.decode_entries(&mut SliceCursor::from_slice(&data), 1),
        Err(StringTableError::FixedPayloadTooWide { bits: 12, .. })
    ));
}

#[test]
fn varint_indexed_entries() -> anyhow::Result<()> {
    let shape = TableShape {
        flags: 1,
        varint_bit_counts: true,
        ..Default::default()
    };
    let table = StringTable::new(0, "userinfo", shape, TableEncoding::VarintIndexed);

    let compressed = snap::raw::Encoder::new().compress_vec(b"player-data")?;

    let mut f = Fixture::new();
    // index 0, plain value of 2 bytes
    f.bit(true).bit(true).bit(false).cstring("0").bit(true).bit(false).tag_int(2).bytes(&[1, 2]);
    // explicit index 4 (varint 3), no key: nothing else follows
    f.bit(false).varuint32(3).bit(false);
    // index 5, history prefix longer than the key is clamped, compressed value
    f.bit(true).bit(true).bit(true).bits(5, 0).bits(5, 20).cstring("x");
    f.bit(true).bit(true).tag_int(compressed.len() as u32).bytes(&compressed);
    // history slot out of range falls back to the literal suffix
    f.bit(true).bit(true).bit(true).bits(5, 30).bits(5, 3).cstring("lit").bit(false);
    let data = f.finish();

    let decoded = table.decode_entries(&mut SliceCursor::from_slice(&data), 4)?;
    let updates = decoded.updates;
    assert_eq!(updates.len(), 3);
    assert_eq!(updates[0].payload.as_deref(), Some(&[1, 2][..]));
    assert_eq!(updates[1].index, 5);
    assert_eq!(updates[1].key.as_deref(), Some("0x"));
    assert_eq!(updates[1].payload.as_deref(), Some(&b"player-data"[..]));
    assert_eq!(updates[2].index, 6);
    assert_eq!(updates[2].key.as_deref(), Some("lit"));
    assert_eq!(updates[2].payload, None);
    Ok(())
}

#[test]
fn varint_fixed_and_17_bit_values() -> anyhow::Result<()> {
    let fixed = TableShape {
        fixed_payload: true,
        payload_size: 12,
        ..Default::default()
    };
    let table = StringTable::new(0, "fixed", fixed, TableEncoding::VarintIndexed);
    let mut f = Fixture::new();
    f.bit(true).bit(true).bit(false).cstring("k").bit(true).bits(12, 0xABC);
    let data = f.finish();
    let decoded = table.decode_entries(&mut SliceCursor::from_slice(&data), 1)?;
    assert_eq!(decoded.updates[0].payload.as_deref(), Some(&[0xBC, 0x0A][..]));

    let table = StringTable::new(1, "sized", TableShape::default(), TableEncoding::VarintIndexed);
    let mut f = Fixture::new();
    f.bit(true).bit(true).bit(false).cstring("k").bit(true).bits(17, 1).bytes(&[0x5A]);
    let data = f.finish();
    let decoded = table.decode_entries(&mut SliceCursor::from_slice(&data), 1)?;
    assert_eq!(decoded.updates[0].payload.as_deref(), Some(&[0x5A][..]));
    Ok(())
}

#[test]
fn registry_creates_updates_and_interprets() -> anyhow::Result<()> {
    use std::sync::{Arc, Mutex};

    let mut tables = StringTables::new(TableEncoding::VarintIndexed, CursorPool::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    tables.register_interpreter("userinfo", move |index, entry| {
        if entry.key == "bad" {
            anyhow::bail!("cannot parse entry");
        }
        sink.lock().unwrap().push((index, entry.key.clone()));
        Ok(())
    });

    let mut f = Fixture::new();
    f.bit(true).bit(true).bit(false).cstring("alice").bit(false);
    let blob = f.finish();
    let create = TableCreate {
        name: "userinfo".into(),
        num_entries: 1,
        data: snap::raw::Encoder::new().compress_vec(&blob)?,
        data_compressed: true,
        ..Default::default()
    };
    let change = tables.create(create)?;
    assert!(change.created);
    assert!(tables.interpret(&change).is_empty());

    let mut f = Fixture::new();
    f.bit(false).varuint32(0).bit(true).bit(false).cstring("bad").bit(false);
    let blob = f.finish();
    let change = tables.update(0, 1, &blob)?.unwrap();
    assert_eq!(change.updates[0].index, 1);

    let warnings = tables.interpret(&change);
    assert!(matches!(
        warnings.as_slice(),
        [Warning::InterpreterFailure { index: 1, .. }]
    ));
    assert_eq!(*seen.lock().unwrap(), [(0, "alice".to_string())]);

    assert!(tables.update(7, 1, &blob)?.is_none());
    assert_eq!(tables.by_name("userinfo").map(StringTable::len), Some(2));
    Ok(())
}

#[test]
fn failed_create_still_registers_the_table() {
    let mut tables = StringTables::default();
    let create = TableCreate {
        name: "broken".into(),
        num_entries: 1,
        data: vec![0xFF, 0xFF, 0xFF],
        data_compressed: true,
        ..Default::default()
    };

    assert!(matches!(
        tables.create(create),
        Err(StringTableError::Decompression { .. })
    ));
    assert_eq!(tables.len(), 1);
    assert!(tables.get(0).is_some_and(StringTable::is_empty));
}

#[test]
fn dictionary_flag_is_rejected() {
    let mut tables = StringTables::default();
    let create = TableCreate {
        name: "dict".into(),
        shape: shape(8),
        num_entries: 1,
        data: vec![0x01],
        ..Default::default()
    };
    assert!(matches!(
        tables.create(create),
        Err(StringTableError::DictionaryEncoded { .. })
    ));
}

#[test]
fn huge_entry_counts_fail_on_short_data() {
    for encoding in [TableEncoding::BitIndexed, TableEncoding::VarintIndexed] {
        let mut tables = StringTables::new(encoding, CursorPool::default());
        let create = TableCreate {
            name: "downloadables".into(),
            shape: shape(64),
            num_entries: i32::MAX as u32,
            data: vec![0x00, 0x00],
            ..Default::default()
        };
        assert!(tables.create(create).is_err());
        assert!(tables.get(0).is_some_and(StringTable::is_empty));
    }
}
