use std::fs::File;
use std::io::{self, BufWriter, Write};

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use s2dem::process::parse::Termination;
use s2dem::structs::string_table::{StringTable, StringTables, TableEncoding};
use serde::Serialize;

use super::command::{Cli, TablesArgs};
use super::open_parser;

/// Payload bytes shown in full before the dump switches to a length only.
const INLINE_PAYLOAD: usize = 32;

pub fn cmd_tables(args: &TablesArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Collecting string tables: {}", args.input.display());

    let (mut parser, warnings) = open_parser(cli, &args.input)?;

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message("Decoding recording...");
            Some(pb)
        }
        None => None,
    };

    let termination = parser.parse_to_end()?;

    if let Some(ref pb) = pb {
        pb.finish_and_clear();
    }

    if termination == Termination::Cancelled {
        log::warn!("Decoding was cancelled, tables are incomplete");
    }

    let dump = TablesDump::new(parser.string_tables(), parser.tick());
    let yaml = serde_yaml_ng::to_string(&dump)?;

    match &args.output {
        Some(path) => {
            let mut writer = BufWriter::new(
                File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
            );
            writer.write_all(yaml.as_bytes())?;
            writer.flush()?;
            log::info!(
                "Wrote {} tables to {}",
                dump.tables.len(),
                path.display()
            );
        }
        None => io::stdout().lock().write_all(yaml.as_bytes())?,
    }

    if warnings.count() > 0 {
        log::info!("{} warnings while decoding", warnings.count());
    }

    Ok(())
}

#[derive(Serialize)]
struct TablesDump {
    tick: u32,
    encoding: &'static str,
    tables: Vec<TableDump>,
}

#[derive(Serialize)]
struct TableDump {
    id: u32,
    name: String,
    max_entries: u32,
    entries: Vec<EntryDump>,
}

#[derive(Serialize)]
struct EntryDump {
    index: u32,
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_len: Option<usize>,
}

impl TablesDump {
    fn new(tables: &StringTables, tick: u32) -> Self {
        Self {
            tick,
            encoding: match tables.encoding() {
                TableEncoding::BitIndexed => "bit-indexed",
                TableEncoding::VarintIndexed => "varint-indexed",
            },
            tables: tables.iter().map(TableDump::from).collect(),
        }
    }
}

impl From<&StringTable> for TableDump {
    fn from(table: &StringTable) -> Self {
        Self {
            id: table.id(),
            name: table.name().to_owned(),
            max_entries: table.shape().max_entries,
            entries: table
                .entries()
                .map(|(index, entry)| EntryDump {
                    index,
                    key: entry.key.clone(),
                    payload: entry
                        .payload
                        .as_deref()
                        .filter(|p| p.len() <= INLINE_PAYLOAD)
                        .map(hex),
                    payload_len: entry.payload.as_ref().map(Vec::len),
                })
                .collect(),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[test]
fn dumps_tables_as_yaml() -> anyhow::Result<()> {
    use s2dem::structs::string_table::{TableCreate, TableShape};

    let mut tables = StringTables::default();
    tables.create(TableCreate {
        name: "lightstyles".into(),
        shape: TableShape {
            max_entries: 64,
            ..Default::default()
        },
        // dictionary flag, then entry 0 with key "m" and payload [0xAB]
        data: vec![0xD6, 0x06, 0x30, 0x00, 0x58, 0x05],
        num_entries: 1,
        ..Default::default()
    })?;

    let yaml = serde_yaml_ng::to_string(&TablesDump::new(&tables, 9))?;
    assert!(yaml.contains("name: lightstyles"));
    assert!(yaml.contains("key: m"));
    assert!(yaml.contains("payload: ab"));
    assert!(yaml.contains("payload_len: 1"));
    Ok(())
}
