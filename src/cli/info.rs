use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use s2dem::process::decode::Record;
use s2dem::process::dispatch::Item;
use s2dem::process::parse::Termination;
use s2dem::structs::messages::{DemoFileHeader, DemoFileInfo};
use s2dem::structs::string_table::StringTables;

use super::command::{Cli, InfoArgs};
use super::open_parser;

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing recording: {}", args.input.display());

    let (mut parser, warnings) = open_parser(cli, &args.input)?;

    let stats = Arc::new(Mutex::new(RecordingStats::default()));

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message("Analyzing frames...");
            Some(pb)
        }
        None => None,
    };

    {
        let stats = stats.clone();
        let pb = pb.clone();
        parser.register_consumer(move |item| {
            let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.add(item);

            if matches!(item, Item::FrameBoundary) && stats.frames.is_multiple_of(1000) {
                if let Some(ref pb) = pb {
                    pb.set_message(format!("Analyzing frames...       {}", stats.frames));
                }
            }
            Ok(())
        })?;
    }

    let termination = parser.parse_to_end()?;

    if let Some(ref pb) = pb {
        pb.finish_and_clear();
    }

    if termination == Termination::Cancelled {
        log::warn!("Decoding was cancelled");
    }

    let stats = stats.lock().unwrap_or_else(PoisonError::into_inner);

    println!();
    println!("Recording Information");
    println!("=====================");
    println!();

    if let Some(preamble) = parser.preamble() {
        println!("File info offset            {}", preamble.file_info_offset);
        println!("Spawn groups offset         {}", preamble.spawn_groups_offset);
        println!();
    }

    if let Some(header) = &stats.header {
        display_header(header);
    }

    if let Some(info) = &stats.file_info {
        display_file_info(info);
    }

    display_records(&stats);
    display_tables(parser.string_tables());

    println!("Analysis Summary");
    println!("  Frames processed          {}", parser.frames());
    println!("  Last tick                 {}", parser.tick());
    println!("  Warnings                  {}", warnings.count());
    println!();

    Ok(())
}

#[derive(Default)]
struct RecordingStats {
    frames: u64,
    header: Option<DemoFileHeader>,
    file_info: Option<DemoFileInfo>,
    commands: BTreeMap<String, u64>,
    messages: BTreeMap<u32, u64>,
    table_changes: u64,
}

impl RecordingStats {
    fn add(&mut self, item: &Item) {
        let record = match item {
            Item::FrameBoundary => {
                self.frames += 1;
                return;
            }
            Item::Tick(_) => return,
            Item::Record(record) => record,
        };

        match record {
            Record::Command { command, .. } => {
                *self.commands.entry(command.to_string()).or_default() += 1;
                if let Some(header) = record.downcast_ref::<DemoFileHeader>() {
                    self.header = Some(header.clone());
                }
                if let Some(info) = record.downcast_ref::<DemoFileInfo>() {
                    self.file_info = Some(info.clone());
                }
            }
            Record::Message { tag, .. } => {
                *self.messages.entry(*tag).or_default() += 1;
            }
            Record::StringTable { .. } => self.table_changes += 1,
        }
    }
}

fn display_header(header: &DemoFileHeader) {
    println!("File Header");
    if let Some(stamp) = &header.demo_file_stamp {
        println!("  Stamp                     {}", stamp.trim_end_matches('\0'));
    }
    if let Some(protocol) = header.network_protocol {
        println!("  Network protocol          {protocol}");
    }
    if let Some(server) = &header.server_name {
        println!("  Server                    {server}");
    }
    if let Some(client) = &header.client_name {
        println!("  Client                    {client}");
    }
    if let Some(map) = &header.map_name {
        println!("  Map                       {map}");
    }
    if let Some(game_dir) = &header.game_directory {
        println!("  Game directory            {game_dir}");
    }
    if let Some(build) = header.build_num {
        println!("  Build                     {build}");
    }
    println!();
}

fn display_file_info(info: &DemoFileInfo) {
    println!("File Info");
    if let Some(time) = info.playback_time {
        println!("  Playback time             {}", playback_time(time));
    }
    if let Some(ticks) = info.playback_ticks {
        println!("  Playback ticks            {ticks}");
    }
    if let Some(frames) = info.playback_frames {
        println!("  Playback frames           {frames}");
    }
    println!();
}

fn display_records(stats: &RecordingStats) {
    println!("Decoded Records");
    for (command, count) in &stats.commands {
        println!("  {command:26}{count}");
    }
    for (tag, count) in &stats.messages {
        println!("  {:26}{count}", format!("Sub-record {tag}"));
    }
    println!("  {:26}{}", "String table changes", stats.table_changes);
    println!();
}

fn display_tables(tables: &StringTables) {
    if tables.is_empty() {
        return;
    }

    println!("String Tables");
    for table in tables.iter() {
        println!(
            "  {:>3} {:22}{} entries",
            table.id(),
            table.name(),
            table.len()
        );
    }
    println!();
}

/// Formats seconds as `h:mm:ss.mmm`.
fn playback_time(seconds: f32) -> String {
    let total_ms = (f64::from(seconds.max(0.0)) * 1000.0).round() as u64;
    let (hours, rest) = (total_ms / 3_600_000, total_ms % 3_600_000);
    let (minutes, rest) = (rest / 60_000, rest % 60_000);
    format!("{hours}:{minutes:02}:{:02}.{:03}", rest / 1000, rest % 1000)
}

#[test]
fn playback_time_format() {
    assert_eq!(playback_time(0.0), "0:00:00.000");
    assert_eq!(playback_time(3725.5), "1:02:05.500");
    assert_eq!(playback_time(-1.0), "0:00:00.000");
}
