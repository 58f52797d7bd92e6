use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use log::Level;
use s2dem::process::parse::{DemoParser, ParserConfig};
use s2dem::structs::command::PriorityTable;
use s2dem::utils::bit_cursor::Source;
use s2dem::utils::diagnostics::{DiagnosticSink, Warning};

use crate::input::InputReader;
use crate::priorities::PriorityFile;
use command::Cli;

pub mod command;
pub mod info;
pub mod tables;

/// Opens the input and builds a parser configured from the global flags.
pub fn open_parser(
    cli: &Cli,
    input: &std::path::Path,
) -> Result<(DemoParser<Box<dyn Source>>, WarningCounter)> {
    let input = InputReader::new(input)?;

    let priorities = match &cli.priorities {
        Some(path) => PriorityFile::load(path)?,
        None => PriorityTable::default(),
    };

    // Configure fail level based on strict mode
    let fail_level = if cli.strict {
        Level::Warn
    } else {
        Level::Error
    };

    let config = ParserConfig {
        queue_capacity: cli.queue_capacity,
        expected_records: input.expected_records(),
        fail_level,
        command_encoding: cli.command_encoding.into(),
        table_encoding: cli.table_encoding.into(),
        priorities,
    };

    if input.is_pipe() {
        log::debug!("Reading from a pipe, chunks are skipped without seeking");
    }

    let mut parser = DemoParser::new(input.into_source(), config);
    log::debug!("Dispatch queue capacity {}", parser.queue_capacity());

    let counter = WarningCounter::default();
    parser.set_sink(counter.clone());

    Ok((parser, counter))
}

/// Logs warnings and counts them.
#[derive(Debug, Default, Clone)]
pub struct WarningCounter {
    count: Arc<AtomicUsize>,
}

impl WarningCounter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl DiagnosticSink for WarningCounter {
    fn warn(&self, warning: &Warning) {
        log::warn!("{warning}");
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}
