use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};
use s2dem::structs::command::HeaderEncoding;
use s2dem::structs::string_table::TableEncoding;

#[derive(Debug, ClapParser)]
#[command(
    name       = env!("CARGO_PKG_NAME"),
    version    = env!("CARGO_PKG_VERSION"),
    about      = "Tools for inspecting and decoding Source 2 network-replay recordings",
    long_about = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat warnings as fatal errors (fail on first warning).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Fixed dispatch queue capacity (0 = lock-step). Sized from the input by default.
    #[arg(long, global = true, value_name = "ITEMS")]
    pub queue_capacity: Option<usize>,

    /// String table entry encoding.
    #[arg(long, global = true, value_enum, default_value_t = TableEncodingArg::BitIndexed)]
    pub table_encoding: TableEncodingArg,

    /// Encoding of the command id in outer record headers.
    #[arg(long, global = true, value_enum, default_value_t = CommandEncodingArg::Varint)]
    pub command_encoding: CommandEncodingArg,

    /// YAML file overriding the sub-record dispatch priorities.
    #[arg(long, global = true, value_name = "FILE")]
    pub priorities: Option<PathBuf>,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print recording information
    Info(InfoArgs),

    /// Dump the final string tables as YAML.
    Tables(TablesArgs),
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input recording (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,
}

#[derive(Debug, Args)]
pub struct TablesArgs {
    /// Input recording (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Write the dump to a file instead of stdout.
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TableEncodingArg {
    /// Fixed-width indices and a 14-bit payload length.
    BitIndexed,
    /// Varint indices and variable payload bit counts.
    VarintIndexed,
}

impl From<TableEncodingArg> for TableEncoding {
    fn from(arg: TableEncodingArg) -> Self {
        match arg {
            TableEncodingArg::BitIndexed => TableEncoding::BitIndexed,
            TableEncodingArg::VarintIndexed => TableEncoding::VarintIndexed,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CommandEncodingArg {
    /// Base-128 varint (default).
    Varint,
    /// 6-bit tag integer.
    TagInt,
}

impl From<CommandEncodingArg> for HeaderEncoding {
    fn from(arg: CommandEncodingArg) -> Self {
        match arg {
            CommandEncodingArg::Varint => HeaderEncoding::VarUint32,
            CommandEncodingArg::TagInt => HeaderEncoding::TagInt,
        }
    }
}
