use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use s2dem::utils::errors::ErrorClass;

use cli::command::{Cli, Commands, LogFormat};
use cli::info::cmd_info;
use cli::tables::cmd_tables;

mod cli;
mod input;
mod priorities;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_level = cli.loglevel.to_level_filter();

    let multi = MultiProgress::new();

    let mut env_builder = env_logger::Builder::from_default_env();
    env_builder.filter_level(base_level);
    match cli.log_format {
        LogFormat::Plain => {
            env_builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            env_builder.format(|buf, record| {
                use std::io::Write;
                let ts = buf.timestamp().to_string();
                writeln!(buf, "{}", json_line(&ts, record))
            });
        }
    }

    let pb = if cli.progress {
        let logger = env_builder.build();
        LogWrapper::new(multi.clone(), logger).try_init()?;
        Some(&multi)
    } else {
        env_builder.try_init()?;
        None
    };

    let result = match cli.command {
        Commands::Info(ref args) => cmd_info(args, &cli, pb),
        Commands::Tables(ref args) => cmd_tables(args, &cli, pb),
    };

    if let Err(err) = &result {
        match ErrorClass::of(err) {
            ErrorClass::Truncated => log::error!("The recording is truncated"),
            ErrorClass::InvalidFormat => log::error!("The input is not a Source 2 recording"),
            ErrorClass::Corrupt => log::error!("The recording is corrupt"),
            ErrorClass::Other => {}
        }
    }

    result
}

/// Renders one log record as a JSON object.
fn json_line(ts: &str, record: &log::Record) -> String {
    serde_json::json!({
        "ts": ts,
        "lvl": record.level().as_str(),
        "target": record.target(),
        "msg": record.args().to_string(),
    })
    .to_string()
}

#[test]
fn json_log_lines_escape_messages() -> Result<()> {
    let line = json_line(
        "2024-01-01T00:00:00Z",
        &log::Record::builder()
            .level(log::Level::Warn)
            .target("s2dem::process")
            .args(format_args!("table \"names\"\tand \u{e9}"))
            .build(),
    );

    let value: serde_json::Value = serde_json::from_str(&line)?;
    assert_eq!(value["lvl"], "WARN");
    assert_eq!(value["target"], "s2dem::process");
    assert_eq!(value["msg"], "table \"names\"\tand \u{e9}");
    Ok(())
}
