use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use serde::Serialize;

use std::fs;
use std::io::{self, Read, Write};

use p7dump::decoder::DecodeStats;
use p7dump::event::{format_date_time, ticks_to_utc};
use p7dump::registry::{ModuleInfo, ThreadInfo};
use p7dump::{Dump, FileHeader, ImportOptions, Level};
use tracing_subscriber::filter::EnvFilter;

/// Summarizes a P7 dump: session header, stream info, threads, modules and event counts.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input dump or '-' to use stdin.
    #[arg(short, long, default_value_t = String::from("-"))]
    input: String,

    /// Output file or '-' to use stdout.
    #[arg(short, long, default_value_t = String::from("-"))]
    output: String,

    /// Refuse dumps larger than this many bytes.
    #[arg(long)]
    max_size: Option<u64>,

    /// Show times in the local time zone instead of UTC.
    #[arg(long)]
    local_time: bool,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Summary<'a> {
    header: &'a FileHeader,
    process_start: Option<String>,
    stream: Option<Stream<'a>>,
    events: usize,
    levels: Vec<(String, usize)>,
    threads: Vec<&'a ThreadInfo>,
    modules: Vec<&'a ModuleInfo>,
    stats: &'a DecodeStats,
}

#[derive(Serialize)]
struct Stream<'a> {
    name: &'a str,
    time: Option<String>,
    timer_value: u64,
    timer_frequency: u64,
    flags: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("P7_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = ImportOptions {
        max_size: args.max_size,
        ..ImportOptions::default()
    };

    let dump = load(args.input.as_str(), &options)?;
    let mut output = open_output(args.output.as_str())?;
    let summary = summarize(&dump, args.local_time);

    if args.json {
        serde_json::to_writer_pretty(&mut output, &summary)?;
        writeln!(output)?;
        return Ok(());
    }

    let header = summary.header;
    writeln!(output, "Host:     {}", header.host_name())?;
    writeln!(
        output,
        "Process:  {} (pid {})",
        header.process_name(),
        header.process_id()
    )?;
    writeln!(
        output,
        "Started:  {}",
        summary.process_start.as_deref().unwrap_or("-")
    )?;
    if let Some(stream) = &summary.stream {
        writeln!(
            output,
            "Stream:   {} at {} ({} Hz, flags {:#x})",
            stream.name,
            stream.time.as_deref().unwrap_or("-"),
            stream.timer_frequency,
            stream.flags
        )?;
    }

    writeln!(output, "\nEvents:   {}", summary.events)?;
    for (level, count) in &summary.levels {
        writeln!(output, "  {level:<10} {count}")?;
    }

    writeln!(output, "\nThreads:  {}", summary.threads.len())?;
    for thread in &summary.threads {
        writeln!(output, "  {:#010x} {}", thread.id, thread.name)?;
    }

    writeln!(output, "\nModules:  {}", summary.modules.len())?;
    for module in &summary.modules {
        writeln!(
            output,
            "  {:>5} {:<24} {}",
            module.id, module.name, module.verbosity
        )?;
    }

    let stats = summary.stats;
    writeln!(output, "\nContainers: {}", stats.containers)?;
    for (subtype, count) in &stats.records {
        writeln!(output, "  {:<12} {count}", subtype.to_string())?;
    }
    if stats.unknown_subtypes > 0 {
        writeln!(output, "  Unknown      {}", stats.unknown_subtypes)?;
    }
    writeln!(output, "Malformed records: {}", stats.malformed_records)?;
    writeln!(output, "Truncated chunks:  {}", stats.truncated_chunks)?;
    writeln!(output, "Trailing bytes:    {}", stats.trailing_bytes)?;
    writeln!(output, "Closed:            {}", stats.close_seen)?;
    Ok(())
}

fn summarize(dump: &Dump, local: bool) -> Summary {
    let format = |ticks: u64| {
        ticks_to_utc(ticks).map(|time| {
            if local {
                format_date_time(&time.with_timezone(&Local))
            } else {
                format_date_time(&time)
            }
        })
    };

    let mut levels = Vec::new();
    for (level, count) in dump.level_counts() {
        let label = match level {
            Level::Unknown(value) => format!("Level {value}"),
            level => level.label().to_string(),
        };
        levels.push((label, count));
    }

    Summary {
        header: dump.header(),
        process_start: format(dump.header().start_ticks()),
        stream: dump.stream_info().map(|info| Stream {
            name: info.name(),
            time: format(info.time_ticks()),
            timer_value: info.timer_value(),
            timer_frequency: info.timer_frequency(),
            flags: info.flags(),
        }),
        events: dump.len(),
        levels,
        threads: dump.registry().threads(),
        modules: dump.registry().modules(),
        stats: dump.stats(),
    }
}

fn load(input: &str, options: &ImportOptions) -> Result<Dump> {
    if input == "-" {
        let mut bytes = Vec::new();
        io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .context("failed to read dump from stdin")?;
        return Ok(p7dump::import_bytes(&bytes, options)?);
    }
    p7dump::import_file(input, options).with_context(|| format!("failed to import {input}"))
}

fn open_output(output: &str) -> io::Result<Box<dyn Write>> {
    if output == "-" {
        return Ok(Box::new(io::stdout().lock()));
    }
    Ok(Box::new(fs::File::create(output)?))
}
