use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, ValueEnum};
use serde::Serialize;

use std::fs;
use std::io::{self, BufWriter, Read, Write};

use p7dump::event::{format_time_of_day, TraceEvent};
use p7dump::{Dump, ImportOptions, Level};
use tracing_subscriber::filter::EnvFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Csv,
    Jsonl,
}

/// Prints the events of a P7 dump, one line per event.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input dump or '-' to use stdin.
    #[arg(short, long, default_value_t = String::from("-"))]
    input: String,

    /// Output file or '-' to use stdout.
    #[arg(short, long, default_value_t = String::from("-"))]
    output: String,

    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Refuse dumps larger than this many bytes.
    #[arg(long)]
    max_size: Option<u64>,

    /// Show times in the local time zone instead of UTC.
    #[arg(long)]
    local_time: bool,

    /// Only print events at or above this level.
    #[arg(long, value_parser = parse_level)]
    min_level: Option<Level>,
}

#[derive(Serialize)]
struct Row<'a> {
    #[serde(rename = "#")]
    number: usize,
    id: u16,
    level: Level,
    module: String,
    cpu: u8,
    thread: String,
    file: &'a str,
    line: u16,
    function: &'a str,
    time: String,
    text: &'a str,
}

#[derive(Serialize)]
struct JsonRow<'a> {
    #[serde(flatten)]
    event: &'a TraceEvent,
    time: Option<String>,
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
    let mut output = BufWriter::new(open_output(args.output.as_str())?);

    let events = dump
        .events()
        .iter()
        .filter(|event| args.min_level.map_or(true, |min| event.level >= min));

    match args.format {
        Format::Text => {
            writeln!(
                output,
                "{:>6} {:>5} {:<8} {:<16} {:>4} {:<24} {:<20} {:>5} {:<24} {:<12} Text",
                "#", "ID", "Level", "Module", "CPU#", "Thread", "File", "Line", "Function", "Time"
            )?;
            for event in events {
                writeln!(
                    output,
                    "{:>6} {:>5} {:<8} {:<16} {:>4} {:<24} {:<20} {:>5} {:<24} {:<12} {}",
                    event.number(),
                    event.id,
                    event.level,
                    event.module_display(),
                    event.processor,
                    event.thread_display(),
                    event.file_name,
                    event.line,
                    event.function,
                    time_of_day(event, args.local_time),
                    event.message
                )?;
            }
        }
        Format::Csv => {
            let mut writer = csv::Writer::from_writer(output);
            for event in events {
                writer.serialize(Row {
                    number: event.number(),
                    id: event.id,
                    level: event.level,
                    module: event.module_display(),
                    cpu: event.processor,
                    thread: event.thread_display(),
                    file: &event.file_name,
                    line: event.line,
                    function: &event.function,
                    time: time_of_day(event, args.local_time),
                    text: &event.message,
                })?;
            }
            writer.flush()?;
            return Ok(());
        }
        Format::Jsonl => {
            for event in events {
                let time = event.time().map(|time| {
                    if args.local_time {
                        time.with_timezone(&Local).to_rfc3339()
                    } else {
                        time.to_rfc3339()
                    }
                });
                serde_json::to_writer(&mut output, &JsonRow { event, time })?;
                writeln!(output)?;
            }
        }
    }

    output.flush()?;
    Ok(())
}

fn time_of_day(event: &TraceEvent, local: bool) -> String {
    match event.time() {
        Some(time) if local => format_time_of_day(&time.with_timezone(&Local)),
        Some(time) => format_time_of_day(&time),
        None => String::new(),
    }
}

fn parse_level(label: &str) -> Result<Level, String> {
    Level::from_label(label).ok_or_else(|| {
        let labels: Vec<_> = Level::ALL.iter().map(Level::label).collect();
        format!("expected one of {}", labels.join(", "))
    })
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
