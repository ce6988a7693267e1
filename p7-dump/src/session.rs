//! Whole-dump import: header validation, decoding and the resulting snapshot.

use crate::decoder::{DecodeStats, Decoder};
use crate::event::{ticks_to_utc, TraceEvent};
use crate::format::MESSAGE_CAPACITY;
use crate::record::{check_marker, FileHeader, Info, Level, MarkerCheck, FILE_HEADER_SIZE};
use crate::registry::Registry;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Failures that abort an import. Everything else degrades individual events instead.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("dump is {len} bytes, smaller than the {} byte header", FILE_HEADER_SIZE)]
    TooSmall { len: u64 },

    #[error("bad file marker {0:#018x}")]
    BadMarker(u64),

    #[error("dump was written in the opposite byte order, which is not supported")]
    UnsupportedByteOrder,

    #[error("dump is {len} bytes, more than the {max} byte limit")]
    TooLarge { len: u64, max: u64 },

    #[error("failed to read dump")]
    Io(#[from] io::Error),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ImportOptions {
    /// Largest dump accepted, in bytes.
    pub max_size: Option<u64>,
    /// Byte capacity of every rendered message.
    pub message_capacity: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            max_size: None,
            message_capacity: MESSAGE_CAPACITY,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DumpSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

pub fn import(source: DumpSource, options: &ImportOptions) -> Result<Dump, ImportError> {
    match source {
        DumpSource::Path(path) => import_file(path, options),
        DumpSource::Bytes(bytes) => import_bytes(bytes, options),
    }
}

/// Imports a dump from disk. The file is memory mapped for the duration of the decode.
pub fn import_file<P: AsRef<Path>>(path: P, options: &ImportOptions) -> Result<Dump, ImportError> {
    let file = fs::File::open(path.as_ref())?;
    let len = file.metadata()?.len();
    check_len(len, options)?;
    // SAFETY: the mapping is only read while decoding, and every decoded value is copied out
    // before it is dropped at the end of this function.
    let mmap = unsafe { memmap::Mmap::map(&file)? };
    import_bytes(&mmap, options)
}

fn check_len(len: u64, options: &ImportOptions) -> Result<(), ImportError> {
    if let Some(max) = options.max_size {
        if len > max {
            return Err(ImportError::TooLarge { len, max });
        }
    }
    if len < FILE_HEADER_SIZE as u64 {
        return Err(ImportError::TooSmall { len });
    }
    Ok(())
}

/// Imports a dump that is already in memory.
pub fn import_bytes(bytes: &[u8], options: &ImportOptions) -> Result<Dump, ImportError> {
    let len = bytes.len() as u64;
    check_len(len, options)?;
    let header = FileHeader::parse(bytes).map_err(|_| ImportError::TooSmall { len })?;
    match check_marker(header.marker()) {
        MarkerCheck::Valid => {}
        MarkerCheck::Swapped => return Err(ImportError::UnsupportedByteOrder),
        MarkerCheck::Invalid(marker) => return Err(ImportError::BadMarker(marker)),
    }
    tracing::debug!(
        process = header.process_name(),
        host = header.host_name(),
        pid = header.process_id(),
        "dump header"
    );

    let mut registry = Registry::new(options.message_capacity);
    let mut decoder = Decoder::new(&bytes[FILE_HEADER_SIZE..], &mut registry, header.start_ticks());
    let events: Vec<TraceEvent> = decoder.by_ref().collect();
    let (stats, stream_info) = decoder.finish();

    tracing::info!(
        events = events.len(),
        containers = stats.containers,
        threads = registry.threads().len(),
        modules = registry.modules().len(),
        descriptors = registry.descriptor_count(),
        closed = stats.close_seen,
        "dump decoded"
    );

    Ok(Dump {
        header,
        events,
        registry,
        stream_info,
        stats,
    })
}

/// Everything decoded from one dump.
#[derive(Debug, Clone)]
pub struct Dump {
    header: FileHeader,
    events: Vec<TraceEvent>,
    registry: Registry,
    stream_info: Option<Info>,
    stats: DecodeStats,
}

impl Dump {
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Events in arrival order.
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn event(&self, index: usize) -> Option<&TraceEvent> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Registry contents as they stood at the end of the decode.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The last INFO record of the stream.
    pub fn stream_info(&self) -> Option<&Info> {
        self.stream_info.as_ref()
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    pub fn host_name(&self) -> &str {
        self.header.host_name()
    }

    pub fn process_name(&self) -> &str {
        self.header.process_name()
    }

    pub fn process_start(&self) -> Option<DateTime<Utc>> {
        ticks_to_utc(self.header.start_ticks())
    }

    /// Number of events per level.
    pub fn level_counts(&self) -> BTreeMap<Level, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.level).or_default() += 1;
        }
        counts
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}
