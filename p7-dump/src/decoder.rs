//! Streaming decode of the container body into resolved trace events.

use crate::event::TraceEvent;
use crate::record::{Data, Desc, Info, Module, ParseError, Subtype, ThreadStart};
use crate::registry::Registry;
use crate::{ContainerIter, ExtIter, RawExt};
use serde::Serialize;
use std::collections::BTreeMap;

/// Message of an event whose descriptor id was never registered.
pub fn missing_descriptor_message(id: u16) -> String {
    format!("Unable to find description {id}")
}

/// Message of an event whose descriptor has no template.
pub const NO_FORMATTER: &str = "No formatter found";

/// Message of an event whose arguments could not be rendered.
pub const FORMAT_FAILED: &str = "Unable to format the message";

/// Counters collected while decoding one body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub containers: usize,
    /// Records seen per known subtype, including ones that were ignored.
    pub records: BTreeMap<Subtype, usize>,
    pub unknown_subtypes: usize,
    /// Records too short for their fixed layout.
    pub malformed_records: usize,
    /// Chunks whose last record did not fit.
    pub truncated_chunks: usize,
    /// Bytes left over after the last complete container.
    pub trailing_bytes: usize,
    pub close_seen: bool,
}

/// Decodes a container body, feeding registration records into a [`Registry`] and yielding one
/// [`TraceEvent`] per data record.
///
/// Decoding ends when the body is exhausted, when a container does not fit, or at a CLOSE
/// record. None of these is an error.
#[derive(Debug)]
pub struct Decoder<'b, 'r> {
    containers: ContainerIter<'b>,
    records: Option<ExtIter<'b>>,
    registry: &'r mut Registry,
    start_ticks: u64,
    stream_info: Option<Info>,
    stats: DecodeStats,
    next_index: usize,
    finished: bool,
}

impl<'b, 'r> Decoder<'b, 'r> {
    /// `body` is everything after the file header; `start_ticks` anchors event timestamps.
    pub fn new(body: &'b [u8], registry: &'r mut Registry, start_ticks: u64) -> Self {
        Self {
            containers: ContainerIter::new(body),
            records: None,
            registry,
            start_ticks,
            stream_info: None,
            stats: DecodeStats::default(),
            next_index: 0,
            finished: false,
        }
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// The most recent INFO record.
    pub fn stream_info(&self) -> Option<&Info> {
        self.stream_info.as_ref()
    }

    pub fn finish(self) -> (DecodeStats, Option<Info>) {
        (self.stats, self.stream_info)
    }

    fn end_chunk(&mut self) {
        if let Some(records) = self.records.take() {
            let left = records.remaining().len();
            if left > 0 && !self.finished {
                tracing::warn!(bytes = left, "record overruns its container, skipping rest");
                self.stats.truncated_chunks += 1;
            }
        }
    }

    fn dispatch(&mut self, record: RawExt<'b>) -> Option<TraceEvent> {
        let header = record.header();
        let subtype = match header.subtype() {
            Ok(subtype) => subtype,
            Err(err) => {
                tracing::debug!(%err, size = header.size(), "skipping record");
                self.stats.unknown_subtypes += 1;
                return None;
            }
        };
        *self.stats.records.entry(subtype).or_default() += 1;
        tracing::trace!(%subtype, kind = header.kind(), size = header.size(), "record");

        let bytes = record.bytes();
        let result = match subtype {
            Subtype::Data => match Data::parse(bytes) {
                Ok(data) => return Some(self.resolve(&data)),
                Err(err) => Err(err),
            },
            Subtype::Info => Info::parse(bytes).map(|info| {
                self.registry
                    .set_calibration(info.timer_value(), info.timer_frequency());
                self.stream_info = Some(info);
            }),
            Subtype::Desc => {
                Desc::parse(bytes).map(|desc| self.registry.register_descriptor(desc))
            }
            Subtype::ThreadStart => ThreadStart::parse(bytes).map(|thread| {
                self.registry
                    .register_thread(thread.thread_id(), thread.name())
            }),
            Subtype::Module => Module::parse(bytes).map(|module| {
                self.registry
                    .register_module(module.id(), module.verbosity(), module.name())
            }),
            Subtype::Close => {
                tracing::debug!("close record, ending decode");
                self.stats.close_seen = true;
                self.finished = true;
                Ok(())
            }
            _ => {
                tracing::debug!(%subtype, "ignoring record");
                Ok(())
            }
        };
        if let Err(err) = result {
            self.malformed(subtype, err);
        }
        None
    }

    fn malformed(&mut self, subtype: Subtype, err: ParseError) {
        tracing::warn!(%subtype, %err, "malformed record");
        self.stats.malformed_records += 1;
    }

    fn resolve(&mut self, data: &Data) -> TraceEvent {
        let index = self.next_index;
        self.next_index += 1;

        let registry = &*self.registry;
        let id = data.id();
        let mut event = TraceEvent {
            index,
            id,
            level: data.level(),
            sequence: data.sequence(),
            processor: data.processor(),
            thread_id: data.thread_id(),
            thread_name: registry
                .thread(data.thread_id())
                .map(|thread| thread.name.clone()),
            module_id: None,
            module_name: None,
            ticks: registry
                .calibration()
                .absolute_ticks(self.start_ticks, data.timer()),
            file_path: String::new(),
            file_name: String::new(),
            line: 0,
            function: String::new(),
            message: String::new(),
        };

        let Some(desc) = registry.descriptor(id) else {
            tracing::debug!(id, index, "no descriptor for event");
            event.message = missing_descriptor_message(id);
            return event;
        };
        event.module_id = Some(desc.module_id());
        event.module_name = registry
            .module(desc.module_id())
            .map(|module| module.name.clone());
        event.file_path = desc.file_path().to_string();
        event.file_name = desc.file_name().to_string();
        event.line = desc.line();
        event.function = desc.function().to_string();

        event.message = match registry.formatter(id) {
            None => NO_FORMATTER.to_string(),
            Some(formatter) => match formatter.render(data.args()) {
                Ok(text) => text.replace(|c: char| c == '\r' || c == '\n', ";"),
                Err(err) => {
                    tracing::warn!(id, index, %err, "unable to format message");
                    FORMAT_FAILED.to_string()
                }
            },
        };
        event
    }
}

impl<'b, 'r> Iterator for Decoder<'b, 'r> {
    type Item = TraceEvent;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(record) = self.records.as_mut().and_then(|records| records.next()) {
                match self.dispatch(record) {
                    Some(event) => return Some(event),
                    None => continue,
                }
            }
            self.end_chunk();

            match self.containers.next() {
                Some(container) => {
                    self.stats.containers += 1;
                    tracing::trace!(
                        size = container.len(),
                        channel = container.header().channel(),
                        "container"
                    );
                    self.records = Some(ExtIter::new(container.payload()));
                }
                None => {
                    let left = self.containers.remaining().len();
                    if left > 0 {
                        tracing::warn!(bytes = left, "truncated container at end of dump");
                    }
                    self.stats.trailing_bytes = left;
                    self.finished = true;
                }
            }
        }
    }
}
