pub mod decoder;
pub mod event;
pub mod format;
pub mod record;
pub mod registry;
pub mod session;

pub use decoder::{DecodeStats, Decoder};
pub use event::TraceEvent;
pub use format::{FormatError, Formatter};
pub use record::{FileHeader, Level};
pub use registry::Registry;
pub use session::{import, import_bytes, import_file, Dump, DumpSource, ImportError, ImportOptions};

use record::{ContainerHeader, ExtHeader, Subtype, CONTAINER_HEADER_SIZE, EXT_HEADER_SIZE};

fn one_container(buffer: &[u8]) -> Option<RawContainer> {
    let header = ContainerHeader::parse(buffer).ok()?;
    if header.size() < CONTAINER_HEADER_SIZE {
        return None;
    }
    buffer
        .get(..header.size())
        .map(|bytes| RawContainer { header, bytes })
}

/// Walks the container stream that follows the file header.
///
/// Iteration stops at the first container whose declared size is smaller than its own header or
/// runs past the end of the buffer; [`ContainerIter::remaining`] then holds the unread tail.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContainerIter<'b> {
    buffer: &'b [u8],
    pos: usize,
}

impl<'b> ContainerIter<'b> {
    pub fn new(buffer: &'b [u8]) -> Self {
        Self { buffer, pos: 0 }
    }

    pub fn remaining(&self) -> &'b [u8] {
        &self.buffer[self.pos..]
    }
}

impl<'b> Iterator for ContainerIter<'b> {
    type Item = RawContainer<'b>;

    fn next(&mut self) -> Option<Self::Item> {
        let buffer = self.buffer.get(self.pos..)?;
        let container = one_container(buffer)?;
        self.pos += container.len();
        Some(container)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RawContainer<'a> {
    header: ContainerHeader,
    bytes: &'a [u8],
}

impl<'a> RawContainer<'a> {
    pub fn header(&self) -> ContainerHeader {
        self.header
    }

    /// The chain of extension records carried by this container.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[CONTAINER_HEADER_SIZE..]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn one_ext(chunk: &[u8]) -> Option<(RawExt, usize)> {
    let header = ExtHeader::parse(chunk).ok()?;
    let size = header.size();
    if size < EXT_HEADER_SIZE {
        return None;
    }
    if header.subtype() == Ok(Subtype::Data) {
        // The argument area is trusted to follow the fixed part, so a data record keeps the
        // rest of the chunk.
        let advance = size.min(chunk.len());
        return Some((RawExt { header, bytes: chunk }, advance));
    }
    let bytes = chunk.get(..size)?;
    Some((RawExt { header, bytes }, size))
}

/// Walks the extension records inside one container payload.
///
/// Iteration stops at a record whose declared size is smaller than its header, or, for
/// anything but a data record, larger than what is left of the chunk.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExtIter<'b> {
    chunk: &'b [u8],
    pos: usize,
}

impl<'b> ExtIter<'b> {
    pub fn new(chunk: &'b [u8]) -> Self {
        Self { chunk, pos: 0 }
    }

    pub fn remaining(&self) -> &'b [u8] {
        &self.chunk[self.pos..]
    }
}

impl<'b> Iterator for ExtIter<'b> {
    type Item = RawExt<'b>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunk.get(self.pos..)?;
        let (record, advance) = one_ext(chunk)?;
        self.pos += advance;
        Some(record)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RawExt<'a> {
    header: ExtHeader,
    bytes: &'a [u8],
}

impl<'a> RawExt<'a> {
    pub fn header(&self) -> ExtHeader {
        self.header
    }

    /// The record including its header.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}
