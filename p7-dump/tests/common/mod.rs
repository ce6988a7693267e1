#![allow(dead_code)]

use p7dump::record::{ArgType, Subtype, FILE_MARKER, HOST_NAME_LENGTH, PROCESS_NAME_LENGTH};

/// Process start used by every synthetic dump: 2021-03-04 05:06:07 UTC.
pub const START_TICKS: u64 = 116_444_736_000_000_000 + 1_614_834_367 * 10_000_000;

pub fn utf16_field(text: &str, capacity: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    bytes.resize(2 * capacity, 0);
    bytes
}

pub fn utf8_field(text: &str, capacity: usize) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(capacity, 0);
    bytes
}

pub fn file_header(marker: u64, pid: u32, start_ticks: u64, process: &str, host: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend(marker.to_le_bytes());
    bytes.extend(pid.to_le_bytes());
    bytes.extend(((start_ticks >> 32) as u32).to_le_bytes());
    bytes.extend((start_ticks as u32).to_le_bytes());
    bytes.extend(utf16_field(process, PROCESS_NAME_LENGTH));
    bytes.extend(utf16_field(host, HOST_NAME_LENGTH));
    bytes
}

/// Wraps a record body in an extension header.
pub fn ext(subtype: Subtype, body: &[u8]) -> Vec<u8> {
    let size = (4 + body.len()) as u32;
    let mut bytes = ((size << 10) | ((subtype as u32) << 5)).to_le_bytes().to_vec();
    bytes.extend_from_slice(body);
    bytes
}

pub fn info(time_ticks: u64, timer: u64, frequency: u64, name: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(((time_ticks >> 32) as u32).to_le_bytes());
    body.extend((time_ticks as u32).to_le_bytes());
    body.extend(timer.to_le_bytes());
    body.extend(frequency.to_le_bytes());
    body.extend(0u64.to_le_bytes());
    body.extend(utf16_field(name, 64));
    ext(Subtype::Info, &body)
}

pub fn module(id: u16, verbosity: u32, name: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(id.to_le_bytes());
    body.extend(verbosity.to_le_bytes());
    body.extend(utf8_field(name, 54));
    ext(Subtype::Module, &body)
}

pub fn thread(id: u32, timer: u64, name: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(id.to_le_bytes());
    body.extend(timer.to_le_bytes());
    body.extend(utf8_field(name, 48));
    ext(Subtype::ThreadStart, &body)
}

pub fn desc(
    id: u16,
    line: u16,
    module: u16,
    args: &[(ArgType, u8)],
    template: &str,
    file: &str,
    function: &str,
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(id.to_le_bytes());
    body.extend(line.to_le_bytes());
    body.extend(module.to_le_bytes());
    body.extend((args.len() as u16).to_le_bytes());
    for (ty, size) in args {
        body.push(ty.tag());
        body.push(*size);
    }
    for unit in template.encode_utf16().chain([0]) {
        body.extend(unit.to_le_bytes());
    }
    body.extend(file.as_bytes());
    body.push(0);
    body.extend(function.as_bytes());
    body.push(0);
    ext(Subtype::Desc, &body)
}

pub fn data(id: u16, level: u8, cpu: u8, thread: u32, sequence: u32, timer: u64, args: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(id.to_le_bytes());
    body.push(level);
    body.push(cpu);
    body.extend(thread.to_le_bytes());
    body.extend(sequence.to_le_bytes());
    body.extend(timer.to_le_bytes());
    body.extend_from_slice(args);
    ext(Subtype::Data, &body)
}

/// Appends a NUL-terminated string argument in the code-unit width of `ty`.
pub fn str_arg(ty: ArgType, text: &str, buffer: &mut Vec<u8>) {
    match ty {
        ArgType::Utf16Str => {
            for unit in text.encode_utf16().chain([0]) {
                buffer.extend(unit.to_le_bytes());
            }
        }
        ArgType::Utf32Str => {
            for c in text.chars() {
                buffer.extend((c as u32).to_le_bytes());
            }
            buffer.extend(0u32.to_le_bytes());
        }
        _ => {
            buffer.extend_from_slice(text.as_bytes());
            buffer.push(0);
        }
    }
}

pub fn close() -> Vec<u8> {
    ext(Subtype::Close, &[])
}

/// Wraps extension records in one container.
pub fn container(channel: u8, records: &[Vec<u8>]) -> Vec<u8> {
    let payload = records.concat();
    let word = (4 + payload.len() as u32) | ((channel as u32) << 27);
    let mut bytes = word.to_le_bytes().to_vec();
    bytes.extend(payload);
    bytes
}

/// Assembles a dump out of a header and containers.
pub struct DumpBuilder {
    bytes: Vec<u8>,
}

impl DumpBuilder {
    pub fn new() -> Self {
        Self::with_marker(FILE_MARKER)
    }

    pub fn with_marker(marker: u64) -> Self {
        Self {
            bytes: file_header(marker, 1234, START_TICKS, "demo.exe", "build-host"),
        }
    }

    pub fn container(mut self, records: &[Vec<u8>]) -> Self {
        self.bytes.extend(container(0, records));
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// The registration prelude of the reference scenario: INFO, MODULE 7, THREAD 42, DESC 3.
pub fn prelude() -> Vec<Vec<u8>> {
    vec![
        info(START_TICKS, 1_000, 1_000, "stream"),
        module(7, 3, "net"),
        thread(42, 1_000, "worker"),
        desc(
            3,
            17,
            7,
            &[(ArgType::Int32, 4)],
            "value=%d",
            "a/b/c.cpp",
            "run",
        ),
    ]
}

pub fn value_event(sequence: u32, timer: u64, value: i32) -> Vec<u8> {
    data(3, 2, 0, 42, sequence, timer, &value.to_le_bytes())
}
