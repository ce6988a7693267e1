//! Packed binary layouts of a P7 dump.
//!
//! Every multi-byte field is little-endian and every structure is packed; nothing in here
//! reinterprets memory, each layout is decoded field by field out of a byte slice.

use serde::Serialize;

/// Marker stored in the first eight bytes of a dump.
pub const FILE_MARKER: u64 = 0x45D2_AC71_ECF3_2CA6;

/// Size of the fixed file header that precedes the container stream.
pub const FILE_HEADER_SIZE: usize = 8 + 4 + 4 + 4 + 2 * PROCESS_NAME_LENGTH + 2 * HOST_NAME_LENGTH;

pub const PROCESS_NAME_LENGTH: usize = 256;
pub const HOST_NAME_LENGTH: usize = 256;
pub const STREAM_NAME_LENGTH: usize = 64;
pub const THREAD_NAME_LENGTH: usize = 48;
pub const MODULE_NAME_LENGTH: usize = 54;

pub const CONTAINER_HEADER_SIZE: usize = 4;
pub const EXT_HEADER_SIZE: usize = 4;
pub const INFO_SIZE: usize = EXT_HEADER_SIZE + 4 + 4 + 8 + 8 + 8 + 2 * STREAM_NAME_LENGTH;
pub const DESC_HEADER_SIZE: usize = EXT_HEADER_SIZE + 2 + 2 + 2 + 2;
pub const DATA_HEADER_SIZE: usize = EXT_HEADER_SIZE + 2 + 1 + 1 + 4 + 4 + 8;
pub const THREAD_START_SIZE: usize = EXT_HEADER_SIZE + 4 + 8 + THREAD_NAME_LENGTH;
pub const MODULE_SIZE: usize = EXT_HEADER_SIZE + 2 + 4 + MODULE_NAME_LENGTH;

const CONTAINER_SIZE_BITS: u32 = 27;
const EXT_TYPE_BITS: u32 = 5;
const EXT_SUBTYPE_BITS: u32 = 5;

/// Outcome of comparing the first word of a buffer against [`FILE_MARKER`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MarkerCheck {
    Valid,
    /// The marker is present but in the other byte order.
    Swapped,
    Invalid(u64),
}

pub fn check_marker(marker: u64) -> MarkerCheck {
    if marker == FILE_MARKER {
        MarkerCheck::Valid
    } else if marker == FILE_MARKER.swap_bytes() {
        MarkerCheck::Swapped
    } else {
        MarkerCheck::Invalid(marker)
    }
}

/// Header found at offset zero of every dump.
///
/// # Format
///
/// `| marker: le64 | pid: le32 | start_hi: le32 | start_lo: le32 | process: [le16; 256] |
/// host: [le16; 256] |`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileHeader {
    marker: u64,
    process_id: u32,
    start_hi: u32,
    start_lo: u32,
    process_name: String,
    host_name: String,
}

impl FileHeader {
    /// Parses the fixed header. The marker is decoded but not validated here.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(Error::NotEnoughBytes)?;
        }
        let (marker, bytes) = parse_le64(bytes)?;
        let (process_id, bytes) = parse_le32(bytes)?;
        let (start_hi, bytes) = parse_le32(bytes)?;
        let (start_lo, bytes) = parse_le32(bytes)?;
        let (process, host) = bytes.split_at(2 * PROCESS_NAME_LENGTH);
        Ok(Self {
            marker,
            process_id,
            start_hi,
            start_lo,
            process_name: utf16_until_nul(process),
            host_name: utf16_until_nul(&host[..2 * HOST_NAME_LENGTH]),
        })
    }

    pub fn marker(&self) -> u64 {
        self.marker
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Process start time in 100 ns ticks since 1601-01-01 UTC.
    pub fn start_ticks(&self) -> u64 {
        ((self.start_hi as u64) << 32) | self.start_lo as u64
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }
}

/// Framing word of the outer container stream.
///
/// # Format
///
/// `| size: 27 bits | channel: 5 bits |` packed into one `le32`, size in the low bits. The size
/// includes the header itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHeader {
    size: u32,
    channel: u8,
}

impl ContainerHeader {
    pub fn from_word(word: u32) -> Self {
        Self {
            size: word & ((1 << CONTAINER_SIZE_BITS) - 1),
            channel: (word >> CONTAINER_SIZE_BITS) as u8,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let (word, _) = parse_le32(bytes)?;
        Ok(Self::from_word(word))
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }
}

/// Enumeration of trace extension subtypes.
///
/// This corresponds to bits 5..10 of an extension header.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Subtype {
    Info = 0,
    Desc = 1,
    Data = 2,
    Verb = 3,
    Close = 4,
    ThreadStart = 5,
    ThreadStop = 6,
    Module = 7,
    Delete = 8,
    UtcOffset = 9,
}

impl TryFrom<u8> for Subtype {
    type Error = UnknownSubtype;

    #[inline]
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Info),
            1 => Ok(Self::Desc),
            2 => Ok(Self::Data),
            3 => Ok(Self::Verb),
            4 => Ok(Self::Close),
            5 => Ok(Self::ThreadStart),
            6 => Ok(Self::ThreadStop),
            7 => Ok(Self::Module),
            8 => Ok(Self::Delete),
            9 => Ok(Self::UtcOffset),
            _ => Err(UnknownSubtype(value)),
        }
    }
}

impl std::fmt::Display for Subtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Framing word of a record inside a container payload.
///
/// # Format
///
/// `| type: 5 bits | subtype: 5 bits | size: 22 bits |` packed into one `le32`, type in the low
/// bits. The size includes the header itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExtHeader {
    kind: u8,
    subtype: u8,
    size: u32,
}

impl ExtHeader {
    pub fn from_word(word: u32) -> Self {
        Self {
            kind: (word & ((1 << EXT_TYPE_BITS) - 1)) as u8,
            subtype: ((word >> EXT_TYPE_BITS) & ((1 << EXT_SUBTYPE_BITS) - 1)) as u8,
            size: word >> (EXT_TYPE_BITS + EXT_SUBTYPE_BITS),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let (word, _) = parse_le32(bytes)?;
        Ok(Self::from_word(word))
    }

    /// The extension family; trace records use type 0.
    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn subtype(&self) -> Result<Subtype, UnknownSubtype> {
        Subtype::try_from(self.subtype)
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }
}

/// Severity of a trace event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Unknown(u32),
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warning,
        Level::Error,
        Level::Critical,
    ];

    /// Canonical display label. Unknown levels have an empty label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Trace => "Trace",
            Self::Debug => "Debug",
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Critical => "Critical",
            Self::Unknown(_) => "",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|level| level.label().eq_ignore_ascii_case(label))
    }
}

impl From<u32> for Level {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warning,
            4 => Self::Error,
            5 => Self::Critical,
            n => Self::Unknown(n),
        }
    }
}

impl From<u8> for Level {
    fn from(value: u8) -> Self {
        Self::from(value as u32)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.label())
    }
}

impl Serialize for Level {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Type tag of a trace argument.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ArgType {
    /// Tag 0x01 doubles as `char` and `int8`.
    Int8,
    Char16,
    Int16,
    Int32,
    Int64,
    Double,
    Pointer,
    Utf16Str,
    AnsiStr,
    Utf8Str,
    Utf32Str,
    Char32,
    IntMax,
    Unknown(u8),
}

impl From<u8> for ArgType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::Int8,
            0x02 => Self::Char16,
            0x03 => Self::Int16,
            0x04 => Self::Int32,
            0x05 => Self::Int64,
            0x06 => Self::Double,
            0x07 => Self::Pointer,
            0x08 => Self::Utf16Str,
            0x09 => Self::AnsiStr,
            0x0a => Self::Utf8Str,
            0x0b => Self::Utf32Str,
            0x0c => Self::Char32,
            0x0d => Self::IntMax,
            n => Self::Unknown(n),
        }
    }
}

impl ArgType {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Int8 => 0x01,
            Self::Char16 => 0x02,
            Self::Int16 => 0x03,
            Self::Int32 => 0x04,
            Self::Int64 => 0x05,
            Self::Double => 0x06,
            Self::Pointer => 0x07,
            Self::Utf16Str => 0x08,
            Self::AnsiStr => 0x09,
            Self::Utf8Str => 0x0a,
            Self::Utf32Str => 0x0b,
            Self::Char32 => 0x0c,
            Self::IntMax => 0x0d,
            Self::Unknown(n) => *n,
        }
    }

    /// Width used when a descriptor declares a fixed-width argument with size zero.
    pub fn natural_size(&self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Char16 | Self::Int16 => 2,
            Self::Int32 | Self::Char32 => 4,
            Self::Int64 | Self::Double | Self::Pointer | Self::IntMax => 8,
            Self::Utf16Str | Self::AnsiStr | Self::Utf8Str | Self::Utf32Str | Self::Unknown(_) => {
                0
            }
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self,
            Self::Utf16Str | Self::AnsiStr | Self::Utf8Str | Self::Utf32Str
        )
    }
}

/// One entry of a descriptor's argument list.
///
/// # Format
///
/// `| type: u8 | size: u8 |`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ArgDesc {
    ty: ArgType,
    size: u8,
}

impl ArgDesc {
    pub fn new(ty: ArgType, size: u8) -> Self {
        Self { ty, size }
    }

    pub fn ty(&self) -> ArgType {
        self.ty
    }

    /// Declared width in bytes. Strings are declared with size zero.
    pub fn size(&self) -> u8 {
        self.size
    }
}

/// Stream description and timer calibration.
///
/// # Format
///
/// `| header | time_hi: le32 | time_lo: le32 | timer: le64 | frequency: le64 | flags: le64 |
/// name: [le16; 64] |`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Info {
    time_hi: u32,
    time_lo: u32,
    timer_value: u64,
    timer_frequency: u64,
    flags: u64,
    name: String,
}

impl Info {
    pub fn parse(record: &[u8]) -> Result<Self, ParseError> {
        if record.len() < INFO_SIZE {
            return Err(Error::NotEnoughBytes)?;
        }
        let bytes = &record[EXT_HEADER_SIZE..];
        let (time_hi, bytes) = parse_le32(bytes)?;
        let (time_lo, bytes) = parse_le32(bytes)?;
        let (timer_value, bytes) = parse_le64(bytes)?;
        let (timer_frequency, bytes) = parse_le64(bytes)?;
        let (flags, bytes) = parse_le64(bytes)?;
        Ok(Self {
            time_hi,
            time_lo,
            timer_value,
            timer_frequency,
            flags,
            name: utf16_until_nul(&bytes[..2 * STREAM_NAME_LENGTH]),
        })
    }

    /// Stream time in 100 ns ticks since 1601-01-01 UTC.
    pub fn time_ticks(&self) -> u64 {
        ((self.time_hi as u64) << 32) | self.time_lo as u64
    }

    pub fn timer_value(&self) -> u64 {
        self.timer_value
    }

    pub fn timer_frequency(&self) -> u64 {
        self.timer_frequency
    }

    pub fn flags(&self) -> u64 {
        self.flags
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Trace-point descriptor: how to render events carrying its id.
///
/// # Format
///
/// `| header | id: le16 | line: le16 | module: le16 | args_len: le16 |
/// args: [arg; args_len] | template: utf16z | file: utf8z | function: utf8z |`
///
/// The variable part is copied out into owned values, so the record buffer may be released
/// once parsing is done.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Desc {
    id: u16,
    line: u16,
    module_id: u16,
    args: Vec<ArgDesc>,
    template: String,
    file_path: String,
    function: String,
}

impl Desc {
    pub fn new(
        id: u16,
        line: u16,
        module_id: u16,
        args: Vec<ArgDesc>,
        template: String,
        file_path: String,
        function: String,
    ) -> Self {
        Self {
            id,
            line,
            module_id,
            args,
            template,
            file_path,
            function,
        }
    }

    pub fn parse(record: &[u8]) -> Result<Self, ParseError> {
        if record.len() < DESC_HEADER_SIZE {
            return Err(Error::NotEnoughBytes)?;
        }
        let bytes = &record[EXT_HEADER_SIZE..];
        let (id, bytes) = parse_le16(bytes)?;
        let (line, bytes) = parse_le16(bytes)?;
        let (module_id, bytes) = parse_le16(bytes)?;
        let (args_len, bytes) = parse_le16(bytes)?;

        let args_size = 2 * args_len as usize;
        let args = bytes
            .get(..args_size)
            .ok_or(Error::record("args", Error::NotEnoughBytes))?
            .chunks_exact(2)
            .map(|arg| ArgDesc::new(ArgType::from(arg[0]), arg[1]))
            .collect();

        let (template, rest) = split_utf16z(&bytes[args_size..]);
        let (file_path, rest) = split_utf8z(rest);
        let (function, _) = split_utf8z(rest);

        Ok(Self {
            id,
            line,
            module_id,
            args,
            template,
            file_path,
            function,
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn line(&self) -> u16 {
        self.line
    }

    pub fn module_id(&self) -> u16 {
        self.module_id
    }

    pub fn args(&self) -> &[ArgDesc] {
        &self.args
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// The part of the file path after the last `/` or `\`.
    pub fn file_name(&self) -> &str {
        match self.file_path.rfind(|c: char| c == '/' || c == '\\') {
            Some(pos) => &self.file_path[pos + 1..],
            None => &self.file_path,
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }
}

/// A single trace event as captured.
///
/// # Format
///
/// `| header | id: le16 | level: u8 | cpu: u8 | thread: le32 | sequence: le32 | timer: le64 |
/// args: [u8] |`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Data<'d> {
    id: u16,
    level: Level,
    processor: u8,
    thread_id: u32,
    sequence: u32,
    timer: u64,
    args: &'d [u8],
}

impl<'d> Data<'d> {
    /// Parses the fixed part of a data record. Everything after it is handed out as argument
    /// bytes; the declared record size is not used to bound them.
    pub fn parse(record: &'d [u8]) -> Result<Self, ParseError> {
        if record.len() < DATA_HEADER_SIZE {
            return Err(Error::NotEnoughBytes)?;
        }
        let bytes = &record[EXT_HEADER_SIZE..];
        let (id, bytes) = parse_le16(bytes)?;
        let (level, bytes) = parse_u8(bytes)?;
        let (processor, bytes) = parse_u8(bytes)?;
        let (thread_id, bytes) = parse_le32(bytes)?;
        let (sequence, bytes) = parse_le32(bytes)?;
        let (timer, args) = parse_le64(bytes)?;
        Ok(Self {
            id,
            level: Level::from(level),
            processor,
            thread_id,
            sequence,
            timer,
            args,
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn processor(&self) -> u8 {
        self.processor
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn timer(&self) -> u64 {
        self.timer
    }

    pub fn args(&self) -> &'d [u8] {
        self.args
    }
}

/// Announces a thread and its name.
///
/// # Format
///
/// `| header | thread: le32 | timer: le64 | name: [u8; 48] |`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadStart {
    thread_id: u32,
    timer: u64,
    name: String,
}

impl ThreadStart {
    pub fn parse(record: &[u8]) -> Result<Self, ParseError> {
        if record.len() < THREAD_START_SIZE {
            return Err(Error::NotEnoughBytes)?;
        }
        let bytes = &record[EXT_HEADER_SIZE..];
        let (thread_id, bytes) = parse_le32(bytes)?;
        let (timer, bytes) = parse_le64(bytes)?;
        let (name, _) = split_utf8z(&bytes[..THREAD_NAME_LENGTH]);
        Ok(Self {
            thread_id,
            timer,
            name,
        })
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn timer(&self) -> u64 {
        self.timer
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Announces a module with its verbosity threshold.
///
/// # Format
///
/// `| header | module: le16 | verbosity: le32 | name: [u8; 54] |`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Module {
    id: u16,
    verbosity: Level,
    name: String,
}

impl Module {
    pub fn parse(record: &[u8]) -> Result<Self, ParseError> {
        if record.len() < MODULE_SIZE {
            return Err(Error::NotEnoughBytes)?;
        }
        let bytes = &record[EXT_HEADER_SIZE..];
        let (id, bytes) = parse_le16(bytes)?;
        let (verbosity, bytes) = parse_le32(bytes)?;
        let (name, _) = split_utf8z(&bytes[..MODULE_NAME_LENGTH]);
        Ok(Self {
            id,
            verbosity: Level::from(verbosity),
            name,
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn verbosity(&self) -> Level {
        self.verbosity
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Decodes a fixed-capacity UTF-16 field up to its first NUL unit.
pub fn utf16_until_nul(bytes: &[u8]) -> String {
    split_utf16z(bytes).0
}

/// Splits a NUL-terminated UTF-16 string off the front of `bytes`.
///
/// A missing terminator takes everything up to the last whole code unit.
pub fn split_utf16z(bytes: &[u8]) -> (String, &[u8]) {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    let consumed = (2 * units.len() + 2).min(bytes.len());
    (String::from_utf16_lossy(&units), &bytes[consumed..])
}

/// Splits a NUL-terminated UTF-8 string off the front of `bytes`.
///
/// A missing terminator takes the whole slice.
pub fn split_utf8z(bytes: &[u8]) -> (String, &[u8]) {
    match bytes.iter().position(|b| *b == 0) {
        Some(end) => (
            String::from_utf8_lossy(&bytes[..end]).into_owned(),
            &bytes[end + 1..],
        ),
        None => (String::from_utf8_lossy(bytes).into_owned(), &[]),
    }
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ParseError(#[from] Error);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse {0:} field")]
    ParseField(String, #[source] Box<Error>),

    #[error("record data does not contain enough bytes")]
    NotEnoughBytes,
}

impl Error {
    fn record(s: &str, e: Error) -> Self {
        Self::ParseField(String::from(s), Box::new(e))
    }
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("unknown record subtype: {0:x}")]
pub struct UnknownSubtype(pub u8);

macro_rules! generate_parse_func {
    ($name:ident,$ty:ty,$impl:expr) => {
        pub fn $name(bytes: &[u8]) -> Result<($ty, &[u8]), ParseError> {
            let mut buffer = [0u8; ::std::mem::size_of::<$ty>()];
            if bytes.len() < ::std::mem::size_of::<$ty>() {
                return Err(Error::NotEnoughBytes.into());
            }
            let (left, right) = bytes.split_at(::std::mem::size_of::<$ty>());
            buffer.as_mut_slice().copy_from_slice(left);
            Ok(($impl(buffer), right))
        }
    };
}

generate_parse_func!(parse_u8, u8, u8::from_le_bytes);
generate_parse_func!(parse_le16, u16, u16::from_le_bytes);
generate_parse_func!(parse_le32, u32, u32::from_le_bytes);
generate_parse_func!(parse_le64, u64, u64::from_le_bytes);
