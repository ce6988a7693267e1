//! Rendering of trace messages from a printf-style template and serialized arguments.
//!
//! A [`Formatter`] is compiled once per descriptor. The template is split into literal text and
//! conversion specifiers, and each specifier consumes the next argument of the descriptor's
//! argument list. Arguments are read out of the raw bytes strictly in list order: fixed-width
//! types use their declared width, strings run up to a NUL in their own code-unit width.

use crate::record::{ArgDesc, ArgType};

/// Output capacity used for every event message.
pub const MESSAGE_CAPACITY: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("template needs argument {index} but only {count} are declared")]
    MissingArgument { index: usize, count: usize },

    #[error("argument {index} needs {needed} bytes but only {available} remain")]
    NotEnoughBytes {
        index: usize,
        needed: usize,
        available: usize,
    },

    #[error("string argument {index} has no terminator")]
    Unterminated { index: usize },

    #[error("'%{conversion}' cannot render argument {index} of type {ty:?}")]
    Mismatch {
        index: usize,
        conversion: char,
        ty: ArgType,
    },

    #[error("argument {index} has type tag {tag:#x} and no declared width")]
    UnknownArgType { index: usize, tag: u8 },

    #[error("argument {index} declares {size} bytes for a floating point value")]
    FloatWidth { index: usize, size: usize },

    #[error("unsupported conversion '%{0}'")]
    BadConversion(char),

    #[error("template ends inside a conversion specifier")]
    Incomplete,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
struct Flags {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Count {
    Implied,
    Fixed(usize),
    /// `*`: taken from the next argument.
    Next,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Length {
    Default,
    Char,
    Short,
    Wide,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum FloatStyle {
    Fixed,
    Exp,
    General,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Conversion {
    Signed,
    Unsigned,
    Octal,
    Hex { upper: bool },
    Float { style: FloatStyle, upper: bool },
    Char,
    Str,
    Pointer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Spec {
    flags: Flags,
    width: Count,
    precision: Count,
    length: Length,
    conversion: Conversion,
    letter: char,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Atom {
    Literal(String),
    Spec(Spec),
    Invalid(FormatError),
}

/// A compiled message template bound to an argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formatter {
    atoms: Vec<Atom>,
    args: Vec<ArgDesc>,
    capacity: usize,
}

impl Formatter {
    /// Compiles `template` for arguments described by `args`.
    ///
    /// Compilation never fails; a malformed specifier is kept and reported by [`render`].
    ///
    /// [`render`]: Formatter::render
    pub fn new(template: &str, args: &[ArgDesc], capacity: usize) -> Self {
        Self {
            atoms: parse_template(template),
            args: args.to_vec(),
            capacity,
        }
    }

    /// Renders the template against `raw` argument bytes.
    ///
    /// Output longer than the capacity is cut at the last character boundary that fits.
    pub fn render(&self, raw: &[u8]) -> Result<String, FormatError> {
        let mut cursor = ArgCursor {
            args: &self.args,
            bytes: raw,
            next: 0,
        };
        let mut out = String::new();
        for atom in &self.atoms {
            if out.len() >= self.capacity {
                break;
            }
            match atom {
                Atom::Literal(text) => out.push_str(text),
                Atom::Spec(spec) => {
                    let room = self.capacity.saturating_sub(out.len());
                    render_spec(spec, &mut cursor, room, &mut out)?
                }
                Atom::Invalid(err) => return Err(err.clone()),
            }
        }
        truncate_at_boundary(&mut out, self.capacity);
        Ok(out)
    }
}

fn truncate_at_boundary(text: &mut String, capacity: usize) {
    if text.len() <= capacity {
        return;
    }
    let mut end = capacity;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

fn parse_template(template: &str) -> Vec<Atom> {
    let mut atoms = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            literal.push('%');
            continue;
        }
        if !literal.is_empty() {
            atoms.push(Atom::Literal(std::mem::take(&mut literal)));
        }

        let mut flags = Flags::default();
        while let Some(&c) = chars.peek() {
            match c {
                '-' => flags.left = true,
                '+' => flags.plus = true,
                ' ' => flags.space = true,
                '#' => flags.alt = true,
                '0' => flags.zero = true,
                _ => break,
            }
            chars.next();
        }

        let width = parse_count(&mut chars);
        let precision = if chars.peek() == Some(&'.') {
            chars.next();
            match parse_count(&mut chars) {
                Count::Implied => Count::Fixed(0),
                count => count,
            }
        } else {
            Count::Implied
        };

        let mut length = Length::Default;
        while let Some(&c) = chars.peek() {
            match c {
                'h' => {
                    length = match length {
                        Length::Short => Length::Char,
                        _ => Length::Short,
                    }
                }
                'l' | 'j' | 'z' | 't' | 'L' | 'q' | 'w' => length = Length::Wide,
                'I' => {
                    // MSVC `I`, `I32` and `I64`
                    chars.next();
                    for digit in ['3', '2', '6', '4'] {
                        if chars.peek() == Some(&digit) {
                            chars.next();
                        }
                    }
                    length = Length::Wide;
                    continue;
                }
                _ => break,
            }
            chars.next();
        }

        let Some(letter) = chars.next() else {
            atoms.push(Atom::Invalid(FormatError::Incomplete));
            break;
        };
        let conversion = match letter {
            'd' | 'i' => Conversion::Signed,
            'u' => Conversion::Unsigned,
            'o' => Conversion::Octal,
            'x' => Conversion::Hex { upper: false },
            'X' => Conversion::Hex { upper: true },
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => Conversion::Float {
                style: match letter.to_ascii_lowercase() {
                    'f' => FloatStyle::Fixed,
                    'e' => FloatStyle::Exp,
                    _ => FloatStyle::General,
                },
                upper: letter.is_ascii_uppercase(),
            },
            'c' | 'C' => Conversion::Char,
            's' | 'S' => Conversion::Str,
            'p' => Conversion::Pointer,
            other => {
                atoms.push(Atom::Invalid(FormatError::BadConversion(other)));
                continue;
            }
        };
        atoms.push(Atom::Spec(Spec {
            flags,
            width,
            precision,
            length,
            conversion,
            letter,
        }));
    }

    if !literal.is_empty() {
        atoms.push(Atom::Literal(literal));
    }
    atoms
}

fn parse_count(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Count {
    if chars.peek() == Some(&'*') {
        chars.next();
        return Count::Next;
    }
    let mut value: Option<usize> = None;
    while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        chars.next();
        value = Some(
            value
                .unwrap_or(0)
                .saturating_mul(10)
                .saturating_add(digit as usize),
        );
    }
    value.map_or(Count::Implied, Count::Fixed)
}

/// A decoded argument value.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    /// Integers, characters and pointers, zero-extended from `bits`.
    Int { raw: u64, bits: u32 },
    Float(f64),
    Str(String),
}

impl Value {
    fn signed(raw: u64, bits: u32) -> i64 {
        if bits >= 64 {
            raw as i64
        } else {
            let shift = 64 - bits;
            ((raw << shift) as i64) >> shift
        }
    }

    fn unsigned(raw: u64, bits: u32) -> u64 {
        if bits >= 64 {
            raw
        } else {
            raw & ((1u64 << bits) - 1)
        }
    }
}

struct ArgCursor<'a> {
    args: &'a [ArgDesc],
    bytes: &'a [u8],
    next: usize,
}

impl<'a> ArgCursor<'a> {
    fn take(&mut self, index: usize, needed: usize) -> Result<&'a [u8], FormatError> {
        if self.bytes.len() < needed {
            return Err(FormatError::NotEnoughBytes {
                index,
                needed,
                available: self.bytes.len(),
            });
        }
        let (value, rest) = self.bytes.split_at(needed);
        self.bytes = rest;
        Ok(value)
    }

    /// Scans a NUL-terminated run of `unit`-byte code units, consuming the terminator.
    fn take_units(&mut self, index: usize, unit: usize) -> Result<&'a [u8], FormatError> {
        let end = self
            .bytes
            .chunks_exact(unit)
            .position(|chunk| chunk.iter().all(|b| *b == 0))
            .ok_or(FormatError::Unterminated { index })?;
        let value = &self.bytes[..end * unit];
        self.bytes = &self.bytes[(end + 1) * unit..];
        Ok(value)
    }

    fn next_value(&mut self) -> Result<(usize, ArgType, Value), FormatError> {
        let index = self.next;
        let desc = *self.args.get(index).ok_or(FormatError::MissingArgument {
            index,
            count: self.args.len(),
        })?;
        self.next += 1;

        let ty = desc.ty();
        let declared = match desc.size() as usize {
            0 => ty.natural_size(),
            n => n,
        };
        let value = match ty {
            ArgType::Utf16Str => {
                let units: Vec<u16> = self
                    .take_units(index, 2)?
                    .chunks_exact(2)
                    .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
                    .collect();
                Value::Str(String::from_utf16_lossy(&units))
            }
            ArgType::AnsiStr | ArgType::Utf8Str => {
                Value::Str(String::from_utf8_lossy(self.take_units(index, 1)?).into_owned())
            }
            ArgType::Utf32Str => Value::Str(
                self.take_units(index, 4)?
                    .chunks_exact(4)
                    .map(|unit| u32::from_le_bytes([unit[0], unit[1], unit[2], unit[3]]))
                    .map(|unit| char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect(),
            ),
            ArgType::Double => match declared {
                8 => {
                    let mut buffer = [0u8; 8];
                    buffer.copy_from_slice(self.take(index, 8)?);
                    Value::Float(f64::from_le_bytes(buffer))
                }
                4 => {
                    let mut buffer = [0u8; 4];
                    buffer.copy_from_slice(self.take(index, 4)?);
                    Value::Float(f32::from_le_bytes(buffer) as f64)
                }
                size => return Err(FormatError::FloatWidth { index, size }),
            },
            ArgType::Unknown(tag) if declared == 0 => {
                return Err(FormatError::UnknownArgType { index, tag });
            }
            _ => {
                let bytes = self.take(index, declared)?;
                let used = declared.min(8);
                let mut buffer = [0u8; 8];
                buffer[..used].copy_from_slice(&bytes[..used]);
                Value::Int {
                    raw: u64::from_le_bytes(buffer),
                    bits: 8 * used as u32,
                }
            }
        };
        Ok((index, ty, value))
    }

    /// Reads a `*` width or precision.
    fn next_count(&mut self) -> Result<i64, FormatError> {
        match self.next_value()? {
            (_, _, Value::Int { raw, bits }) => Ok(Value::signed(raw, bits)),
            (_, _, Value::Float(v)) => Ok(v as i64),
            (index, ty, Value::Str(_)) => Err(FormatError::Mismatch {
                index,
                conversion: '*',
                ty,
            }),
        }
    }
}

/// Renders one specifier into `out`.
///
/// Width and precision are capped at `room`, the capacity left in `out`; anything past it would
/// be truncated anyway.
fn render_spec(
    spec: &Spec,
    cursor: &mut ArgCursor,
    room: usize,
    out: &mut String,
) -> Result<(), FormatError> {
    let mut flags = spec.flags;
    let width = match spec.width {
        Count::Implied => 0,
        Count::Fixed(width) => width,
        Count::Next => {
            let width = cursor.next_count()?;
            if width < 0 {
                flags.left = true;
            }
            usize::try_from(width.unsigned_abs()).unwrap_or(usize::MAX)
        }
    }
    .min(room);
    let precision = match spec.precision {
        Count::Implied => None,
        Count::Fixed(precision) => Some(precision),
        Count::Next => usize::try_from(cursor.next_count()?).ok(),
    }
    .map(|precision| precision.min(room));

    let (index, ty, value) = cursor.next_value()?;
    let mismatch = || FormatError::Mismatch {
        index,
        conversion: spec.letter,
        ty,
    };
    let bits_for = |bits: u32| match spec.length {
        Length::Char => bits.min(8),
        Length::Short => bits.min(16),
        Length::Default | Length::Wide => bits,
    };

    match spec.conversion {
        Conversion::Signed => {
            let value = match value {
                Value::Int { raw, bits } => Value::signed(raw, bits_for(bits)),
                Value::Float(v) => v as i64,
                Value::Str(_) => return Err(mismatch()),
            };
            let sign = sign_prefix(value < 0, &flags);
            let digits = integer_digits(value.unsigned_abs().to_string(), precision);
            pad_numeric(out, sign, &digits, &flags, width, precision.is_none());
        }
        Conversion::Unsigned | Conversion::Octal | Conversion::Hex { .. } => {
            let value = match value {
                Value::Int { raw, bits } => Value::unsigned(raw, bits_for(bits)),
                Value::Float(v) => v as i64 as u64,
                Value::Str(_) => return Err(mismatch()),
            };
            let (prefix, digits) = match spec.conversion {
                Conversion::Octal => {
                    let digits = integer_digits(format!("{value:o}"), precision);
                    if flags.alt && !digits.starts_with('0') {
                        ("0", digits)
                    } else {
                        ("", digits)
                    }
                }
                Conversion::Hex { upper } => {
                    let digits = if upper {
                        format!("{value:X}")
                    } else {
                        format!("{value:x}")
                    };
                    let prefix = match (flags.alt && value != 0, upper) {
                        (true, true) => "0X",
                        (true, false) => "0x",
                        (false, _) => "",
                    };
                    (prefix, integer_digits(digits, precision))
                }
                _ => ("", integer_digits(value.to_string(), precision)),
            };
            pad_numeric(out, prefix, &digits, &flags, width, precision.is_none());
        }
        Conversion::Float { style, upper } => {
            let value = match value {
                Value::Int { raw, bits } => Value::signed(raw, bits) as f64,
                Value::Float(v) => v,
                Value::Str(_) => return Err(mismatch()),
            };
            let sign = sign_prefix(value.is_sign_negative() && !value.is_nan(), &flags);
            let body = float_body(value.abs(), style, precision.unwrap_or(6), flags.alt);
            let body = if upper { body.to_uppercase() } else { body };
            pad_numeric(out, sign, &body, &flags, width, value.is_finite());
        }
        Conversion::Char => {
            let c = match value {
                Value::Int { raw, bits } => {
                    char::from_u32(Value::unsigned(raw, bits) as u32)
                        .unwrap_or(char::REPLACEMENT_CHARACTER)
                }
                Value::Float(_) | Value::Str(_) => return Err(mismatch()),
            };
            let mut buffer = [0u8; 4];
            pad_text(out, c.encode_utf8(&mut buffer), &flags, width);
        }
        Conversion::Str => {
            let Value::Str(text) = value else {
                return Err(mismatch());
            };
            let text = match precision {
                Some(max) => match text.char_indices().nth(max) {
                    Some((end, _)) => &text[..end],
                    None => text.as_str(),
                },
                None => text.as_str(),
            };
            pad_text(out, text, &flags, width);
        }
        Conversion::Pointer => {
            let value = match value {
                Value::Int { raw, bits } => Value::unsigned(raw, bits),
                Value::Float(v) => v.to_bits(),
                Value::Str(_) => return Err(mismatch()),
            };
            pad_text(out, &format!("0x{value:x}"), &flags, width);
        }
    }
    Ok(())
}

fn sign_prefix(negative: bool, flags: &Flags) -> &'static str {
    if negative {
        "-"
    } else if flags.plus {
        "+"
    } else if flags.space {
        " "
    } else {
        ""
    }
}

/// Applies an integer precision: the minimum number of digits, where `.0` renders zero as nothing.
fn integer_digits(digits: String, precision: Option<usize>) -> String {
    match precision {
        Some(0) if digits == "0" => String::new(),
        Some(min) if digits.len() < min => format!("{}{digits}", "0".repeat(min - digits.len())),
        _ => digits,
    }
}

fn pad_numeric(
    out: &mut String,
    prefix: &str,
    digits: &str,
    flags: &Flags,
    width: usize,
    zero_allowed: bool,
) {
    let len = prefix.len() + digits.chars().count();
    let fill = width.saturating_sub(len);
    if flags.left {
        out.push_str(prefix);
        out.push_str(digits);
        out.extend(std::iter::repeat(' ').take(fill));
    } else if flags.zero && zero_allowed {
        out.push_str(prefix);
        out.extend(std::iter::repeat('0').take(fill));
        out.push_str(digits);
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(prefix);
        out.push_str(digits);
    }
}

fn pad_text(out: &mut String, text: &str, flags: &Flags, width: usize) {
    let fill = width.saturating_sub(text.chars().count());
    if flags.left {
        out.push_str(text);
        out.extend(std::iter::repeat(' ').take(fill));
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(text);
    }
}

/// Renders a non-negative float the way C's `%f`, `%e` and `%g` do.
fn float_body(value: f64, style: FloatStyle, precision: usize, alt: bool) -> String {
    if value.is_nan() {
        return String::from("nan");
    }
    if value.is_infinite() {
        return String::from("inf");
    }
    match style {
        FloatStyle::Fixed => {
            let mut body = format!("{value:.precision$}");
            if alt && precision == 0 {
                body.push('.');
            }
            body
        }
        FloatStyle::Exp => c_exponent(value, precision, alt),
        FloatStyle::General => {
            let precision = precision.max(1);
            let exponent = exponent_of(value, precision - 1);
            let mut body = if exponent < -4 || exponent >= precision as i32 {
                c_exponent(value, precision - 1, alt)
            } else {
                let decimals = (precision as i32 - 1 - exponent) as usize;
                format!("{value:.decimals$}")
            };
            if !alt {
                strip_fraction_zeros(&mut body);
            }
            body
        }
    }
}

/// Decimal exponent of `value` after rounding to `precision` fractional digits in exponent form.
fn exponent_of(value: f64, precision: usize) -> i32 {
    let rendered = format!("{value:.precision$e}");
    rendered
        .rsplit_once('e')
        .and_then(|(_, exponent)| exponent.parse().ok())
        .unwrap_or(0)
}

fn c_exponent(value: f64, precision: usize, alt: bool) -> String {
    let rendered = format!("{value:.precision$e}");
    let (mantissa, exponent) = rendered.rsplit_once('e').unwrap_or((&rendered, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let dot = if alt && precision == 0 { "." } else { "" };
    format!("{mantissa}{dot}e{sign}{:02}", exponent.unsigned_abs())
}

fn strip_fraction_zeros(body: &mut String) {
    let (number, exponent) = match body.find('e') {
        Some(pos) => (body[..pos].to_string(), body[pos..].to_string()),
        None => (body.clone(), String::new()),
    };
    if !number.contains('.') {
        return;
    }
    let number = number.trim_end_matches('0').trim_end_matches('.');
    *body = format!("{number}{exponent}");
}
