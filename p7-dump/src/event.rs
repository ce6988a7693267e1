//! Decoded trace events and their display helpers.

use crate::record::Level;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// 100 ns ticks between 1601-01-01 and 1970-01-01 UTC.
pub const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;

const TICKS_PER_SECOND: u64 = 10_000_000;

/// Converts 100 ns ticks since 1601-01-01 UTC into a calendar time.
///
/// Zero means the time is undefined. Ticks before 1970 have no calendar time either.
pub fn ticks_to_utc(ticks: u64) -> Option<DateTime<Utc>> {
    if ticks == 0 {
        return None;
    }
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let seconds = i64::try_from(since_epoch / TICKS_PER_SECOND).ok()?;
    let nanos = (since_epoch % TICKS_PER_SECOND) as u32 * 100;
    DateTime::from_timestamp(seconds, nanos)
}

/// Renders a time of day as `HH:MM:SS.mmm`.
pub fn format_time_of_day<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format("%H:%M:%S%.3f").to_string()
}

/// Renders a calendar time as `YYYY-MM-DD HH:MM:SS`.
pub fn format_date_time<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One DATA record, resolved against the registry at the moment it was decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TraceEvent {
    /// Position in arrival order, starting at zero.
    pub index: usize,
    pub id: u16,
    pub level: Level,
    pub sequence: u32,
    pub processor: u8,
    pub thread_id: u32,
    pub thread_name: Option<String>,
    /// Owning module of the descriptor; absent when the descriptor was not registered.
    pub module_id: Option<u16>,
    pub module_name: Option<String>,
    /// Absolute time in 100 ns ticks since 1601-01-01 UTC; zero when undefined.
    pub ticks: u64,
    pub file_path: String,
    pub file_name: String,
    pub line: u16,
    pub function: String,
    pub message: String,
}

impl TraceEvent {
    /// One-based row number.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        ticks_to_utc(self.ticks)
    }

    /// `HH:MM:SS.mmm` in UTC, or an empty string when the time is undefined.
    pub fn time_of_day(&self) -> String {
        self.time()
            .map(|time| format_time_of_day(&time))
            .unwrap_or_default()
    }

    /// `name(id)`, just `id` when the module has no name, empty when there is no module.
    pub fn module_display(&self) -> String {
        match (self.module_id, &self.module_name) {
            (Some(id), Some(name)) => format!("{name}({id})"),
            (Some(id), None) => id.to_string(),
            (None, _) => String::new(),
        }
    }

    /// `name(0xid)`, or just `0xid` when the thread has no name.
    pub fn thread_display(&self) -> String {
        match &self.thread_name {
            Some(name) => format!("{name}({:#x})", self.thread_id),
            None => format!("{:#x}", self.thread_id),
        }
    }
}
