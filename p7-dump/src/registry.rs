//! Session-scoped lookup tables filled in by registration records.

use crate::format::{Formatter, MESSAGE_CAPACITY};
use crate::record::{Desc, Level};
use hashbrown::HashMap;
use serde::Serialize;

/// Name reported for threads and modules that were never registered.
pub const UNKNOWN_NAME: &str = "unknown";

/// 100 ns ticks per second.
const TICKS_PER_SECOND: i128 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ThreadInfo {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ModuleInfo {
    pub id: u16,
    pub verbosity: Level,
    pub name: String,
}

/// Reference point for converting raw timer snapshots into absolute time.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Calibration {
    pub reference: u64,
    pub ticks_per_second: u64,
}

impl Calibration {
    /// Converts a timer snapshot into 100 ns ticks since 1601-01-01 UTC, anchored at
    /// `start_ticks`. Returns 0 when uncalibrated or when the result would precede the epoch.
    pub fn absolute_ticks(&self, start_ticks: u64, timer: u64) -> u64 {
        if self.ticks_per_second == 0 {
            return 0;
        }
        let elapsed = (timer as i128 - self.reference as i128) * TICKS_PER_SECOND
            / self.ticks_per_second as i128;
        let ticks = start_ticks as i128 + elapsed;
        u64::try_from(ticks.max(0)).unwrap_or(u64::MAX)
    }
}

/// Threads, modules, descriptors and formatters known so far in one session.
///
/// Every table is keyed by wire id and the most recent registration wins. Nothing is ever
/// removed except a formatter whose descriptor is replaced by one without a template.
#[derive(Debug, Clone)]
pub struct Registry {
    threads: HashMap<u32, ThreadInfo>,
    modules: HashMap<u16, ModuleInfo>,
    descriptors: HashMap<u16, Desc>,
    formatters: HashMap<u16, Formatter>,
    calibration: Calibration,
    message_capacity: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(MESSAGE_CAPACITY)
    }
}

impl Registry {
    /// Creates an empty registry whose formatters render at most `message_capacity` bytes.
    pub fn new(message_capacity: usize) -> Self {
        Self {
            threads: HashMap::new(),
            modules: HashMap::new(),
            descriptors: HashMap::new(),
            formatters: HashMap::new(),
            calibration: Calibration::default(),
            message_capacity,
        }
    }

    pub fn register_thread(&mut self, id: u32, name: &str) {
        tracing::debug!(id, name, "register thread");
        self.threads.insert(
            id,
            ThreadInfo {
                id,
                name: name.to_string(),
            },
        );
    }

    pub fn register_module(&mut self, id: u16, verbosity: Level, name: &str) {
        tracing::debug!(id, %verbosity, name, "register module");
        self.modules.insert(
            id,
            ModuleInfo {
                id,
                verbosity,
                name: name.to_string(),
            },
        );
    }

    /// Stores `desc` under its id and compiles its template.
    ///
    /// An empty template leaves the id without a formatter.
    pub fn register_descriptor(&mut self, desc: Desc) {
        let id = desc.id();
        tracing::debug!(id, template = desc.template(), "register descriptor");
        if desc.template().is_empty() {
            self.formatters.remove(&id);
        } else {
            let formatter = Formatter::new(desc.template(), desc.args(), self.message_capacity);
            self.formatters.insert(id, formatter);
        }
        self.descriptors.insert(id, desc);
    }

    pub fn set_calibration(&mut self, reference: u64, ticks_per_second: u64) {
        tracing::debug!(reference, ticks_per_second, "set timer calibration");
        self.calibration = Calibration {
            reference,
            ticks_per_second,
        };
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn thread(&self, id: u32) -> Option<&ThreadInfo> {
        self.threads.get(&id)
    }

    pub fn module(&self, id: u16) -> Option<&ModuleInfo> {
        self.modules.get(&id)
    }

    /// Name of thread `id`, or [`UNKNOWN_NAME`].
    pub fn lookup_thread(&self, id: u32) -> &str {
        self.thread(id).map_or(UNKNOWN_NAME, |thread| &thread.name)
    }

    /// Name of module `id`, or [`UNKNOWN_NAME`].
    pub fn lookup_module(&self, id: u16) -> &str {
        self.module(id).map_or(UNKNOWN_NAME, |module| &module.name)
    }

    pub fn descriptor(&self, id: u16) -> Option<&Desc> {
        self.descriptors.get(&id)
    }

    pub fn formatter(&self, id: u16) -> Option<&Formatter> {
        self.formatters.get(&id)
    }

    /// Registered threads ordered by id.
    pub fn threads(&self) -> Vec<&ThreadInfo> {
        let mut threads: Vec<_> = self.threads.values().collect();
        threads.sort_by_key(|thread| thread.id);
        threads
    }

    /// Registered modules ordered by id.
    pub fn modules(&self) -> Vec<&ModuleInfo> {
        let mut modules: Vec<_> = self.modules.values().collect();
        modules.sort_by_key(|module| module.id);
        modules
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }
}
