use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A 32-byte BLAKE3 hash used as the structural identity of dataflow nodes.
///
/// Two sibling nodes with the same `Hash32` compute the same thing and can be
/// collapsed into one by the optimizer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Verbosity of the diagnostics sink. Ordered from quiet to chatty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
}

/// A single recorded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: LogLevel,
    pub message: String,
}

/// Collected diagnostics of one compilation.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|d| d.level == LogLevel::Warn)
            .map(|d| d.message.as_str())
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }
}

/// Everything a compilation shares across the builder and the optimizer: a
/// counter for synthesized identifiers and the diagnostics sink.
///
/// There is no global state, so two compilations never observe each other.
#[derive(Debug)]
pub struct CompileContext {
    level: LogLevel,
    next_id: u64,
    diagnostics: Diagnostics,
}

impl CompileContext {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            next_id: 0,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Monotonically increasing identifier, unique within this compilation.
    pub fn unique_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    fn record(&mut self, level: LogLevel, message: String) {
        if level <= self.level && level != LogLevel::None {
            self.diagnostics.entries.push(Diagnostic { level, message });
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.record(LogLevel::Error, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.record(LogLevel::Warn, message);
    }

    /// Like [`CompileContext::warn`], but a message already recorded is not
    /// repeated. Optimizer passes may hit the same conflict on every run.
    pub fn warn_once(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.diagnostics.entries.iter().any(|d| d.message == message) {
            return;
        }
        self.warn(message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.record(LogLevel::Info, message);
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("{message}");
        self.record(LogLevel::Debug, message);
    }
}

impl Default for CompileContext {
    fn default() -> Self {
        Self::new(LogLevel::Warn)
    }
}

/// Name substitutions recorded while merging (signals, scales).
///
/// Chains are followed, so renaming `a -> b` and later `b -> c` resolves `a`
/// to `c`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Renames {
    map: BTreeMap<String, String>,
}

impl Renames {
    pub fn rename(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }
        // Never create a cycle: resolve the target first.
        let target = self.resolve(new);
        if target == old {
            return;
        }
        self.map.insert(old.to_string(), target);
    }

    pub fn resolve(&self, name: &str) -> String {
        let mut current = name;
        let mut steps = 0;
        while let Some(next) = self.map.get(current) {
            current = next;
            steps += 1;
            if steps > self.map.len() {
                break;
            }
        }
        current.to_string()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
