//! Operation log emission.
//!
//! Every successful write emits at most one entry per mutated document to
//! the configured [Oplog] sink. The default sink discards entries; the
//! in-memory sink retains them for replication transports and tests.

use crate::collection::Document;
use crate::common::{Value, DOC_ID};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

/// The kind of a logged operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpKind {
    Insert,
    Update,
    Delete,
    Noop,
}

impl Display for OpKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            OpKind::Insert => "i",
            OpKind::Update => "u",
            OpKind::Delete => "d",
            OpKind::Noop => "n",
        };
        write!(f, "{}", symbol)
    }
}

/// One oplog entry: `{ts, ns, op, o, o2?}`.
#[derive(Clone, Debug)]
pub struct OplogEntry {
    /// Logical timestamp: seconds plus an ordinal within the second.
    pub ts: Value,
    /// Full namespace, `database.collection`.
    pub ns: String,
    pub op: OpKind,
    /// The operation document: inserted image, update image, or delete key.
    pub o: Document,
    /// For updates, the `{_id}` selector of the mutated document.
    pub o2: Option<Document>,
}

impl OplogEntry {
    pub fn new(ns: &str, op: OpKind, o: Document, o2: Option<Document>) -> OplogEntry {
        OplogEntry {
            ts: next_timestamp(),
            ns: ns.to_string(),
            op,
            o,
            o2,
        }
    }

    /// Builds the `{_id}` selector for an update entry.
    pub fn id_selector(document: &Document) -> Option<Document> {
        let id = document.get(DOC_ID)?;
        let mut selector = Document::new();
        selector.put(DOC_ID, id.clone()).ok()?;
        Some(selector)
    }
}

// ordinals increment within one wall-clock second, so entries are totally
// ordered even under bursts
static TIMESTAMP_STATE: Lazy<Mutex<(u32, u32)>> = Lazy::new(|| Mutex::new((0, 0)));

fn next_timestamp() -> Value {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as u32)
        .unwrap_or(0);
    let mut state = TIMESTAMP_STATE.lock();
    if state.0 == seconds {
        state.1 += 1;
    } else {
        *state = (seconds, 1);
    }
    Value::Timestamp {
        time: state.0,
        increment: state.1,
    }
}

/// Sink for oplog entries.
pub trait Oplog: Send + Sync {
    fn append(&self, entry: OplogEntry);

    fn as_any(&self) -> &dyn std::any::Any;
}

/// The default sink: discards every entry.
#[derive(Default)]
pub struct NoopOplog;

impl NoopOplog {
    pub fn new() -> Self {
        NoopOplog
    }
}

impl Oplog for NoopOplog {
    fn append(&self, _entry: OplogEntry) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// An in-memory sink retaining entries in append order.
#[derive(Default)]
pub struct MemoryOplog {
    entries: Mutex<Vec<OplogEntry>>,
}

impl MemoryOplog {
    pub fn new() -> Self {
        MemoryOplog::default()
    }

    pub fn entries(&self) -> Vec<OplogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Oplog for MemoryOplog {
    fn append(&self, entry: OplogEntry) {
        self.entries.lock().push(entry);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
