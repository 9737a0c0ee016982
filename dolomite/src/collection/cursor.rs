use crate::collection::{Collection, Document, FindOptions};
use crate::common::Value;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::filter::Filter;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use timer::{Guard, Timer};

/// A server-side cursor over a query result.
///
/// Cursors hold no collection lock between batches. Each `getMore`
/// reacquires a shared lock, re-runs the query, and re-positions via the
/// last `_id` returned, so a batch observes a per-batch snapshot; this is
/// the documented semantic.
pub(crate) struct ServerCursor {
    namespace: String,
    collection: Collection,
    filter: Filter,
    options: FindOptions,
    returned: usize,
    last_id: Option<Value>,
    last_accessed: Instant,
}

impl ServerCursor {
    pub(crate) fn new(
        collection: Collection,
        filter: Filter,
        options: FindOptions,
        returned: usize,
        last_id: Option<Value>,
    ) -> ServerCursor {
        ServerCursor {
            namespace: collection.full_name(),
            collection,
            filter,
            options,
            returned,
            last_id,
            last_accessed: Instant::now(),
        }
    }

    fn next_batch(&mut self, batch_size: usize) -> DolomiteResult<(Vec<Document>, bool)> {
        self.last_accessed = Instant::now();
        let snapshot = self
            .collection
            .run_query_snapshot(&self.filter, &self.options)?;

        // re-position after the last id returned; if that document is gone,
        // fall back to the running count
        let start = match &self.last_id {
            Some(last_id) => snapshot
                .iter()
                .position(|document| document.id() == Some(last_id))
                .map(|position| position + 1)
                .unwrap_or_else(|| self.returned.min(snapshot.len())),
            None => self.returned.min(snapshot.len()),
        };
        let end = (start + batch_size).min(snapshot.len());

        let batch = &snapshot[start..end];
        self.returned += batch.len();
        self.last_id = batch.last().and_then(|document| document.id().cloned());

        let mut projected = Vec::with_capacity(batch.len());
        for document in batch {
            match self.options.projection() {
                Some(projection) => projected.push(projection.project(document)?),
                None => projected.push(document.clone()),
            }
        }
        Ok((projected, end >= snapshot.len()))
    }
}

/// Registry of open cursors, addressed by a nonzero 64-bit id.
///
/// The registry map protects only insert, lookup and removal; each entry
/// carries its own mutex for batch retrieval. Cursor id 0 is the terminal
/// id and is never allocated.
pub struct CursorRegistry {
    cursors: DashMap<u64, Arc<Mutex<ServerCursor>>>,
    next_id: AtomicU64,
}

impl Default for CursorRegistry {
    fn default() -> Self {
        CursorRegistry::new()
    }
}

impl CursorRegistry {
    pub fn new() -> CursorRegistry {
        CursorRegistry {
            cursors: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn register(&self, cursor: ServerCursor) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.cursors.insert(id, Arc::new(Mutex::new(cursor)));
        id
    }

    /// Drains up to `batch_size` documents from a cursor. Returns the batch
    /// and the cursor id to use for the next call; an exhausted cursor is
    /// deallocated and reported with id 0.
    pub fn get_more(
        &self,
        cursor_id: u64,
        batch_size: usize,
    ) -> DolomiteResult<(Vec<Document>, u64)> {
        let entry = self
            .cursors
            .get(&cursor_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                log::error!("Cursor id {} not found", cursor_id);
                DolomiteError::new(
                    &format!("cursor id {} not found", cursor_id),
                    ErrorKind::CursorNotFound,
                )
            })?;

        let (batch, exhausted) = entry.lock().next_batch(batch_size)?;
        if exhausted {
            self.cursors.remove(&cursor_id);
            Ok((batch, 0))
        } else {
            Ok((batch, cursor_id))
        }
    }

    /// Deallocates cursors, reporting which ids were killed and which were
    /// not found.
    pub fn kill_cursors(&self, cursor_ids: &[u64]) -> (Vec<u64>, Vec<u64>) {
        let mut killed = Vec::new();
        let mut not_found = Vec::new();
        for cursor_id in cursor_ids {
            if self.cursors.remove(cursor_id).is_some() {
                killed.push(*cursor_id);
            } else {
                not_found.push(*cursor_id);
            }
        }
        (killed, not_found)
    }

    /// Removes cursors idle for longer than the TTL. Returns how many were
    /// reaped.
    pub fn reap_expired(&self, ttl: Duration) -> usize {
        let mut expired = Vec::new();
        for entry in self.cursors.iter() {
            let cursor = entry.value().lock();
            if cursor.last_accessed.elapsed() > ttl {
                expired.push(*entry.key());
            }
        }
        let count = expired.len();
        for cursor_id in expired {
            self.cursors.remove(&cursor_id);
            log::debug!("Reaped idle cursor {}", cursor_id);
        }
        count
    }

    /// Kills every cursor of a namespace; used when a collection is
    /// dropped.
    pub(crate) fn kill_namespace(&self, namespace: &str) {
        let mut doomed = Vec::new();
        for entry in self.cursors.iter() {
            if entry.value().lock().namespace == namespace {
                doomed.push(*entry.key());
            }
        }
        for cursor_id in doomed {
            self.cursors.remove(&cursor_id);
        }
    }

    pub fn open_cursor_count(&self) -> usize {
        self.cursors.len()
    }
}

/// Reaps idle cursors on a schedule.
///
/// The repeating task calls [CursorRegistry::reap_expired] at half the TTL,
/// holding only a weak reference to the registry, so a reaper never keeps a
/// dropped engine's cursors alive. Dropping the reaper cancels the schedule.
pub(crate) struct CursorReaper {
    timer: Timer,
    guard: Option<Guard>,
}

impl CursorReaper {
    /// Schedules reaping of cursors idle past `ttl`. The check interval is
    /// half the TTL, bounded between one second and one minute.
    pub(crate) fn spawn(registry: &Arc<CursorRegistry>, ttl: Duration) -> CursorReaper {
        let timer = Timer::new();
        let interval = (ttl / 2).clamp(Duration::from_secs(1), Duration::from_secs(60));
        let guard = match chrono::Duration::from_std(interval) {
            Ok(interval) => {
                let registry = Arc::downgrade(registry);
                Some(timer.schedule_repeating(interval, move || {
                    if let Some(registry) = registry.upgrade() {
                        let reaped = registry.reap_expired(ttl);
                        if reaped > 0 {
                            log::debug!("Reaped {} idle cursors", reaped);
                        }
                    }
                }))
            }
            Err(error) => {
                log::warn!("Cursor reaping disabled, TTL out of range: {}", error);
                None
            }
        };
        CursorReaper { timer, guard }
    }
}
