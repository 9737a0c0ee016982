use crate::collection::{Collection, CursorReaper, CursorRegistry, Document};
use crate::common::NAMESPACE_SEPARATOR;
use crate::config::EngineConfig;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::oplog::{MemoryOplog, NoopOplog, Oplog};
use crate::store::MemoryStore;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct DolomiteInner {
    pub(crate) config: EngineConfig,
    pub(crate) collections: DashMap<String, Collection>,
    pub(crate) cursors: Arc<CursorRegistry>,
    pub(crate) oplog: Arc<dyn Oplog>,
    // kept for the lifetime of the engine; dropping it cancels the reaping
    // schedule
    cursor_reaper: Mutex<Option<CursorReaper>>,
}

/// The engine: named collections, the cursor registry and the oplog sink.
///
/// The handle is cheap to clone; all clones share state. Global mutable
/// state is limited to the cursor registry and the oplog sink, each guarded
/// by its own synchronization; everything else lives inside the per-
/// collection locks.
///
/// # Examples
///
/// ```rust,ignore
/// use dolomite::{doc, Dolomite};
/// use dolomite::config::EngineConfig;
///
/// let engine = Dolomite::open(EngineConfig::new())?;
/// let users = engine.collection("app.users")?;
/// users.insert_one(doc! { name: "Alice" })?;
/// ```
#[derive(Clone)]
pub struct Dolomite {
    inner: Arc<DolomiteInner>,
}

impl Dolomite {
    /// Opens an engine with the given configuration.
    ///
    /// With `oplog_enabled` the engine retains entries in an in-memory
    /// sink; otherwise entries are discarded. Use [Dolomite::open_with_oplog]
    /// to attach a custom sink.
    pub fn open(config: EngineConfig) -> DolomiteResult<Dolomite> {
        let oplog: Arc<dyn Oplog> = if config.oplog_enabled() {
            Arc::new(MemoryOplog::new())
        } else {
            Arc::new(NoopOplog::new())
        };
        Dolomite::open_with_oplog(config, oplog)
    }

    /// Opens an engine with a custom oplog sink.
    pub fn open_with_oplog(
        config: EngineConfig,
        oplog: Arc<dyn Oplog>,
    ) -> DolomiteResult<Dolomite> {
        config.validate()?;
        let cursors = Arc::new(CursorRegistry::new());
        let reaper = CursorReaper::spawn(&cursors, Duration::from_millis(config.cursor_ttl_ms()));
        let inner = Arc::new(DolomiteInner {
            config,
            collections: DashMap::new(),
            cursors,
            oplog,
            cursor_reaper: Mutex::new(Some(reaper)),
        });
        Ok(Dolomite { inner })
    }

    pub(crate) fn from_inner(inner: Arc<DolomiteInner>) -> Dolomite {
        Dolomite { inner }
    }

    /// Resolves a collection by its full name, `database.collection`,
    /// creating it if absent.
    pub fn collection(&self, full_name: &str) -> DolomiteResult<Collection> {
        let (database, name) = match full_name.split_once(NAMESPACE_SEPARATOR) {
            Some(parts) => parts,
            None => {
                return Err(invalid_namespace(full_name));
            }
        };
        self.collection_in(database, name)
    }

    /// Resolves a collection inside a database, creating it if absent.
    pub fn collection_in(&self, database: &str, name: &str) -> DolomiteResult<Collection> {
        if database.is_empty() || name.is_empty() || database.contains('$') || name.contains('$')
        {
            return Err(invalid_namespace(&format!(
                "{}{}{}",
                database, NAMESPACE_SEPARATOR, name
            )));
        }
        let full_name = format!("{}{}{}", database, NAMESPACE_SEPARATOR, name);
        let collection = self
            .inner
            .collections
            .entry(full_name)
            .or_insert_with(|| {
                let collection = Collection::new(
                    database,
                    name,
                    Box::new(MemoryStore::new()),
                    self.inner.oplog.clone(),
                    self.inner.config.oplog_enabled(),
                );
                collection.attach_engine(Arc::downgrade(&self.inner));
                collection
            })
            .clone();
        Ok(collection)
    }

    /// Drops a collection: contents, indexes and open cursors. Returns
    /// whether the collection existed.
    pub fn drop_collection(&self, full_name: &str) -> DolomiteResult<bool> {
        match self.inner.collections.remove(full_name) {
            Some((_, collection)) => {
                collection.drop_contents()?;
                self.inner.cursors.kill_namespace(full_name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Lists the collection names of one database, sorted.
    pub fn list_collection_names(&self, database: &str) -> Vec<String> {
        let prefix = format!("{}{}", database, NAMESPACE_SEPARATOR);
        let mut names: Vec<String> = self
            .inner
            .collections
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(&prefix).map(str::to_string))
            .collect();
        names.sort();
        names
    }

    /// Drains the next batch from an open cursor. A `None` batch size uses
    /// the configured default.
    pub fn get_more(
        &self,
        cursor_id: u64,
        batch_size: Option<usize>,
    ) -> DolomiteResult<(Vec<Document>, u64)> {
        let batch_size = batch_size.unwrap_or_else(|| self.inner.config.max_batch_size());
        self.inner.cursors.get_more(cursor_id, batch_size)
    }

    /// Deallocates cursors; returns killed and not-found ids.
    pub fn kill_cursors(&self, cursor_ids: &[u64]) -> (Vec<u64>, Vec<u64>) {
        self.inner.cursors.kill_cursors(cursor_ids)
    }

    pub fn cursors(&self) -> &CursorRegistry {
        self.inner.cursors.as_ref()
    }

    pub fn oplog(&self) -> Arc<dyn Oplog> {
        self.inner.oplog.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

fn invalid_namespace(full_name: &str) -> DolomiteError {
    log::error!("Invalid namespace '{}'", full_name);
    DolomiteError::new(
        &format!("Invalid namespace specified '{}'", full_name),
        ErrorKind::InvalidNamespace,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn engine() -> Dolomite {
        Dolomite::open(EngineConfig::new()).unwrap()
    }

    #[test]
    fn test_collection_resolution() {
        let engine = engine();
        let users = engine.collection("app.users").unwrap();
        assert_eq!(users.database(), "app");
        assert_eq!(users.name(), "users");
        assert_eq!(users.full_name(), "app.users");

        // the same handle comes back
        users.insert_one(doc! { name: "Alice" }).unwrap();
        let again = engine.collection_in("app", "users").unwrap();
        assert_eq!(again.len().unwrap(), 1);
    }

    #[test]
    fn test_invalid_namespaces() {
        let engine = engine();
        assert!(engine.collection("nodatabase").is_err());
        assert!(engine.collection_in("", "users").is_err());
        assert!(engine.collection_in("app", "").is_err());
        let err = engine.collection_in("app", "us$ers").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidNamespace);
    }

    #[test]
    fn test_collection_name_with_dots() {
        // only the first separator splits the database from the collection
        let engine = engine();
        let coll = engine.collection("app.system.profile").unwrap();
        assert_eq!(coll.database(), "app");
        assert_eq!(coll.name(), "system.profile");
    }

    #[test]
    fn test_drop_collection() {
        let engine = engine();
        let coll = engine.collection("app.tmp").unwrap();
        coll.insert_one(doc! { a: 1 }).unwrap();
        assert!(engine.drop_collection("app.tmp").unwrap());
        assert!(!engine.drop_collection("app.tmp").unwrap());
        // a fresh handle starts empty
        let recreated = engine.collection("app.tmp").unwrap();
        assert!(recreated.is_empty().unwrap());
    }

    #[test]
    fn test_list_collection_names() {
        let engine = engine();
        engine.collection("app.b").unwrap();
        engine.collection("app.a").unwrap();
        engine.collection("other.c").unwrap();
        assert_eq!(engine.list_collection_names("app"), vec!["a", "b"]);
        assert_eq!(engine.list_collection_names("other"), vec!["c"]);
        assert!(engine.list_collection_names("nope").is_empty());
    }

    #[test]
    fn test_get_more_unknown_cursor() {
        let engine = engine();
        let err = engine.get_more(99, None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::CursorNotFound);
    }
}
