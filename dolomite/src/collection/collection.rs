use crate::aggregation::pipeline::StageContext;
use crate::aggregation::Pipeline;
use crate::collection::cursor::ServerCursor;
use crate::collection::{
    DeleteResult, Document, FindOptions, InsertManyResult, UpdateOptions, UpdateResult,
    WriteError,
};
use crate::common::util::document_utils::{
    get_subdocument_value_collection_aware, validate_field_names,
};
use crate::common::{CancellationToken, Value, NAMESPACE_SEPARATOR};
use crate::engine::{Dolomite, DolomiteInner};
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::filter::{parse_query, Filter};
use crate::index::{Index, IndexDescriptor};
use crate::oplog::{OpKind, Oplog, OplogEntry};
use crate::store::{DocumentStore, Position};
use crate::update::UpdateEngine;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// A named bag of documents keyed by `_id`.
///
/// The handle is cheap to clone; all clones share state. Per collection, a
/// single-writer / many-readers discipline applies: readers take the shared
/// lock for the duration of a matcher pass, writers take the exclusive lock
/// for the full cycle of match, apply, index maintenance and oplog
/// emission, so a single update is observed atomically.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("database", &self.inner.database)
            .field("name", &self.inner.name)
            .finish()
    }
}

struct CollectionInner {
    database: String,
    name: String,
    oplog: Arc<dyn Oplog>,
    oplog_enabled: bool,
    engine: OnceLock<Weak<DolomiteInner>>,
    state: RwLock<CollectionState>,
}

struct CollectionState {
    store: Box<dyn DocumentStore>,
    // normalized `_id` -> storage position; doubles as the automatic
    // `_id_` unique index
    id_positions: BTreeMap<Value, Position>,
    indexes: Vec<Index>,
}

impl Collection {
    pub(crate) fn new(
        database: &str,
        name: &str,
        store: Box<dyn DocumentStore>,
        oplog: Arc<dyn Oplog>,
        oplog_enabled: bool,
    ) -> Collection {
        Collection {
            inner: Arc::new(CollectionInner {
                database: database.to_string(),
                name: name.to_string(),
                oplog,
                oplog_enabled,
                engine: OnceLock::new(),
                state: RwLock::new(CollectionState {
                    store,
                    id_positions: BTreeMap::new(),
                    indexes: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn attach_engine(&self, engine: Weak<DolomiteInner>) {
        let _ = self.inner.engine.set(engine);
    }

    fn engine(&self) -> DolomiteResult<Dolomite> {
        self.inner
            .engine
            .get()
            .and_then(Weak::upgrade)
            .map(Dolomite::from_inner)
            .ok_or_else(|| {
                DolomiteError::new(
                    "collection is detached from its engine",
                    ErrorKind::IllegalOperation,
                )
            })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn database(&self) -> &str {
        &self.inner.database
    }

    /// The full namespace, `database.collection`.
    pub fn full_name(&self) -> String {
        format!(
            "{}{}{}",
            self.inner.database, NAMESPACE_SEPARATOR, self.inner.name
        )
    }

    pub fn len(&self) -> DolomiteResult<usize> {
        self.inner.state.read().store.len()
    }

    pub fn is_empty(&self) -> DolomiteResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Inserts one document, assigning an `_id` when absent. Returns the
    /// stored `_id`.
    pub fn insert_one(&self, document: Document) -> DolomiteResult<Value> {
        let mut state = self.inner.state.write();
        let (id, stored) = state.insert(&self.full_name(), document)?;
        self.emit(OpKind::Insert, stored, None);
        Ok(id)
    }

    /// Inserts a batch. With `ordered` the first failure aborts the batch;
    /// otherwise every failure is collected and the batch continues.
    pub fn insert_many(
        &self,
        documents: Vec<Document>,
        ordered: bool,
    ) -> DolomiteResult<InsertManyResult> {
        let ns = self.full_name();
        let mut result = InsertManyResult::default();
        let mut state = self.inner.state.write();
        for (index, document) in documents.into_iter().enumerate() {
            match state.insert(&ns, document) {
                Ok((id, stored)) => {
                    self.emit(OpKind::Insert, stored, None);
                    result.push_inserted(id);
                }
                Err(error) => {
                    result.push_error(WriteError::new(index, &error));
                    if ordered {
                        break;
                    }
                }
            }
        }
        Ok(result)
    }

    /// Finds matching documents, honoring sort, skip, limit and projection.
    pub fn find(&self, query: &Document, options: &FindOptions) -> DolomiteResult<Vec<Document>> {
        let filter = parse_query(query)?;
        let snapshot = self.run_query_snapshot(&filter, options)?;
        match options.projection() {
            Some(projection) => snapshot
                .iter()
                .map(|document| projection.project(document))
                .collect(),
            None => Ok(snapshot),
        }
    }

    pub fn find_one(&self, query: &Document) -> DolomiteResult<Option<Document>> {
        let results = self.find(query, &FindOptions::new().with_limit(1))?;
        Ok(results.into_iter().next())
    }

    /// Finds matching documents and opens a cursor when the result exceeds
    /// one batch. Returns the first batch and a cursor id; id 0 denotes an
    /// exhausted (terminal) cursor.
    pub fn find_with_cursor(
        &self,
        query: &Document,
        options: &FindOptions,
    ) -> DolomiteResult<(Vec<Document>, u64)> {
        let engine = self.engine()?;
        let batch_size = options
            .batch_size()
            .unwrap_or_else(|| engine.config().max_batch_size());
        let filter = parse_query(query)?;
        let snapshot = self.run_query_snapshot(&filter, options)?;

        let first: Vec<&Document> = snapshot.iter().take(batch_size).collect();
        let mut batch = Vec::with_capacity(first.len());
        for document in &first {
            match options.projection() {
                Some(projection) => batch.push(projection.project(document)?),
                None => batch.push((*document).clone()),
            }
        }

        if snapshot.len() <= batch_size {
            return Ok((batch, 0));
        }
        let last_id = first.last().and_then(|document| document.id().cloned());
        let cursor = ServerCursor::new(
            self.clone(),
            filter,
            options.clone(),
            batch.len(),
            last_id,
        );
        let cursor_id = engine.cursors().register(cursor);
        Ok((batch, cursor_id))
    }

    pub fn count(&self, query: &Document) -> DolomiteResult<usize> {
        let filter = parse_query(query)?;
        let state = self.inner.state.read();
        let mut count = 0;
        for (_, document) in state.store.iter_all()? {
            if filter.matches(&document)?.0 {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Collects the distinct values of a field among matching documents.
    /// Array values contribute their elements; values de-duplicate under
    /// the normalized equality rules.
    pub fn distinct(&self, field: &str, query: &Document) -> DolomiteResult<Vec<Value>> {
        let filter = parse_query(query)?;
        let state = self.inner.state.read();
        let mut values: Vec<Value> = Vec::new();
        for (_, document) in state.store.iter_all()? {
            if !filter.matches(&document)?.0 {
                continue;
            }
            let value = get_subdocument_value_collection_aware(&document, field)?;
            let candidates = match value {
                Value::Missing => continue,
                Value::Array(items) => items,
                other => vec![other],
            };
            for candidate in candidates {
                if candidate.is_missing() {
                    continue;
                }
                if !values.contains(&candidate) {
                    values.push(candidate);
                }
            }
        }
        Ok(values)
    }

    /// Updates every matching document.
    pub fn update_many(
        &self,
        query: &Document,
        update: &Document,
    ) -> DolomiteResult<UpdateResult> {
        self.update_with_options(query, update, &UpdateOptions::new(true, false))
    }

    /// Updates the first matching document.
    pub fn update_one(&self, query: &Document, update: &Document) -> DolomiteResult<UpdateResult> {
        self.update_with_options(query, update, &UpdateOptions::default())
    }

    pub fn update_with_options(
        &self,
        query: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> DolomiteResult<UpdateResult> {
        let ns = self.full_name();
        let filter = parse_query(query)?;
        let engine = UpdateEngine::new(update, options.array_filters())?;

        let mut state = self.inner.state.write();
        let mut matched = 0;
        let mut modified = 0;
        for (position, document) in state.store.iter_all()? {
            let (is_match, match_pos) = filter.matches(&document)?;
            if !is_match {
                continue;
            }
            matched += 1;
            let updated = engine.apply(&document, match_pos)?;
            if updated != document {
                state.replace(&ns, position, &document, &updated)?;
                self.emit(
                    OpKind::Update,
                    updated.clone(),
                    OplogEntry::id_selector(&updated),
                );
                modified += 1;
            }
            if !options.is_multi() {
                break;
            }
        }

        if matched == 0 && options.is_upsert() {
            let composed = engine.compose_upsert(query)?;
            let (id, stored) = state.insert(&ns, composed)?;
            self.emit(OpKind::Insert, stored, None);
            return Ok(UpdateResult::new(0, 0, Some(id)));
        }
        Ok(UpdateResult::new(matched, modified, None))
    }

    pub fn delete_many(&self, query: &Document) -> DolomiteResult<DeleteResult> {
        self.delete_with_limit(query, 0)
    }

    pub fn delete_one(&self, query: &Document) -> DolomiteResult<DeleteResult> {
        self.delete_with_limit(query, 1)
    }

    /// Deletes matching documents; limit 0 removes all matches, limit `n`
    /// removes the first `n`.
    pub fn delete_with_limit(&self, query: &Document, limit: usize) -> DolomiteResult<DeleteResult> {
        let filter = parse_query(query)?;
        let mut state = self.inner.state.write();
        let mut deleted = 0;
        for (position, document) in state.store.iter_all()? {
            if !filter.matches(&document)?.0 {
                continue;
            }
            state.remove(position, &document)?;
            let record = OplogEntry::id_selector(&document).unwrap_or(document);
            self.emit(OpKind::Delete, record, None);
            deleted += 1;
            if limit != 0 && deleted >= limit {
                break;
            }
        }
        Ok(DeleteResult::new(deleted))
    }

    /// Atomically matches one document, applies an update or removal, and
    /// returns the pre-image or post-image.
    pub fn find_and_modify(
        &self,
        options: &FindAndModifyOptions,
    ) -> DolomiteResult<Option<Document>> {
        options.validate()?;
        let ns = self.full_name();
        let filter = parse_query(&options.query)?;

        let mut state = self.inner.state.write();
        let mut candidates = Vec::new();
        for (position, document) in state.store.iter_all()? {
            let (is_match, match_pos) = filter.matches(&document)?;
            if is_match {
                candidates.push((position, document, match_pos));
            }
        }
        if let Some(sort) = &options.sort {
            candidates.sort_by(|(_, a, _), (_, b, _)| sort.compare(a, b));
        }

        let selected = candidates.into_iter().next();
        let returned = match selected {
            Some((position, document, match_pos)) => {
                if options.remove {
                    state.remove(position, &document)?;
                    let record =
                        OplogEntry::id_selector(&document).unwrap_or_else(|| document.clone());
                    self.emit(OpKind::Delete, record, None);
                    Some(document)
                } else {
                    let update = options.update.as_ref().ok_or_else(|| {
                        DolomiteError::new(
                            "Either an update or remove=true must be specified",
                            ErrorKind::FailedToParse,
                        )
                    })?;
                    let engine = UpdateEngine::new(update, &options.array_filters)?;
                    let updated = engine.apply(&document, match_pos)?;
                    if updated != document {
                        state.replace(&ns, position, &document, &updated)?;
                        self.emit(
                            OpKind::Update,
                            updated.clone(),
                            OplogEntry::id_selector(&updated),
                        );
                    }
                    Some(if options.return_new { updated } else { document })
                }
            }
            None if options.upsert && !options.remove => {
                let update = options.update.as_ref().ok_or_else(|| {
                    DolomiteError::new(
                        "Either an update or remove=true must be specified",
                        ErrorKind::FailedToParse,
                    )
                })?;
                let engine = UpdateEngine::new(update, &options.array_filters)?;
                let composed = engine.compose_upsert(&options.query)?;
                let (_, stored) = state.insert(&ns, composed)?;
                self.emit(OpKind::Insert, stored.clone(), None);
                if options.return_new {
                    Some(stored)
                } else {
                    None
                }
            }
            None => None,
        };

        match (returned, &options.fields) {
            (Some(document), Some(projection)) => Ok(Some(projection.project(&document)?)),
            (returned, _) => Ok(returned),
        }
    }

    /// Runs an aggregation pipeline over this collection.
    pub fn aggregate(&self, stages: &[Document]) -> DolomiteResult<Vec<Document>> {
        self.aggregate_with_token(stages, CancellationToken::new())
    }

    /// Runs an aggregation pipeline with a cancellation token checked at
    /// stage boundaries and between documents.
    pub fn aggregate_with_token(
        &self,
        stages: &[Document],
        cancel: CancellationToken,
    ) -> DolomiteResult<Vec<Document>> {
        let pipeline = Pipeline::new(stages)?;
        // the source snapshot materializes under the shared lock and is
        // released before any cross-collection stage takes another lock
        let source = self.snapshot()?;
        let ctx = StageContext {
            engine: self.engine().ok(),
            database: self.inner.database.clone(),
            cancel,
        };
        pipeline.run_to_vec(source, &ctx)
    }

    /// Creates a single-field index. Creating an index that already exists
    /// is a no-op.
    pub fn ensure_index(&self, field: &str, unique: bool) -> DolomiteResult<()> {
        let ns = self.full_name();
        let descriptor = IndexDescriptor::new(field, unique);
        let mut state = self.inner.state.write();
        if state
            .indexes
            .iter()
            .any(|index| index.descriptor().name() == descriptor.name())
        {
            return Ok(());
        }
        let mut index = Index::new(descriptor);
        for (position, document) in state.store.iter_all()? {
            index.check_unique(&document, &ns)?;
            index.add(&document, position);
        }
        state.indexes.push(index);
        Ok(())
    }

    pub fn drop_index(&self, name: &str) -> DolomiteResult<()> {
        let mut state = self.inner.state.write();
        let before = state.indexes.len();
        state.indexes.retain(|index| index.descriptor().name() != name);
        if state.indexes.len() == before {
            return Err(DolomiteError::new(
                &format!("index not found with name [{}]", name),
                ErrorKind::IndexNotFound,
            ));
        }
        Ok(())
    }

    pub fn list_indexes(&self) -> Vec<IndexDescriptor> {
        self.inner
            .state
            .read()
            .indexes
            .iter()
            .map(|index| index.descriptor().clone())
            .collect()
    }

    /// Removes every document and index entry, and kills the namespace's
    /// open cursors.
    pub fn drop_contents(&self) -> DolomiteResult<()> {
        let mut state = self.inner.state.write();
        state.store.clear()?;
        state.id_positions.clear();
        for index in &mut state.indexes {
            index.clear();
        }
        drop(state);
        if let Ok(engine) = self.engine() {
            engine.cursors().kill_namespace(&self.full_name());
        }
        Ok(())
    }

    /// Materializes all documents under the shared lock.
    pub(crate) fn snapshot(&self) -> DolomiteResult<Vec<Document>> {
        let state = self.inner.state.read();
        Ok(state
            .store
            .iter_all()?
            .into_iter()
            .map(|(_, document)| document)
            .collect())
    }

    /// Runs a compiled query under the shared lock: match, sort, skip and
    /// limit, without projection.
    pub(crate) fn run_query_snapshot(
        &self,
        filter: &Filter,
        options: &FindOptions,
    ) -> DolomiteResult<Vec<Document>> {
        let token = options
            .max_time_ms()
            .map(|budget| CancellationToken::with_timeout(Duration::from_millis(budget)))
            .unwrap_or_default();
        let mut matched = Vec::new();
        {
            let state = self.inner.state.read();
            for (_, document) in state.store.iter_all()? {
                token.check()?;
                if filter.matches(&document)?.0 {
                    matched.push(document);
                }
            }
        }
        if let Some(sort) = options.sort() {
            matched.sort_by(|a, b| sort.compare(a, b));
        }
        let mut results: Vec<Document> = matched.into_iter().skip(options.skip()).collect();
        if let Some(limit) = options.limit() {
            results.truncate(limit);
        }
        Ok(results)
    }

    /// Replaces the whole content with new documents; used by `$out`.
    pub(crate) fn replace_contents(&self, documents: Vec<Document>) -> DolomiteResult<()> {
        let ns = self.full_name();
        let mut state = self.inner.state.write();
        state.store.clear()?;
        state.id_positions.clear();
        for index in &mut state.indexes {
            index.clear();
        }
        for document in documents {
            let (_, stored) = state.insert(&ns, document)?;
            self.emit(OpKind::Insert, stored, None);
        }
        Ok(())
    }

    /// Replaces the document with the given `_id`; used by `$merge`.
    pub(crate) fn replace_by_id(&self, id: &Value, document: Document) -> DolomiteResult<()> {
        let ns = self.full_name();
        let mut state = self.inner.state.write();
        let position = state
            .id_positions
            .get(&id.normalized())
            .copied()
            .ok_or_else(|| {
                DolomiteError::new(
                    &format!("document with _id {} not found", id),
                    ErrorKind::InternalError,
                )
            })?;
        let old = state.store.get(position)?.ok_or_else(|| {
            DolomiteError::new(
                &format!("document with _id {} not found", id),
                ErrorKind::InternalError,
            )
        })?;
        state.replace(&ns, position, &old, &document)?;
        self.emit(
            OpKind::Update,
            document.clone(),
            OplogEntry::id_selector(&document),
        );
        Ok(())
    }

    fn emit(&self, op: OpKind, o: Document, o2: Option<Document>) {
        if self.inner.oplog_enabled {
            self.inner
                .oplog
                .append(OplogEntry::new(&self.full_name(), op, o, o2));
        }
    }
}

impl CollectionState {
    /// Stores a new document: field-name validation, `_id` assignment,
    /// uniqueness enforcement and index maintenance.
    fn insert(&mut self, ns: &str, document: Document) -> DolomiteResult<(Value, Document)> {
        validate_field_names(&document)?;
        let mut document = document;
        let id = document.ensure_id();
        let id_key = id.normalized();
        if self.id_positions.contains_key(&id_key) {
            log::error!("Duplicate _id {} in {}", id, ns);
            return Err(DolomiteError::new(
                &format!(
                    "E11000 duplicate key error collection: {} index: _id_ dup key: {{ _id: {} }}",
                    ns, id
                ),
                ErrorKind::DuplicateKey,
            ));
        }
        for index in &self.indexes {
            index.check_unique(&document, ns)?;
        }
        let position = self.store.insert(document.clone())?;
        self.id_positions.insert(id_key, position);
        for index in &mut self.indexes {
            index.add(&document, position);
        }
        Ok((id, document))
    }

    /// Replaces a stored document and keeps every index consistent with the
    /// write; unique violations roll the index entries back.
    fn replace(
        &mut self,
        ns: &str,
        position: Position,
        old: &Document,
        new: &Document,
    ) -> DolomiteResult<()> {
        for index in &mut self.indexes {
            index.remove(old, position);
        }
        let violation = self
            .indexes
            .iter()
            .find_map(|index| index.check_unique(new, ns).err());
        if let Some(error) = violation {
            for index in &mut self.indexes {
                index.add(old, position);
            }
            return Err(error);
        }
        for index in &mut self.indexes {
            index.add(new, position);
        }
        self.store.update(position, new.clone())
    }

    fn remove(&mut self, position: Position, document: &Document) -> DolomiteResult<()> {
        self.store.remove(position)?;
        if let Some(id) = document.id() {
            self.id_positions.remove(&id.normalized());
        }
        for index in &mut self.indexes {
            index.remove(document, position);
        }
        Ok(())
    }
}

/// Options for `findAndModify`: match, optionally update or remove, and
/// return either the pre-image or post-image.
pub struct FindAndModifyOptions {
    query: Document,
    sort: Option<crate::aggregation::SortSpec>,
    update: Option<Document>,
    remove: bool,
    return_new: bool,
    fields: Option<crate::aggregation::Projection>,
    upsert: bool,
    array_filters: Vec<Document>,
}

impl FindAndModifyOptions {
    pub fn query(query: Document) -> FindAndModifyOptions {
        FindAndModifyOptions {
            query,
            sort: None,
            update: None,
            remove: false,
            return_new: false,
            fields: None,
            upsert: false,
            array_filters: Vec::new(),
        }
    }

    pub fn with_sort(mut self, spec: &Document) -> DolomiteResult<FindAndModifyOptions> {
        self.sort = Some(crate::aggregation::SortSpec::parse(spec)?);
        Ok(self)
    }

    pub fn with_update(mut self, update: Document) -> FindAndModifyOptions {
        self.update = Some(update);
        self
    }

    pub fn with_remove(mut self) -> FindAndModifyOptions {
        self.remove = true;
        self
    }

    /// Returns the post-image instead of the pre-image.
    pub fn with_return_new(mut self) -> FindAndModifyOptions {
        self.return_new = true;
        self
    }

    pub fn with_fields(mut self, spec: &Document) -> DolomiteResult<FindAndModifyOptions> {
        if !spec.is_empty() {
            self.fields = Some(crate::aggregation::Projection::new(spec)?);
        }
        Ok(self)
    }

    pub fn with_upsert(mut self) -> FindAndModifyOptions {
        self.upsert = true;
        self
    }

    pub fn with_array_filters(mut self, filters: Vec<Document>) -> FindAndModifyOptions {
        self.array_filters = filters;
        self
    }

    fn validate(&self) -> DolomiteResult<()> {
        if self.remove && self.update.is_some() {
            return Err(DolomiteError::new(
                "Cannot specify both an update and remove=true",
                ErrorKind::FailedToParse,
            ));
        }
        if self.remove && self.return_new {
            return Err(DolomiteError::new(
                "Cannot specify both new=true and remove=true; 'remove' always returns the \
                 deleted document",
                ErrorKind::FailedToParse,
            ));
        }
        if !self.remove && self.update.is_none() {
            return Err(DolomiteError::new(
                "Either an update or remove=true must be specified",
                ErrorKind::FailedToParse,
            ));
        }
        Ok(())
    }
}
