use dolomite::collection::FindOptions;
use dolomite::common::Value;
use dolomite::doc;
use dolomite::errors::ErrorKind;
use dolomite::oplog::OpKind;
use dolomite_int_test::test_util::{create_test_engine, insert_test_documents};

#[test]
fn test_insert_assigns_object_id() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();

    let id = collection.insert_one(doc! { name: "Alice" }).unwrap();
    assert!(matches!(id, Value::ObjectId(_)));

    let found = collection.find_one(&doc! { name: "Alice" }).unwrap().unwrap();
    assert_eq!(found.id(), Some(&id));
    // the generated id leads the document
    assert_eq!(found.keys().next().map(String::as_str), Some("_id"));
}

#[test]
fn test_insert_duplicate_id_is_rejected() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();

    collection.insert_one(doc! { "_id": 1, name: "Alice" }).unwrap();
    let result = collection.insert_many(vec![doc! { "_id": 1, name: "Bob" }], true).unwrap();
    assert_eq!(result.inserted_count(), 0);
    assert_eq!(result.write_errors().len(), 1);
    assert_eq!(result.write_errors()[0].code(), 11000);
    assert!(result.write_errors()[0]
        .message()
        .contains("E11000 duplicate key error collection: test.people index: _id_"));
}

#[test]
fn test_ordered_insert_aborts_at_first_failure() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    collection.insert_one(doc! { "_id": 2 }).unwrap();

    let batch = vec![doc! { "_id": 1 }, doc! { "_id": 2 }, doc! { "_id": 3 }];
    let result = collection.insert_many(batch.clone(), true).unwrap();
    assert_eq!(result.inserted_count(), 1);
    assert_eq!(result.write_errors().len(), 1);
    assert_eq!(result.write_errors()[0].index(), 1);
    assert_eq!(collection.len().unwrap(), 2);

    // unordered continues past the failure
    let collection = engine.collection("test.people2").unwrap();
    collection.insert_one(doc! { "_id": 2 }).unwrap();
    let result = collection.insert_many(batch, false).unwrap();
    assert_eq!(result.inserted_count(), 2);
    assert_eq!(result.write_errors().len(), 1);
    assert_eq!(collection.len().unwrap(), 3);
}

#[test]
fn test_insert_rejects_dollar_fields() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    let mut bad = dolomite::Document::new();
    bad.put("$bad", 1).unwrap();
    let result = collection.insert_many(vec![bad], true).unwrap();
    assert_eq!(result.write_errors().len(), 1);
    assert_eq!(result.write_errors()[0].code(), 52);

    // reference keys pass through unchanged
    let mut reference = dolomite::Document::new();
    reference.put("$ref", "other").unwrap();
    reference.put("$id", 1).unwrap();
    collection.insert_one(reference).unwrap();
}

#[test]
fn test_find_with_sort_skip_limit_projection() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    insert_test_documents(&collection).unwrap();

    let options = FindOptions::new()
        .with_sort(&doc! { age: (-1) })
        .unwrap()
        .with_skip(1)
        .with_limit(1)
        .with_projection(&doc! { "_id": 0, first_name: 1, age: 1 })
        .unwrap();
    let results = collection.find(&doc! {}, &options).unwrap();
    assert_eq!(results, vec![doc! { first_name: "fn1", age: 30 }]);
}

#[test]
fn test_find_with_operators() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    insert_test_documents(&collection).unwrap();

    let results = collection
        .find(&doc! { age: { "$gt": 26 } }, &FindOptions::new())
        .unwrap();
    assert_eq!(results.len(), 2);

    let results = collection
        .find(&doc! { tags: "b" }, &FindOptions::new())
        .unwrap();
    assert_eq!(results.len(), 2);

    let results = collection
        .find(
            &doc! { "$or": [{ first_name: "fn1" }, { first_name: "fn3" }] },
            &FindOptions::new(),
        )
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[test]
fn test_count_and_distinct() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    insert_test_documents(&collection).unwrap();

    assert_eq!(collection.count(&doc! {}).unwrap(), 3);
    assert_eq!(collection.count(&doc! { age: { "$lt": 35 } }).unwrap(), 2);

    // arrays contribute their elements, de-duplicated
    let tags = collection.distinct("tags", &doc! {}).unwrap();
    assert_eq!(
        tags,
        vec![Value::from("a"), Value::from("b"), Value::from("c")]
    );
}

#[test]
fn test_delete_with_limit() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    insert_test_documents(&collection).unwrap();

    let result = collection.delete_one(&doc! { tags: "b" }).unwrap();
    assert_eq!(result.deleted(), 1);
    assert_eq!(collection.len().unwrap(), 2);

    let result = collection.delete_many(&doc! {}).unwrap();
    assert_eq!(result.deleted(), 2);
    assert!(collection.is_empty().unwrap());
}

#[test]
fn test_insert_then_delete_round_trip() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    insert_test_documents(&collection).unwrap();
    let before = collection
        .find(&doc! {}, &FindOptions::new())
        .unwrap();

    let id = collection.insert_one(doc! { name: "temp" }).unwrap();
    let mut selector = dolomite::Document::new();
    selector.put("_id", id).unwrap();
    assert_eq!(collection.delete_many(&selector).unwrap().deleted(), 1);

    let after = collection.find(&doc! {}, &FindOptions::new()).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_unique_index_enforcement() {
    let engine = create_test_engine();
    let collection = engine.collection("test.users").unwrap();
    collection.ensure_index("email", true).unwrap();

    collection
        .insert_one(doc! { email: "a@example.com" })
        .unwrap();
    let result = collection
        .insert_many(vec![doc! { email: "a@example.com" }], true)
        .unwrap();
    assert_eq!(result.write_errors().len(), 1);
    assert_eq!(result.write_errors()[0].code(), 11000);
    assert!(result.write_errors()[0].message().contains("email_1"));

    // an update cannot create a duplicate either
    collection
        .insert_one(doc! { email: "b@example.com" })
        .unwrap();
    let err = collection
        .update_one(
            &doc! { email: "b@example.com" },
            &doc! { "$set": { email: "a@example.com" } },
        )
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
    // and the failed update left the document unchanged
    assert_eq!(
        collection.count(&doc! { email: "b@example.com" }).unwrap(),
        1
    );
}

#[test]
fn test_index_rebuild_rejects_existing_duplicates() {
    let engine = create_test_engine();
    let collection = engine.collection("test.users").unwrap();
    collection.insert_one(doc! { email: "x@example.com" }).unwrap();
    collection.insert_one(doc! { email: "x@example.com" }).unwrap();
    let err = collection.ensure_index("email", true).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
    assert!(collection.list_indexes().is_empty());
}

#[test]
fn test_oplog_emission() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();

    collection.insert_one(doc! { "_id": 1, a: 1 }).unwrap();
    collection
        .update_one(&doc! { "_id": 1 }, &doc! { "$set": { a: 2 } })
        .unwrap();
    // a no-op update emits nothing
    collection
        .update_one(&doc! { "_id": 1 }, &doc! { "$set": { a: 2 } })
        .unwrap();
    collection.delete_many(&doc! { "_id": 1 }).unwrap();

    let oplog = engine.oplog();
    let entries = oplog
        .as_any()
        .downcast_ref::<dolomite::oplog::MemoryOplog>()
        .map(|memory| memory.entries());
    let entries = entries.expect("test engine uses the memory oplog");
    let kinds: Vec<OpKind> = entries.iter().map(|entry| entry.op).collect();
    assert_eq!(kinds, vec![OpKind::Insert, OpKind::Update, OpKind::Delete]);
    assert!(entries.iter().all(|entry| entry.ns == "test.people"));
    // update entries carry the {_id} selector
    assert_eq!(
        entries[1].o2.as_ref().map(|selector| selector.len()),
        Some(1)
    );
    // timestamps are strictly increasing
    assert!(entries.windows(2).all(|pair| pair[0].ts < pair[1].ts));
}

#[test]
fn test_drop_collection_resets_state() {
    let engine = create_test_engine();
    let collection = engine.collection("test.tmp").unwrap();
    insert_test_documents(&collection).unwrap();
    collection.ensure_index("age", false).unwrap();

    engine.drop_collection("test.tmp").unwrap();
    let recreated = engine.collection("test.tmp").unwrap();
    assert!(recreated.is_empty().unwrap());
}
